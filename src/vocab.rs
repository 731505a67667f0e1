//! Character Vocabulary
//!
//! Maps between characters and the integer ids the model consumes. The
//! vocabulary is the sorted set of distinct characters in the training
//! corpus, so the same text always yields the same ids.
//!
//! ## Example
//!
//! ```rust
//! use char_lstm::CharVocab;
//!
//! let vocab = CharVocab::from_text("hello").unwrap();
//! assert_eq!(vocab.vocab_size(), 4); // e, h, l, o
//!
//! let ids = vocab.encode("hole").unwrap();
//! assert_eq!(ids, vec![1, 3, 2, 0]);
//! assert_eq!(vocab.decode(&ids), "hole");
//! ```
//!
//! ## Serialization
//!
//! A vocabulary serializes as its JSON character list; the reverse lookup
//! table is rebuilt (and the list validated) on load.

use crate::error::{LstmError, LstmResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<char>", into = "Vec<char>")]
pub struct CharVocab {
    chars: Vec<char>,
    index: HashMap<char, usize>,
}

impl CharVocab {
    /// Build the vocabulary of `text`
    ///
    /// # Errors
    ///
    /// Returns [`LstmError::CorpusTooShort`] for empty text.
    pub fn from_text(text: &str) -> LstmResult<Self> {
        let chars: Vec<char> = text.chars().collect::<BTreeSet<_>>().into_iter().collect();
        if chars.is_empty() {
            return Err(LstmError::CorpusTooShort(
                "cannot build a vocabulary from empty text".to_string(),
            ));
        }
        Ok(Self::from_sorted(chars))
    }

    fn from_sorted(chars: Vec<char>) -> Self {
        let index = chars.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Self { chars, index }
    }

    pub fn vocab_size(&self) -> usize {
        self.chars.len()
    }

    pub fn id_of(&self, c: char) -> Option<usize> {
        self.index.get(&c).copied()
    }

    pub fn char_of(&self, id: usize) -> Option<char> {
        self.chars.get(id).copied()
    }

    /// Encode text to ids, failing on the first character not in the vocabulary
    pub fn encode(&self, text: &str) -> LstmResult<Vec<usize>> {
        text.chars()
            .map(|c| self.id_of(c).ok_or(LstmError::UnknownChar(c)))
            .collect()
    }

    /// Decode ids to text
    ///
    /// Ids outside the vocabulary are skipped.
    pub fn decode(&self, ids: &[usize]) -> String {
        ids.iter().filter_map(|&id| self.char_of(id)).collect()
    }

    pub fn to_json(&self) -> LstmResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> LstmResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> LstmResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> LstmResult<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl TryFrom<Vec<char>> for CharVocab {
    type Error = String;

    fn try_from(chars: Vec<char>) -> Result<Self, Self::Error> {
        if chars.is_empty() {
            return Err("vocabulary is empty".to_string());
        }
        if chars.windows(2).any(|w| w[0] >= w[1]) {
            return Err("vocabulary characters must be sorted and distinct".to_string());
        }
        Ok(Self::from_sorted(chars))
    }
}

impl From<CharVocab> for Vec<char> {
    fn from(vocab: CharVocab) -> Self {
        vocab.chars
    }
}
