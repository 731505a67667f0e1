//! Checkpointing
//!
//! Saves and restores everything needed to resume a training run or to
//! sample from a trained model.
//!
//! ## File Layout
//!
//! All integers are little-endian `u32` unless noted.
//!
//! ```text
//! "CHARLSTM_CKPT"                    magic
//! u8 version                         currently 1
//! u32 len, config JSON
//! 11 × tensor                        Wf Wi Wo Wc bf bi bo bc Wex Why by
//! u8 has_optimizer
//!   f64 epsilon, 11 × tensor         Adagrad memory, same order
//! u8 has_vocab
//!   u32 len, vocabulary JSON
//! u32 len, metadata JSON             iteration, smooth_loss, position
//!
//! tensor = u32 rank, rank × u32 dim, u32 len, len × f64
//! ```
//!
//! Loading checks the magic, the version and every tensor shape against the
//! stored config before anything is handed back.
//!
//! The recurrent state is not stored; a resumed run starts from zeros.

use crate::error::{LstmError, LstmResult};
use crate::lstm::LstmGradients;
use crate::model::{CharLstm, Config, ParamId};
use crate::optimizer::AdagradOptimizer;
use crate::tensor::Tensor;
use crate::vocab::CharVocab;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 13] = b"CHARLSTM_CKPT";
const VERSION: u8 = 1;
const MAX_RANK: usize = 8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub iteration: usize,
    /// `None` when the loss was not finite (JSON has no NaN)
    pub smooth_loss: Option<f64>,
    /// Data cursor within the batched stream
    pub position: usize,
}

pub struct Checkpoint {
    pub model: CharLstm,
    pub optimizer: Option<AdagradOptimizer>,
    pub vocab: Option<CharVocab>,
    pub iteration: usize,
    pub smooth_loss: f64,
    pub position: usize,
}

impl Checkpoint {
    /// Checkpoint holding only the model weights
    pub fn inference_only(model: CharLstm) -> Self {
        Self {
            model,
            optimizer: None,
            vocab: None,
            iteration: 0,
            smooth_loss: f64::NAN,
            position: 0,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> LstmResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> LstmResult<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> LstmResult<()> {
        w.write_all(MAGIC)?;
        w.write_all(&[VERSION])?;

        write_json(w, self.model.config())?;
        for id in ParamId::ALL {
            write_tensor(w, self.model.param(id))?;
        }

        match &self.optimizer {
            Some(opt) => {
                w.write_all(&[1])?;
                w.write_all(&opt.epsilon.to_le_bytes())?;
                for id in ParamId::ALL {
                    write_tensor(w, opt.memory.get(id))?;
                }
            }
            None => w.write_all(&[0])?,
        }

        match &self.vocab {
            Some(vocab) => {
                w.write_all(&[1])?;
                write_json(w, vocab)?;
            }
            None => w.write_all(&[0])?,
        }

        write_json(
            w,
            &CheckpointMetadata {
                iteration: self.iteration,
                smooth_loss: self.smooth_loss.is_finite().then_some(self.smooth_loss),
                position: self.position,
            },
        )
    }

    pub fn read_from<R: Read>(r: &mut R) -> LstmResult<Self> {
        let mut magic = [0u8; 13];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(LstmError::InvalidCheckpoint(
                "bad header, expected CHARLSTM_CKPT".to_string(),
            ));
        }

        let version = read_u8(r)?;
        if version != VERSION {
            return Err(LstmError::InvalidCheckpoint(format!(
                "unsupported version {}",
                version
            )));
        }

        let config: Config = read_json(r)?;
        let tensors = read_tensors(r)?;
        let model = CharLstm::from_tensors(config, tensors)?;

        let optimizer = if read_flag(r, "optimizer")? {
            let mut epsilon = [0u8; 8];
            r.read_exact(&mut epsilon)?;
            let mut memory = LstmGradients::zeros(&model);
            for (id, tensor) in ParamId::ALL.into_iter().zip(read_tensors(r)?) {
                if tensor.shape != model.param(id).shape {
                    return Err(LstmError::InvalidCheckpoint(format!(
                        "optimizer memory for {} has shape {:?}, parameter is {:?}",
                        id.name(),
                        tensor.shape,
                        model.param(id).shape
                    )));
                }
                *memory.get_mut(id) = tensor;
            }
            Some(AdagradOptimizer {
                memory,
                epsilon: f64::from_le_bytes(epsilon),
            })
        } else {
            None
        };

        let vocab = if read_flag(r, "vocabulary")? {
            let vocab: CharVocab = read_json(r)?;
            if vocab.vocab_size() != model.config().vocab_size {
                return Err(LstmError::InvalidCheckpoint(format!(
                    "vocabulary has {} characters, model expects {}",
                    vocab.vocab_size(),
                    model.config().vocab_size
                )));
            }
            Some(vocab)
        } else {
            None
        };

        let metadata: CheckpointMetadata = read_json(r)?;

        Ok(Self {
            model,
            optimizer,
            vocab,
            iteration: metadata.iteration,
            smooth_loss: metadata.smooth_loss.unwrap_or(f64::NAN),
            position: metadata.position,
        })
    }
}

fn write_u32<W: Write>(w: &mut W, value: usize) -> LstmResult<()> {
    let value = u32::try_from(value)
        .map_err(|_| LstmError::InvalidCheckpoint(format!("{} does not fit in u32", value)))?;
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_json<W: Write, T: Serialize>(w: &mut W, value: &T) -> LstmResult<()> {
    let json = serde_json::to_string(value)?;
    write_u32(w, json.len())?;
    w.write_all(json.as_bytes())?;
    Ok(())
}

fn write_tensor<W: Write>(w: &mut W, tensor: &Tensor) -> LstmResult<()> {
    write_u32(w, tensor.shape.len())?;
    for &dim in &tensor.shape {
        write_u32(w, dim)?;
    }
    write_u32(w, tensor.data.len())?;
    for &val in &tensor.data {
        w.write_all(&val.to_le_bytes())?;
    }
    Ok(())
}

fn read_u8<R: Read>(r: &mut R) -> LstmResult<u8> {
    let mut byte = [0u8; 1];
    r.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn read_flag<R: Read>(r: &mut R, section: &str) -> LstmResult<bool> {
    match read_u8(r)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(LstmError::InvalidCheckpoint(format!(
            "{} flag must be 0 or 1, found {}",
            section, other
        ))),
    }
}

fn read_u32<R: Read>(r: &mut R) -> LstmResult<usize> {
    let mut bytes = [0u8; 4];
    r.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes) as usize)
}

/// Read exactly `len` bytes, growing the buffer only as data arrives
fn read_section<R: Read>(r: &mut R, len: usize, what: &str) -> LstmResult<Vec<u8>> {
    let mut bytes = Vec::new();
    r.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(LstmError::InvalidCheckpoint(format!(
            "{} declares {} bytes, file has {}",
            what,
            len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn read_json<R: Read, T: for<'de> Deserialize<'de>>(r: &mut R) -> LstmResult<T> {
    let len = read_u32(r)?;
    let bytes = read_section(r, len, "JSON section")?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn read_tensor<R: Read>(r: &mut R) -> LstmResult<Tensor> {
    let rank = read_u32(r)?;
    if rank == 0 || rank > MAX_RANK {
        return Err(LstmError::InvalidCheckpoint(format!(
            "tensor rank {} out of range",
            rank
        )));
    }
    let shape = (0..rank).map(|_| read_u32(r)).collect::<LstmResult<Vec<_>>>()?;

    let len = read_u32(r)?;
    let expected = shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim));
    if expected != Some(len) {
        return Err(LstmError::InvalidCheckpoint(format!(
            "tensor of shape {:?} declares {} values",
            shape, len
        )));
    }

    let byte_len = len.checked_mul(8).ok_or_else(|| {
        LstmError::InvalidCheckpoint(format!("tensor of {} values is too large", len))
    })?;
    let bytes = read_section(r, byte_len, "tensor data")?;
    let data = bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            f64::from_le_bytes(word)
        })
        .collect();
    Ok(Tensor::new(data, shape))
}

fn read_tensors<R: Read>(r: &mut R) -> LstmResult<Vec<Tensor>> {
    ParamId::ALL.iter().map(|_| read_tensor(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lstm::LstmState;
    use crate::optimizer::adagrad_update;
    use tempfile::tempdir;

    fn trained_state() -> (CharLstm, AdagradOptimizer, CharVocab) {
        let vocab = CharVocab::from_text("abcde").unwrap();
        let config = Config {
            vocab_size: 5,
            emb_size: 3,
            hidden_size: 4,
            init_std: 0.1,
        };
        let mut model = CharLstm::with_seed(&config, 12).unwrap();
        let mut optimizer = AdagradOptimizer::new(&model);

        let inputs = vec![vec![0], vec![1], vec![2]];
        let targets = vec![vec![1], vec![2], vec![3]];
        let (_, trace, _) = model.forward(&inputs, &targets, LstmState::zeros(4, 1));
        let grads = model.backward(trace, true);
        adagrad_update(&mut model, &grads, &mut optimizer, 0.1);

        (model, optimizer, vocab)
    }

    #[test]
    fn test_full_checkpoint_restores_training_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.ckpt");
        let (model, optimizer, vocab) = trained_state();

        let checkpoint = Checkpoint {
            model: model.clone(),
            optimizer: Some(optimizer.clone()),
            vocab: Some(vocab.clone()),
            iteration: 1200,
            smooth_loss: 43.25,
            position: 640,
        };
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.model.config(), model.config());
        for id in ParamId::ALL {
            assert_eq!(loaded.model.param(id), model.param(id));
        }
        let loaded_opt = loaded.optimizer.unwrap();
        assert_eq!(loaded_opt.epsilon, optimizer.epsilon);
        for id in ParamId::ALL {
            assert_eq!(loaded_opt.memory.get(id), optimizer.memory.get(id));
        }
        assert_eq!(loaded.vocab, Some(vocab));
        assert_eq!(loaded.iteration, 1200);
        assert_eq!(loaded.smooth_loss, 43.25);
        assert_eq!(loaded.position, 640);
    }

    #[test]
    fn test_inference_only_checkpoint() {
        let (model, _, _) = trained_state();
        let mut bytes = Vec::new();
        Checkpoint::inference_only(model.clone())
            .write_to(&mut bytes)
            .unwrap();

        let loaded = Checkpoint::read_from(&mut bytes.as_slice()).unwrap();
        assert!(loaded.optimizer.is_none());
        assert!(loaded.vocab.is_none());
        assert!(loaded.smooth_loss.is_nan());
        assert_eq!(loaded.model.param(ParamId::Embedding), model.param(ParamId::Embedding));
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut bytes = b"NOT_A_CHECKPOINT_AT_ALL".to_vec();
        let err = Checkpoint::read_from(&mut bytes.as_slice()).err().unwrap();
        assert!(matches!(err, LstmError::InvalidCheckpoint(_)));
        bytes.clear();
        assert!(matches!(
            Checkpoint::read_from(&mut bytes.as_slice()),
            Err(LstmError::Io(_))
        ));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let (model, _, _) = trained_state();
        let mut bytes = Vec::new();
        Checkpoint::inference_only(model).write_to(&mut bytes).unwrap();
        bytes[MAGIC.len()] = 9;

        match Checkpoint::read_from(&mut bytes.as_slice()) {
            Err(LstmError::InvalidCheckpoint(msg)) => assert!(msg.contains("version 9")),
            other => panic!("expected InvalidCheckpoint, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let (model, _, _) = trained_state();
        let mut bytes = Vec::new();
        Checkpoint::inference_only(model).write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() / 2);

        assert!(Checkpoint::read_from(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_oversized_json_length_is_rejected() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(VERSION);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(b"{}");

        match Checkpoint::read_from(&mut bytes.as_slice()) {
            Err(LstmError::InvalidCheckpoint(msg)) => assert!(msg.contains("JSON section")),
            other => panic!("expected InvalidCheckpoint, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, MAX_RANK).unwrap();
        for _ in 0..MAX_RANK {
            bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        }
        write_u32(&mut bytes, 16).unwrap();

        let err = read_tensor(&mut bytes.as_slice()).err().unwrap();
        assert!(matches!(err, LstmError::InvalidCheckpoint(_)));
    }

    #[test]
    fn test_huge_tensor_with_missing_data_is_rejected() {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 2).unwrap();
        write_u32(&mut bytes, 65535).unwrap();
        write_u32(&mut bytes, 65535).unwrap();
        write_u32(&mut bytes, 65535 * 65535).unwrap();
        bytes.extend_from_slice(&1.0f64.to_le_bytes());

        match read_tensor(&mut bytes.as_slice()) {
            Err(LstmError::InvalidCheckpoint(msg)) => assert!(msg.contains("tensor data")),
            other => panic!("expected InvalidCheckpoint, got {:?}", other.err()),
        }
    }
}
