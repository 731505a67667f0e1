//! Error Types
//!
//! Fallible glue around the numeric core (configuration, vocabulary, data
//! stream, checkpoints, logging) reports failures through [`LstmError`].
//!
//! The recurrence itself does not return errors. Shape mismatches between a
//! parameter and its gradient are programming errors and panic with the
//! tensor names and shapes.

use thiserror::Error;

pub type LstmResult<T> = Result<T, LstmError>;

#[derive(Debug, Error)]
pub enum LstmError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Character {0:?} is not in the vocabulary")]
    UnknownChar(char),

    #[error("Corpus too short: {0}")]
    CorpusTooShort(String),

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("Training diverged at iteration {iteration}: loss is {loss}")]
    Diverged { iteration: usize, loss: f64 },
}
