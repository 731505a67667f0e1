//! Character-Level LSTM Model
//!
//! This module defines the model configuration and the parameter store: the
//! single aggregate that owns every learnable tensor. It is constructed once
//! at model init, lent immutably to the forward and backward passes, and
//! lent mutably only to the optimizer (and to the gradient checker, which
//! perturbs one scalar at a time and restores it).
//!
//! ## Architecture Overview
//!
//! ```text
//! token id ──one-hot──> x [vocab, batch]
//!     ↓ Wex
//! embedding [emb, batch]
//!     ↓ concat with h[t-1]
//! z = [h[t-1]; embedding]   [hidden + emb, batch]
//!     ↓ Wf, Wi, Wo, Wc (+ biases)
//! f, i, o = sigmoid(·)     c̃ = tanh(·)
//!     ↓
//! c[t] = f ⊙ c[t-1] + i ⊙ c̃
//! h[t] = o ⊙ tanh(c[t])
//!     ↓ Why, by
//! logits [vocab, batch] ──softmax──> probabilities
//! ```
//!
//! ## Parameters
//!
//! | name | shape |
//! |------|-------|
//! | Wex  | `[emb, vocab]` |
//! | Wf, Wi, Wo, Wc | `[hidden, hidden + emb]` |
//! | bf, bi, bo, bc | `[hidden, 1]` |
//! | Why  | `[vocab, hidden]` |
//! | by   | `[vocab, 1]` |
//!
//! ## Example
//!
//! ```rust
//! use char_lstm::{CharLstm, Config};
//!
//! let config = Config::tiny(5);
//! let model = CharLstm::with_seed(&config, 42).unwrap();
//! assert_eq!(model.num_parameters(), 5 * 16 + 4 * 32 * 48 + 4 * 32 + 5 * 32 + 5);
//! ```

use crate::error::{LstmError, LstmResult};
use crate::layers::{random_normal, TrainableLinear};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Model configuration
///
/// # Fields
///
/// - `vocab_size`: Number of distinct characters
/// - `emb_size`: Width of the character embedding
/// - `hidden_size`: Width of the hidden and cell state
/// - `init_std`: Standard deviation of the Gaussian weight initialization
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub vocab_size: usize,
    pub emb_size: usize,
    pub hidden_size: usize,
    pub init_std: f64,
}

impl Config {
    /// Reference-size model: 64-wide embeddings, 128 hidden units
    pub fn new(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            emb_size: 64,
            hidden_size: 128,
            init_std: 0.1,
        }
    }

    /// Small model for quick experiments and tests
    pub fn tiny(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            emb_size: 16,
            hidden_size: 32,
            init_std: 0.1,
        }
    }

    /// Width of the gate input `z = [h; embedding]`
    pub fn concat_size(&self) -> usize {
        self.hidden_size + self.emb_size
    }

    pub fn validate(&self) -> LstmResult<()> {
        if self.vocab_size == 0 {
            return Err(LstmError::InvalidConfig("vocab_size must be > 0".into()));
        }
        if self.emb_size == 0 || self.hidden_size == 0 {
            return Err(LstmError::InvalidConfig(format!(
                "emb_size ({}) and hidden_size ({}) must be > 0",
                self.emb_size, self.hidden_size
            )));
        }
        if !self.init_std.is_finite() || self.init_std < 0.0 {
            return Err(LstmError::InvalidConfig(format!(
                "init_std must be finite and non-negative, got {}",
                self.init_std
            )));
        }
        Ok(())
    }
}

/// Identifies one of the eleven parameter tensors
///
/// [`ParamId::ALL`] fixes the canonical order used by the optimizer, the
/// gradient checker and the checkpoint format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamId {
    ForgetWeight,
    InputWeight,
    OutputWeight,
    CandidateWeight,
    ForgetBias,
    InputBias,
    OutputBias,
    CandidateBias,
    Embedding,
    ProjectionWeight,
    ProjectionBias,
}

impl ParamId {
    pub const ALL: [ParamId; 11] = [
        ParamId::ForgetWeight,
        ParamId::InputWeight,
        ParamId::OutputWeight,
        ParamId::CandidateWeight,
        ParamId::ForgetBias,
        ParamId::InputBias,
        ParamId::OutputBias,
        ParamId::CandidateBias,
        ParamId::Embedding,
        ParamId::ProjectionWeight,
        ParamId::ProjectionBias,
    ];

    /// Short conventional name, as printed in gradient-check reports
    pub fn name(self) -> &'static str {
        match self {
            ParamId::ForgetWeight => "Wf",
            ParamId::InputWeight => "Wi",
            ParamId::OutputWeight => "Wo",
            ParamId::CandidateWeight => "Wc",
            ParamId::ForgetBias => "bf",
            ParamId::InputBias => "bi",
            ParamId::OutputBias => "bo",
            ParamId::CandidateBias => "bc",
            ParamId::Embedding => "Wex",
            ParamId::ProjectionWeight => "Why",
            ParamId::ProjectionBias => "by",
        }
    }
}

/// The parameter store of a single-layer character LSTM
///
/// Each gate is an affine layer over `z = [h[t-1]; embedding]`; the output
/// head is an affine layer over `h[t]`.
#[derive(Clone, Debug)]
pub struct CharLstm {
    pub(crate) embedding: Tensor,
    pub(crate) forget_gate: TrainableLinear,
    pub(crate) input_gate: TrainableLinear,
    pub(crate) output_gate: TrainableLinear,
    pub(crate) candidate: TrainableLinear,
    pub(crate) projection: TrainableLinear,
    pub(crate) config: Config,
}

impl CharLstm {
    /// Initialize all weights from `N(0, init_std²)`
    ///
    /// Gate biases start at zero; the output bias is drawn from the same
    /// Gaussian as the weights.
    pub fn new<R: Rng + ?Sized>(config: &Config, rng: &mut R) -> LstmResult<Self> {
        config.validate()?;
        let std = config.init_std;
        let concat = config.concat_size();
        let hidden = config.hidden_size;
        let vocab = config.vocab_size;

        let embedding = random_normal(vec![config.emb_size, vocab], std, rng)?;
        let forget_gate = TrainableLinear::new(concat, hidden, std, rng)?;
        let input_gate = TrainableLinear::new(concat, hidden, std, rng)?;
        let output_gate = TrainableLinear::new(concat, hidden, std, rng)?;
        let candidate = TrainableLinear::new(concat, hidden, std, rng)?;

        let mut projection = TrainableLinear::new(hidden, vocab, std, rng)?;
        projection.bias = random_normal(vec![vocab, 1], std, rng)?;

        Ok(Self {
            embedding,
            forget_gate,
            input_gate,
            output_gate,
            candidate,
            projection,
            config: config.clone(),
        })
    }

    /// Deterministic initialization from a seed
    pub fn with_seed(config: &Config, seed: u64) -> LstmResult<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new(config, &mut rng)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn param(&self, id: ParamId) -> &Tensor {
        match id {
            ParamId::ForgetWeight => &self.forget_gate.weight,
            ParamId::InputWeight => &self.input_gate.weight,
            ParamId::OutputWeight => &self.output_gate.weight,
            ParamId::CandidateWeight => &self.candidate.weight,
            ParamId::ForgetBias => &self.forget_gate.bias,
            ParamId::InputBias => &self.input_gate.bias,
            ParamId::OutputBias => &self.output_gate.bias,
            ParamId::CandidateBias => &self.candidate.bias,
            ParamId::Embedding => &self.embedding,
            ParamId::ProjectionWeight => &self.projection.weight,
            ParamId::ProjectionBias => &self.projection.bias,
        }
    }

    pub fn param_mut(&mut self, id: ParamId) -> &mut Tensor {
        match id {
            ParamId::ForgetWeight => &mut self.forget_gate.weight,
            ParamId::InputWeight => &mut self.input_gate.weight,
            ParamId::OutputWeight => &mut self.output_gate.weight,
            ParamId::CandidateWeight => &mut self.candidate.weight,
            ParamId::ForgetBias => &mut self.forget_gate.bias,
            ParamId::InputBias => &mut self.input_gate.bias,
            ParamId::OutputBias => &mut self.output_gate.bias,
            ParamId::CandidateBias => &mut self.candidate.bias,
            ParamId::Embedding => &mut self.embedding,
            ParamId::ProjectionWeight => &mut self.projection.weight,
            ParamId::ProjectionBias => &mut self.projection.bias,
        }
    }

    /// Expected shape of each parameter under `config`
    pub fn expected_shape(config: &Config, id: ParamId) -> Vec<usize> {
        let hidden = config.hidden_size;
        match id {
            ParamId::ForgetWeight
            | ParamId::InputWeight
            | ParamId::OutputWeight
            | ParamId::CandidateWeight => vec![hidden, config.concat_size()],
            ParamId::ForgetBias
            | ParamId::InputBias
            | ParamId::OutputBias
            | ParamId::CandidateBias => vec![hidden, 1],
            ParamId::Embedding => vec![config.emb_size, config.vocab_size],
            ParamId::ProjectionWeight => vec![config.vocab_size, hidden],
            ParamId::ProjectionBias => vec![config.vocab_size, 1],
        }
    }

    /// Rebuild a model from loaded tensors, checking every shape
    ///
    /// `tensors` must be in [`ParamId::ALL`] order.
    pub(crate) fn from_tensors(config: Config, tensors: Vec<Tensor>) -> LstmResult<Self> {
        config.validate()?;
        for (id, tensor) in ParamId::ALL.iter().zip(&tensors) {
            let expected = Self::expected_shape(&config, *id);
            if tensor.shape != expected {
                return Err(LstmError::InvalidCheckpoint(format!(
                    "{} has shape {:?}, config requires {:?}",
                    id.name(),
                    tensor.shape,
                    expected
                )));
            }
        }

        let [wf, wi, wo, wc, bf, bi, bo, bc, wex, why, by]: [Tensor; 11] =
            tensors.try_into().map_err(|t: Vec<Tensor>| {
                LstmError::InvalidCheckpoint(format!(
                    "expected {} parameter tensors, found {}",
                    ParamId::ALL.len(),
                    t.len()
                ))
            })?;

        Ok(Self {
            embedding: wex,
            forget_gate: TrainableLinear { weight: wf, bias: bf },
            input_gate: TrainableLinear { weight: wi, bias: bi },
            output_gate: TrainableLinear { weight: wo, bias: bo },
            candidate: TrainableLinear { weight: wc, bias: bc },
            projection: TrainableLinear { weight: why, bias: by },
            config,
        })
    }

    /// Total number of scalar parameters
    pub fn num_parameters(&self) -> usize {
        ParamId::ALL.iter().map(|&id| self.param(id).len()).sum()
    }
}
