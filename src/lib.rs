//! Character-Level LSTM
//!
//! A single-layer LSTM language model over characters, trained with
//! truncated backpropagation through time and Adagrad. Every forward and
//! backward formula is written out by hand on a small dense `f64` tensor
//! type; there is no autograd.
//!
//! # Modules
//!
//! - [`tensor`] - Row-major tensors with the handful of ops the cell needs
//! - [`layers`] - Activations and the affine layer
//! - [`model`] - Configuration and the parameter store
//! - [`lstm`] - Forward recurrence, backpropagation through time, sampling
//! - [`gradients`] - Element-wise clipping and gradient norms
//! - [`gradcheck`] - Finite-difference verification of the backward pass
//! - [`optimizer`] - Adagrad
//! - [`vocab`] - Character ↔ id mapping
//! - [`train`] - Batched stream, training loop
//! - [`training_logger`] - CSV and console progress
//! - [`checkpoint`] - Binary save/load of a training run
//!
//! # Example
//!
//! ```rust
//! use char_lstm::{CharLstm, CharVocab, Config, LstmState};
//! use rand::SeedableRng;
//!
//! let vocab = CharVocab::from_text("hello world").unwrap();
//! let model = CharLstm::with_seed(&Config::tiny(vocab.vocab_size()), 42).unwrap();
//!
//! let ids = vocab.encode("hello").unwrap();
//! let inputs: Vec<Vec<usize>> = ids[..4].iter().map(|&id| vec![id]).collect();
//! let targets: Vec<Vec<usize>> = ids[1..].iter().map(|&id| vec![id]).collect();
//!
//! let (loss, trace, _state) = model.forward(&inputs, &targets, LstmState::zeros(32, 1));
//! let grads = model.backward(trace, true);
//! assert!(loss > 0.0);
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let sample = model.sample(&LstmState::zeros(32, 1), ids[0], 10, &mut rng);
//! println!("{}", vocab.decode(&sample));
//! # let _ = grads;
//! ```

pub mod checkpoint;
pub mod error;
pub mod gradcheck;
pub mod gradients;
pub mod layers;
pub mod lstm;
pub mod model;
pub mod optimizer;
pub mod tensor;
pub mod train;
pub mod training_logger;
pub mod vocab;

// Re-export main types for convenience
pub use checkpoint::Checkpoint;
pub use error::{LstmError, LstmResult};
pub use gradcheck::{grad_check, grad_check_all, GradCheckReport};
pub use gradients::{clip_gradients, compute_grad_norm};
pub use lstm::{LstmGradients, LstmState, LstmTrace};
pub use model::{CharLstm, Config, ParamId};
pub use optimizer::{adagrad_update, AdagradOptimizer};
pub use tensor::Tensor;
pub use train::{CharStream, StepStats, Trainer, TrainingConfig, Window};
pub use training_logger::TrainingLogger;
pub use vocab::CharVocab;
