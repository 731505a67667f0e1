//! Training Driver
//!
//! Composes the model's entry points (forward, backward, sample) with the
//! Adagrad optimizer into a truncated-BPTT training loop.
//!
//! ## Batched Stream
//!
//! The encoded corpus is cut to a multiple of `seq_length × batch_size` and
//! reshaped row-major into `batch_size` parallel streams:
//!
//! ```text
//! ids: [0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 ...]
//! batch 2:
//!   row 0: 0 1 2 3 4 5 6 7 8
//!   row 1: 9 10 11 12 13 14 15 16 17
//! ```
//!
//! A cursor `p` sweeps left to right in steps of `seq_length`. Each window
//! feeds columns `p..p+T` as inputs and `p+1..p+1+T` as targets, transposed
//! to `[T, batch]`. Every row continues its own text, so the recurrent state
//! from one window is a valid starting state for the next. When the window
//! would run off the end the cursor rewinds to 0 and the state is reset.
//!
//! ## One Iteration
//!
//! ```text
//! window → (reset state on wrap) → forward → keep final state
//!        → backward (clipped) → grad norm → Adagrad → p += seq_length
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use char_lstm::{CharLstm, CharStream, CharVocab, Config, Trainer, TrainingConfig};
//!
//! let text = std::fs::read_to_string("input.txt")?;
//! let vocab = CharVocab::from_text(&text)?;
//! let config = TrainingConfig::default();
//!
//! let stream = CharStream::new(&vocab.encode(&text)?, config.batch_size, config.seq_length)?;
//! let model = CharLstm::with_seed(&Config::new(vocab.vocab_size()), 42)?;
//! let mut trainer = Trainer::new(model, stream, config)?;
//!
//! let stats = trainer.train_step();
//! println!("loss {:.3}", stats.loss);
//! # Ok::<(), char_lstm::LstmError>(())
//! ```

use crate::checkpoint::Checkpoint;
use crate::error::{LstmError, LstmResult};
use crate::gradients::compute_grad_norm;
use crate::lstm::LstmState;
use crate::model::CharLstm;
use crate::optimizer::{adagrad_update, AdagradOptimizer};
use crate::training_logger::TrainingLogger;
use crate::vocab::CharVocab;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Training hyperparameters
///
/// Every `*_every` interval of 0 disables that action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Time steps per truncated window
    pub seq_length: usize,
    /// Parallel streams per window
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Clamp gradient elements into [-1, 1] before the update
    pub clip_gradients: bool,
    /// Stop after this many updates
    pub max_updates: usize,
    pub print_every: usize,
    pub sample_every: usize,
    /// Characters generated per sample
    pub sample_length: usize,
    pub predict_every: usize,
    pub checkpoint_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seq_length: 128,
            batch_size: 8,
            learning_rate: 0.1,
            clip_gradients: true,
            max_updates: 5000,
            print_every: 20,
            sample_every: 200,
            sample_length: 2000,
            predict_every: 100,
            checkpoint_every: 1000,
        }
    }
}

impl TrainingConfig {
    /// Short windows and a short run for quick experiments
    pub fn tiny() -> Self {
        Self {
            seq_length: 16,
            batch_size: 2,
            learning_rate: 0.1,
            clip_gradients: true,
            max_updates: 200,
            print_every: 20,
            sample_every: 100,
            sample_length: 200,
            predict_every: 100,
            checkpoint_every: 0,
        }
    }

    pub fn validate(&self) -> LstmResult<()> {
        if self.seq_length == 0 || self.batch_size == 0 {
            return Err(LstmError::InvalidConfig(format!(
                "seq_length ({}) and batch_size ({}) must be positive",
                self.seq_length, self.batch_size
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(LstmError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

fn due(every: usize, iteration: usize) -> bool {
    every > 0 && iteration % every == 0
}

/// One truncated window of the batched stream
#[derive(Clone, Debug, PartialEq)]
pub struct Window {
    /// `inputs[t][b]`
    pub inputs: Vec<Vec<usize>>,
    /// `targets[t][b]`, the inputs shifted one column right
    pub targets: Vec<Vec<usize>>,
    /// Cursor rewound to 0 for this window; the recurrent state must restart
    pub wrapped: bool,
    /// Column the window starts at
    pub position: usize,
}

/// Corpus reshaped into `[batch_size, columns]` with a sweeping cursor
#[derive(Clone, Debug)]
pub struct CharStream {
    data: Vec<usize>,
    batch_size: usize,
    seq_length: usize,
    columns: usize,
    position: usize,
    started: bool,
}

impl CharStream {
    /// Build the stream from encoded ids
    ///
    /// # Errors
    ///
    /// - [`LstmError::InvalidConfig`] if `batch_size` or `seq_length` is 0
    /// - [`LstmError::CorpusTooShort`] if fewer than `seq_length + 1`
    ///   columns remain after truncation
    pub fn new(ids: &[usize], batch_size: usize, seq_length: usize) -> LstmResult<Self> {
        if batch_size == 0 || seq_length == 0 {
            return Err(LstmError::InvalidConfig(format!(
                "batch_size ({}) and seq_length ({}) must be positive",
                batch_size, seq_length
            )));
        }

        let chunk = batch_size * seq_length;
        let usable = ids.len() / chunk * chunk;
        let columns = usable / batch_size;
        if columns <= seq_length {
            return Err(LstmError::CorpusTooShort(format!(
                "{} ids give {} columns per stream, need more than seq_length {}",
                ids.len(),
                columns,
                seq_length
            )));
        }

        Ok(Self {
            data: ids[..usable].to_vec(),
            batch_size,
            seq_length,
            columns,
            position: 0,
            started: false,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn seq_length(&self) -> usize {
        self.seq_length
    }

    /// Length of each row
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Column the next window will start at (before any wrap)
    pub fn position(&self) -> usize {
        self.position
    }

    /// Continue from a saved cursor, e.g. when resuming a run
    pub fn resume_at(&mut self, position: usize) {
        self.position = position;
        self.started = true;
    }

    /// Take the next window and advance the cursor by `seq_length`
    pub fn next_window(&mut self) -> Window {
        let wrapped = !self.started || self.position + self.seq_length + 1 >= self.columns;
        if wrapped {
            self.position = 0;
        }
        self.started = true;

        let p = self.position;
        let column_slice = |offset: usize| -> Vec<Vec<usize>> {
            (0..self.seq_length)
                .map(|t| {
                    (0..self.batch_size)
                        .map(|b| self.data[b * self.columns + p + offset + t])
                        .collect()
                })
                .collect()
        };
        let inputs = column_slice(0);
        let targets = column_slice(1);

        self.position += self.seq_length;
        Window {
            inputs,
            targets,
            wrapped,
            position: p,
        }
    }
}

/// Outcome of one training iteration
#[derive(Clone, Debug, PartialEq)]
pub struct StepStats {
    /// Index of this iteration (0-based)
    pub iteration: usize,
    /// Window loss summed over time and batch
    pub loss: f64,
    pub smooth_loss: f64,
    /// L2 norm of the gradients actually applied
    pub grad_norm: f64,
    pub wrapped: bool,
}

/// Owns the model and all mutable training state for one run
pub struct Trainer {
    model: CharLstm,
    optimizer: AdagradOptimizer,
    stream: CharStream,
    state: LstmState,
    config: TrainingConfig,
    iteration: usize,
    smooth_loss: f64,
}

impl Trainer {
    pub fn new(model: CharLstm, stream: CharStream, config: TrainingConfig) -> LstmResult<Self> {
        config.validate()?;
        if stream.batch_size() != config.batch_size || stream.seq_length() != config.seq_length {
            return Err(LstmError::InvalidConfig(format!(
                "stream is {}×{} (batch × seq) but config asks for {}×{}",
                stream.batch_size(),
                stream.seq_length(),
                config.batch_size,
                config.seq_length
            )));
        }

        let vocab_size = model.config().vocab_size as f64;
        let smooth_loss = -(1.0 / vocab_size).ln() * config.seq_length as f64;
        let optimizer = AdagradOptimizer::new(&model);
        let state = LstmState::zeros(model.config().hidden_size, config.batch_size);

        Ok(Self {
            model,
            optimizer,
            stream,
            state,
            config,
            iteration: 0,
            smooth_loss,
        })
    }

    /// Resume from a checkpoint
    ///
    /// Restores parameters, optimizer memory, iteration counter, smoothed
    /// loss and stream cursor. The recurrent state restarts at zero.
    pub fn from_checkpoint(
        checkpoint: Checkpoint,
        mut stream: CharStream,
        config: TrainingConfig,
    ) -> LstmResult<Self> {
        let Checkpoint {
            model,
            optimizer,
            iteration,
            smooth_loss,
            position,
            ..
        } = checkpoint;

        if iteration > 0 {
            stream.resume_at(position);
        }
        let mut trainer = Self::new(model, stream, config)?;
        if let Some(optimizer) = optimizer {
            trainer.optimizer = optimizer;
        }
        trainer.iteration = iteration;
        if smooth_loss.is_finite() {
            trainer.smooth_loss = smooth_loss;
        }
        Ok(trainer)
    }

    pub fn model(&self) -> &CharLstm {
        &self.model
    }

    pub fn into_model(self) -> CharLstm {
        self.model
    }

    pub fn optimizer(&self) -> &AdagradOptimizer {
        &self.optimizer
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Number of updates applied so far
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn smooth_loss(&self) -> f64 {
        self.smooth_loss
    }

    /// Recurrent state that the next window will start from
    pub fn state(&self) -> &LstmState {
        &self.state
    }

    /// Snapshot the full training state
    pub fn checkpoint(&self, vocab: Option<&CharVocab>) -> Checkpoint {
        Checkpoint {
            model: self.model.clone(),
            optimizer: Some(self.optimizer.clone()),
            vocab: vocab.cloned(),
            iteration: self.iteration,
            smooth_loss: self.smooth_loss,
            position: self.stream.position(),
        }
    }

    fn next_window(&mut self) -> Window {
        let window = self.stream.next_window();
        if window.wrapped {
            self.state = LstmState::zeros(self.model.config().hidden_size, self.config.batch_size);
        }
        window
    }

    fn step_on(&mut self, window: Window) -> StepStats {
        let (loss, trace, final_state) =
            self.model
                .forward(&window.inputs, &window.targets, self.state.clone());
        self.state = final_state;

        let grads = self.model.backward(trace, self.config.clip_gradients);
        let grad_norm = compute_grad_norm(&grads);

        self.smooth_loss =
            self.smooth_loss * 0.999 + loss / self.config.batch_size as f64 * 0.001;

        adagrad_update(
            &mut self.model,
            &grads,
            &mut self.optimizer,
            self.config.learning_rate,
        );

        let stats = StepStats {
            iteration: self.iteration,
            loss,
            smooth_loss: self.smooth_loss,
            grad_norm,
            wrapped: window.wrapped,
        };
        self.iteration += 1;
        stats
    }

    /// Run one iteration on the next window
    pub fn train_step(&mut self) -> StepStats {
        let window = self.next_window();
        self.step_on(window)
    }

    /// Generate text from a fresh batch-1 state
    pub fn sample_text<R: Rng + ?Sized>(
        &self,
        vocab: &CharVocab,
        seed: usize,
        length: usize,
        rng: &mut R,
    ) -> String {
        let state = LstmState::zeros(self.model.config().hidden_size, 1);
        let ids = self.model.sample(&state, seed, length, rng);
        vocab.decode(&ids)
    }

    /// Train until `max_updates`, logging, sampling and checkpointing
    ///
    /// Files go under `run_dir`: `predictions/prediction_iter{N}.txt`,
    /// `checkpoint_iter{N}.ckpt` and `checkpoint_final.ckpt`.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, on a vocabulary that does not match the model,
    /// and with [`LstmError::Diverged`] as soon as a window loss is not
    /// finite.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        vocab: &CharVocab,
        logger: &mut TrainingLogger,
        rng: &mut R,
        run_dir: &Path,
    ) -> LstmResult<()> {
        if vocab.vocab_size() != self.model.config().vocab_size {
            return Err(LstmError::InvalidConfig(format!(
                "vocabulary has {} characters, model expects {}",
                vocab.vocab_size(),
                self.model.config().vocab_size
            )));
        }

        let predictions_dir = run_dir.join("predictions");
        let mut last_sample = String::new();

        while self.iteration < self.config.max_updates {
            let n = self.iteration;
            let window = self.next_window();

            if due(self.config.sample_every, n) {
                last_sample =
                    self.sample_text(vocab, window.inputs[0][0], self.config.sample_length, rng);
                logger.log_sample(&last_sample);
            }

            let stats = self.step_on(window);
            if !stats.loss.is_finite() {
                return Err(LstmError::Diverged {
                    iteration: n,
                    loss: stats.loss,
                });
            }

            if due(self.config.print_every, n) {
                logger.log(n, stats.loss, stats.smooth_loss, stats.grad_norm)?;
            }
            if due(self.config.predict_every, n) {
                logger.write_prediction(&predictions_dir, n, stats.smooth_loss, &last_sample)?;
            }
            if n > 0 && due(self.config.checkpoint_every, n) {
                let path = run_dir.join(format!("checkpoint_iter{}.ckpt", n));
                self.checkpoint(Some(vocab)).save(&path)?;
                println!("Saved checkpoint {}", path.display());
            }
        }

        let path = run_dir.join("checkpoint_final.ckpt");
        self.checkpoint(Some(vocab)).save(&path)?;
        println!("Saved checkpoint {}", path.display());
        Ok(())
    }
}
