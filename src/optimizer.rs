//! Adagrad Optimizer
//!
//! Per-parameter adaptive learning rates from accumulated squared
//! gradients.
//!
//! ## Algorithm
//!
//! For each parameter θ with gradient g and memory m (initially zero):
//!
//! ```text
//! m += g²
//! θ -= lr · g / √(m + ε)
//! ```
//!
//! with ε = 1e-8. The memory only ever grows, so each parameter's effective
//! step size shrinks monotonically; parameters that see large or frequent
//! gradients slow down first.
//!
//! ## Implementation Notes
//!
//! The memory mirrors the model structure exactly (it is an
//! [`LstmGradients`] of accumulated squares), so every parameter has its
//! own accumulator of identical shape. Tensors with more than 1000 elements
//! are updated in parallel with Rayon.
//!
//! ## Example
//!
//! ```rust,no_run
//! use char_lstm::optimizer::{adagrad_update, AdagradOptimizer};
//! use char_lstm::{CharLstm, Config};
//!
//! let config = Config::new(65);
//! let mut model = CharLstm::with_seed(&config, 42).unwrap();
//! let mut optimizer = AdagradOptimizer::new(&model);
//!
//! # let grads = todo!();
//! adagrad_update(&mut model, &grads, &mut optimizer, 0.1);
//! ```

use crate::lstm::LstmGradients;
use crate::model::{CharLstm, ParamId};
use crate::tensor::assert_same_shape;
use rayon::prelude::*;

/// Default ε added under the square root
pub const ADAGRAD_EPSILON: f64 = 1e-8;

/// Adagrad optimizer state
#[derive(Clone, Debug)]
pub struct AdagradOptimizer {
    /// Running sum of squared gradients, one tensor per parameter
    pub memory: LstmGradients,
    pub epsilon: f64,
}

impl AdagradOptimizer {
    /// Zero memory shaped like `model`
    pub fn new(model: &CharLstm) -> Self {
        Self {
            memory: LstmGradients::zeros(model),
            epsilon: ADAGRAD_EPSILON,
        }
    }
}

/// Apply one Adagrad step to every parameter
///
/// # Arguments
///
/// * `model` - Parameters to update in place
/// * `grads` - Gradients from the backward pass (usually clipped)
/// * `optimizer` - Accumulated squared gradients, updated in place
/// * `lr` - Learning rate
///
/// # Panics
///
/// Panics if any parameter, gradient and memory tensor disagree in shape.
pub fn adagrad_update(
    model: &mut CharLstm,
    grads: &LstmGradients,
    optimizer: &mut AdagradOptimizer,
    lr: f64,
) {
    let epsilon = optimizer.epsilon;

    for id in ParamId::ALL {
        let param = model.param_mut(id);
        let grad = grads.get(id);
        let mem = optimizer.memory.get_mut(id);

        assert_same_shape(id.name(), param, grad);
        assert_same_shape(id.name(), param, mem);

        if param.data.len() > 1000 {
            param
                .data
                .par_iter_mut()
                .zip(grad.data.par_iter())
                .zip(mem.data.par_iter_mut())
                .for_each(|((p, &g), m)| {
                    *m += g * g;
                    *p -= lr * g / (*m + epsilon).sqrt();
                });
        } else {
            for ((p, &g), m) in param
                .data
                .iter_mut()
                .zip(&grad.data)
                .zip(mem.data.iter_mut())
            {
                *m += g * g;
                *p -= lr * g / (*m + epsilon).sqrt();
            }
        }
    }
}
