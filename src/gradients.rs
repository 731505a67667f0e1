//! Gradient Utilities
//!
//! Helpers applied to a full set of [`LstmGradients`] between the backward
//! pass and the optimizer step.
//!
//! ## Components
//!
//! - **Gradient Norm**: a single L2 number for logging
//! - **Gradient Clipping**: element-wise clamp of every gradient value
//!
//! ## Element-wise Clipping
//!
//! Recurrent networks are prone to exploding gradients: a long product of
//! recurrent Jacobians can blow a single element up by orders of magnitude.
//! Every gradient element is clamped independently:
//!
//! ```text
//! g = min(max(g, -limit), limit)
//! ```
//!
//! Unlike norm rescaling, this changes the direction of the update, but it
//! bounds each parameter's step individually and needs no global reduction.
//!
//! ## Example
//!
//! ```rust,no_run
//! use char_lstm::gradients::{clip_gradients, compute_grad_norm};
//! # use char_lstm::lstm::LstmGradients;
//!
//! # let mut grads: LstmGradients = todo!();
//! let norm = compute_grad_norm(&grads);
//! println!("Gradient norm: {:.4}", norm);
//!
//! clip_gradients(&mut grads, 1.0);
//! ```

use crate::lstm::LstmGradients;
use crate::model::ParamId;
use rayon::prelude::*;

/// Compute the L2 norm of all gradients
///
/// # Returns
///
/// `√(Σ g²)` over every element of every parameter gradient
pub fn compute_grad_norm(grads: &LstmGradients) -> f64 {
    let sum_sq: f64 = ParamId::ALL
        .iter()
        .map(|&id| {
            grads
                .get(id)
                .data
                .par_iter()
                .map(|&val| val * val)
                .sum::<f64>()
        })
        .sum();

    sum_sq.sqrt()
}

/// Clamp every gradient element into `[-limit, limit]`
///
/// # Arguments
///
/// * `grads` - Gradients to clip (modified in place)
/// * `limit` - Absolute bound for each element (training uses 1.0)
pub fn clip_gradients(grads: &mut LstmGradients, limit: f64) {
    for id in ParamId::ALL {
        grads.get_mut(id).clamp_inplace(-limit, limit);
    }
}
