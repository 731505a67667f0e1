//! Numerical Gradient Checking
//!
//! Verifies the hand-derived backward pass against central finite
//! differences, one scalar parameter at a time:
//!
//! ```text
//! numeric  = (L(θ + δ) - L(θ - δ)) / 2δ
//! rel_err  = |analytic - numeric| / |numeric + analytic|
//! ```
//!
//! Elements with `rel_err > 1e-3` are flagged. Every element costs two full
//! forward passes, so this is only meant for tiny models.
//!
//! ## Degenerate Denominator
//!
//! When `|numeric + analytic| < 1e-12` the ratio is undefined. The error is
//! then taken as `0` if the two gradients agree to within `1e-12` (both
//! vanish, e.g. an embedding column for a character absent from the window)
//! and `+∞` otherwise, so an opposite-signed pair is always flagged.
//!
//! ## Example
//!
//! ```rust,no_run
//! use char_lstm::gradcheck::{grad_check_all, DEFAULT_DELTA};
//! use char_lstm::{CharLstm, Config, LstmState};
//!
//! let config = Config { vocab_size: 5, emb_size: 4, hidden_size: 4, init_std: 0.1 };
//! let mut model = CharLstm::with_seed(&config, 42).unwrap();
//! let inputs = vec![vec![0, 1], vec![2, 3], vec![4, 0]];
//! let targets = vec![vec![1, 2], vec![3, 4], vec![0, 1]];
//!
//! let reports = grad_check_all(&mut model, &inputs, &targets, &LstmState::zeros(4, 2), DEFAULT_DELTA);
//! for report in &reports {
//!     report.print();
//! }
//! ```

use crate::lstm::LstmState;
use crate::model::{CharLstm, ParamId};
use crate::tensor::{assert_same_shape, Tensor};

/// Perturbation size δ
pub const DEFAULT_DELTA: f64 = 1e-4;

/// Elements whose relative error exceeds this are flagged
pub const REL_ERROR_THRESHOLD: f64 = 1e-3;

const DEGENERATE_EPS: f64 = 1e-12;

/// Relative error between an analytic and a numeric gradient
pub fn relative_error(analytic: f64, numeric: f64) -> f64 {
    let diff = (analytic - numeric).abs();
    let denom = (numeric + analytic).abs();
    if denom < DEGENERATE_EPS {
        if diff < DEGENERATE_EPS {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        diff / denom
    }
}

/// One element that failed the check
#[derive(Clone, Debug, PartialEq)]
pub struct FlaggedElement {
    /// Linear (row-major) index into the parameter tensor
    pub index: usize,
    pub numeric: f64,
    pub analytic: f64,
    pub rel_error: f64,
}

/// Per-tensor summary of a gradient check
#[derive(Clone, Debug)]
pub struct GradCheckReport {
    pub name: &'static str,
    pub num_elements: usize,
    pub flagged: Vec<FlaggedElement>,
    pub mean_numeric: f64,
    pub mean_analytic: f64,
    /// Mean over finite errors; degenerate `+∞` elements are only counted
    /// through `flagged` and `max_rel_error`
    pub mean_rel_error: f64,
    pub max_rel_error: f64,
}

impl GradCheckReport {
    /// Linear indices of all flagged elements
    pub fn flagged_indices(&self) -> Vec<usize> {
        self.flagged.iter().map(|f| f.index).collect()
    }

    pub fn passed(&self) -> bool {
        self.flagged.is_empty()
    }

    /// Fraction of elements within the threshold
    pub fn pass_fraction(&self) -> f64 {
        if self.num_elements == 0 {
            return 1.0;
        }
        1.0 - self.flagged.len() as f64 / self.num_elements as f64
    }

    pub fn print(&self) {
        println!("{}", self.name);
        for f in &self.flagged {
            println!(
                "  WARNING [{}] numeric {:.9}, analytic {:.9} => {:e}",
                f.index, f.numeric, f.analytic, f.rel_error
            );
        }
        println!(
            "  {} bad gradients out of {} elements",
            self.flagged.len(),
            self.num_elements
        );
        println!("  Average numerical grad:  {:.9}", self.mean_numeric);
        println!("  Average analytical grad: {:.9}", self.mean_analytic);
        println!("  Average relative error:  {:.9}", self.mean_rel_error);
        println!("  Max relative error:      {:e}", self.max_rel_error);
        if !self.flagged.is_empty() {
            println!("  Flagged indices: {:?}", self.flagged_indices());
        }
    }
}

/// Check one parameter tensor element by element
///
/// Each element is nudged by `+delta` and `-delta`, the window's loss is
/// recomputed from `state`, and the original value is restored before
/// moving on. The model is bit-identical afterwards.
///
/// # Arguments
///
/// * `model` - Model whose parameter is perturbed
/// * `id` - Parameter to check
/// * `analytic` - Gradient from `backward` with clipping disabled
/// * `inputs`, `targets`, `state` - The window the gradient was computed on
/// * `delta` - Perturbation size
///
/// # Panics
///
/// Panics if `analytic` does not have the parameter's shape.
pub fn grad_check(
    model: &mut CharLstm,
    id: ParamId,
    analytic: &Tensor,
    inputs: &[Vec<usize>],
    targets: &[Vec<usize>],
    state: &LstmState,
    delta: f64,
) -> GradCheckReport {
    assert_same_shape(id.name(), model.param(id), analytic);

    let num_elements = analytic.len();
    let mut flagged = Vec::new();
    let mut sum_numeric = 0.0;
    let mut sum_analytic = 0.0;
    let mut sum_rel = 0.0;
    let mut finite_rel = 0usize;
    let mut max_rel: f64 = 0.0;

    for i in 0..num_elements {
        let original = model.param(id).data[i];

        model.param_mut(id).data[i] = original + delta;
        let (loss_plus, _, _) = model.forward(inputs, targets, state.clone());
        model.param_mut(id).data[i] = original - delta;
        let (loss_minus, _, _) = model.forward(inputs, targets, state.clone());
        model.param_mut(id).data[i] = original;

        let numeric = (loss_plus - loss_minus) / (2.0 * delta);
        let grad = analytic.data[i];
        let rel_error = relative_error(grad, numeric);

        sum_numeric += numeric;
        sum_analytic += grad;
        if rel_error.is_finite() {
            sum_rel += rel_error;
            finite_rel += 1;
        }
        max_rel = max_rel.max(rel_error);

        if rel_error > REL_ERROR_THRESHOLD {
            flagged.push(FlaggedElement {
                index: i,
                numeric,
                analytic: grad,
                rel_error,
            });
        }
    }

    let n = num_elements.max(1) as f64;
    GradCheckReport {
        name: id.name(),
        num_elements,
        flagged,
        mean_numeric: sum_numeric / n,
        mean_analytic: sum_analytic / n,
        mean_rel_error: sum_rel / finite_rel.max(1) as f64,
        max_rel_error: max_rel,
    }
}

/// Run forward and an unclipped backward, then check every parameter
///
/// Reports come back in [`ParamId::ALL`] order: Wf, Wi, Wo, Wc, bf, bi, bo,
/// bc, Wex, Why, by.
pub fn grad_check_all(
    model: &mut CharLstm,
    inputs: &[Vec<usize>],
    targets: &[Vec<usize>],
    state: &LstmState,
    delta: f64,
) -> Vec<GradCheckReport> {
    let (_, trace, _) = model.forward(inputs, targets, state.clone());
    let grads = model.backward(trace, false);

    ParamId::ALL
        .iter()
        .map(|&id| grad_check(model, id, grads.get(id), inputs, targets, state, delta))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Config;

    fn small_model() -> CharLstm {
        let config = Config {
            vocab_size: 5,
            emb_size: 4,
            hidden_size: 4,
            init_std: 0.3,
        };
        CharLstm::with_seed(&config, 2024).unwrap()
    }

    fn window() -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let inputs = vec![vec![0, 3], vec![1, 4], vec![2, 2]];
        let targets = vec![vec![1, 4], vec![2, 2], vec![3, 0]];
        (inputs, targets)
    }

    #[test]
    fn test_relative_error_cases() {
        assert_eq!(relative_error(1.0, 1.0), 0.0);
        assert!((relative_error(1.1, 0.9) - 0.1).abs() < 1e-12);
        assert_eq!(relative_error(0.0, 0.0), 0.0);
        assert_eq!(relative_error(1e-14, -1e-14), 0.0);
        assert_eq!(relative_error(0.5, -0.5), f64::INFINITY);
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut model = small_model();
        let (inputs, targets) = window();

        let reports = grad_check_all(
            &mut model,
            &inputs,
            &targets,
            &LstmState::zeros(4, 2),
            DEFAULT_DELTA,
        );

        let names: Vec<&str> = reports.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec!["Wf", "Wi", "Wo", "Wc", "bf", "bi", "bo", "bc", "Wex", "Why", "by"]
        );

        let total: usize = reports.iter().map(|r| r.num_elements).sum();
        let flagged: usize = reports.iter().map(|r| r.flagged.len()).sum();
        assert_eq!(total, model.num_parameters());
        assert!(
            (flagged as f64) <= 0.01 * total as f64,
            "{} of {} elements flagged",
            flagged,
            total
        );
    }

    #[test]
    fn test_check_with_warm_state() {
        let mut model = small_model();
        let (inputs, targets) = window();
        let mut state = LstmState::zeros(4, 2);
        state.hidden = state.hidden.map(|_| 0.3);
        state.cell = state.cell.map(|_| -0.6);

        let reports = grad_check_all(&mut model, &inputs, &targets, &state, DEFAULT_DELTA);

        let forget = &reports[0];
        assert_eq!(forget.name, "Wf");
        assert!(forget.pass_fraction() >= 0.99);
    }

    #[test]
    fn test_corrupted_gradient_is_flagged() {
        let mut model = small_model();
        let (inputs, targets) = window();
        let state = LstmState::zeros(4, 2);

        let (_, trace, _) = model.forward(&inputs, &targets, state.clone());
        let grads = model.backward(trace, false);
        let mut bad = grads.get(ParamId::ProjectionBias).clone();
        bad.data[3] += 0.5;

        let report = grad_check(
            &mut model,
            ParamId::ProjectionBias,
            &bad,
            &inputs,
            &targets,
            &state,
            DEFAULT_DELTA,
        );

        assert_eq!(report.flagged_indices(), vec![3]);
        assert!(!report.passed());
        assert!(report.max_rel_error > REL_ERROR_THRESHOLD);
    }

    #[test]
    fn test_degenerate_element_stays_out_of_mean() {
        let mut model = small_model();
        let (inputs, targets) = window();
        let state = LstmState::zeros(4, 2);
        let id = ParamId::ProjectionBias;

        let (_, trace, _) = model.forward(&inputs, &targets, state.clone());
        let grads = model.backward(trace, false);

        // Same finite difference the checker computes for element 0
        let original = model.param(id).data[0];
        model.param_mut(id).data[0] = original + DEFAULT_DELTA;
        let (loss_plus, _, _) = model.forward(&inputs, &targets, state.clone());
        model.param_mut(id).data[0] = original - DEFAULT_DELTA;
        let (loss_minus, _, _) = model.forward(&inputs, &targets, state.clone());
        model.param_mut(id).data[0] = original;
        let numeric = (loss_plus - loss_minus) / (2.0 * DEFAULT_DELTA);
        assert!(numeric.abs() > 1e-6);

        let mut bad = grads.get(id).clone();
        bad.data[0] = -numeric;

        let report = grad_check(&mut model, id, &bad, &inputs, &targets, &state, DEFAULT_DELTA);

        assert_eq!(report.flagged_indices(), vec![0]);
        assert_eq!(report.max_rel_error, f64::INFINITY);
        assert!(report.mean_rel_error.is_finite());
        assert!(report.mean_rel_error < REL_ERROR_THRESHOLD);
    }

    #[test]
    fn test_parameters_restored_after_check() {
        let mut model = small_model();
        let before = model.clone();
        let (inputs, targets) = window();

        grad_check_all(&mut model, &inputs, &targets, &LstmState::zeros(4, 2), DEFAULT_DELTA);

        for id in ParamId::ALL {
            assert_eq!(model.param(id), before.param(id));
        }
    }

    #[test]
    #[should_panic(expected = "Shape mismatch for bf")]
    fn test_shape_mismatch_panics() {
        let mut model = small_model();
        let (inputs, targets) = window();
        let wrong = Tensor::zeros(vec![5, 1]);
        grad_check(
            &mut model,
            ParamId::ForgetBias,
            &wrong,
            &inputs,
            &targets,
            &LstmState::zeros(4, 2),
            DEFAULT_DELTA,
        );
    }
}
