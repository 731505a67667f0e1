//! Activation Functions
//!
//! The LSTM cell uses exactly two nonlinearities: the logistic sigmoid for
//! the forget, input and output gates, and tanh for the candidate and for
//! squashing the cell state into the hidden state.
//!
//! ## Derivatives on Activation Values
//!
//! Both derivatives are written in terms of the function's **output**, not
//! its input. The forward pass keeps the activated gate values in the trace,
//! so the backward pass never needs the pre-activation sums:
//!
//! ```text
//! y = sigmoid(x)   =>   dy/dx = y · (1 - y)
//! y = tanh(x)      =>   dy/dx = 1 - y²
//! ```

use crate::tensor::Tensor;

/// Logistic sigmoid of a scalar
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Sigmoid derivative, given the sigmoid output `y`
#[inline]
pub fn dsigmoid(y: f64) -> f64 {
    y * (1.0 - y)
}

/// Tanh derivative, given the tanh output `y`
#[inline]
pub fn dtanh(y: f64) -> f64 {
    1.0 - y * y
}

/// Element-wise sigmoid (forward pass)
pub fn sigmoid_forward(x: &Tensor) -> Tensor {
    x.map(sigmoid)
}

/// Element-wise tanh (forward pass)
pub fn tanh_forward(x: &Tensor) -> Tensor {
    x.map(f64::tanh)
}

/// Gradient through a sigmoid: `grad_out ⊙ y(1 - y)`
///
/// # Arguments
///
/// * `grad_out` - Gradient arriving at the sigmoid output
/// * `y` - Sigmoid output recorded during the forward pass
pub fn sigmoid_backward(grad_out: &Tensor, y: &Tensor) -> Tensor {
    grad_out.mul(&y.map(dsigmoid))
}

/// Gradient through a tanh: `grad_out ⊙ (1 - y²)`
///
/// # Arguments
///
/// * `grad_out` - Gradient arriving at the tanh output
/// * `y` - Tanh output recorded during the forward pass
pub fn tanh_backward(grad_out: &Tensor, y: &Tensor) -> Tensor {
    grad_out.mul(&y.map(dtanh))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_values() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-15);
        assert!(sigmoid(-800.0) >= 0.0);
        assert_eq!(sigmoid(800.0), 1.0);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let h = 1e-6;
        for &x in &[-2.0, -0.3, 0.0, 0.7, 1.9] {
            let numeric_sig = (sigmoid(x + h) - sigmoid(x - h)) / (2.0 * h);
            assert!((dsigmoid(sigmoid(x)) - numeric_sig).abs() < 1e-8);

            let numeric_tanh = ((x + h).tanh() - (x - h).tanh()) / (2.0 * h);
            assert!((dtanh(x.tanh()) - numeric_tanh).abs() < 1e-8);
        }
    }

    #[test]
    fn test_backward_scales_incoming_gradient() {
        let y = Tensor::new(vec![0.5, 0.0], vec![2, 1]);
        let grad = Tensor::new(vec![2.0, 3.0], vec![2, 1]);

        assert_eq!(sigmoid_backward(&grad, &y).data, vec![0.5, 0.0]);
        assert_eq!(tanh_backward(&grad, &y).data, vec![1.5, 3.0]);
    }
}
