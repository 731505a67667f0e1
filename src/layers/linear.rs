//! Affine Layer
//!
//! Every learned projection in the cell is an affine map on column vectors:
//! the four gates read the concatenated `[h; embedding]` vector and the
//! output head reads the hidden state.
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  z [in_features, batch]
//! Weight: W [out_features, in_features]
//! Bias:   b [out_features, 1]
//! Output: y = W · z + b   [out_features, batch]
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! grad_W += grad_y · zᵀ
//! grad_b += Σ_batch grad_y
//! grad_z  = Wᵀ · grad_y
//! ```
//!
//! Gradients are **accumulated**, not returned fresh: backpropagation through
//! time visits the same layer once per time step and the per-step
//! contributions are summed.

use crate::error::{LstmError, LstmResult};
use crate::tensor::Tensor;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Draw a tensor of i.i.d. `N(0, std²)` values
///
/// `std` must be finite and non-negative.
pub fn random_normal<R: Rng + ?Sized>(
    shape: Vec<usize>,
    std: f64,
    rng: &mut R,
) -> LstmResult<Tensor> {
    if !(std.is_finite() && std >= 0.0) {
        return Err(LstmError::InvalidConfig(format!(
            "initialization std must be finite and non-negative, got {}",
            std
        )));
    }
    let normal = Normal::new(0.0, std).map_err(|e| {
        LstmError::InvalidConfig(format!("initialization std {}: {}", std, e))
    })?;
    let size: usize = shape.iter().product();
    let data = (0..size).map(|_| normal.sample(rng)).collect();
    Ok(Tensor::new(data, shape))
}

/// Affine layer `y = W · z + b`
#[derive(Clone, Debug)]
pub struct TrainableLinear {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl TrainableLinear {
    /// Create a layer with `N(0, std²)` weights and a zero bias
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        std: f64,
        rng: &mut R,
    ) -> LstmResult<Self> {
        Ok(Self {
            weight: random_normal(vec![out_features, in_features], std, rng)?,
            bias: Tensor::zeros(vec![out_features, 1]),
        })
    }

    pub fn in_features(&self) -> usize {
        self.weight.cols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.rows()
    }

    /// Forward pass: `W · z + b`
    ///
    /// The input is not cached here; the LSTM trace already keeps every
    /// `z[t]` and `h[t]` the backward pass needs.
    pub fn forward(&self, z: &Tensor) -> Tensor {
        self.weight.matmul(z).add(&self.bias)
    }

    /// Backward pass
    ///
    /// Accumulates the weight and bias gradients into `grads` and returns
    /// the gradient with respect to the input.
    ///
    /// # Arguments
    ///
    /// * `grad_out` - Gradient of the loss w.r.t. this layer's output `[out, batch]`
    /// * `z` - The input this layer saw in the forward pass `[in, batch]`
    /// * `grads` - Running gradient sums for this layer
    pub fn backward(&self, grad_out: &Tensor, z: &Tensor, grads: &mut LinearGradients) -> Tensor {
        grads.weight.add_assign(&grad_out.matmul(&z.transpose()));
        grads.bias.add_assign(&grad_out.sum_cols());
        self.weight.transpose().matmul(grad_out)
    }
}

/// Accumulated gradients for one affine layer
#[derive(Clone, Debug)]
pub struct LinearGradients {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl LinearGradients {
    /// Zero gradients shaped like `layer`
    pub fn zeros_like(layer: &TrainableLinear) -> Self {
        Self {
            weight: Tensor::zeros_like(&layer.weight),
            bias: Tensor::zeros_like(&layer.bias),
        }
    }
}
