//! Neural Network Layers
//!
//! Building blocks shared by the LSTM cell and its output head.
//!
//! ## Layers
//!
//! - **activation**: sigmoid and tanh, with derivatives on activation values
//! - **linear**: affine map `W · z + b` on column-batched inputs
//!
//! ## Design Pattern
//!
//! Each trainable layer exposes an explicit forward and backward:
//!
//! ```rust,ignore
//! impl TrainableLayer {
//!     pub fn forward(&self, x: &Tensor) -> Tensor { }
//!     pub fn backward(&self, grad: &Tensor, x: &Tensor, grads: &mut Gradients) -> Tensor { }
//! }
//! ```
//!
//! The backward pass reads the forward input from the caller's trace and
//! accumulates into a gradient struct, so one layer can be differentiated
//! once per time step.

pub mod activation;
pub mod linear;

pub use activation::{
    dsigmoid, dtanh, sigmoid, sigmoid_backward, sigmoid_forward, tanh_backward, tanh_forward,
};
pub use linear::{random_normal, LinearGradients, TrainableLinear};
