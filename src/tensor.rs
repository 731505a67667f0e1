//! Tensor Operations for the LSTM
//!
//! This module provides a minimal dense tensor type for the recurrent cell.
//! Tensors store a flat row-major `Vec<f64>` together with shape and stride
//! information.
//!
//! ## Layout Convention
//!
//! Activations are **column-batched**: a hidden state for a batch of 8
//! sequences with 128 units has shape `[128, 8]`. Each column is one
//! sequence. Biases are `[features, 1]` and broadcast along the columns.
//!
//! ```text
//! gate = W · z + b
//!   W: [hidden, concat]   z: [concat, batch]   b: [hidden, 1]
//!   gate: [hidden, batch]
//! ```
//!
//! ## Precision
//!
//! Everything is `f64`. Finite-difference gradient checking with a step of
//! 1e-4 needs the extra mantissa; in `f32` the central difference is
//! dominated by rounding noise.
//!
//! ## Example
//!
//! ```rust
//! use char_lstm::Tensor;
//!
//! let w = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
//! let x = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let y = w.matmul(&x);
//! assert_eq!(y.shape, vec![2, 2]);
//! ```
//!
//! ## Performance
//!
//! Large matrix products go through a parallel cache-blocked kernel (Rayon).
//! Both kernels accumulate along the inner dimension in the same order, so
//! the result does not depend on which path was taken or on thread count.

use rayon::prelude::*;

/// A dense row-major array of `f64` values
///
/// # Memory Layout
///
/// For shape `[2, 3]`, data is stored as
/// `[r0c0, r0c1, r0c2, r1c0, r1c1, r1c2]` and the strides are `[3, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f64>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    pub fn new(data: Vec<f64>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![0.0; size], shape)
    }

    /// Create a zero tensor with the same shape as `other`
    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(other.shape.clone())
    }

    /// One-hot encode a batch of token ids into a `[vocab_size, batch]` indicator
    ///
    /// Column `b` has a single 1.0 at row `ids[b]`.
    ///
    /// # Panics
    ///
    /// Panics if any id is outside `0..vocab_size`.
    pub fn one_hot(ids: &[usize], vocab_size: usize) -> Self {
        let batch = ids.len();
        let mut data = vec![0.0; vocab_size * batch];
        for (b, &id) in ids.iter().enumerate() {
            assert!(
                id < vocab_size,
                "Token id {} out of range for vocabulary of {}",
                id,
                vocab_size
            );
            data[id * batch + b] = 1.0;
        }
        Self::new(data, vec![vocab_size, batch])
    }

    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Number of rows of a 2D tensor
    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    /// Number of columns of a 2D tensor
    pub fn cols(&self) -> usize {
        self.shape[1]
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Computes: result[j] += a_val * b[j] for all j
    #[inline(always)]
    fn matmul_inner_simd(a_val: f64, b: &[f64], result: &mut [f64]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// Matrix multiplication of two 2D tensors
    ///
    /// For `A @ B` where `A` is `[m, k]` and `B` is `[k, n]` the result is
    /// `[m, n]` with `C[i,j] = Σ_l A[i,l] * B[l,j]`.
    ///
    /// # Performance
    ///
    /// - **Small products** (< 1K multiply-adds): sequential loop
    /// - **Large products**: parallel cache-blocked kernel
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2D or the inner dimensions differ.
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2,
            "Unsupported matmul shapes: {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let n = other.shape[1];
        let k = self.shape[1];

        if m * n * k >= 1_000 {
            return self.matmul_parallel_blocked(other, m, n, k);
        }

        // Same i-l-j loop order as the blocked kernel, so both paths sum
        // along k in ascending order.
        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for l in 0..k {
                let a_val = self.data[i * k + l];
                Self::matmul_inner_simd(
                    a_val,
                    &other.data[l * n..(l + 1) * n],
                    &mut result[i * n..(i + 1) * n],
                );
            }
        }

        Tensor::new(result, vec![m, n])
    }

    /// Parallel cache-blocked matrix multiplication
    ///
    /// Output rows are split into blocks of 8 and distributed across cores.
    /// Within a block the inner dimension is walked in ascending 8-wide
    /// tiles, so every output element is accumulated in the same order as
    /// the sequential kernel.
    fn matmul_parallel_blocked(&self, other: &Tensor, m: usize, n: usize, k: usize) -> Tensor {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];
                                Self::matmul_inner_simd(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Tensor::new(result, vec![m, n])
    }

    /// Transpose a 2D tensor
    pub fn transpose(&self) -> Tensor {
        assert_eq!(
            self.shape.len(),
            2,
            "transpose expects a 2D tensor, got {:?}",
            self.shape
        );
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![0.0; rows * cols];

        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }

        Tensor::new(result, vec![cols, rows])
    }

    /// Element-wise addition with column broadcasting
    ///
    /// Supported patterns:
    ///
    /// 1. **Exact match**: same shape
    /// 2. **Bias broadcast**: `[rows, cols] + [rows, 1]` adds the bias column
    ///    to every column of `self`
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(a, b)| a + b)
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        if self.shape.len() == 2 && other.shape == [self.shape[0], 1] {
            let cols = self.shape[1];
            let result: Vec<f64> = self
                .data
                .par_iter()
                .enumerate()
                .map(|(i, &x)| x + other.data[i / cols])
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        panic!(
            "Unsupported broadcast for add: {:?} + {:?}",
            self.shape, other.shape
        );
    }

    /// In-place element-wise accumulation (`self += other`)
    pub fn add_assign(&mut self, other: &Tensor) {
        assert_eq!(
            self.shape, other.shape,
            "Shapes must match for accumulation"
        );
        self.data
            .par_iter_mut()
            .zip(&other.data)
            .for_each(|(a, b)| *a += b);
    }

    /// Element-wise (Hadamard) product
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "Shapes must match for element-wise product"
        );
        let result = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(a, b)| a * b)
            .collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Element-wise subtraction
    pub fn sub(&self, other: &Tensor) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "Shapes must match for subtraction"
        );
        let result = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(a, b)| a - b)
            .collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Apply a scalar function to every element
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Sum each row across its columns, producing `[rows, 1]`
    ///
    /// This is the reduction over the batch axis used for bias gradients.
    pub fn sum_cols(&self) -> Tensor {
        let rows = self.shape[0];
        let cols = self.shape[1];
        let result: Vec<f64> = (0..rows)
            .map(|i| self.data[i * cols..(i + 1) * cols].iter().sum())
            .collect();
        Tensor::new(result, vec![rows, 1])
    }

    /// Stack two 2D tensors vertically (along the feature axis)
    ///
    /// `[a_rows, cols]` on top of `[b_rows, cols]` gives
    /// `[a_rows + b_rows, cols]`.
    pub fn vstack(top: &Tensor, bottom: &Tensor) -> Tensor {
        assert_eq!(
            top.shape[1], bottom.shape[1],
            "Column counts must match for vstack: {:?} / {:?}",
            top.shape, bottom.shape
        );
        let mut data = Vec::with_capacity(top.len() + bottom.len());
        data.extend_from_slice(&top.data);
        data.extend_from_slice(&bottom.data);
        Tensor::new(data, vec![top.shape[0] + bottom.shape[0], top.shape[1]])
    }

    /// Copy rows `start..end` of a 2D tensor
    pub fn slice_rows(&self, start: usize, end: usize) -> Tensor {
        assert!(
            start <= end && end <= self.shape[0],
            "Row range {}..{} out of bounds for shape {:?}",
            start,
            end,
            self.shape
        );
        let cols = self.shape[1];
        Tensor::new(
            self.data[start * cols..end * cols].to_vec(),
            vec![end - start, cols],
        )
    }

    /// Clamp every element into `[lo, hi]` in place
    pub fn clamp_inplace(&mut self, lo: f64, hi: f64) {
        self.data.par_iter_mut().for_each(|x| *x = x.clamp(lo, hi));
    }

    /// Softmax down each column
    ///
    /// ```text
    /// softmax(x)[i, b] = exp(x[i,b] - max_i x[·,b]) / Σ_j exp(x[j,b] - max_i x[·,b])
    /// ```
    ///
    /// Subtracting the per-column maximum keeps every exponent ≤ 0, so the
    /// largest term is exactly 1 and nothing overflows even for logits of
    /// magnitude 1e6.
    pub fn softmax_columns(&self) -> Tensor {
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![0.0; rows * cols];

        for b in 0..cols {
            let max = (0..rows)
                .map(|i| self.data[i * cols + b])
                .fold(f64::NEG_INFINITY, f64::max);

            let mut sum = 0.0;
            for i in 0..rows {
                let e = (self.data[i * cols + b] - max).exp();
                result[i * cols + b] = e;
                sum += e;
            }
            for i in 0..rows {
                result[i * cols + b] /= sum;
            }
        }

        Tensor::new(result, self.shape.clone())
    }
}

/// Halt with a diagnostic if two tensors that must pair up differ in shape
///
/// Used wherever a parameter meets its gradient or accumulator. A mismatch
/// there is a programming error, never something to broadcast over.
pub fn assert_same_shape(name: &str, expected: &Tensor, got: &Tensor) {
    assert!(
        expected.shape == got.shape,
        "Shape mismatch for {}: parameter {:?} vs gradient {:?}",
        name,
        expected.shape,
        got.shape
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_small() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = Tensor::new(vec![5.0, 6.0, 7.0, 8.0], vec![2, 2]);
        let c = a.matmul(&b);
        assert_eq!(c.data, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_parallel_matches_sequential() {
        // 20 x 15 @ 15 x 9 crosses the parallel threshold
        let a_data: Vec<f64> = (0..300).map(|i| ((i * 7) % 13) as f64 * 0.1 - 0.6).collect();
        let b_data: Vec<f64> = (0..135).map(|i| ((i * 5) % 11) as f64 * 0.2 - 1.0).collect();
        let a = Tensor::new(a_data, vec![20, 15]);
        let b = Tensor::new(b_data, vec![15, 9]);

        let c = a.matmul(&b);

        for i in 0..20 {
            for j in 0..9 {
                let mut expected = 0.0;
                for l in 0..15 {
                    expected += a.data[i * 15 + l] * b.data[l * 9 + j];
                }
                assert_eq!(c.data[i * 9 + j], expected);
            }
        }
    }

    #[test]
    #[should_panic(expected = "Matrix dimensions incompatible")]
    fn test_matmul_rejects_bad_inner_dim() {
        let a = Tensor::zeros(vec![2, 3]);
        let b = Tensor::zeros(vec![2, 3]);
        a.matmul(&b);
    }

    #[test]
    fn test_transpose() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
        let tt = t.transpose();
        assert_eq!(tt.shape, vec![3, 2]);
        assert_eq!(tt.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_add_bias_broadcasts_over_columns() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
        let bias = Tensor::new(vec![10.0, 20.0], vec![2, 1]);
        let y = x.add(&bias);
        assert_eq!(y.data, vec![11.0, 12.0, 13.0, 24.0, 25.0, 26.0]);
    }

    #[test]
    fn test_one_hot_columns() {
        let x = Tensor::one_hot(&[2, 0], 3);
        assert_eq!(x.shape, vec![3, 2]);
        assert_eq!(x.data, vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_vstack_and_slice_rows() {
        let h = Tensor::new(vec![1.0, 2.0], vec![1, 2]);
        let e = Tensor::new(vec![3.0, 4.0, 5.0, 6.0], vec![2, 2]);
        let z = Tensor::vstack(&h, &e);
        assert_eq!(z.shape, vec![3, 2]);
        assert_eq!(z.slice_rows(0, 1), h);
        assert_eq!(z.slice_rows(1, 3), e);
    }

    #[test]
    fn test_sum_cols() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
        let s = x.sum_cols();
        assert_eq!(s.shape, vec![2, 1]);
        assert_eq!(s.data, vec![6.0, 15.0]);
    }

    #[test]
    fn test_softmax_columns_with_extreme_logits() {
        let logits = Tensor::new(vec![1e6, -1e6, -1e6, 1e6, 0.0, 3.0], vec![3, 2]);
        let p = logits.softmax_columns();

        for b in 0..2 {
            let column: Vec<f64> = (0..3).map(|i| p.data[i * 2 + b]).collect();
            let sum: f64 = column.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "column {} sums to {}", b, sum);
            assert!(column.iter().all(|&v| v >= 0.0 && v.is_finite()));
        }
        assert_eq!(p.data[0], 1.0);
    }

    #[test]
    fn test_clamp_inplace() {
        let mut g = Tensor::new(vec![-3.0, -0.5, 0.5, 7.0], vec![2, 2]);
        g.clamp_inplace(-1.0, 1.0);
        assert_eq!(g.data, vec![-1.0, -0.5, 0.5, 1.0]);
    }

    #[test]
    #[should_panic(expected = "Shape mismatch for Wf")]
    fn test_assert_same_shape_reports_name() {
        assert_same_shape("Wf", &Tensor::zeros(vec![4, 8]), &Tensor::zeros(vec![8, 4]));
    }
}
