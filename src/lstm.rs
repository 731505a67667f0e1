//! LSTM Recurrence: Forward, Backward and Sampling
//!
//! This module implements the training-time recurrence of the character
//! LSTM with a hand-derived backward pass.
//!
//! ## Overview
//!
//! - **Forward**: steps through a `[T, batch]` window of token ids, records
//!   every intermediate tensor in an [`LstmTrace`], and sums the softmax
//!   cross-entropy over time and batch.
//! - **Backward**: walks the trace from `t = T-1` down to `0`, threading two
//!   carried gradients (`dh_next`, `dc_next`) backward through the
//!   recurrence, and returns one gradient tensor per parameter.
//! - **Sample**: repeats the single-step computation with batch size 1,
//!   drawing each next character from the softmax and feeding it back in.
//!
//! ## Backpropagation Through Time
//!
//! For each step, walking backward:
//!
//! ```text
//! dy      = p[t] - onehot(target[t])
//! dWhy   += dy · h[t]ᵀ             dby += Σ_batch dy
//! dh      = Whyᵀ · dy + dh_next
//! do      = tanh(c[t]) ⊙ dh ⊙ o(1-o)
//! dc      = o ⊙ dh ⊙ (1 - tanh(c[t])²) + dc_next
//! di      = c̃ ⊙ dc ⊙ i(1-i)
//! dc̃      = i ⊙ dc ⊙ (1 - c̃²)
//! df      = c[t-1] ⊙ dc ⊙ f(1-f)
//! dz      = Woᵀ·do + Wcᵀ·dc̃ + Wiᵀ·di + Wfᵀ·df
//! dh_next = dz[..hidden]            dWex += dz[hidden..] · x[t]ᵀ
//! dc_next = f ⊙ dc
//! ```
//!
//! The tanh derivative on the cell path is evaluated on `tanh(c[t])`, the
//! value the hidden state actually saw, using the output-form derivative
//! `1 - y²`.
//!
//! ## Trace Ownership
//!
//! [`CharLstm::backward`] takes the trace by value. A trace lives for exactly
//! one forward/backward pair and is dropped when the gradients are returned.

use crate::gradients::clip_gradients;
use crate::layers::{
    sigmoid_backward, sigmoid_forward, tanh_backward, tanh_forward, LinearGradients,
};
use crate::model::{CharLstm, ParamId};
use crate::tensor::Tensor;
use rand::Rng;

/// Gradient clamp applied by [`CharLstm::backward`] when clipping is enabled
pub const GRADIENT_CLIP: f64 = 1.0;

/// Recurrent state carried between time steps and between windows
///
/// Both tensors are `[hidden_size, batch_size]`.
#[derive(Clone, Debug, PartialEq)]
pub struct LstmState {
    pub hidden: Tensor,
    pub cell: Tensor,
}

impl LstmState {
    pub fn zeros(hidden_size: usize, batch_size: usize) -> Self {
        Self {
            hidden: Tensor::zeros(vec![hidden_size, batch_size]),
            cell: Tensor::zeros(vec![hidden_size, batch_size]),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.hidden.cols()
    }
}

/// Everything recorded for one time step
pub struct StepRecord {
    /// One-hot input `[vocab, batch]`
    pub input: Tensor,
    pub embedding: Tensor,
    /// Gate input `[h[t-1]; embedding]`
    pub z: Tensor,
    pub forget_gate: Tensor,
    pub input_gate: Tensor,
    pub output_gate: Tensor,
    pub candidate: Tensor,
    pub logits: Tensor,
    pub probs: Tensor,
    /// One-hot target `[vocab, batch]`
    pub target: Tensor,
}

/// Forward trace of one truncated window
///
/// `states` holds `T + 1` entries: slot 0 is the state handed to forward
/// (time `-1`), slot `t + 1` is the state after step `t`.
pub struct LstmTrace {
    states: Vec<LstmState>,
    steps: Vec<StepRecord>,
}

impl LstmTrace {
    /// Number of time steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, t: usize) -> &StepRecord {
        &self.steps[t]
    }

    /// State entering step `t` (for `t = 0`, the caller-supplied state)
    pub fn state_before(&self, t: usize) -> &LstmState {
        &self.states[t]
    }

    /// State produced by step `t`
    pub fn state_after(&self, t: usize) -> &LstmState {
        &self.states[t + 1]
    }

    pub fn hidden(&self, t: usize) -> &Tensor {
        &self.states[t + 1].hidden
    }

    pub fn cell(&self, t: usize) -> &Tensor {
        &self.states[t + 1].cell
    }
}

/// Gradients for every parameter, mirroring [`CharLstm`]
#[derive(Clone, Debug)]
pub struct LstmGradients {
    pub embedding: Tensor,
    pub forget_gate: LinearGradients,
    pub input_gate: LinearGradients,
    pub output_gate: LinearGradients,
    pub candidate: LinearGradients,
    pub projection: LinearGradients,
}

impl LstmGradients {
    /// Zero gradients shaped like the model's parameters
    pub fn zeros(model: &CharLstm) -> Self {
        Self {
            embedding: Tensor::zeros_like(&model.embedding),
            forget_gate: LinearGradients::zeros_like(&model.forget_gate),
            input_gate: LinearGradients::zeros_like(&model.input_gate),
            output_gate: LinearGradients::zeros_like(&model.output_gate),
            candidate: LinearGradients::zeros_like(&model.candidate),
            projection: LinearGradients::zeros_like(&model.projection),
        }
    }

    pub fn get(&self, id: ParamId) -> &Tensor {
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

    pub fn get_mut(&mut self, id: ParamId) -> &mut Tensor {
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
}

/// Output of a single cell step, shared by forward and sampling
struct CellStep {
    embedding: Tensor,
    z: Tensor,
    forget_gate: Tensor,
    input_gate: Tensor,
    candidate: Tensor,
    output_gate: Tensor,
    state: LstmState,
    logits: Tensor,
    probs: Tensor,
}

impl CharLstm {
    /// One time step: embedding → gates → new state → logits → softmax
    fn cell_step(&self, x: &Tensor, prev: &LstmState) -> CellStep {
        let embedding = self.embedding.matmul(x);
        let z = Tensor::vstack(&prev.hidden, &embedding);

        let forget_gate = sigmoid_forward(&self.forget_gate.forward(&z));
        let input_gate = sigmoid_forward(&self.input_gate.forward(&z));
        let candidate = tanh_forward(&self.candidate.forward(&z));
        let output_gate = sigmoid_forward(&self.output_gate.forward(&z));

        let cell = forget_gate.mul(&prev.cell).add(&input_gate.mul(&candidate));
        let hidden = output_gate.mul(&tanh_forward(&cell));

        let logits = self.projection.forward(&hidden);
        let probs = logits.softmax_columns();

        CellStep {
            embedding,
            z,
            forget_gate,
            input_gate,
            candidate,
            output_gate,
            state: LstmState { hidden, cell },
            logits,
            probs,
        }
    }

    /// Forward pass over one truncated window
    ///
    /// # Arguments
    ///
    /// * `inputs` - Token ids, `inputs[t][b]`, shape `[T, batch]`
    /// * `targets` - Next-token ids, same shape as `inputs`
    /// * `state` - Recurrent state entering step 0; never reset here
    ///
    /// # Returns
    ///
    /// `(loss, trace, final_state)` where `loss` is the cross-entropy summed
    /// over all time steps and batch columns (not averaged).
    ///
    /// # Panics
    ///
    /// Panics if the shapes of `inputs`, `targets` and `state` disagree, or
    /// if a token id is outside the vocabulary.
    pub fn forward(
        &self,
        inputs: &[Vec<usize>],
        targets: &[Vec<usize>],
        state: LstmState,
    ) -> (f64, LstmTrace, LstmState) {
        assert_eq!(
            inputs.len(),
            targets.len(),
            "inputs and targets must have the same number of time steps"
        );
        let vocab_size = self.config.vocab_size;
        let batch_size = state.batch_size();
        assert_eq!(
            state.hidden.shape,
            vec![self.config.hidden_size, batch_size],
            "initial hidden state has the wrong shape"
        );

        let seq_len = inputs.len();
        let mut states = Vec::with_capacity(seq_len + 1);
        let mut steps = Vec::with_capacity(seq_len);
        states.push(state);

        let mut loss = 0.0;
        for (input_ids, target_ids) in inputs.iter().zip(targets) {
            assert!(
                input_ids.len() == batch_size && target_ids.len() == batch_size,
                "every time step must carry {} tokens",
                batch_size
            );

            let input = Tensor::one_hot(input_ids, vocab_size);
            let target = Tensor::one_hot(target_ids, vocab_size);
            let prev = &states[states.len() - 1];
            let out = self.cell_step(&input, prev);

            // -Σ onehot ⊙ log(p), read off at the target row only
            for (b, &id) in target_ids.iter().enumerate() {
                loss -= out.probs.data[id * batch_size + b].ln();
            }

            states.push(out.state);
            steps.push(StepRecord {
                input,
                embedding: out.embedding,
                z: out.z,
                forget_gate: out.forget_gate,
                input_gate: out.input_gate,
                output_gate: out.output_gate,
                candidate: out.candidate,
                logits: out.logits,
                probs: out.probs,
                target,
            });
        }

        let final_state = states[seq_len].clone();
        (loss, LstmTrace { states, steps }, final_state)
    }

    /// Backward pass through time
    ///
    /// Consumes the trace produced by [`CharLstm::forward`] and returns the
    /// gradient of the summed loss with respect to every parameter. The
    /// parameters are only read (for the transposed products).
    ///
    /// # Arguments
    ///
    /// * `trace` - Forward trace of the window
    /// * `clip` - Clamp every gradient element into `[-1, 1]` afterwards.
    ///   Disable for gradient checking.
    pub fn backward(&self, trace: LstmTrace, clip: bool) -> LstmGradients {
        let hidden_size = self.config.hidden_size;
        let concat_size = self.config.concat_size();
        let mut grads = LstmGradients::zeros(self);

        let mut dh_next = Tensor::zeros_like(&trace.states[0].hidden);
        let mut dc_next = Tensor::zeros_like(&trace.states[0].cell);

        for t in (0..trace.len()).rev() {
            let step = &trace.steps[t];
            let prev = trace.state_before(t);
            let cur = trace.state_after(t);

            // Softmax + cross-entropy combined
            let dy = step.probs.sub(&step.target);
            let dh = self
                .projection
                .backward(&dy, &cur.hidden, &mut grads.projection)
                .add(&dh_next);

            let tanh_cell = tanh_forward(&cur.cell);
            let d_output = sigmoid_backward(&tanh_cell.mul(&dh), &step.output_gate);
            let dc = tanh_backward(&step.output_gate.mul(&dh), &tanh_cell).add(&dc_next);
            let d_input = sigmoid_backward(&step.candidate.mul(&dc), &step.input_gate);
            let d_candidate = tanh_backward(&step.input_gate.mul(&dc), &step.candidate);
            let d_forget = sigmoid_backward(&prev.cell.mul(&dc), &step.forget_gate);

            let mut dz = self
                .output_gate
                .backward(&d_output, &step.z, &mut grads.output_gate);
            dz.add_assign(&self.candidate.backward(&d_candidate, &step.z, &mut grads.candidate));
            dz.add_assign(&self.input_gate.backward(&d_input, &step.z, &mut grads.input_gate));
            dz.add_assign(&self.forget_gate.backward(&d_forget, &step.z, &mut grads.forget_gate));

            dc_next = step.forget_gate.mul(&dc);
            dh_next = dz.slice_rows(0, hidden_size);

            let d_embedding = dz.slice_rows(hidden_size, concat_size);
            grads
                .embedding
                .add_assign(&d_embedding.matmul(&step.input.transpose()));
        }

        if clip {
            clip_gradients(&mut grads, GRADIENT_CLIP);
        }

        grads
    }

    /// Generate `n` token ids autoregressively
    ///
    /// Runs the cell one step at a time with batch size 1, drawing each
    /// token from the full softmax distribution and feeding it back as the
    /// next input. No trace is kept.
    ///
    /// # Arguments
    ///
    /// * `state` - Starting recurrent state, `[hidden_size, 1]` each
    /// * `seed` - Token fed in at the first step
    /// * `n` - Number of tokens to draw
    /// * `rng` - Source of randomness; seed it for reproducible output
    pub fn sample<R: Rng + ?Sized>(
        &self,
        state: &LstmState,
        seed: usize,
        n: usize,
        rng: &mut R,
    ) -> Vec<usize> {
        assert_eq!(state.batch_size(), 1, "sampling runs with batch size 1");
        let vocab_size = self.config.vocab_size;

        let mut state = state.clone();
        let mut x = Tensor::one_hot(&[seed], vocab_size);
        let mut tokens = Vec::with_capacity(n);

        for _ in 0..n {
            let out = self.cell_step(&x, &state);
            let next = sample_from_probs(&out.probs.data, rng);
            tokens.push(next);
            state = out.state;
            x = Tensor::one_hot(&[next], vocab_size);
        }

        tokens
    }
}

/// Inverse-CDF draw from a categorical distribution
fn sample_from_probs<R: Rng + ?Sized>(probs: &[f64], rng: &mut R) -> usize {
    let rand_val: f64 = rng.random();

    let mut cumsum = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumsum += p;
        if rand_val < cumsum {
            return i;
        }
    }
    probs.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Config;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> Config {
        Config {
            vocab_size: 5,
            emb_size: 4,
            hidden_size: 4,
            init_std: 0.1,
        }
    }

    fn window() -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let inputs = vec![vec![0, 3], vec![1, 4], vec![2, 0]];
        let targets = vec![vec![1, 4], vec![2, 0], vec![3, 1]];
        (inputs, targets)
    }

    #[test]
    fn test_forward_shapes() {
        let model = CharLstm::with_seed(&small_config(), 11).unwrap();
        let (inputs, targets) = window();

        let (loss, trace, state) = model.forward(&inputs, &targets, LstmState::zeros(4, 2));

        assert!(loss.is_finite() && loss > 0.0);
        assert_eq!(trace.len(), 3);
        for t in 0..3 {
            assert_eq!(trace.hidden(t).shape, vec![4, 2]);
            assert_eq!(trace.cell(t).shape, vec![4, 2]);
            assert_eq!(trace.step(t).z.shape, vec![8, 2]);
            assert_eq!(trace.step(t).probs.shape, vec![5, 2]);
        }
        assert_eq!(state.hidden.shape, vec![4, 2]);
        assert_eq!(state.cell.shape, vec![4, 2]);
        assert_eq!(&state, trace.state_after(2));
    }

    #[test]
    fn test_initial_loss_near_uniform() {
        // Small weights give near-uniform predictions: loss ≈ T·B·ln(V)
        let mut config = small_config();
        config.init_std = 1e-3;
        let model = CharLstm::with_seed(&config, 5).unwrap();
        let (inputs, targets) = window();

        let (loss, _, _) = model.forward(&inputs, &targets, LstmState::zeros(4, 2));

        let expected = 6.0 * (5.0f64).ln();
        assert!((loss - expected).abs() < 0.05, "loss {} vs {}", loss, expected);
    }

    #[test]
    fn test_forward_uses_supplied_state() {
        let model = CharLstm::with_seed(&small_config(), 2).unwrap();
        let (inputs, targets) = window();

        let mut warm = LstmState::zeros(4, 2);
        warm.hidden = warm.hidden.map(|_| 0.5);
        warm.cell = warm.cell.map(|_| -0.8);

        let (cold_loss, _, _) = model.forward(&inputs, &targets, LstmState::zeros(4, 2));
        let (warm_loss, trace, _) = model.forward(&inputs, &targets, warm.clone());

        assert_ne!(cold_loss, warm_loss);
        assert_eq!(trace.state_before(0), &warm);
    }

    #[test]
    fn test_state_threading_matches_single_pass() {
        let model = CharLstm::with_seed(&small_config(), 8).unwrap();
        let inputs = vec![vec![0, 1], vec![2, 3], vec![4, 0], vec![1, 1], vec![3, 2], vec![0, 4]];
        let targets = vec![vec![2, 3], vec![4, 0], vec![1, 1], vec![3, 2], vec![0, 4], vec![2, 2]];

        let (full_loss, full_trace, full_state) =
            model.forward(&inputs, &targets, LstmState::zeros(4, 2));

        let (loss_a, trace_a, mid) = model.forward(&inputs[..3], &targets[..3], LstmState::zeros(4, 2));
        let (loss_b, trace_b, end) = model.forward(&inputs[3..], &targets[3..], mid);

        for t in 0..3 {
            assert_eq!(trace_a.state_after(t), full_trace.state_after(t));
            assert_eq!(trace_b.state_after(t), full_trace.state_after(t + 3));
        }
        assert_eq!(end, full_state);
        assert!((loss_a + loss_b - full_loss).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_stays_valid_for_huge_logits() {
        let mut model = CharLstm::with_seed(&small_config(), 4).unwrap();
        model.projection.weight = model.projection.weight.map(|w| w * 1e7);
        model.projection.bias = model.projection.bias.map(|b| b * 1e7);
        let (inputs, targets) = window();

        let (_, trace, _) = model.forward(&inputs, &targets, LstmState::zeros(4, 2));

        for t in 0..trace.len() {
            let probs = &trace.step(t).probs;
            assert!(trace.step(t).logits.data.iter().any(|l| l.abs() > 1e4));
            for b in 0..2 {
                let column: Vec<f64> = (0..5).map(|i| probs.data[i * 2 + b]).collect();
                let sum: f64 = column.iter().sum();
                assert!((sum - 1.0).abs() < 1e-9);
                assert!(column.iter().all(|&p| p >= 0.0));
            }
        }
    }

    #[test]
    fn test_backward_gradient_shapes() {
        let model = CharLstm::with_seed(&small_config(), 3).unwrap();
        let (inputs, targets) = window();
        let (_, trace, _) = model.forward(&inputs, &targets, LstmState::zeros(4, 2));

        let grads = model.backward(trace, false);

        for id in ParamId::ALL {
            assert_eq!(grads.get(id).shape, model.param(id).shape, "{}", id.name());
        }
    }

    #[test]
    fn test_unseen_input_leaves_embedding_column_zero() {
        let model = CharLstm::with_seed(&small_config(), 3).unwrap();
        // Token 4 appears only as a target, never as an input
        let inputs = vec![vec![0, 1], vec![2, 3]];
        let targets = vec![vec![4, 4], vec![1, 0]];
        let (_, trace, _) = model.forward(&inputs, &targets, LstmState::zeros(4, 2));

        let grads = model.backward(trace, false);

        let emb = grads.get(ParamId::Embedding);
        for r in 0..4 {
            assert_eq!(emb.data[r * 5 + 4], 0.0);
        }
        assert!((0..4).any(|r| emb.data[r * 5] != 0.0));
    }

    #[test]
    fn test_output_bias_gradient_sums_to_zero() {
        // Σ_v (p - onehot) = 0 for every column, so dby sums to zero
        let model = CharLstm::with_seed(&small_config(), 21).unwrap();
        let (inputs, targets) = window();
        let (_, trace, _) = model.forward(&inputs, &targets, LstmState::zeros(4, 2));

        let grads = model.backward(trace, false);

        let total: f64 = grads.get(ParamId::ProjectionBias).data.iter().sum();
        assert!(total.abs() < 1e-12);
    }

    #[test]
    fn test_clipping_bounds_every_gradient() {
        let mut config = small_config();
        config.init_std = 2.0;
        let model = CharLstm::with_seed(&config, 13).unwrap();
        let (inputs, targets) = window();

        let (_, trace, _) = model.forward(&inputs, &targets, LstmState::zeros(4, 2));
        let raw = model.backward(trace, false);
        let (_, trace, _) = model.forward(&inputs, &targets, LstmState::zeros(4, 2));
        let clipped = model.backward(trace, true);

        for id in ParamId::ALL {
            for (&r, &c) in raw.get(id).data.iter().zip(&clipped.get(id).data) {
                assert!((-1.0..=1.0).contains(&c));
                assert_eq!(c, r.clamp(-1.0, 1.0));
            }
        }
    }

    #[test]
    fn test_empty_window() {
        let model = CharLstm::with_seed(&small_config(), 1).unwrap();
        let state = LstmState::zeros(4, 3);
        let (loss, trace, out) = model.forward(&[], &[], state.clone());
        assert_eq!(loss, 0.0);
        assert!(trace.is_empty());
        assert_eq!(out, state);
        let grads = model.backward(trace, true);
        assert!(grads.get(ParamId::ForgetWeight).data.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_sample_reproducible_and_in_range() {
        let model = CharLstm::with_seed(&small_config(), 6).unwrap();
        let state = LstmState::zeros(4, 1);

        let a = model.sample(&state, 2, 50, &mut StdRng::seed_from_u64(77));
        let b = model.sample(&state, 2, 50, &mut StdRng::seed_from_u64(77));

        assert_eq!(a.len(), 50);
        assert_eq!(a, b);
        assert!(a.iter().all(|&id| id < 5));
        assert!(model.sample(&state, 0, 0, &mut StdRng::seed_from_u64(1)).is_empty());
    }

    #[test]
    fn test_sample_follows_model_distribution() {
        // Zero projection weights make the output distribution exactly
        // softmax(by), independent of the recurrent state.
        let mut model = CharLstm::with_seed(&small_config(), 6).unwrap();
        model.projection.weight = Tensor::zeros(vec![5, 4]);
        let target = [0.5, 0.25, 0.15, 0.07, 0.03];
        model.projection.bias = Tensor::new(target.iter().map(|p: &f64| p.ln()).collect(), vec![5, 1]);

        let n = 20_000;
        let tokens = model.sample(&LstmState::zeros(4, 1), 0, n, &mut StdRng::seed_from_u64(3));

        let mut counts = [0usize; 5];
        for id in tokens {
            counts[id] += 1;
        }
        for (count, p) in counts.iter().zip(target) {
            let freq = *count as f64 / n as f64;
            assert!((freq - p).abs() < 0.02, "freq {} vs p {}", freq, p);
        }
    }

    #[test]
    fn test_sample_from_probs_edges() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..100 {
            assert_eq!(sample_from_probs(&[0.0, 1.0, 0.0], &mut rng), 1);
        }
    }
}
