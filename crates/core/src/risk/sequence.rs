//! Recurrent sequence classifier over 7-step daily windows.
//!
//! A single Elman layer `h_t = tanh(W x_t + U h_{t-1} + b)` reads the window step by step and a
//! logistic output `sigmoid(v · h_T + c)` turns the final hidden state into a miss probability.
//! Training is mini-batch gradient descent with back-propagation through time on binary
//! cross-entropy.

use crate::constants::{STEP_FEATURES, WINDOW_LEN};
use crate::features::Window;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Global gradient-norm ceiling applied per mini-batch.
const GRAD_CLIP: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
pub struct SequenceParams {
    pub hidden_units: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceModel {
    hidden: usize,
    /// `hidden × STEP_FEATURES`, row-major.
    w_in: Vec<f64>,
    /// `hidden × hidden`, row-major.
    w_rec: Vec<f64>,
    bias: Vec<f64>,
    w_out: Vec<f64>,
    b_out: f64,
}

/// Gradient accumulator with the same shape as the model parameters.
struct Gradients {
    w_in: Vec<f64>,
    w_rec: Vec<f64>,
    bias: Vec<f64>,
    w_out: Vec<f64>,
    b_out: f64,
}

impl Gradients {
    fn zeros(hidden: usize) -> Self {
        Self {
            w_in: vec![0.0; hidden * STEP_FEATURES],
            w_rec: vec![0.0; hidden * hidden],
            bias: vec![0.0; hidden],
            w_out: vec![0.0; hidden],
            b_out: 0.0,
        }
    }

    fn norm(&self) -> f64 {
        let sum: f64 = self
            .w_in
            .iter()
            .chain(&self.w_rec)
            .chain(&self.bias)
            .chain(&self.w_out)
            .map(|g| g * g)
            .sum::<f64>()
            + self.b_out * self.b_out;
        sum.sqrt()
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl SequenceModel {
    /// Random initial weights in `±1/√hidden`.
    fn init(hidden: usize, rng: &mut StdRng) -> Self {
        let bound = 1.0 / (hidden as f64).sqrt();
        let mut draw = |len: usize| -> Vec<f64> {
            (0..len).map(|_| rng.gen_range(-bound..bound)).collect()
        };
        Self {
            hidden,
            w_in: draw(hidden * STEP_FEATURES),
            w_rec: draw(hidden * hidden),
            bias: vec![0.0; hidden],
            w_out: draw(hidden),
            b_out: 0.0,
        }
    }

    /// Trains a fresh model on standardised windows. `labels` are 0/1 and parallel to
    /// `windows`; both are non-empty and validated by the caller.
    pub fn fit(windows: &[Window], labels: &[u8], params: SequenceParams, rng: &mut StdRng) -> Self {
        let mut model = Self::init(params.hidden_units, rng);
        let mut order: Vec<usize> = (0..windows.len()).collect();

        for _ in 0..params.epochs {
            order.shuffle(rng);
            for batch in order.chunks(params.batch_size.max(1)) {
                let mut grads = Gradients::zeros(model.hidden);
                for &idx in batch {
                    model.accumulate(&windows[idx], f64::from(labels[idx]), &mut grads);
                }
                model.apply(&grads, params.learning_rate, batch.len());
            }
        }

        model
    }

    /// Hidden states `h_0..=h_T` (with `h_0 = 0`) for one window.
    fn hidden_states(&self, window: &Window) -> Vec<Vec<f64>> {
        let h = self.hidden;
        let mut states = Vec::with_capacity(WINDOW_LEN + 1);
        states.push(vec![0.0; h]);

        for step in window {
            let prev = &states[states.len() - 1];
            let next: Vec<f64> = (0..h)
                .map(|i| {
                    let input: f64 = (0..STEP_FEATURES)
                        .map(|k| self.w_in[i * STEP_FEATURES + k] * step[k])
                        .sum();
                    let recurrent: f64 = (0..h).map(|j| self.w_rec[i * h + j] * prev[j]).sum();
                    (input + recurrent + self.bias[i]).tanh()
                })
                .collect();
            states.push(next);
        }
        states
    }

    fn output(&self, last: &[f64]) -> f64 {
        let z: f64 = self.w_out.iter().zip(last).map(|(v, h)| v * h).sum::<f64>() + self.b_out;
        sigmoid(z)
    }

    /// True when every weight vector has the length implied by `hidden`.
    pub fn is_well_formed(&self) -> bool {
        let h = self.hidden;
        h > 0
            && self.w_in.len() == h * STEP_FEATURES
            && self.w_rec.len() == h * h
            && self.bias.len() == h
            && self.w_out.len() == h
    }

    /// Miss probability for one standardised window, in `(0, 1)`.
    pub fn predict(&self, window: &Window) -> f64 {
        let states = self.hidden_states(window);
        self.output(&states[WINDOW_LEN])
    }

    /// Mean binary cross-entropy over a labelled set.
    pub fn loss(&self, windows: &[Window], labels: &[u8]) -> f64 {
        if windows.is_empty() {
            return 0.0;
        }
        let total: f64 = windows
            .iter()
            .zip(labels)
            .map(|(w, &y)| {
                let p = self.predict(w).clamp(1e-12, 1.0 - 1e-12);
                if y == 1 {
                    -p.ln()
                } else {
                    -(1.0 - p).ln()
                }
            })
            .sum();
        total / windows.len() as f64
    }

    fn accumulate(&self, window: &Window, target: f64, grads: &mut Gradients) {
        let h = self.hidden;
        let states = self.hidden_states(window);
        let p = self.output(&states[WINDOW_LEN]);

        let dz = p - target;
        grads.b_out += dz;
        for (g, hv) in grads.w_out.iter_mut().zip(&states[WINDOW_LEN]) {
            *g += dz * hv;
        }

        let mut dh: Vec<f64> = self.w_out.iter().map(|v| dz * v).collect();
        for t in (1..=WINDOW_LEN).rev() {
            let h_t = &states[t];
            let h_prev = &states[t - 1];
            let x_t = &window[t - 1];

            let da: Vec<f64> = dh
                .iter()
                .zip(h_t)
                .map(|(d, hv)| d * (1.0 - hv * hv))
                .collect();

            for i in 0..h {
                grads.bias[i] += da[i];
                for k in 0..STEP_FEATURES {
                    grads.w_in[i * STEP_FEATURES + k] += da[i] * x_t[k];
                }
                for j in 0..h {
                    grads.w_rec[i * h + j] += da[i] * h_prev[j];
                }
            }

            dh = (0..h)
                .map(|j| (0..h).map(|i| self.w_rec[i * h + j] * da[i]).sum())
                .collect();
        }
    }

    /// Gradient step with the batch-averaged gradient, clipped to [`GRAD_CLIP`] in norm.
    fn apply(&mut self, grads: &Gradients, learning_rate: f64, batch_len: usize) {
        let scale = 1.0 / batch_len.max(1) as f64;
        let norm = grads.norm() * scale;
        let clip = if norm > GRAD_CLIP { GRAD_CLIP / norm } else { 1.0 };
        let step = learning_rate * scale * clip;

        let update = |params: &mut [f64], g: &[f64]| {
            for (p, g) in params.iter_mut().zip(g) {
                *p -= step * g;
            }
        };
        update(&mut self.w_in, &grads.w_in);
        update(&mut self.w_rec, &grads.w_rec);
        update(&mut self.bias, &grads.bias);
        update(&mut self.w_out, &grads.w_out);
        self.b_out -= step * grads.b_out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn window(rate: f64) -> Window {
        [[rate, 0.0, 0.0]; WINDOW_LEN]
    }

    fn labelled() -> (Vec<Window>, Vec<u8>) {
        let mut windows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..10 {
            let jitter = i as f64 * 0.02;
            windows.push(window(1.0 - jitter));
            labels.push(0);
            windows.push(window(-1.0 + jitter));
            labels.push(1);
        }
        (windows, labels)
    }

    fn params() -> SequenceParams {
        SequenceParams {
            hidden_units: 8,
            epochs: 200,
            batch_size: 8,
            learning_rate: 0.3,
        }
    }

    #[test]
    fn test_training_reduces_loss_and_separates_classes() {
        let (windows, labels) = labelled();
        let untrained = SequenceModel::init(8, &mut StdRng::seed_from_u64(42));
        let model = SequenceModel::fit(&windows, &labels, params(), &mut StdRng::seed_from_u64(42));

        assert!(
            model.loss(&windows, &labels) < untrained.loss(&windows, &labels),
            "training should lower the loss"
        );
        let missed = model.predict(&window(-1.0));
        let kept = model.predict(&window(1.0));
        assert!(missed > 0.5, "low-confirmation window scored {missed}");
        assert!(kept < 0.5, "high-confirmation window scored {kept}");
    }

    #[test]
    fn test_output_is_a_probability() {
        let (windows, labels) = labelled();
        let model = SequenceModel::fit(&windows, &labels, params(), &mut StdRng::seed_from_u64(5));
        for w in [window(50.0), window(-50.0), window(0.0)] {
            let p = model.predict(&w);
            assert!(p > 0.0 && p < 1.0, "output {p} is not a probability");
        }
    }

    #[test]
    fn test_same_seed_same_weights() {
        let (windows, labels) = labelled();
        let a = SequenceModel::fit(&windows, &labels, params(), &mut StdRng::seed_from_u64(11));
        let b = SequenceModel::fit(&windows, &labels, params(), &mut StdRng::seed_from_u64(11));
        assert_eq!(a, b);
    }

    #[test]
    fn test_sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!(sigmoid(1000.0) <= 1.0);
    }
}
