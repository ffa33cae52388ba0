//! One-class SVM boundary with an RBF kernel, solved by SMO on the dual.
//!
//! Dual problem: minimise `½ αᵀKα` subject to `0 ≤ αᵢ ≤ 1` and `Σαᵢ = ν·n`. The decision value of
//! a row is `Σ αⱼ K(xⱼ, x) − ρ`; rows with a negative value lie outside the boundary.

use crate::constants::EVENT_FEATURES;

type Row = [f64; EVENT_FEATURES];

/// Stop once the maximal KKT violation falls below this.
const TOLERANCE: f64 = 1e-3;
/// Floor for the second derivative along a non-positive-definite pair.
const TAU: f64 = 1e-12;
const UPPER: f64 = 1.0;

/// `1 / (n_features · Var(X))` over all values of the batch, or 1 when there is no spread.
fn kernel_gamma(rows: &[Row]) -> f64 {
    let count = (rows.len() * EVENT_FEATURES) as f64;
    let mean = rows.iter().flatten().sum::<f64>() / count;
    let var = rows.iter().flatten().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    if var > 0.0 {
        1.0 / (EVENT_FEATURES as f64 * var)
    } else {
        1.0
    }
}

fn rbf(a: &Row, b: &Row, gamma: f64) -> f64 {
    let dist: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    (-gamma * dist).exp()
}

struct Solution {
    alpha: Vec<f64>,
    /// Decision value of each training row.
    decision: Vec<f64>,
}

/// Decision value of every row of the batch the boundary was fitted on.
pub fn decision_values(rows: &[Row], nu: f64) -> Vec<f64> {
    solve(rows, nu).decision
}

fn solve(rows: &[Row], nu: f64) -> Solution {
    let n = rows.len();
    if n == 0 {
        return Solution {
            alpha: Vec::new(),
            decision: Vec::new(),
        };
    }

    let gamma = kernel_gamma(rows);
    let kernel: Vec<Vec<f64>> = rows
        .iter()
        .map(|a| rows.iter().map(|b| rbf(a, b, gamma)).collect())
        .collect();

    // Feasible start: the first ⌊νn⌋ multipliers at the bound, the remainder on the next one.
    let budget = nu * n as f64;
    let full = (budget.floor() as usize).min(n);
    let mut alpha = vec![0.0; n];
    for a in alpha.iter_mut().take(full) {
        *a = UPPER;
    }
    if full < n {
        alpha[full] = budget - full as f64;
    }

    let mut grad: Vec<f64> = (0..n)
        .map(|i| (0..n).map(|j| alpha[j] * kernel[i][j]).sum())
        .collect();

    let max_iterations = (n * 100).max(10_000);
    for _ in 0..max_iterations {
        // i may grow (α below the upper bound), j may shrink (α above zero).
        let mut i = None;
        let mut g_max = f64::NEG_INFINITY;
        let mut j = None;
        let mut g_min = f64::INFINITY;
        for k in 0..n {
            if alpha[k] < UPPER && -grad[k] > g_max {
                g_max = -grad[k];
                i = Some(k);
            }
            if alpha[k] > 0.0 && -grad[k] < g_min {
                g_min = -grad[k];
                j = Some(k);
            }
        }

        let (Some(i), Some(j)) = (i, j) else { break };
        if g_max - g_min < TOLERANCE || i == j {
            break;
        }

        let quad = (kernel[i][i] + kernel[j][j] - 2.0 * kernel[i][j]).max(TAU);
        let headroom = UPPER - alpha[i];
        let delta = ((grad[j] - grad[i]) / quad).min(headroom).min(alpha[j]);
        if delta <= 0.0 {
            break;
        }

        // Land exactly on a bound when clipped so bound checks stay exact.
        alpha[i] = if delta >= headroom { UPPER } else { alpha[i] + delta };
        alpha[j] = if delta >= alpha[j] { 0.0 } else { alpha[j] - delta };
        for (k, g) in grad.iter_mut().enumerate() {
            *g += delta * (kernel[k][i] - kernel[k][j]);
        }
    }

    let rho = offset(&alpha, &grad);
    let decision = grad.iter().map(|g| g - rho).collect();
    Solution { alpha, decision }
}

/// Mean gradient over free multipliers, or the midpoint of the bound-derived interval when
/// every multiplier sits at a bound.
fn offset(alpha: &[f64], grad: &[f64]) -> f64 {
    let mut free_sum = 0.0;
    let mut free = 0usize;
    let mut lower = f64::NEG_INFINITY;
    let mut upper = f64::INFINITY;

    for (a, g) in alpha.iter().zip(grad) {
        if *a >= UPPER {
            lower = lower.max(*g);
        } else if *a <= 0.0 {
            upper = upper.min(*g);
        } else {
            free += 1;
            free_sum += g;
        }
    }

    if free > 0 {
        return free_sum / free as f64;
    }
    match (lower.is_finite(), upper.is_finite()) {
        (true, true) => (lower + upper) / 2.0,
        (true, false) => lower,
        (false, true) => upper,
        (false, false) => 0.0,
    }
}

/// Flags rows with a strictly negative decision value.
pub fn outliers(rows: &[Row], nu: f64) -> Vec<bool> {
    decision_values(rows, nu)
        .into_iter()
        .map(|d| d < 0.0)
        .collect()
}
