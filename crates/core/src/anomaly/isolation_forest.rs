//! Isolation forest over per-event feature rows.
//!
//! Outliers sit in sparse regions and are separated by few random splits, so their average path
//! length across random trees is short. Scores follow `2^(-E[h(x)] / c(ψ))`, where `ψ` is the
//! per-tree subsample size.

use crate::constants::EVENT_FEATURES;
use rand::rngs::StdRng;
use rand::Rng;

type Row = [f64; EVENT_FEATURES];

const EULER_GAMMA: f64 = 0.5772156649;

#[derive(Debug, Clone, Copy)]
pub struct IsolationParams {
    pub trees: usize,
    pub sample_size: usize,
    /// Expected outlier fraction; sets the score threshold.
    pub contamination: f64,
}

#[derive(Debug)]
enum IsolationNode {
    Internal {
        feature: usize,
        split: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

/// Average path length of an unsuccessful BST search over `n` points, `c(n)`.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn build(
    rows: &[Row],
    sample: &mut [usize],
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> IsolationNode {
    if depth >= max_depth || sample.len() <= 1 {
        return IsolationNode::Leaf { size: sample.len() };
    }

    // Only features that still vary in this node can split it.
    let spreads: Vec<(usize, f64, f64)> = (0..EVENT_FEATURES)
        .filter_map(|feature| {
            let (lo, hi) = sample
                .iter()
                .map(|&i| rows[i][feature])
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            (hi > lo).then_some((feature, lo, hi))
        })
        .collect();

    if spreads.is_empty() {
        return IsolationNode::Leaf { size: sample.len() };
    }

    let (feature, lo, hi) = spreads[rng.gen_range(0..spreads.len())];
    let split = rng.gen_range(lo..hi);

    let mut boundary = 0;
    for i in 0..sample.len() {
        if rows[sample[i]][feature] < split {
            sample.swap(i, boundary);
            boundary += 1;
        }
    }
    let (left, right) = sample.split_at_mut(boundary);

    IsolationNode::Internal {
        feature,
        split,
        left: Box::new(build(rows, left, depth + 1, max_depth, rng)),
        right: Box::new(build(rows, right, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &IsolationNode, row: &Row) -> f64 {
    let mut node = node;
    let mut depth = 0.0;
    loop {
        match node {
            IsolationNode::Leaf { size } => return depth + average_path_length(*size),
            IsolationNode::Internal {
                feature,
                split,
                left,
                right,
            } => {
                node = if row[*feature] < *split {
                    &**left
                } else {
                    &**right
                };
                depth += 1.0;
            }
        }
    }
}

/// Anomaly score of every row, fitted on the rows themselves.
pub fn scores(rows: &[Row], params: IsolationParams, rng: &mut StdRng) -> Vec<f64> {
    let n = rows.len();
    let psi = params.sample_size.min(n);
    let norm = average_path_length(psi);
    if norm == 0.0 {
        return vec![0.5; n];
    }
    let max_depth = (psi as f64).log2().ceil() as usize;

    let trees: Vec<IsolationNode> = (0..params.trees.max(1))
        .map(|_| {
            let mut sample = rand::seq::index::sample(rng, n, psi).into_vec();
            build(rows, &mut sample, 0, max_depth, rng)
        })
        .collect();

    rows.iter()
        .map(|row| {
            let mean_path =
                trees.iter().map(|t| path_length(t, row)).sum::<f64>() / trees.len() as f64;
            2f64.powf(-mean_path / norm)
        })
        .collect()
}

/// Linear-interpolated quantile of `values`, `q` in `[0, 1]`.
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
}

/// Flags rows whose score is strictly above the `(1 - contamination)` quantile of the batch.
pub fn outliers(rows: &[Row], params: IsolationParams, rng: &mut StdRng) -> Vec<bool> {
    if rows.is_empty() {
        return Vec::new();
    }
    let scores = scores(rows, params, rng);
    let threshold = quantile(&scores, 1.0 - params.contamination);
    scores.iter().map(|s| *s > threshold).collect()
}
