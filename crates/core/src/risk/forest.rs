//! Random forest of CART classification trees for the static risk features.

use crate::constants::STATIC_FEATURES;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

type Row = [f64; STATIC_FEATURES];

#[derive(Debug, Clone, Copy)]
pub struct ForestParams {
    pub trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        /// Fraction of class-1 samples that reached this leaf.
        positive: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn is_well_formed(&self) -> bool {
        match self {
            Node::Leaf { positive } => (0.0..=1.0).contains(positive),
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                *feature < STATIC_FEATURES
                    && !threshold.is_nan()
                    && left.is_well_formed()
                    && right.is_well_formed()
            }
        }
    }

    fn positive_fraction(&self, row: &Row) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf { positive } => return *positive,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold {
                        &**left
                    } else {
                        &**right
                    };
                }
            }
        }
    }
}

/// Bootstrap-aggregated CART trees with Gini splits over a random feature subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<Node>,
    saw_negative: bool,
    saw_positive: bool,
}

impl RandomForest {
    /// Fits the forest. `labels` are 0/1 and parallel to `rows`; both are non-empty and
    /// validated by the caller.
    pub fn fit(rows: &[Row], labels: &[u8], params: ForestParams, rng: &mut StdRng) -> Self {
        let n = rows.len();
        let trees = (0..params.trees.max(1))
            .map(|_| {
                let mut sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                build_node(rows, labels, &mut sample, 0, params, rng)
            })
            .collect();

        Self {
            trees,
            saw_negative: labels.iter().any(|&y| y == 0),
            saw_positive: labels.iter().any(|&y| y == 1),
        }
    }

    /// True when the training labels contained both classes, so that the class-1 probability
    /// is meaningful.
    pub fn has_both_classes(&self) -> bool {
        self.saw_negative && self.saw_positive
    }

    /// Mean class-1 leaf fraction across trees.
    pub fn predict_proba(&self, row: &Row) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let total: f64 = self.trees.iter().map(|t| t.positive_fraction(row)).sum();
        total / self.trees.len() as f64
    }

    /// True when every split indexes a static feature and every leaf holds a probability.
    pub fn is_well_formed(&self) -> bool {
        self.trees.iter().all(Node::is_well_formed)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

fn gini(positive: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = positive as f64 / n as f64;
    2.0 * p * (1.0 - p)
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

fn build_node(
    rows: &[Row],
    labels: &[u8],
    sample: &mut [usize],
    depth: usize,
    params: ForestParams,
    rng: &mut StdRng,
) -> Node {
    let n = sample.len();
    let positive = sample.iter().filter(|&&i| labels[i] == 1).count();
    let leaf = Node::Leaf {
        positive: if n == 0 { 0.5 } else { positive as f64 / n as f64 },
    };

    if depth >= params.max_depth || n < params.min_samples_split || positive == 0 || positive == n
    {
        return leaf;
    }

    let Some(best) = best_split(rows, labels, sample, rng) else {
        return leaf;
    };

    // Partition in place: rows going left first.
    let mut boundary = 0;
    for i in 0..n {
        if rows[sample[i]][best.feature] <= best.threshold {
            sample.swap(i, boundary);
            boundary += 1;
        }
    }
    let (left, right) = sample.split_at_mut(boundary);

    Node::Split {
        feature: best.feature,
        threshold: best.threshold,
        left: Box::new(build_node(rows, labels, left, depth + 1, params, rng)),
        right: Box::new(build_node(rows, labels, right, depth + 1, params, rng)),
    }
}

fn best_split(rows: &[Row], labels: &[u8], sample: &[usize], rng: &mut StdRng) -> Option<BestSplit> {
    let candidates = ((STATIC_FEATURES as f64).sqrt().floor() as usize).max(1);
    let mut features: Vec<usize> = (0..STATIC_FEATURES).collect();
    features.shuffle(rng);

    let n = sample.len();
    let total_positive = sample.iter().filter(|&&i| labels[i] == 1).count();
    let mut best: Option<BestSplit> = None;

    for &feature in features.iter().take(candidates) {
        let mut column: Vec<(f64, u8)> = sample
            .iter()
            .map(|&i| (rows[i][feature], labels[i]))
            .collect();
        column.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_positive = 0;
        for split in 1..n {
            if column[split - 1].1 == 1 {
                left_positive += 1;
            }
            let (lo, hi) = (column[split - 1].0, column[split].0);
            if lo == hi {
                continue;
            }

            let right_positive = total_positive - left_positive;
            let impurity = (split as f64 * gini(left_positive, split)
                + (n - split) as f64 * gini(right_positive, n - split))
                / n as f64;

            if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                best = Some(BestSplit {
                    feature,
                    threshold: lo + (hi - lo) / 2.0,
                    impurity,
                });
            }
        }
    }

    best
}
