//! Lloyd's k-means with k-means++ seeding and restarts.

use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit<const D: usize> {
    pub centroids: Vec<[f64; D]>,
    /// Sum of squared distances from each point to its assigned centroid.
    pub inertia: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct KMeansParams {
    pub k: usize,
    pub restarts: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
}

/// Runs `restarts` independent k-means fits and keeps the one with the lowest inertia.
///
/// `points` must hold at least `k` rows; the caller checks this.
pub fn fit<const D: usize>(
    points: &[[f64; D]],
    params: KMeansParams,
    rng: &mut StdRng,
) -> KMeansFit<D> {
    let mut best: Option<KMeansFit<D>> = None;

    for _ in 0..params.restarts.max(1) {
        let run = fit_once(points, params, rng);
        let better = best.as_ref().map_or(true, |b| run.inertia < b.inertia);
        if better {
            best = Some(run);
        }
    }

    best.unwrap_or(KMeansFit {
        centroids: Vec::new(),
        inertia: 0.0,
    })
}

/// Index of the nearest centroid; ties go to the lowest index.
pub fn nearest<const D: usize>(point: &[f64; D], centroids: &[[f64; D]]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = squared_distance(point, centroid);
        if dist < best_dist {
            best = idx;
            best_dist = dist;
        }
    }
    best
}

fn fit_once<const D: usize>(
    points: &[[f64; D]],
    params: KMeansParams,
    rng: &mut StdRng,
) -> KMeansFit<D> {
    let mut centroids = plus_plus_init(points, params.k, rng);
    let mut assignment = vec![0usize; points.len()];

    for _ in 0..params.max_iterations {
        for (slot, point) in assignment.iter_mut().zip(points) {
            *slot = nearest(point, &centroids);
        }

        let mut sums = vec![[0.0; D]; params.k];
        let mut counts = vec![0usize; params.k];
        for (point, &cluster) in points.iter().zip(&assignment) {
            counts[cluster] += 1;
            for (s, v) in sums[cluster].iter_mut().zip(point) {
                *s += v;
            }
        }

        let mut next = centroids.clone();
        for cluster in 0..params.k {
            if counts[cluster] == 0 {
                // Re-seed an empty cluster with the point worst served by its centroid.
                if let Some(far) = farthest_point(points, &assignment, &centroids) {
                    next[cluster] = points[far];
                    assignment[far] = cluster;
                }
                continue;
            }
            for (c, s) in next[cluster].iter_mut().zip(&sums[cluster]) {
                *c = s / counts[cluster] as f64;
            }
        }

        let shift: f64 = centroids
            .iter()
            .zip(&next)
            .map(|(a, b)| squared_distance(a, b))
            .sum();
        centroids = next;
        if shift <= params.tolerance {
            break;
        }
    }

    let inertia = points
        .iter()
        .map(|p| squared_distance(p, &centroids[nearest(p, &centroids)]))
        .sum();

    KMeansFit { centroids, inertia }
}

fn plus_plus_init<const D: usize>(points: &[[f64; D]], k: usize, rng: &mut StdRng) -> Vec<[f64; D]> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);

    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|p| squared_distance(p, &centroids[nearest(p, &centroids)]))
            .collect();
        let total: f64 = weights.iter().sum();

        let chosen = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (idx, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = idx;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            rng.gen_range(0..points.len())
        };
        centroids.push(points[chosen]);
    }

    centroids
}

fn farthest_point<const D: usize>(
    points: &[[f64; D]],
    assignment: &[usize],
    centroids: &[[f64; D]],
) -> Option<usize> {
    points
        .iter()
        .zip(assignment)
        .map(|(p, &c)| squared_distance(p, &centroids[c]))
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(idx, _)| idx)
}

pub fn squared_distance<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}
