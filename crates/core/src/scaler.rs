//! Per-column standardisation.

use serde::{Deserialize, Serialize};

/// Zero-mean, unit-variance scaling fitted on a batch of rows.
///
/// Uses the population standard deviation. A column with no spread keeps a scale of 1 so that
/// transforming it yields zeros instead of dividing by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fits the scaler on `rows`. An empty batch yields an identity scaler of width `width`.
    pub fn fit<R: AsRef<[f64]>>(rows: &[R], width: usize) -> Self {
        let n = rows.len();
        if n == 0 {
            return Self {
                mean: vec![0.0; width],
                scale: vec![1.0; width],
            };
        }

        let mut mean = vec![0.0; width];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.as_ref()) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n as f64;
        }

        let mut var = vec![0.0; width];
        for row in rows {
            for ((acc, v), m) in var.iter_mut().zip(row.as_ref()).zip(&mean) {
                *acc += (v - m).powi(2);
            }
        }

        let scale = var
            .into_iter()
            .map(|v| {
                let std = (v / n as f64).sqrt();
                if std > f64::EPSILON {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        Self { mean, scale }
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// True when the scaler standardises exactly `width` columns.
    pub fn fits_width(&self, width: usize) -> bool {
        self.mean.len() == width && self.scale.len() == width
    }

    /// Standardises a single row in place.
    pub fn transform_in_place(&self, row: &mut [f64]) {
        for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
            *v = (*v - m) / s;
        }
    }

    pub fn transform<const N: usize>(&self, row: &[f64; N]) -> [f64; N] {
        let mut out = *row;
        self.transform_in_place(&mut out);
        out
    }
}
