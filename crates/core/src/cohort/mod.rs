//! Cohort clustering.
//!
//! Patients are grouped into three adherence cohorts by k-means over their standardised
//! [`PatientFeatureVector`]s (adherence rate, missed doses, average delay, prescriptions).
//!
//! ## Label policy
//!
//! k-means numbers its clusters arbitrarily, so the cluster that holds the most adherent
//! patients can change between fits. [`LabelPolicy::ByAdherence`] ranks the fitted centroids
//! by their adherence rate and labels them from `NON_ADHERENT` to `ADHERENT`.
//! [`LabelPolicy::FixedIndex`] keeps the historical table (cluster 0 → `NON_ADHERENT`,
//! 1 → `MODERATE`, 2 → `ADHERENT`) regardless of what each cluster contains.
//!
//! ## Shared state
//!
//! Fitted state lives in a [`ModelCell`]. `fit` and `import_state` build a complete
//! [`FittedCohorts`] before swapping it in; `predict` works on a snapshot.

mod kmeans;

use crate::config::CoreConfig;
use crate::constants::COHORT_COUNT;
use crate::scaler::StandardScaler;
use crate::snapshot::{decode_state, encode_state, ModelCell};
use crate::{AnalyticsError, AnalyticsResult};
use adherence_types::{Cohort, CohortAssignment, PatientFeatureVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DIMS: usize = PatientFeatureVector::DIMENSIONS;

/// How fitted clusters are mapped onto cohort labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    /// Cluster index `i` carries `Cohort::ALL[i]`.
    FixedIndex,
    /// Clusters are ranked by centroid adherence rate, lowest first.
    ByAdherence,
}

/// Parameters learned by [`CohortClusterer::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedCohorts {
    scaler: StandardScaler,
    /// Centroids in the standardised space, indexed by cluster.
    centroids: Vec<[f64; DIMS]>,
    /// Cohort carried by each cluster.
    labels: Vec<Cohort>,
    inertia: f64,
}

impl FittedCohorts {
    pub fn centroids(&self) -> &[[f64; DIMS]] {
        &self.centroids
    }

    pub fn labels(&self) -> &[Cohort] {
        &self.labels
    }

    pub fn inertia(&self) -> f64 {
        self.inertia
    }
}

/// Unsupervised grouping of patients into adherence cohorts.
#[derive(Debug)]
pub struct CohortClusterer {
    cfg: Arc<CoreConfig>,
    state: ModelCell<Option<FittedCohorts>>,
}

impl CohortClusterer {
    /// Creates an unfitted clusterer.
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self {
            cfg,
            state: ModelCell::new(None),
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.state.snapshot().is_some()
    }

    /// Fits standardisation statistics and three centroids on `batch`, replacing any previous
    /// fit.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::MalformedInput` if the batch holds fewer patients than cohorts
    /// or contains non-finite values.
    pub fn fit(&self, batch: &[PatientFeatureVector]) -> AnalyticsResult<()> {
        if batch.len() < COHORT_COUNT {
            return Err(AnalyticsError::MalformedInput(format!(
                "clustering needs at least {COHORT_COUNT} patients, got {}",
                batch.len()
            )));
        }
        let rows = finite_rows(batch)?;

        let scaler = StandardScaler::fit(&rows, DIMS);
        let scaled: Vec<[f64; DIMS]> = rows.iter().map(|r| scaler.transform(r)).collect();

        let cohort_cfg = self.cfg.cohort();
        let mut rng = StdRng::seed_from_u64(self.cfg.seed());
        let fit = kmeans::fit(
            &scaled,
            kmeans::KMeansParams {
                k: COHORT_COUNT,
                restarts: cohort_cfg.restarts,
                max_iterations: cohort_cfg.max_iterations,
                tolerance: cohort_cfg.tolerance,
            },
            &mut rng,
        );

        let labels = assign_labels(&fit.centroids, cohort_cfg.label_policy);

        tracing::info!(
            patients = batch.len(),
            inertia = fit.inertia,
            "fitted cohort clusterer"
        );

        self.state.replace(Some(FittedCohorts {
            scaler,
            centroids: fit.centroids,
            labels,
            inertia: fit.inertia,
        }));
        Ok(())
    }

    /// Assigns each patient in `batch` to the nearest fitted cohort.
    ///
    /// Prediction is deterministic for a given fitted state.
    ///
    /// # Errors
    ///
    /// - `AnalyticsError::InvalidState` if the clusterer has never been fitted or loaded
    /// - `AnalyticsError::MalformedInput` if the batch is empty or contains non-finite values
    pub fn predict(&self, batch: &[PatientFeatureVector]) -> AnalyticsResult<CohortAssignment> {
        let snapshot = self.state.snapshot();
        let fitted = snapshot.as_ref().as_ref().ok_or_else(|| {
            AnalyticsError::InvalidState("cohort clusterer has not been fitted".into())
        })?;

        if batch.is_empty() {
            return Err(AnalyticsError::MalformedInput(
                "cohort prediction needs at least one patient".into(),
            ));
        }
        let rows = finite_rows(batch)?;

        let labels = rows
            .iter()
            .map(|row| {
                let scaled = fitted.scaler.transform(row);
                fitted.labels[kmeans::nearest(&scaled, &fitted.centroids)]
            })
            .collect();

        Ok(CohortAssignment {
            labels,
            centroids: fitted.centroids.clone(),
            centroid_labels: fitted.labels.clone(),
            label_names: Cohort::ALL.to_vec(),
        })
    }

    /// Current fitted parameters, if any.
    pub fn fitted(&self) -> Option<FittedCohorts> {
        self.state.snapshot().as_ref().clone()
    }

    /// Serialises the fitted parameters for the persistence boundary.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::InvalidState` if there is nothing fitted to export.
    pub fn export_state(&self) -> AnalyticsResult<Vec<u8>> {
        let snapshot = self.state.snapshot();
        let fitted = snapshot.as_ref().as_ref().ok_or_else(|| {
            AnalyticsError::InvalidState("cohort clusterer has not been fitted".into())
        })?;
        encode_state(fitted)
    }

    /// Replaces the fitted parameters with a previously exported blob.
    pub fn import_state(&self, bytes: &[u8]) -> AnalyticsResult<()> {
        let fitted: FittedCohorts = decode_state(bytes)?;
        if fitted.centroids.len() != COHORT_COUNT
            || fitted.labels.len() != COHORT_COUNT
            || fitted.scaler.width() != DIMS
        {
            return Err(AnalyticsError::MalformedInput(
                "cohort state does not describe three 4-dimensional clusters".into(),
            ));
        }
        tracing::info!("imported cohort clusterer state");
        self.state.replace(Some(fitted));
        Ok(())
    }
}

fn finite_rows(batch: &[PatientFeatureVector]) -> AnalyticsResult<Vec<[f64; DIMS]>> {
    batch
        .iter()
        .enumerate()
        .map(|(idx, features)| {
            let row = features.as_array();
            if row.iter().all(|v| v.is_finite()) {
                Ok(row)
            } else {
                Err(AnalyticsError::MalformedInput(format!(
                    "patient {idx} has non-finite features"
                )))
            }
        })
        .collect()
}

fn assign_labels(centroids: &[[f64; DIMS]], policy: LabelPolicy) -> Vec<Cohort> {
    match policy {
        LabelPolicy::FixedIndex => Cohort::ALL.iter().copied().take(centroids.len()).collect(),
        LabelPolicy::ByAdherence => {
            let mut order: Vec<usize> = (0..centroids.len()).collect();
            order.sort_by(|&a, &b| centroids[a][0].total_cmp(&centroids[b][0]).then(a.cmp(&b)));

            let mut labels = vec![Cohort::Moderate; centroids.len()];
            for (rank, cluster) in order.into_iter().enumerate() {
                labels[cluster] = Cohort::ALL[rank.min(Cohort::ALL.len() - 1)];
            }
            labels
        }
    }
}
