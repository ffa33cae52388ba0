//! Offline training orchestration.
//!
//! Routes a labelled [`TrainingBatch`] to the two trainable components and reports what each
//! one did. Shape checks beyond those each component already performs are not repeated here.

use crate::cohort::CohortClusterer;
use crate::constants::STATIC_FEATURES;
use crate::features::{flat_features, static_features, windowed_features, Window};
use crate::risk::{RiskEnsemble, RiskTrainingReport, SubModelOutcome};
use crate::AnalyticsResult;
use adherence_types::{IntakeEvent, PatientFeatureVector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Labelled data for one training call. Every field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingBatch {
    /// Feature vectors for the cohort clusterer.
    pub patients: Vec<PatientFeatureVector>,
    pub static_features: Vec<[f64; STATIC_FEATURES]>,
    /// 1 when the patient went on to miss a dose.
    pub static_labels: Vec<u8>,
    pub sequence_windows: Vec<Window>,
    pub sequence_labels: Vec<u8>,
}

/// An event history with its outcome label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledHistory {
    pub events: Vec<IntakeEvent>,
    pub label: u8,
}

impl TrainingBatch {
    /// Builds every training input from labelled histories with the same feature functions
    /// used at prediction time.
    ///
    /// Each history contributes a patient vector, a static row, and one sequence sample per
    /// full 7-day window, all carrying the history's label.
    pub fn from_labelled_histories(histories: &[LabelledHistory]) -> Self {
        let mut batch = Self::default();
        for history in histories {
            batch.patients.push(flat_features(&history.events));
            batch.static_features.push(static_features(&history.events));
            batch.static_labels.push(history.label);

            for window in windowed_features(&history.events).full_windows() {
                batch.sequence_windows.push(*window);
                batch.sequence_labels.push(history.label);
            }
        }
        batch
    }
}

/// Outcome of a training call, one entry per trainable component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub cohort_model: SubModelOutcome,
    pub static_model: SubModelOutcome,
    pub sequence_model: SubModelOutcome,
}

impl TrainingReport {
    /// Human-readable summary for the boundary layer.
    pub fn summary(&self) -> String {
        let fitted = [&self.cohort_model, &self.static_model, &self.sequence_model]
            .iter()
            .filter(|o| o.is_fitted())
            .count();
        format!("Models trained successfully ({fitted} of 3 fitted)")
    }
}

pub struct TrainingController {
    cohorts: Arc<CohortClusterer>,
    risk: Arc<RiskEnsemble>,
}

impl TrainingController {
    pub fn new(cohorts: Arc<CohortClusterer>, risk: Arc<RiskEnsemble>) -> Self {
        Self { cohorts, risk }
    }

    /// Fits the cohort clusterer on `batch.patients` (when non-empty) and trains the risk
    /// ensemble on the remaining fields.
    ///
    /// # Errors
    ///
    /// Propagates `MalformedInput` from either component. The clusterer is fitted first, so a
    /// risk-side failure leaves a freshly fitted clusterer in place.
    pub fn train(&self, batch: &TrainingBatch) -> AnalyticsResult<TrainingReport> {
        let cohort_model = if batch.patients.is_empty() {
            tracing::debug!("no patients supplied, cohort clusterer skipped");
            SubModelOutcome::SkippedNoData
        } else {
            self.cohorts.fit(&batch.patients)?;
            SubModelOutcome::Fitted {
                samples: batch.patients.len(),
            }
        };

        let RiskTrainingReport {
            static_model,
            sequence_model,
        } = self.risk.train(
            &batch.static_features,
            &batch.static_labels,
            &batch.sequence_windows,
            &batch.sequence_labels,
        )?;

        Ok(TrainingReport {
            cohort_model,
            static_model,
            sequence_model,
        })
    }
}
