use crate::anomaly::AnomalyEnsemble;
use crate::cohort::CohortClusterer;
use crate::config::CoreConfig;
use crate::features::flat_features;
use crate::risk::RiskEnsemble;
use crate::training::{TrainingBatch, TrainingController, TrainingReport};
use crate::AnalyticsResult;
use adherence_types::{
    AnomalyVerdict, CohortAssignment, IntakeEvent, PatientFeatureVector, RiskVerdict,
};
use std::sync::Arc;

/// Entry point for the boundary layer: one instance owns the fitted models and is shared
/// between request handlers.
#[derive(Debug)]
pub struct AdherenceService {
    cohorts: Arc<CohortClusterer>,
    risk: Arc<RiskEnsemble>,
    anomalies: AnomalyEnsemble,
}

impl AdherenceService {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self {
            cohorts: Arc::new(CohortClusterer::new(cfg.clone())),
            risk: Arc::new(RiskEnsemble::new(cfg.clone())),
            anomalies: AnomalyEnsemble::new(cfg),
        }
    }

    pub fn cohorts(&self) -> &CohortClusterer {
        &self.cohorts
    }

    pub fn risk(&self) -> &RiskEnsemble {
        &self.risk
    }

    pub fn train(&self, batch: &TrainingBatch) -> AnalyticsResult<TrainingReport> {
        TrainingController::new(self.cohorts.clone(), self.risk.clone()).train(batch)
    }

    pub fn assign_cohorts(
        &self,
        patients: &[PatientFeatureVector],
    ) -> AnalyticsResult<CohortAssignment> {
        self.cohorts.predict(patients)
    }

    /// Derives each patient's feature vector from their history, then assigns cohorts.
    pub fn cohorts_for_histories(
        &self,
        histories: &[Vec<IntakeEvent>],
    ) -> AnalyticsResult<CohortAssignment> {
        let patients: Vec<_> = histories.iter().map(|h| flat_features(h)).collect();
        self.cohorts.predict(&patients)
    }

    pub fn predict_risk(&self, events: &[IntakeEvent]) -> RiskVerdict {
        self.risk.predict_risk(events)
    }

    pub fn detect_anomalies(&self, events: &[IntakeEvent]) -> AnomalyVerdict {
        self.anomalies.detect(events)
    }
}
