//! Missed-dose risk ensemble.
//!
//! Two independently trained sub-models score a patient's history:
//!
//! - a random forest over the static row from [`static_features`]
//! - a recurrent sequence model over the earliest full 7-day window from [`windowed_features`]
//!
//! The final score is `0.6 · static + 0.4 · sequence`. A sub-model that cannot score the input
//! (never fitted, fitted on one class only, or no full window available) contributes the
//! neutral probability 0.5.
//!
//! The ensemble is an explicit two-state machine, [`RiskState::Untrained`] or
//! [`RiskState::Trained`]. An untrained ensemble returns [`RiskVerdict::neutral`] rather than an
//! error.

mod forest;
mod sequence;

pub use forest::RandomForest;
pub use sequence::SequenceModel;

use crate::config::CoreConfig;
use crate::constants::{
    NEUTRAL_PROBABILITY, SEQUENCE_WEIGHT, STATIC_FEATURES, STATIC_WEIGHT, STEP_FEATURES,
};
use crate::features::{static_features, windowed_features, Window};
use crate::scaler::StandardScaler;
use crate::snapshot::{decode_state, encode_state, ModelCell};
use crate::{AnalyticsError, AnalyticsResult};
use adherence_types::{IntakeEvent, RiskVerdict};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Sequence model together with the step standardisation it was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedSequence {
    scaler: StandardScaler,
    model: SequenceModel,
}

impl FittedSequence {
    fn predict(&self, window: &Window) -> f64 {
        let mut scaled = *window;
        for step in scaled.iter_mut() {
            self.scaler.transform_in_place(step);
        }
        self.model.predict(&scaled)
    }
}

/// Fitted parameters of a trained ensemble. Either sub-model may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FittedRisk {
    forest: Option<RandomForest>,
    sequence: Option<FittedSequence>,
}

impl FittedRisk {
    fn check_shapes(&self) -> AnalyticsResult<()> {
        if self.forest.as_ref().is_some_and(|f| !f.is_well_formed()) {
            return Err(AnalyticsError::MalformedInput(format!(
                "risk state holds a forest split outside the {STATIC_FEATURES} static features"
            )));
        }
        if let Some(seq) = &self.sequence {
            if !seq.scaler.fits_width(STEP_FEATURES) || !seq.model.is_well_formed() {
                return Err(AnalyticsError::MalformedInput(
                    "risk state holds a sequence model with inconsistent weight shapes".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn has_static_model(&self) -> bool {
        self.forest.is_some()
    }

    pub fn has_sequence_model(&self) -> bool {
        self.sequence.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "model", rename_all = "snake_case")]
pub enum RiskState {
    #[default]
    Untrained,
    Trained(FittedRisk),
}

/// What happened to one sub-model during a training call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubModelOutcome {
    Fitted { samples: usize },
    /// No training rows were supplied; any previously fitted sub-model is kept.
    SkippedNoData,
    /// Training rows were unusable; any previously fitted sub-model is kept.
    Skipped { reason: String },
}

impl SubModelOutcome {
    fn skipped(err: &AnalyticsError) -> Self {
        Self::Skipped {
            reason: err.to_string(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self, Self::Fitted { .. })
    }
}

/// Per-sub-model result of [`RiskEnsemble::train`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskTrainingReport {
    pub static_model: SubModelOutcome,
    pub sequence_model: SubModelOutcome,
}

pub struct RiskEnsemble {
    cfg: Arc<CoreConfig>,
    state: ModelCell<RiskState>,
}

impl std::fmt::Debug for RiskEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEnsemble")
            .field("trained", &self.is_trained())
            .finish()
    }
}

impl RiskEnsemble {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self {
            cfg,
            state: ModelCell::new(RiskState::Untrained),
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(*self.state.snapshot(), RiskState::Trained(_))
    }

    /// Current state snapshot.
    pub fn state(&self) -> Arc<RiskState> {
        self.state.snapshot()
    }

    /// Fits the static classifier and the sequence model independently and moves the ensemble to
    /// the trained state.
    ///
    /// The static classifier is fitted when `x_static` is non-empty. The sequence model is
    /// fitted when both sequence inputs are non-empty and of equal length; unequal lengths skip
    /// it with a [`AnalyticsError::TrainingDataMismatch`] reason in the report. A skipped
    /// sub-model keeps whatever it was fitted with before, including when another training call
    /// runs concurrently: calls are applied one after another.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::MalformedInput` if the static rows and labels differ in length,
    /// a label is not 0 or 1, or a feature is not finite. Nothing is replaced in that case.
    pub fn train(
        &self,
        x_static: &[[f64; STATIC_FEATURES]],
        y_static: &[u8],
        x_sequence: &[Window],
        y_sequence: &[u8],
    ) -> AnalyticsResult<RiskTrainingReport> {
        if !x_static.is_empty() && x_static.len() != y_static.len() {
            return Err(AnalyticsError::MalformedInput(format!(
                "static training has {} rows but {} labels",
                x_static.len(),
                y_static.len()
            )));
        }
        check_labels("static", y_static)?;
        check_labels("sequence", y_sequence)?;
        if x_static.iter().flatten().any(|v| !v.is_finite()) {
            return Err(AnalyticsError::MalformedInput(
                "static training rows contain non-finite values".into(),
            ));
        }
        if x_sequence.iter().flatten().flatten().any(|v| !v.is_finite()) {
            return Err(AnalyticsError::MalformedInput(
                "sequence training windows contain non-finite values".into(),
            ));
        }

        let report = self.state.update(|current| {
            let previous = match current {
                RiskState::Trained(fitted) => fitted.clone(),
                RiskState::Untrained => FittedRisk::default(),
            };
            let (forest, static_model) = self.train_static(x_static, y_static, previous.forest);
            let (sequence, sequence_model) =
                self.train_sequence(x_sequence, y_sequence, previous.sequence);
            Ok::<_, AnalyticsError>((
                RiskState::Trained(FittedRisk { forest, sequence }),
                RiskTrainingReport {
                    static_model,
                    sequence_model,
                },
            ))
        })?;
        tracing::info!(
            static_fitted = report.static_model.is_fitted(),
            sequence_fitted = report.sequence_model.is_fitted(),
            "trained risk ensemble"
        );

        Ok(report)
    }

    fn train_static(
        &self,
        rows: &[[f64; STATIC_FEATURES]],
        labels: &[u8],
        previous: Option<RandomForest>,
    ) -> (Option<RandomForest>, SubModelOutcome) {
        if rows.is_empty() {
            tracing::debug!("no static training rows, static classifier skipped");
            return (previous, SubModelOutcome::SkippedNoData);
        }
        let forest_cfg = self.cfg.forest();
        let mut rng = StdRng::seed_from_u64(self.cfg.seed());
        let forest = RandomForest::fit(
            rows,
            labels,
            forest::ForestParams {
                trees: forest_cfg.trees,
                max_depth: forest_cfg.max_depth,
                min_samples_split: forest_cfg.min_samples_split,
            },
            &mut rng,
        );
        if !forest.has_both_classes() {
            tracing::debug!("static labels hold a single class, classifier will score neutral");
        }
        (
            Some(forest),
            SubModelOutcome::Fitted {
                samples: rows.len(),
            },
        )
    }

    fn train_sequence(
        &self,
        windows: &[Window],
        labels: &[u8],
        previous: Option<FittedSequence>,
    ) -> (Option<FittedSequence>, SubModelOutcome) {
        if windows.is_empty() || labels.is_empty() {
            tracing::debug!("no sequence training windows, sequence model skipped");
            return (previous, SubModelOutcome::SkippedNoData);
        }
        if windows.len() != labels.len() {
            let err = AnalyticsError::TrainingDataMismatch {
                features: windows.len(),
                labels: labels.len(),
            };
            tracing::debug!(error = %err, "sequence model skipped");
            return (previous, SubModelOutcome::skipped(&err));
        }
        (
            Some(self.fit_sequence(windows, labels)),
            SubModelOutcome::Fitted {
                samples: windows.len(),
            },
        )
    }

    fn fit_sequence(&self, windows: &[Window], labels: &[u8]) -> FittedSequence {
        let steps: Vec<[f64; STEP_FEATURES]> = windows.iter().flatten().copied().collect();
        let scaler = StandardScaler::fit(&steps, STEP_FEATURES);

        let scaled: Vec<Window> = windows
            .iter()
            .map(|w| {
                let mut w = *w;
                for step in w.iter_mut() {
                    scaler.transform_in_place(step);
                }
                w
            })
            .collect();

        let seq_cfg = self.cfg.sequence();
        // Offset keeps the two sub-models' random streams independent.
        let mut rng = StdRng::seed_from_u64(self.cfg.seed().wrapping_add(1));
        let model = SequenceModel::fit(
            &scaled,
            labels,
            sequence::SequenceParams {
                hidden_units: seq_cfg.hidden_units,
                epochs: seq_cfg.epochs,
                batch_size: seq_cfg.batch_size,
                learning_rate: seq_cfg.learning_rate,
            },
            &mut rng,
        );

        FittedSequence { scaler, model }
    }

    /// Scores one patient's event history.
    ///
    /// Never fails: an untrained ensemble, or a sub-model without usable input, falls back to
    /// the neutral probability.
    pub fn predict_risk(&self, events: &[IntakeEvent]) -> RiskVerdict {
        let snapshot = self.state.snapshot();
        let fitted = match snapshot.as_ref() {
            RiskState::Untrained => {
                tracing::debug!("risk ensemble untrained, returning neutral verdict");
                return RiskVerdict::neutral();
            }
            RiskState::Trained(fitted) => fitted,
        };

        let static_probability = fitted
            .forest
            .as_ref()
            .filter(|f| f.has_both_classes())
            .map(|f| f.predict_proba(&static_features(events)))
            .unwrap_or(NEUTRAL_PROBABILITY);

        let series = windowed_features(events);
        let sequence_probability = match (fitted.sequence.as_ref(), series.full_windows().first()) {
            (Some(model), Some(window)) => model.predict(window),
            _ => NEUTRAL_PROBABILITY,
        };

        let score = STATIC_WEIGHT * static_probability + SEQUENCE_WEIGHT * sequence_probability;
        RiskVerdict::from_score(score.clamp(0.0, 1.0))
    }

    /// Serialises the current state, trained or not, for the persistence boundary.
    pub fn export_state(&self) -> AnalyticsResult<Vec<u8>> {
        encode_state(self.state.snapshot().as_ref())
    }

    /// Replaces the current state with a previously exported blob.
    ///
    /// # Errors
    ///
    /// Returns `MalformedInput` when the blob decodes but its parameters do not fit the model
    /// shapes. The current state is kept.
    pub fn import_state(&self, bytes: &[u8]) -> AnalyticsResult<()> {
        let state: RiskState = decode_state(bytes)?;
        if let RiskState::Trained(fitted) = &state {
            fitted.check_shapes()?;
        }
        self.state.replace(state);
        tracing::info!("imported risk ensemble state");
        Ok(())
    }
}

fn check_labels(name: &str, labels: &[u8]) -> AnalyticsResult<()> {
    match labels.iter().find(|&&y| y > 1) {
        Some(bad) => Err(AnalyticsError::MalformedInput(format!(
            "{name} label {bad} is not 0 or 1"
        ))),
        None => Ok(()),
    }
}
