//! Constants used throughout the adherence core crate.
//!
//! Scoring constants here are part of the verdict contract and are deliberately not exposed
//! through [`CoreConfig`](crate::config::CoreConfig).

/// Number of daily steps in a sequence window.
pub const WINDOW_LEN: usize = 7;

/// Features per window step: confirmation rate, mean delay, event count.
pub const STEP_FEATURES: usize = 3;

/// Columns of a static classifier row: adherence rate, missed doses, average delay, history length.
pub const STATIC_FEATURES: usize = 4;

/// Columns of a per-event anomaly row: delay, missed indicator, confirmed indicator.
pub const EVENT_FEATURES: usize = 3;

/// Number of adherence cohorts.
pub const COHORT_COUNT: usize = 3;

/// Weight of the static classifier in the risk ensemble.
pub const STATIC_WEIGHT: f64 = 0.6;

/// Weight of the sequence model in the risk ensemble.
pub const SEQUENCE_WEIGHT: f64 = 0.4;

/// Probability contributed by a sub-model that cannot score the input.
pub const NEUTRAL_PROBABILITY: f64 = 0.5;

/// Version written into exported model state documents.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Default directory for persisted model state when no explicit directory is configured.
pub const DEFAULT_MODEL_DIR: &str = "models";

/// Filename for the exported cohort clusterer state.
pub const COHORT_STATE_FILENAME: &str = "cohort_model.json";

/// Filename for the exported risk ensemble state.
pub const RISK_STATE_FILENAME: &str = "risk_model.json";
