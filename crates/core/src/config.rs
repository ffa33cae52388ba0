//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the services behind
//! an `Arc`. Nothing in this crate reads process-wide environment variables while scoring; the
//! `*_from_env_value` helpers take the raw value so the caller decides where it comes from.

use crate::cohort::LabelPolicy;
use crate::{AnalyticsError, AnalyticsResult};
use serde::{Deserialize, Serialize};

/// Seed used when none is configured.
pub const DEFAULT_SEED: u64 = 42;

/// Cohort clusterer hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortConfig {
    /// Independent k-means initialisations; the lowest-inertia run is kept.
    pub restarts: usize,
    pub max_iterations: usize,
    /// Centroid shift (squared, standardised space) below which Lloyd iterations stop.
    pub tolerance: f64,
    pub label_policy: LabelPolicy,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            restarts: 10,
            max_iterations: 300,
            tolerance: 1e-4,
            label_policy: LabelPolicy::ByAdherence,
        }
    }
}

/// Static (random forest) classifier hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    pub trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            trees: 100,
            max_depth: 16,
            min_samples_split: 2,
        }
    }
}

/// Sequence model hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub hidden_units: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            hidden_units: 16,
            epochs: 60,
            batch_size: 32,
            learning_rate: 0.05,
        }
    }
}

/// Anomaly ensemble parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Expected outlier fraction for the isolation forest.
    pub contamination: f64,
    /// Outlier fraction bound for the one-class boundary.
    pub nu: f64,
    pub isolation_trees: usize,
    pub isolation_sample_size: usize,
    /// Minimum trailing run of flagged missed events that counts as a sudden stop.
    pub sudden_stop_min_run: usize,
    /// Confirmed intakes of the same medication closer than this are re-dosing.
    pub overdose_window_minutes: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            nu: 0.1,
            isolation_trees: 100,
            isolation_sample_size: 256,
            sudden_stop_min_run: 2,
            overdose_window_minutes: 60.0,
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct CoreConfig {
    seed: u64,
    cohort: CohortConfig,
    forest: ForestConfig,
    sequence: SequenceConfig,
    anomaly: AnomalyConfig,
}

impl CoreConfig {
    /// Create a new `CoreConfig`, validating every parameter.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::InvalidConfig` if a count is zero, a fraction is outside its
    /// range, or a rate or window is not a positive finite number.
    pub fn new(
        seed: u64,
        cohort: CohortConfig,
        forest: ForestConfig,
        sequence: SequenceConfig,
        anomaly: AnomalyConfig,
    ) -> AnalyticsResult<Self> {
        fn require_positive(name: &str, value: usize) -> AnalyticsResult<()> {
            if value == 0 {
                return Err(AnalyticsError::InvalidConfig(format!(
                    "{name} must be at least 1"
                )));
            }
            Ok(())
        }

        require_positive("cohort restarts", cohort.restarts)?;
        require_positive("cohort max_iterations", cohort.max_iterations)?;
        require_positive("forest trees", forest.trees)?;
        require_positive("forest max_depth", forest.max_depth)?;
        require_positive("sequence hidden_units", sequence.hidden_units)?;
        require_positive("sequence epochs", sequence.epochs)?;
        require_positive("sequence batch_size", sequence.batch_size)?;
        require_positive("isolation_trees", anomaly.isolation_trees)?;
        require_positive("isolation_sample_size", anomaly.isolation_sample_size)?;
        require_positive("sudden_stop_min_run", anomaly.sudden_stop_min_run)?;

        if !(cohort.tolerance.is_finite() && cohort.tolerance >= 0.0) {
            return Err(AnalyticsError::InvalidConfig(
                "cohort tolerance must be a non-negative number".into(),
            ));
        }
        if forest.min_samples_split < 2 {
            return Err(AnalyticsError::InvalidConfig(
                "forest min_samples_split must be at least 2".into(),
            ));
        }
        if !(sequence.learning_rate.is_finite() && sequence.learning_rate > 0.0) {
            return Err(AnalyticsError::InvalidConfig(
                "sequence learning_rate must be a positive number".into(),
            ));
        }
        if !(anomaly.contamination > 0.0 && anomaly.contamination <= 0.5) {
            return Err(AnalyticsError::InvalidConfig(
                "contamination must be in (0, 0.5]".into(),
            ));
        }
        if !(anomaly.nu > 0.0 && anomaly.nu <= 1.0) {
            return Err(AnalyticsError::InvalidConfig("nu must be in (0, 1]".into()));
        }
        if !(anomaly.overdose_window_minutes.is_finite() && anomaly.overdose_window_minutes > 0.0)
        {
            return Err(AnalyticsError::InvalidConfig(
                "overdose_window_minutes must be a positive number".into(),
            ));
        }

        Ok(Self {
            seed,
            cohort,
            forest,
            sequence,
            anomaly,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn cohort(&self) -> &CohortConfig {
        &self.cohort
    }

    pub fn forest(&self) -> &ForestConfig {
        &self.forest
    }

    pub fn sequence(&self) -> &SequenceConfig {
        &self.sequence
    }

    pub fn anomaly(&self) -> &AnomalyConfig {
        &self.anomaly
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            cohort: CohortConfig::default(),
            forest: ForestConfig::default(),
            sequence: SequenceConfig::default(),
            anomaly: AnomalyConfig::default(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse the random seed from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns [`DEFAULT_SEED`].
pub fn seed_from_env_value(value: Option<String>) -> AnalyticsResult<u64> {
    match non_blank(value) {
        None => Ok(DEFAULT_SEED),
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| AnalyticsError::InvalidConfig(format!("invalid seed: {v}"))),
    }
}

/// Parse a fraction (contamination, nu) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns `default`. Range checks happen in
/// [`CoreConfig::new`].
pub fn fraction_from_env_value(
    name: &str,
    value: Option<String>,
    default: f64,
) -> AnalyticsResult<f64> {
    match non_blank(value) {
        None => Ok(default),
        Some(v) => v
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .ok_or_else(|| AnalyticsError::InvalidConfig(format!("invalid {name}: {v}"))),
    }
}

/// Parse the cohort label policy from an optional string value.
///
/// Accepts `by_adherence` or `fixed_index` (case-insensitive). Defaults to
/// [`LabelPolicy::ByAdherence`].
pub fn label_policy_from_env_value(value: Option<String>) -> AnalyticsResult<LabelPolicy> {
    match non_blank(value).map(|v| v.to_ascii_lowercase()) {
        None => Ok(LabelPolicy::ByAdherence),
        Some(v) if v == "by_adherence" => Ok(LabelPolicy::ByAdherence),
        Some(v) if v == "fixed_index" => Ok(LabelPolicy::FixedIndex),
        Some(v) => Err(AnalyticsError::InvalidConfig(format!(
            "unknown label policy: {v}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = CoreConfig::default();
        CoreConfig::new(
            cfg.seed(),
            cfg.cohort().clone(),
            cfg.forest().clone(),
            cfg.sequence().clone(),
            cfg.anomaly().clone(),
        )
        .expect("defaults should validate");
        assert_eq!(cfg.seed(), 42);
        assert_eq!(cfg.cohort().restarts, 10);
        assert_eq!(cfg.anomaly().contamination, 0.1);
    }

    #[test]
    fn test_rejects_contamination_out_of_range() {
        let anomaly = AnomalyConfig {
            contamination: 0.7,
            ..AnomalyConfig::default()
        };
        let err = CoreConfig::new(
            1,
            CohortConfig::default(),
            ForestConfig::default(),
            SequenceConfig::default(),
            anomaly,
        )
        .expect_err("contamination 0.7 should be rejected");
        assert!(matches!(err, AnalyticsError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_zero_restarts() {
        let cohort = CohortConfig {
            restarts: 0,
            ..CohortConfig::default()
        };
        let err = CoreConfig::new(
            1,
            cohort,
            ForestConfig::default(),
            SequenceConfig::default(),
            AnomalyConfig::default(),
        )
        .expect_err("zero restarts should be rejected");
        assert!(matches!(err, AnalyticsError::InvalidConfig(_)));
    }

    #[test]
    fn test_seed_from_env_value() {
        assert_eq!(seed_from_env_value(None).unwrap(), DEFAULT_SEED);
        assert_eq!(seed_from_env_value(Some("  ".into())).unwrap(), DEFAULT_SEED);
        assert_eq!(seed_from_env_value(Some("7".into())).unwrap(), 7);
        assert!(seed_from_env_value(Some("seven".into())).is_err());
    }

    #[test]
    fn test_fraction_from_env_value() {
        assert_eq!(fraction_from_env_value("nu", None, 0.1).unwrap(), 0.1);
        assert_eq!(
            fraction_from_env_value("nu", Some("0.25".into()), 0.1).unwrap(),
            0.25
        );
        assert!(fraction_from_env_value("nu", Some("NaN".into()), 0.1).is_err());
    }

    #[test]
    fn test_label_policy_from_env_value() {
        assert_eq!(
            label_policy_from_env_value(None).unwrap(),
            LabelPolicy::ByAdherence
        );
        assert_eq!(
            label_policy_from_env_value(Some("FIXED_INDEX".into())).unwrap(),
            LabelPolicy::FixedIndex
        );
        assert!(label_policy_from_env_value(Some("random".into())).is_err());
    }
}
