//! Structured verdicts returned by the analytics engine.

use serde::{Deserialize, Serialize};

/// Adherence cohort a patient is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cohort {
    NonAdherent,
    Moderate,
    Adherent,
}

impl Cohort {
    /// All cohorts, from least to most adherent. Index `i` is the source cluster-index mapping.
    pub const ALL: [Cohort; 3] = [Cohort::NonAdherent, Cohort::Moderate, Cohort::Adherent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cohort::NonAdherent => "NON_ADHERENT",
            Cohort::Moderate => "MODERATE",
            Cohort::Adherent => "ADHERENT",
        }
    }
}

impl std::fmt::Display for Cohort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of assigning a batch of patients to cohorts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortAssignment {
    /// One label per input patient, in input order.
    pub labels: Vec<Cohort>,
    /// Fitted centroids in the standardised feature space, indexed by cluster.
    pub centroids: Vec<[f64; 4]>,
    /// Cohort carried by each centroid, parallel to `centroids`.
    pub centroid_labels: Vec<Cohort>,
    /// The label vocabulary, least to most adherent.
    pub label_names: Vec<Cohort>,
}

/// Missed-dose risk for a single patient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub risk_score: f64,
    pub will_miss: bool,
    pub confidence: f64,
}

impl RiskVerdict {
    /// Scores strictly above this value predict a missed dose.
    pub const WILL_MISS_THRESHOLD: f64 = 0.7;

    /// Score reported when no model is available.
    pub const NEUTRAL_SCORE: f64 = 0.5;

    /// Builds a verdict from an ensemble score, deriving `will_miss` and `confidence`.
    pub fn from_score(risk_score: f64) -> Self {
        Self {
            risk_score,
            will_miss: risk_score > Self::WILL_MISS_THRESHOLD,
            confidence: (risk_score - Self::NEUTRAL_SCORE).abs() * 2.0,
        }
    }

    /// Safe default returned by an untrained ensemble.
    pub fn neutral() -> Self {
        Self::from_score(Self::NEUTRAL_SCORE)
    }
}

/// Named pattern an anomalous intake subset was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    SuddenStop,
    PotentialOverdose,
    BehavioralChange,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::SuddenStop => "SUDDEN_STOP",
            AnomalyType::PotentialOverdose => "POTENTIAL_OVERDOSE",
            AnomalyType::BehavioralChange => "BEHAVIORAL_CHANGE",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

/// Outcome of anomaly detection over one patient's events.
///
/// Fields are private so a verdict can only be built through [`AnomalyVerdict::none`] or
/// [`AnomalyVerdict::detected`]; a positive verdict therefore always carries a type, severity
/// and explanation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyVerdict {
    has_anomaly: bool,
    anomaly_type: Option<AnomalyType>,
    severity: Option<Severity>,
    explanation: Option<String>,
}

impl AnomalyVerdict {
    pub fn none() -> Self {
        Self {
            has_anomaly: false,
            anomaly_type: None,
            severity: None,
            explanation: None,
        }
    }

    pub fn detected(
        anomaly_type: AnomalyType,
        severity: Severity,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            has_anomaly: true,
            anomaly_type: Some(anomaly_type),
            severity: Some(severity),
            explanation: Some(explanation.into()),
        }
    }

    pub fn has_anomaly(&self) -> bool {
        self.has_anomaly
    }

    pub fn anomaly_type(&self) -> Option<AnomalyType> {
        self.anomaly_type
    }

    pub fn severity(&self) -> Option<Severity> {
        self.severity
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_verdict() {
        let verdict = RiskVerdict::neutral();
        assert_eq!(verdict.risk_score, 0.5);
        assert!(!verdict.will_miss);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn test_will_miss_boundary_is_exclusive() {
        assert!(!RiskVerdict::from_score(0.7).will_miss, "0.7 must not predict a miss");
        assert!(RiskVerdict::from_score(0.7000001).will_miss);
    }

    #[test]
    fn test_confidence_is_distance_from_midpoint() {
        for score in [0.0, 0.1, 0.25, 0.5, 0.8, 1.0] {
            let verdict = RiskVerdict::from_score(score);
            assert_eq!(verdict.confidence, (score - 0.5).abs() * 2.0);
            assert!((0.0..=1.0).contains(&verdict.confidence));
        }
    }

    #[test]
    fn test_negative_anomaly_verdict_serialises_nulls() {
        let json = serde_json::to_value(AnomalyVerdict::none()).unwrap();
        assert_eq!(json["has_anomaly"], false);
        assert!(json["anomaly_type"].is_null());
        assert!(json["severity"].is_null());
    }

    #[test]
    fn test_detected_verdict_carries_all_fields() {
        let verdict = AnomalyVerdict::detected(
            AnomalyType::SuddenStop,
            Severity::High,
            "Sudden treatment stop detected",
        );
        assert!(verdict.has_anomaly());
        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::SuddenStop));
        assert_eq!(verdict.severity(), Some(Severity::High));
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["anomaly_type"], "SUDDEN_STOP");
        assert_eq!(json["severity"], "HIGH");
    }

    #[test]
    fn test_cohort_order_matches_source_index_table() {
        assert_eq!(Cohort::ALL[0], Cohort::NonAdherent);
        assert_eq!(Cohort::ALL[1], Cohort::Moderate);
        assert_eq!(Cohort::ALL[2], Cohort::Adherent);
    }
}
