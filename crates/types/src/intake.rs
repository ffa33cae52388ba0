//! Intake events and the per-patient features derived from them.

use crate::MedicationName;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Outcome recorded for a scheduled administration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntakeStatus {
    Confirmed,
    Missed,
    Pending,
}

/// One scheduled-or-actual medication administration.
///
/// Records are produced by the upstream scheduling system and are read-only here. Optional
/// fields are explicit so that missing values are resolved once, at feature extraction, rather
/// than inside scoring code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeEvent {
    pub event_id: u64,
    pub patient_id: u64,
    pub medication: MedicationName,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default)]
    pub actual_time: Option<DateTime<Utc>>,
    pub status: IntakeStatus,
    #[serde(default)]
    pub delay_minutes: Option<f64>,
}

impl IntakeEvent {
    pub fn is_confirmed(&self) -> bool {
        self.status == IntakeStatus::Confirmed
    }

    pub fn is_missed(&self) -> bool {
        self.status == IntakeStatus::Missed
    }

    /// Delay in minutes as used by every feature computation.
    ///
    /// Only confirmed intakes carry a delay; any other status, and a confirmed intake without a
    /// recorded delay, count as zero.
    pub fn effective_delay(&self) -> f64 {
        match (self.status, self.delay_minutes) {
            (IntakeStatus::Confirmed, Some(delay)) if delay.is_finite() => delay,
            _ => 0.0,
        }
    }

    /// Best estimate of when the dose was actually taken.
    ///
    /// Uses `actual_time` when present, otherwise the scheduled time shifted by the effective
    /// delay. A shift past the representable range saturates at the range bound.
    pub fn intake_time(&self) -> DateTime<Utc> {
        self.actual_time.unwrap_or_else(|| {
            let delay = self.effective_delay();
            Duration::try_milliseconds((delay * 60_000.0).round() as i64)
                .and_then(|shift| self.scheduled_time.checked_add_signed(shift))
                .unwrap_or(if delay > 0.0 {
                    DateTime::<Utc>::MAX_UTC
                } else {
                    DateTime::<Utc>::MIN_UTC
                })
        })
    }
}

/// Flat per-patient features derived from an event history.
///
/// Computed fresh for every request; never cached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatientFeatureVector {
    /// Fraction of events that are confirmed, in `[0, 1]`. `1.0` for an empty history.
    pub adherence_rate: f64,
    /// Number of missed events.
    pub missed_doses: u32,
    /// Mean delay in minutes over confirmed events, `0.0` when there are none.
    pub average_delay: f64,
    /// Number of distinct medications in the history.
    pub total_prescriptions: u32,
}

impl PatientFeatureVector {
    /// Number of dimensions of the clustering feature space.
    pub const DIMENSIONS: usize = 4;

    /// Features in clustering order: adherence rate, missed doses, average delay, prescriptions.
    pub fn as_array(&self) -> [f64; Self::DIMENSIONS] {
        [
            self.adherence_rate,
            f64::from(self.missed_doses),
            self.average_delay,
            f64::from(self.total_prescriptions),
        ]
    }
}

impl Default for PatientFeatureVector {
    fn default() -> Self {
        Self {
            adherence_rate: 1.0,
            missed_doses: 0,
            average_delay: 0.0,
            total_prescriptions: 0,
        }
    }
}
