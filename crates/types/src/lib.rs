//! # Adherence Types
//!
//! Shared data model for the medication-adherence analytics engine.
//!
//! Contains:
//! - Intake events as received from the upstream scheduling system ([`IntakeEvent`])
//! - Derived per-patient features ([`PatientFeatureVector`])
//! - The three structured verdicts: [`CohortAssignment`], [`RiskVerdict`], [`AnomalyVerdict`]
//!
//! Used by `adherence-core` and `adherence-cli`. No scoring logic lives here.

mod intake;
mod medication;
mod verdict;

pub use intake::{IntakeEvent, IntakeStatus, PatientFeatureVector};
pub use medication::{MedicationName, MedicationNameError};
pub use verdict::{AnomalyType, AnomalyVerdict, Cohort, CohortAssignment, RiskVerdict, Severity};
