//! # Adherence Core
//!
//! Analytics engine for medication-adherence scoring.
//!
//! This crate turns raw intake-event histories into three verdicts:
//! - Cohort assignment via k-means over standardised patient features ([`cohort`])
//! - Missed-dose risk from a static classifier and a sequence model ([`risk`])
//! - Anomaly detection with an isolation forest, a one-class boundary and ordered rules
//!   ([`anomaly`])
//!
//! Training is orchestrated by [`training`], and [`AdherenceService`] bundles everything for a
//! boundary layer.
//!
//! **No transport or storage concerns**: request framing and file I/O belong to the caller.
//! Fitted state crosses the persistence boundary as opaque `export_state`/`import_state` blobs.

pub mod anomaly;
pub mod cohort;
pub mod config;
pub mod constants;
pub mod error;
pub mod features;
pub mod risk;
pub mod scaler;
pub mod service;
pub mod snapshot;
pub mod training;

pub use config::CoreConfig;
pub use error::{AnalyticsError, AnalyticsResult};
pub use service::AdherenceService;
pub use training::{LabelledHistory, TrainingBatch, TrainingReport};
