//! Per-call anomaly detection over a single patient's events.
//!
//! Both detectors are fitted on the batch being scored; nothing is kept between calls. An event
//! is flagged when either the isolation forest or the one-class boundary marks it, and the
//! flagged subset is then named by the ordered rules in [`rules`].

mod isolation_forest;
mod one_class;
pub mod rules;

use crate::config::CoreConfig;
use crate::features::event_features;
use adherence_types::{AnomalyVerdict, IntakeEvent};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rules::FlaggedHistory;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AnomalyEnsemble {
    cfg: Arc<CoreConfig>,
}

impl AnomalyEnsemble {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self { cfg }
    }

    /// Outlier flag per event, in input order.
    pub fn flag_outliers(&self, events: &[IntakeEvent]) -> Vec<bool> {
        let rows = event_features(events);
        if rows.is_empty() {
            return Vec::new();
        }
        let anomaly = self.cfg.anomaly();

        let mut rng = StdRng::seed_from_u64(self.cfg.seed());
        let isolated = isolation_forest::outliers(
            &rows,
            isolation_forest::IsolationParams {
                trees: anomaly.isolation_trees,
                sample_size: anomaly.isolation_sample_size,
                contamination: anomaly.contamination,
            },
            &mut rng,
        );
        let outside = one_class::outliers(&rows, anomaly.nu);

        isolated
            .into_iter()
            .zip(outside)
            .map(|(a, b)| a || b)
            .collect()
    }

    /// Detects and names anomalous intake behaviour. An empty batch has no anomaly.
    pub fn detect(&self, events: &[IntakeEvent]) -> AnomalyVerdict {
        let flags = self.flag_outliers(events);
        let history = FlaggedHistory::new(events, &flags);
        if !history.any_flagged() {
            return AnomalyVerdict::none();
        }
        tracing::debug!(
            events = events.len(),
            flagged = flags.iter().filter(|f| **f).count(),
            "anomalous events flagged"
        );
        rules::classify(&history, self.cfg.anomaly())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::tests::event_on;
    use adherence_types::{AnomalyType, IntakeStatus, Severity};

    fn ensemble() -> AnomalyEnsemble {
        AnomalyEnsemble::new(Arc::new(CoreConfig::default()))
    }

    #[test]
    fn test_empty_batch_has_no_anomaly() {
        let verdict = ensemble().detect(&[]);
        assert!(!verdict.has_anomaly());
        assert_eq!(verdict.anomaly_type(), None);
        assert_eq!(verdict.severity(), None);
        assert_eq!(verdict.explanation(), None);
    }

    #[test]
    fn test_steady_history_has_no_anomaly() {
        let events: Vec<_> = (0..20)
            .map(|d| event_on(d as u64, d, 8, "Metformin", IntakeStatus::Confirmed, Some(0.0)))
            .collect();
        assert!(!ensemble().detect(&events).has_anomaly());
    }

    #[test]
    fn test_trailing_misses_read_as_sudden_stop() {
        let mut events: Vec<_> = (0..18)
            .map(|d| event_on(d as u64, d, 8, "Metformin", IntakeStatus::Confirmed, Some(0.0)))
            .collect();
        events.push(event_on(18, 18, 8, "Metformin", IntakeStatus::Missed, None));
        events.push(event_on(19, 19, 8, "Metformin", IntakeStatus::Missed, None));

        let flags = ensemble().flag_outliers(&events);
        assert!(flags[18] && flags[19], "trailing misses should be flagged");

        let verdict = ensemble().detect(&events);
        assert!(verdict.has_anomaly());
        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::SuddenStop));
        assert_eq!(verdict.severity(), Some(Severity::High));
    }

    #[test]
    fn test_huge_delay_is_flagged_without_panicking() {
        let mut events: Vec<_> = (0..20)
            .map(|d| event_on(d as u64, d, 8, "Metformin", IntakeStatus::Confirmed, Some(0.0)))
            .collect();
        events[10].delay_minutes = Some(1.0e13);

        assert!(ensemble().flag_outliers(&events)[10]);
        let verdict = ensemble().detect(&events);
        assert!(verdict.has_anomaly());
        assert_ne!(verdict.anomaly_type(), Some(AnomalyType::PotentialOverdose));
    }

    #[test]
    fn test_detection_is_deterministic() {
        let events: Vec<_> = (0..30)
            .map(|d| {
                let status = if d % 4 == 0 {
                    IntakeStatus::Missed
                } else {
                    IntakeStatus::Confirmed
                };
                event_on(d as u64, d, 8, "Metformin", status, Some((d % 5) as f64 * 12.0))
            })
            .collect();
        assert_eq!(ensemble().detect(&events), ensemble().detect(&events));
    }

    #[test]
    fn test_positive_verdicts_always_carry_a_known_type() {
        let histories: Vec<Vec<IntakeEvent>> = (1..8)
            .map(|seed| {
                (0..25)
                    .map(|d| {
                        let status = match (d * seed) % 7 {
                            0 => IntakeStatus::Missed,
                            1 => IntakeStatus::Pending,
                            _ => IntakeStatus::Confirmed,
                        };
                        let delay = ((d * seed * 13) % 90) as f64;
                        event_on(d as u64, d, 8, "Metformin", status, Some(delay))
                    })
                    .collect()
            })
            .collect();

        for events in &histories {
            let verdict = ensemble().detect(events);
            if verdict.has_anomaly() {
                let expected = match verdict.anomaly_type() {
                    Some(AnomalyType::SuddenStop) => Severity::High,
                    Some(AnomalyType::PotentialOverdose) => Severity::Critical,
                    Some(AnomalyType::BehavioralChange) => Severity::Medium,
                    None => panic!("positive verdict without a type"),
                };
                assert_eq!(verdict.severity(), Some(expected));
                assert!(verdict.explanation().is_some());
            } else {
                assert_eq!(verdict.anomaly_type(), None);
            }
        }
    }
}
