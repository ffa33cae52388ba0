//! Ordered decision list that names a flagged event subset.
//!
//! Rules are evaluated in order and the first match wins. The last rule always matches, so any
//! batch with at least one flagged event gets a type.

use crate::config::AnomalyConfig;
use adherence_types::{AnomalyType, AnomalyVerdict, IntakeEvent, Severity};
use std::collections::HashMap;

/// A patient's events in scheduled order, each paired with its outlier flag.
#[derive(Debug)]
pub struct FlaggedHistory<'a> {
    events: Vec<(&'a IntakeEvent, bool)>,
}

impl<'a> FlaggedHistory<'a> {
    /// Pairs `events` with `flags` (parallel, input order) and sorts by scheduled time. Events
    /// scheduled at the same instant keep their input order.
    pub fn new(events: &'a [IntakeEvent], flags: &[bool]) -> Self {
        let mut events: Vec<(&IntakeEvent, bool)> =
            events.iter().zip(flags.iter().copied()).collect();
        events.sort_by_key(|(e, _)| e.scheduled_time);
        Self { events }
    }

    pub fn any_flagged(&self) -> bool {
        self.events.iter().any(|(_, flagged)| *flagged)
    }

    fn flagged(&self) -> impl Iterator<Item = &'a IntakeEvent> + '_ {
        self.events.iter().filter(|(_, f)| *f).map(|(e, _)| *e)
    }
}

pub struct AnomalyRule {
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub explanation: &'static str,
    pub matches: fn(&FlaggedHistory<'_>, &AnomalyConfig) -> bool,
}

pub static RULES: &[AnomalyRule] = &[
    AnomalyRule {
        anomaly_type: AnomalyType::SuddenStop,
        severity: Severity::High,
        explanation: "Sudden treatment stop detected",
        matches: is_sudden_stop,
    },
    AnomalyRule {
        anomaly_type: AnomalyType::PotentialOverdose,
        severity: Severity::Critical,
        explanation: "Intakes taken too close together detected",
        matches: is_overdose_pattern,
    },
    AnomalyRule {
        anomaly_type: AnomalyType::BehavioralChange,
        severity: Severity::Medium,
        explanation: "Behavioral change detected",
        matches: always,
    },
];

/// Classifies a history with at least one flagged event; returns no anomaly otherwise.
pub fn classify(history: &FlaggedHistory<'_>, cfg: &AnomalyConfig) -> AnomalyVerdict {
    if !history.any_flagged() {
        return AnomalyVerdict::none();
    }
    RULES
        .iter()
        .find(|rule| (rule.matches)(history, cfg))
        .map(|rule| AnomalyVerdict::detected(rule.anomaly_type, rule.severity, rule.explanation))
        .unwrap_or_else(AnomalyVerdict::none)
}

fn always(_: &FlaggedHistory<'_>, _: &AnomalyConfig) -> bool {
    true
}

/// The history ends in a run of flagged missed events, at least `sudden_stop_min_run` long,
/// that follows at least one confirmed intake.
fn is_sudden_stop(history: &FlaggedHistory<'_>, cfg: &AnomalyConfig) -> bool {
    let run = history
        .events
        .iter()
        .rev()
        .take_while(|(e, flagged)| *flagged && e.is_missed())
        .count();
    if run < cfg.sudden_stop_min_run {
        return false;
    }
    let before = history.events.len() - run;
    history.events[..before].iter().any(|(e, _)| e.is_confirmed())
}

/// Two flagged confirmed intakes of the same medication less than `overdose_window_minutes`
/// apart.
fn is_overdose_pattern(history: &FlaggedHistory<'_>, cfg: &AnomalyConfig) -> bool {
    let mut by_medication: HashMap<&str, Vec<i64>> = HashMap::new();
    for event in history.flagged().filter(|e| e.is_confirmed()) {
        by_medication
            .entry(event.medication.as_str())
            .or_default()
            .push(event.intake_time().timestamp_millis());
    }

    let window_ms = cfg.overdose_window_minutes * 60_000.0;
    by_medication.into_values().any(|mut times| {
        times.sort_unstable();
        times.windows(2).any(|w| ((w[1] - w[0]) as f64) < window_ms)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::tests::event_on;
    use adherence_types::IntakeStatus;
    use chrono::Duration;

    fn cfg() -> AnomalyConfig {
        AnomalyConfig::default()
    }

    fn confirmed(id: u64, day: i64) -> IntakeEvent {
        event_on(id, day, 9, "Metformin", IntakeStatus::Confirmed, Some(0.0))
    }

    fn missed(id: u64, day: i64) -> IntakeEvent {
        event_on(id, day, 9, "Metformin", IntakeStatus::Missed, None)
    }

    #[test]
    fn test_no_flags_means_no_anomaly() {
        let events = vec![confirmed(1, 0), missed(2, 1)];
        let verdict = classify(&FlaggedHistory::new(&events, &[false, false]), &cfg());
        assert!(!verdict.has_anomaly());
        assert_eq!(verdict.anomaly_type(), None);
    }

    #[test]
    fn test_sudden_stop_on_trailing_flagged_misses() {
        let events = vec![
            confirmed(1, 0),
            confirmed(2, 1),
            confirmed(3, 2),
            missed(4, 3),
            missed(5, 4),
        ];
        let flags = [false, false, false, true, true];
        let verdict = classify(&FlaggedHistory::new(&events, &flags), &cfg());

        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::SuddenStop));
        assert_eq!(verdict.severity(), Some(Severity::High));
        assert_eq!(verdict.explanation(), Some("Sudden treatment stop detected"));
    }

    #[test]
    fn test_sudden_stop_uses_scheduled_order_not_input_order() {
        // Input order puts the misses first; scheduled order puts them last.
        let events = vec![missed(4, 3), missed(5, 4), confirmed(1, 0), confirmed(2, 1)];
        let flags = [true, true, false, false];
        let verdict = classify(&FlaggedHistory::new(&events, &flags), &cfg());
        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::SuddenStop));
    }

    #[test]
    fn test_recovered_misses_are_not_a_sudden_stop() {
        let events = vec![confirmed(1, 0), missed(2, 1), missed(3, 2), confirmed(4, 3)];
        let flags = [false, true, true, false];
        let verdict = classify(&FlaggedHistory::new(&events, &flags), &cfg());
        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::BehavioralChange));
    }

    #[test]
    fn test_single_trailing_miss_is_too_short() {
        let events = vec![confirmed(1, 0), confirmed(2, 1), missed(3, 2)];
        let verdict = classify(&FlaggedHistory::new(&events, &[false, false, true]), &cfg());
        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::BehavioralChange));
    }

    #[test]
    fn test_never_started_is_not_a_sudden_stop() {
        let events = vec![missed(1, 0), missed(2, 1), missed(3, 2)];
        let verdict = classify(&FlaggedHistory::new(&events, &[true, true, true]), &cfg());
        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::BehavioralChange));
    }

    #[test]
    fn test_overdose_on_close_confirmed_intakes() {
        let first = confirmed(1, 0);
        let mut second = confirmed(2, 0);
        second.scheduled_time = first.scheduled_time + Duration::minutes(20);
        let events = vec![confirmed(0, -1), first, second];
        let verdict = classify(&FlaggedHistory::new(&events, &[false, true, true]), &cfg());

        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::PotentialOverdose));
        assert_eq!(verdict.severity(), Some(Severity::Critical));
        assert_eq!(
            verdict.explanation(),
            Some("Intakes taken too close together detected")
        );
    }

    #[test]
    fn test_overdose_uses_actual_intake_time() {
        // Scheduled a day apart, but both actually taken within half an hour.
        let first = confirmed(1, 0);
        let mut second = confirmed(2, 1);
        second.actual_time = Some(first.scheduled_time + Duration::minutes(30));
        let events = vec![first, second];
        let verdict = classify(&FlaggedHistory::new(&events, &[true, true]), &cfg());
        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::PotentialOverdose));
    }

    #[test]
    fn test_different_medications_are_not_an_overdose() {
        let first = confirmed(1, 0);
        let second = event_on(2, 0, 9, "Lisinopril", IntakeStatus::Confirmed, Some(10.0));
        let events = vec![first, second];
        let verdict = classify(&FlaggedHistory::new(&events, &[true, true]), &cfg());
        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::BehavioralChange));
    }

    #[test]
    fn test_out_of_range_delays_do_not_collide() {
        let mut late = confirmed(2, 1);
        late.delay_minutes = Some(1.0e13);
        let mut early = confirmed(3, 2);
        early.delay_minutes = Some(-1.0e13);
        let events = vec![confirmed(1, 0), late, early, confirmed(4, 3)];
        let verdict = classify(&FlaggedHistory::new(&events, &[true; 4]), &cfg());
        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::BehavioralChange));
    }

    #[test]
    fn test_sudden_stop_wins_over_overdose() {
        let a = confirmed(1, 0);
        let mut b = confirmed(2, 0);
        b.scheduled_time = a.scheduled_time + Duration::minutes(5);
        let events = vec![a, b, missed(3, 1), missed(4, 2)];
        let verdict = classify(&FlaggedHistory::new(&events, &[true, true, true, true]), &cfg());
        assert_eq!(verdict.anomaly_type(), Some(AnomalyType::SuddenStop));
    }

    #[test]
    fn test_rule_table_pairs_types_with_severities() {
        let pairs: Vec<_> = RULES.iter().map(|r| (r.anomaly_type, r.severity)).collect();
        assert_eq!(
            pairs,
            vec![
                (AnomalyType::SuddenStop, Severity::High),
                (AnomalyType::PotentialOverdose, Severity::Critical),
                (AnomalyType::BehavioralChange, Severity::Medium),
            ]
        );
    }
}
