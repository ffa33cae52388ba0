//! Feature extraction from raw intake-event histories.
//!
//! Every downstream component derives its inputs here, so that missing optional fields are
//! resolved in exactly one place:
//!
//! - [`flat_features`]: the per-patient [`PatientFeatureVector`] used for cohort clustering
//! - [`static_features`]: the row scored by the risk ensemble's static classifier
//! - [`windowed_features`]: 7-day sliding windows of daily aggregates for the sequence model
//! - [`event_features`]: one row per event for the anomaly detectors
//!
//! All functions are pure. Aggregates over an empty set fall back to explicit neutral values
//! instead of dividing by zero.

use crate::constants::{EVENT_FEATURES, STATIC_FEATURES, STEP_FEATURES, WINDOW_LEN};
use adherence_types::{IntakeEvent, PatientFeatureVector};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};

/// One daily step: mean confirmation rate, mean delay, event count.
pub type WindowStep = [f64; STEP_FEATURES];

/// Seven consecutive daily steps (consecutive in the sorted list of active days).
pub type Window = [WindowStep; WINDOW_LEN];

/// Sliding windows over a patient's daily aggregates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeWindowSeries {
    windows: Vec<Window>,
    /// Set when the history spans fewer than seven active days and the single window was
    /// right-padded with zero steps.
    padded: bool,
}

impl TimeWindowSeries {
    /// All windows, including a padded tail window if present.
    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    /// Windows built entirely from observed days.
    pub fn full_windows(&self) -> &[Window] {
        if self.padded {
            &[]
        } else {
            &self.windows
        }
    }

    pub fn is_padded(&self) -> bool {
        self.padded
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

pub fn flat_features(events: &[IntakeEvent]) -> PatientFeatureVector {
    if events.is_empty() {
        return PatientFeatureVector::default();
    }

    let medications: HashSet<&str> = events.iter().map(|e| e.medication.as_str()).collect();

    PatientFeatureVector {
        adherence_rate: adherence_rate(events),
        missed_doses: count_u32(events.iter().filter(|e| e.is_missed()).count()),
        average_delay: average_delay(events),
        total_prescriptions: count_u32(medications.len()),
    }
}

/// Row for the static classifier: `[adherence_rate, missed_doses, average_delay, history_len]`.
///
/// Training rows must be built with this same function so that train-time and predict-time
/// features agree.
pub fn static_features(events: &[IntakeEvent]) -> [f64; STATIC_FEATURES] {
    [
        adherence_rate(events),
        events.iter().filter(|e| e.is_missed()).count() as f64,
        average_delay(events),
        events.len() as f64,
    ]
}

/// Daily aggregates slid into 7-step windows with stride 1.
///
/// Events are grouped by the UTC calendar date of their scheduled time; only dates that occur
/// in the history become steps. With `d >= 7` active days this yields `d - 6` windows. With
/// `1 <= d < 7` it yields a single window whose missing tail steps are zero. The result does
/// not depend on input order.
pub fn windowed_features(events: &[IntakeEvent]) -> TimeWindowSeries {
    let daily = daily_steps(events);

    if daily.is_empty() {
        return TimeWindowSeries::default();
    }

    if daily.len() < WINDOW_LEN {
        let mut window = [[0.0; STEP_FEATURES]; WINDOW_LEN];
        window[..daily.len()].copy_from_slice(&daily);
        return TimeWindowSeries {
            windows: vec![window],
            padded: true,
        };
    }

    let windows = daily
        .windows(WINDOW_LEN)
        .map(|slice| {
            let mut window = [[0.0; STEP_FEATURES]; WINDOW_LEN];
            window.copy_from_slice(slice);
            window
        })
        .collect();

    TimeWindowSeries {
        windows,
        padded: false,
    }
}

/// Per-event rows for the anomaly detectors: `[delay, missed, confirmed]`, in input order.
pub fn event_features(events: &[IntakeEvent]) -> Vec<[f64; EVENT_FEATURES]> {
    events
        .iter()
        .map(|e| {
            [
                e.effective_delay(),
                if e.is_missed() { 1.0 } else { 0.0 },
                if e.is_confirmed() { 1.0 } else { 0.0 },
            ]
        })
        .collect()
}

fn adherence_rate(events: &[IntakeEvent]) -> f64 {
    if events.is_empty() {
        return 1.0;
    }
    let confirmed = events.iter().filter(|e| e.is_confirmed()).count();
    confirmed as f64 / events.len() as f64
}

fn average_delay(events: &[IntakeEvent]) -> f64 {
    let (sum, confirmed) = events
        .iter()
        .filter(|e| e.is_confirmed())
        .fold((0.0, 0usize), |(sum, n), e| (sum + e.effective_delay(), n + 1));
    if confirmed == 0 {
        0.0
    } else {
        sum / confirmed as f64
    }
}

fn daily_steps(events: &[IntakeEvent]) -> Vec<WindowStep> {
    #[derive(Default)]
    struct Day {
        confirmed: usize,
        delay: f64,
        count: usize,
    }

    let mut days: BTreeMap<NaiveDate, Day> = BTreeMap::new();
    for event in events {
        let day = days.entry(event.scheduled_time.date_naive()).or_default();
        day.count += 1;
        day.delay += event.effective_delay();
        if event.is_confirmed() {
            day.confirmed += 1;
        }
    }

    days.into_values()
        .map(|day| {
            let n = day.count as f64;
            [day.confirmed as f64 / n, day.delay / n, n]
        })
        .collect()
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use adherence_types::{IntakeStatus, MedicationName};
    use chrono::{Duration, TimeZone, Utc};

    pub(crate) fn event_on(
        id: u64,
        day: i64,
        hour: u32,
        medication: &str,
        status: IntakeStatus,
        delay: Option<f64>,
    ) -> IntakeEvent {
        IntakeEvent {
            event_id: id,
            patient_id: 1,
            medication: MedicationName::new(medication).unwrap(),
            scheduled_time: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
                + Duration::days(day),
            actual_time: None,
            status,
            delay_minutes: delay,
        }
    }

    #[test]
    fn test_empty_history_has_neutral_features() {
        let features = flat_features(&[]);
        assert_eq!(features.adherence_rate, 1.0);
        assert_eq!(features.missed_doses, 0);
        assert_eq!(features.average_delay, 0.0);
        assert_eq!(features.total_prescriptions, 0);
        assert!(windowed_features(&[]).is_empty());
    }

    #[test]
    fn test_interleaved_confirmed_and_missed() {
        let events: Vec<_> = (0..10)
            .map(|i| {
                let status = if i % 2 == 0 {
                    IntakeStatus::Confirmed
                } else {
                    IntakeStatus::Missed
                };
                event_on(i, i as i64, 8, "Metformin", status, Some(0.0))
            })
            .collect();

        let features = flat_features(&events);
        assert_eq!(features.adherence_rate, 0.5);
        assert_eq!(features.missed_doses, 5);
        assert_eq!(features.average_delay, 0.0);
        assert_eq!(features.total_prescriptions, 1);
    }

    #[test]
    fn test_adherence_rate_is_exact_fraction() {
        let events = vec![
            event_on(1, 0, 8, "A", IntakeStatus::Confirmed, None),
            event_on(2, 0, 20, "A", IntakeStatus::Pending, None),
            event_on(3, 1, 8, "B", IntakeStatus::Missed, None),
        ];
        let features = flat_features(&events);
        assert_eq!(features.adherence_rate, 1.0 / 3.0);
        assert!((0.0..=1.0).contains(&features.adherence_rate));
        assert_eq!(features.total_prescriptions, 2);
    }

    #[test]
    fn test_pending_history_has_zero_average_delay() {
        let events: Vec<_> = (0..3)
            .map(|i| event_on(i, i as i64, 8, "A", IntakeStatus::Pending, Some(25.0)))
            .collect();
        assert_eq!(flat_features(&events).average_delay, 0.0);
    }

    #[test]
    fn test_average_delay_covers_confirmed_only() {
        let events = vec![
            event_on(1, 0, 8, "A", IntakeStatus::Confirmed, Some(10.0)),
            event_on(2, 0, 20, "A", IntakeStatus::Confirmed, Some(30.0)),
            event_on(3, 1, 8, "A", IntakeStatus::Missed, Some(500.0)),
        ];
        assert_eq!(flat_features(&events).average_delay, 20.0);
    }

    #[test]
    fn test_ten_daily_confirmed_events_give_four_windows() {
        let events: Vec<_> = (0..10)
            .map(|i| event_on(i, i as i64, 8, "A", IntakeStatus::Confirmed, Some(0.0)))
            .collect();

        let series = windowed_features(&events);
        assert_eq!(series.len(), 4, "10 days should yield 10 - 7 + 1 windows");
        assert_eq!(series.full_windows().len(), 4);
        for window in series.windows() {
            assert_eq!(window.len(), 7);
            for step in window {
                assert_eq!(step[0], 1.0, "confirmation rate");
                assert_eq!(step[1], 0.0, "mean delay");
                assert_eq!(step[2], 1.0, "event count");
            }
        }
    }

    #[test]
    fn test_windows_are_order_independent() {
        let mut events: Vec<_> = (0..9)
            .map(|i| {
                let status = if i % 3 == 0 {
                    IntakeStatus::Missed
                } else {
                    IntakeStatus::Confirmed
                };
                event_on(i, i as i64, 8, "A", status, Some(i as f64))
            })
            .collect();
        let sorted = windowed_features(&events);
        events.reverse();
        assert_eq!(windowed_features(&events), sorted);
    }

    #[test]
    fn test_windows_slide_with_stride_one() {
        let events: Vec<_> = (0..8)
            .map(|i| event_on(i, i as i64, 8, "A", IntakeStatus::Confirmed, Some(i as f64)))
            .collect();
        let series = windowed_features(&events);
        assert_eq!(series.len(), 2);
        assert_eq!(series.windows()[0][1], series.windows()[1][0]);
        assert_eq!(series.windows()[1][6][1], 7.0);
    }

    #[test]
    fn test_short_history_is_right_padded() {
        let events = vec![
            event_on(1, 0, 8, "A", IntakeStatus::Confirmed, Some(4.0)),
            event_on(2, 0, 20, "A", IntakeStatus::Missed, None),
            event_on(3, 2, 8, "A", IntakeStatus::Confirmed, Some(0.0)),
        ];
        let series = windowed_features(&events);

        assert!(series.is_padded());
        assert_eq!(series.len(), 1);
        assert!(series.full_windows().is_empty());

        let window = series.windows()[0];
        assert_eq!(window[0], [0.5, 2.0, 2.0]);
        assert_eq!(window[1], [1.0, 0.0, 1.0]);
        for step in &window[2..] {
            assert_eq!(*step, [0.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_event_features_resolve_optional_delay() {
        let events = vec![
            event_on(1, 0, 8, "A", IntakeStatus::Confirmed, None),
            event_on(2, 0, 9, "A", IntakeStatus::Missed, Some(99.0)),
            event_on(3, 0, 10, "A", IntakeStatus::Confirmed, Some(15.0)),
        ];
        assert_eq!(
            event_features(&events),
            vec![[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [15.0, 0.0, 1.0]]
        );
    }

    #[test]
    fn test_static_features_use_history_length() {
        let events = vec![
            event_on(1, 0, 8, "A", IntakeStatus::Confirmed, Some(6.0)),
            event_on(2, 1, 8, "B", IntakeStatus::Missed, None),
        ];
        assert_eq!(static_features(&events), [0.5, 1.0, 6.0, 2.0]);
        assert_eq!(static_features(&[]), [1.0, 0.0, 0.0, 0.0]);
    }
}
