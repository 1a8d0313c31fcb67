use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

use crate::booking::{
    recurrence::{RecurrenceFrequency, project},
    slots::TimeWindow,
};

/// Something already occupying a provider's calendar: an appointment or a blocked slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedInterval {
    pub date: NaiveDate,
    pub window: TimeWindow,
}

impl BookedInterval {
    pub fn new(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            date,
            window: TimeWindow::new(start, end),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("The time {window} is already taken on {date}")]
pub struct AvailabilityConflict {
    pub date: NaiveDate,
    pub window: TimeWindow,
}

pub fn is_window_free(date: NaiveDate, window: &TimeWindow, booked: &[BookedInterval]) -> bool {
    !booked
        .iter()
        .any(|interval| interval.date == date && interval.window.overlaps(window))
}

/// The anchor plus up to `occurrences` projected dates.
pub fn occurrence_dates(
    anchor: NaiveDate,
    frequency: RecurrenceFrequency,
    occurrences: usize,
) -> Vec<NaiveDate> {
    std::iter::once(anchor)
        .chain(project(anchor, frequency).limit(occurrences))
        .collect()
}

/// Accepts only if `window` is free on the anchor and on every projected occurrence.
pub fn check_recurring_availability(
    anchor: NaiveDate,
    window: &TimeWindow,
    frequency: RecurrenceFrequency,
    occurrences: usize,
    booked: &[BookedInterval],
) -> Result<Vec<NaiveDate>, AvailabilityConflict> {
    let dates = occurrence_dates(anchor, frequency, occurrences);

    match dates
        .iter()
        .find(|date| !is_window_free(**date, window, booked))
    {
        Some(date) => Err(AvailabilityConflict {
            date: *date,
            window: *window,
        }),
        None => Ok(dates),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn morning() -> TimeWindow {
        TimeWindow::new(t("09:00"), t("10:00"))
    }

    #[test]
    fn accepts_when_every_occurrence_is_free() {
        let booked = [
            BookedInterval::new(d("2025-10-27"), t("10:00"), t("11:00")),
            BookedInterval::new(d("2025-10-28"), t("09:00"), t("10:00")),
        ];
        let dates = check_recurring_availability(
            d("2025-10-20"),
            &morning(),
            RecurrenceFrequency::Weekly,
            3,
            &booked,
        )
        .unwrap();
        assert_eq!(
            dates,
            vec![d("2025-10-20"), d("2025-10-27"), d("2025-11-03"), d("2025-11-10")]
        );
    }

    #[test]
    fn rejects_when_a_single_occurrence_conflicts() {
        let booked = [BookedInterval::new(d("2025-11-03"), t("09:30"), t("10:30"))];
        let err = check_recurring_availability(
            d("2025-10-20"),
            &morning(),
            RecurrenceFrequency::Weekly,
            3,
            &booked,
        )
        .unwrap_err();
        assert_eq!(err.date, d("2025-11-03"));
    }

    #[test]
    fn anchor_conflict_is_reported_first() {
        let booked = [BookedInterval::new(d("2025-10-20"), t("08:00"), t("09:30"))];
        let err = check_recurring_availability(
            d("2025-10-20"),
            &morning(),
            RecurrenceFrequency::Biweekly,
            2,
            &booked,
        )
        .unwrap_err();
        assert_eq!(err.date, d("2025-10-20"));
    }

    #[test]
    fn single_booking_checks_only_the_anchor() {
        let booked = [BookedInterval::new(d("2025-10-27"), t("09:00"), t("10:00"))];
        let dates = check_recurring_availability(
            d("2025-10-20"),
            &morning(),
            RecurrenceFrequency::Once,
            3,
            &booked,
        )
        .unwrap();
        assert_eq!(dates, vec![d("2025-10-20")]);
    }

    #[test]
    fn back_to_back_intervals_do_not_conflict() {
        let booked = [BookedInterval::new(d("2025-10-20"), t("08:00"), t("09:00"))];
        assert!(is_window_free(d("2025-10-20"), &morning(), &booked));
    }
}
