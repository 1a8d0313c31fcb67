//! Projection of recurring bookings onto concrete future dates.
//!
//! Every occurrence is computed from the anchor rather than from the previous
//! occurrence, so a monthly rule anchored on a fifth weekday keeps asking for the
//! fifth weekday even after falling back to the fourth in a short month.

use std::{fmt, str::FromStr};

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Upper bound for projections that were not given an explicit limit (two years of weekly).
pub const MAX_OCCURRENCES: usize = 104;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceFrequency {
    Once,
    Daily,
    Weekly,
    Biweekly,
    Triweekly,
    Monthly,
}

impl RecurrenceFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrenceFrequency::Once => "once",
            RecurrenceFrequency::Daily => "daily",
            RecurrenceFrequency::Weekly => "weekly",
            RecurrenceFrequency::Biweekly => "biweekly",
            RecurrenceFrequency::Triweekly => "triweekly",
            RecurrenceFrequency::Monthly => "monthly",
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, RecurrenceFrequency::Once)
    }

    fn step_days(&self) -> Option<u64> {
        match self {
            RecurrenceFrequency::Daily => Some(1),
            RecurrenceFrequency::Weekly => Some(7),
            RecurrenceFrequency::Biweekly => Some(14),
            RecurrenceFrequency::Triweekly => Some(21),
            RecurrenceFrequency::Once | RecurrenceFrequency::Monthly => None,
        }
    }

    /// The `n`-th occurrence after `anchor` (`n >= 1`).
    pub fn nth_after(&self, anchor: NaiveDate, n: u32) -> Option<NaiveDate> {
        match self {
            RecurrenceFrequency::Once => None,
            RecurrenceFrequency::Monthly => same_weekday_months_later(anchor, n),
            fixed => {
                let step = fixed.step_days()?;
                anchor.checked_add_days(Days::new(step * u64::from(n)))
            }
        }
    }
}

impl fmt::Display for RecurrenceFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecurrenceFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(RecurrenceFrequency::Once),
            "daily" => Ok(RecurrenceFrequency::Daily),
            "weekly" => Ok(RecurrenceFrequency::Weekly),
            "biweekly" => Ok(RecurrenceFrequency::Biweekly),
            "triweekly" => Ok(RecurrenceFrequency::Triweekly),
            "monthly" => Ok(RecurrenceFrequency::Monthly),
            other => Err(format!("{other} is not a valid recurrence frequency")),
        }
    }
}

/// Which occurrence of its weekday `date` is within its month (1..=5).
pub fn week_of_month(date: NaiveDate) -> u8 {
    ((date.day() - 1) / 7 + 1) as u8
}

/// Day of week numbered from Sunday = 0, as stored in the database.
pub fn day_of_week_index(weekday: Weekday) -> i32 {
    weekday.num_days_from_sunday() as i32
}

/// The same `week_of_month` weekday `months` months later. Months without a
/// fifth occurrence fall back to the last one.
fn same_weekday_months_later(anchor: NaiveDate, months: u32) -> Option<NaiveDate> {
    let total = anchor.month0() as i64 + i64::from(months);
    let year = anchor.year() + i32::try_from(total / 12).ok()?;
    let month = (total % 12) as u32 + 1;
    let weekday = anchor.weekday();
    let nth = week_of_month(anchor);

    NaiveDate::from_weekday_of_month_opt(year, month, weekday, nth)
        .or_else(|| NaiveDate::from_weekday_of_month_opt(year, month, weekday, nth - 1))
}

/// Lazy, finite sequence of occurrences strictly after the anchor.
#[derive(Debug, Clone)]
pub struct Occurrences {
    anchor: NaiveDate,
    frequency: RecurrenceFrequency,
    step: u32,
    remaining: usize,
    until: Option<NaiveDate>,
}

impl Occurrences {
    pub fn limit(mut self, count: usize) -> Self {
        self.remaining = self.remaining.min(count);
        self
    }

    /// Stops after the last occurrence on or before `date`.
    pub fn until(mut self, date: NaiveDate) -> Self {
        self.until = Some(date);
        self
    }
}

impl Iterator for Occurrences {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.step += 1;

        let next = self
            .frequency
            .nth_after(self.anchor, self.step)
            .filter(|date| self.until.is_none_or(|until| *date <= until));

        match next {
            Some(date) => {
                self.remaining -= 1;
                Some(date)
            }
            None => {
                self.remaining = 0;
                None
            }
        }
    }
}

pub fn project(anchor: NaiveDate, frequency: RecurrenceFrequency) -> Occurrences {
    Occurrences {
        anchor,
        frequency,
        step: 0,
        remaining: MAX_OCCURRENCES,
        until: None,
    }
}

/// The next `count` dates after `anchor`, for display.
pub fn upcoming(anchor: NaiveDate, frequency: RecurrenceFrequency, count: usize) -> Vec<NaiveDate> {
    project(anchor, frequency).limit(count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn weekly_steps_by_seven_days() {
        let anchor = date("2025-10-20");
        assert_eq!(
            upcoming(anchor, RecurrenceFrequency::Weekly, 3),
            vec![date("2025-10-27"), date("2025-11-03"), date("2025-11-10")]
        );
    }

    #[test]
    fn biweekly_and_triweekly_step_sizes() {
        let anchor = date("2025-10-20");
        assert_eq!(
            upcoming(anchor, RecurrenceFrequency::Biweekly, 2),
            vec![date("2025-11-03"), date("2025-11-17")]
        );
        assert_eq!(
            upcoming(anchor, RecurrenceFrequency::Triweekly, 1),
            vec![date("2025-11-10")]
        );
    }

    #[test]
    fn monthly_keeps_nth_weekday() {
        // second Tuesday
        let anchor = date("2025-03-11");
        assert_eq!(
            upcoming(anchor, RecurrenceFrequency::Monthly, 2),
            vec![date("2025-04-08"), date("2025-05-13")]
        );
    }

    #[test]
    fn monthly_fifth_weekday_falls_back_then_recovers() {
        // fifth Wednesday of January 2025
        let anchor = date("2025-01-29");
        assert_eq!(
            upcoming(anchor, RecurrenceFrequency::Monthly, 3),
            vec![date("2025-02-26"), date("2025-03-26"), date("2025-04-30")]
        );
    }

    #[test]
    fn monthly_crosses_year_boundary() {
        let anchor = date("2025-12-29");
        assert_eq!(
            upcoming(anchor, RecurrenceFrequency::Monthly, 1),
            vec![date("2026-01-26")]
        );
    }

    #[test]
    fn once_projects_nothing() {
        assert_eq!(project(date("2025-10-20"), RecurrenceFrequency::Once).count(), 0);
    }

    #[test]
    fn projections_are_finite() {
        let anchor = date("2025-10-20");
        assert_eq!(project(anchor, RecurrenceFrequency::Daily).count(), MAX_OCCURRENCES);

        let bounded: Vec<_> = project(anchor, RecurrenceFrequency::Weekly)
            .until(date("2025-11-03"))
            .collect();
        assert_eq!(bounded, vec![date("2025-10-27"), date("2025-11-03")]);
    }

    #[test]
    fn frequency_round_trips_through_strings() {
        for freq in [
            RecurrenceFrequency::Once,
            RecurrenceFrequency::Weekly,
            RecurrenceFrequency::Monthly,
        ] {
            assert_eq!(freq.as_str().parse::<RecurrenceFrequency>(), Ok(freq));
        }
        assert!("fortnightly".parse::<RecurrenceFrequency>().is_err());
    }

    #[test]
    fn week_of_month_buckets_days() {
        assert_eq!(week_of_month(date("2025-10-01")), 1);
        assert_eq!(week_of_month(date("2025-10-07")), 1);
        assert_eq!(week_of_month(date("2025-10-08")), 2);
        assert_eq!(week_of_month(date("2025-10-29")), 5);
    }
}
