use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{Datelike, Days, NaiveDate, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::TimeSlotEntity;

/// Stable identity of a slot across snapshots: provider, listing, date and start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct SlotKey {
    pub provider_id: Uuid,
    pub listing_id: Uuid,
    pub date: NaiveDate,
    pub start: NaiveTime,
}

impl SlotKey {
    pub fn of(slot: &TimeSlotEntity) -> Self {
        Self {
            provider_id: slot.provider_id,
            listing_id: slot.listing_id,
            date: slot.slot_date,
            start: slot.start_time,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.provider_id,
            self.listing_id,
            self.date.format("%Y-%m-%d"),
            self.start.format("%H:%M")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    Generated,
    ManuallyBlocked,
    RecurringBlocked,
}

impl SlotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotType::Generated => "generated",
            SlotType::ManuallyBlocked => "manually_blocked",
            SlotType::RecurringBlocked => "recurring_blocked",
        }
    }
}

impl FromStr for SlotType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(SlotType::Generated),
            "manually_blocked" => Ok(SlotType::ManuallyBlocked),
            "recurring_blocked" => Ok(SlotType::RecurringBlocked),
            other => Err(format!("{other} is not a valid slot type")),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SlotError {
    #[error("Slot size must be positive")]
    InvalidSlotSize,

    #[error("Slots {previous} and {next} are not contiguous")]
    NotContiguous { previous: String, next: String },
}

/// A start/end pair on a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Half-open overlap test.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

pub fn slot_delta(slot_minutes: i32) -> Result<TimeDelta, SlotError> {
    if slot_minutes <= 0 {
        return Err(SlotError::InvalidSlotSize);
    }
    Ok(TimeDelta::minutes(i64::from(slot_minutes)))
}

/// Number of consecutive slots a service of `duration_minutes` occupies.
pub fn slots_needed(duration_minutes: i32, slot_minutes: i32) -> Result<usize, SlotError> {
    if slot_minutes <= 0 {
        return Err(SlotError::InvalidSlotSize);
    }
    let duration = duration_minutes.max(1);
    Ok(((duration + slot_minutes - 1) / slot_minutes) as usize)
}

/// Slices availability windows into fixed-size slots; a tail shorter than one slot is dropped.
pub fn generate_day_slots(
    windows: &[TimeWindow],
    slot_minutes: i32,
) -> Result<Vec<TimeWindow>, SlotError> {
    let step = slot_delta(slot_minutes)?;
    let mut slots = Vec::new();

    for window in windows {
        let mut start = window.start;
        loop {
            let (end, wrapped) = start.overflowing_add_signed(step);
            if wrapped != 0 || end > window.end {
                break;
            }
            slots.push(TimeWindow::new(start, end));
            start = end;
        }
    }

    slots.sort_by_key(|slot| slot.start);
    slots.dedup_by_key(|slot| slot.start);
    Ok(slots)
}

/// Every slot must start exactly one slot length after the previous one.
pub fn ensure_contiguous(slots: &[TimeWindow], slot_minutes: i32) -> Result<(), SlotError> {
    let step = slot_delta(slot_minutes)?;
    let mut ordered = slots.to_vec();
    ordered.sort_by_key(|slot| slot.start);

    for pair in ordered.windows(2) {
        let (previous, next) = (pair[0], pair[1]);
        if next.start.signed_duration_since(previous.start) != step {
            return Err(SlotError::NotContiguous {
                previous: previous.to_string(),
                next: next.to_string(),
            });
        }
    }
    Ok(())
}

/// Monday through Sunday of the week containing `date`.
pub fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let offset = u64::from(date.weekday().num_days_from_monday());
    let monday = date - Days::new(offset);
    (monday, monday + Days::new(6))
}

/// Slots grouped by date, each day ordered by start time.
#[derive(Debug, Clone, Serialize)]
pub struct WeekGrid<T> {
    pub week_start: NaiveDate,
    pub days: BTreeMap<NaiveDate, Vec<T>>,
}

impl<T> WeekGrid<T> {
    pub fn build(
        week_start: NaiveDate,
        slots: impl IntoIterator<Item = T>,
        key: impl Fn(&T) -> (NaiveDate, NaiveTime),
    ) -> Self {
        let mut days: BTreeMap<NaiveDate, Vec<T>> = (0..7)
            .map(|offset| (week_start + Days::new(offset), Vec::new()))
            .collect();

        for slot in slots {
            let (date, _) = key(&slot);
            days.entry(date).or_default().push(slot);
        }
        for day in days.values_mut() {
            day.sort_by_key(|slot| key(slot).1);
        }

        Self { week_start, days }
    }

    pub fn into_days(self) -> Vec<(NaiveDate, Vec<T>)> {
        self.days.into_iter().collect()
    }
}
