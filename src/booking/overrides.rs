//! Optimistic availability overrides laid over the last slot snapshot.
//!
//! A provider's block/unblock intent is visible immediately. The override is
//! dropped as soon as a snapshot agrees with it, or once it is older than the
//! timeout, whichever comes first.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{booking::slots::SlotKey, models::TimeSlotEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOverride {
    pub desired_available: bool,
    /// The write reached the database; the snapshot may still be stale.
    pub db_confirmed: bool,
    pub recorded_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredOverride {
    pub key: SlotKey,
    pub db_confirmed: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub cleared: Vec<SlotKey>,
    pub expired: Vec<ExpiredOverride>,
    pub needs_refresh: bool,
}

/// Snapshot slot with any pending override applied.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SlotView {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_available: bool,
    pub is_reserved: bool,
    pub slot_type: String,
    pub pending: bool,
}

#[derive(Debug, Default)]
pub struct OverrideMap {
    entries: HashMap<SlotKey, SlotOverride>,
}

impl OverrideMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &SlotKey) -> Option<&SlotOverride> {
        self.entries.get(key)
    }

    /// Records the latest intent for `key`, replacing any older one.
    pub fn record(&mut self, key: SlotKey, desired_available: bool, now: Instant) {
        self.entries.insert(
            key,
            SlotOverride {
                desired_available,
                db_confirmed: false,
                recorded_at: now,
            },
        );
    }

    /// Marks the write for `key` as persisted, if the intent is still `desired_available`.
    pub fn confirm_write(&mut self, key: &SlotKey, desired_available: bool) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if entry.desired_available == desired_available => {
                entry.db_confirmed = true;
                true
            }
            _ => false,
        }
    }

    /// Drops the override for a failed write. A newer intent for the same slot is kept.
    pub fn rollback(&mut self, key: &SlotKey, desired_available: bool) -> Option<SlotOverride> {
        match self.entries.get(key) {
            Some(entry) if entry.desired_available == desired_available => self.entries.remove(key),
            _ => None,
        }
    }

    pub fn effective_available(&self, slot: &TimeSlotEntity) -> bool {
        self.entries
            .get(&SlotKey::of(slot))
            .map_or(slot.is_available, |entry| entry.desired_available)
    }

    pub fn overlay(&self, snapshot: &[TimeSlotEntity]) -> Vec<SlotView> {
        snapshot
            .iter()
            .map(|slot| {
                let entry = self.entries.get(&SlotKey::of(slot));
                SlotView {
                    id: slot.id,
                    listing_id: slot.listing_id,
                    date: slot.slot_date,
                    start_time: slot.start_time,
                    end_time: slot.end_time,
                    is_available: entry.map_or(slot.is_available, |e| e.desired_available),
                    is_reserved: slot.is_reserved,
                    slot_type: slot.slot_type.clone(),
                    pending: entry.is_some(),
                }
            })
            .collect()
    }

    /// One reconciliation pass against a fresh snapshot.
    pub fn reconcile(
        &mut self,
        snapshot: &[TimeSlotEntity],
        now: Instant,
        timeout: Duration,
    ) -> ReconcileOutcome {
        let server_state: HashMap<SlotKey, bool> = snapshot
            .iter()
            .map(|slot| (SlotKey::of(slot), slot.is_available))
            .collect();

        let mut outcome = ReconcileOutcome::default();

        self.entries.retain(|key, entry| {
            if server_state.get(key) == Some(&entry.desired_available) {
                outcome.cleared.push(*key);
                return false;
            }
            if now.saturating_duration_since(entry.recorded_at) >= timeout {
                outcome.expired.push(ExpiredOverride {
                    key: *key,
                    db_confirmed: entry.db_confirmed,
                });
                return false;
            }
            true
        });

        outcome.needs_refresh = !outcome.expired.is_empty();
        outcome
    }

    /// Timeout-only pass for when no snapshot is at hand.
    pub fn expire_stale(&mut self, now: Instant, timeout: Duration) -> Vec<ExpiredOverride> {
        let mut expired = Vec::new();
        self.entries.retain(|key, entry| {
            let stale = now.saturating_duration_since(entry.recorded_at) >= timeout;
            if stale {
                expired.push(ExpiredOverride {
                    key: *key,
                    db_confirmed: entry.db_confirmed,
                });
            }
            !stale
        });
        expired
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Utc;

    use super::*;

    pub(crate) fn slot(provider_id: Uuid, listing_id: Uuid, start: &str, available: bool) -> TimeSlotEntity {
        let start = NaiveTime::parse_from_str(start, "%H:%M").unwrap();
        TimeSlotEntity {
            id: Uuid::new_v4(),
            provider_id,
            listing_id,
            slot_date: "2025-10-20".parse().unwrap(),
            start_time: start,
            end_time: start + chrono::TimeDelta::minutes(60),
            is_available: available,
            is_reserved: false,
            slot_type: "generated".into(),
            recurring_rule_id: None,
            appointment_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn override_wins_until_snapshot_agrees() {
        let (p, l) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = vec![slot(p, l, "08:00", true)];
        let key = SlotKey::of(&snapshot[0]);
        let t0 = Instant::now();

        let mut map = OverrideMap::new();
        map.record(key, false, t0);

        let view = map.overlay(&snapshot);
        assert!(!view[0].is_available);
        assert!(!map.effective_available(&snapshot[0]));
        assert!(view[0].pending);

        let outcome = map.reconcile(&snapshot, t0 + Duration::from_secs(1), TIMEOUT);
        assert!(outcome.cleared.is_empty());
        assert_eq!(map.len(), 1);

        let confirmed = vec![TimeSlotEntity {
            is_available: false,
            ..snapshot[0].clone()
        }];
        let outcome = map.reconcile(&confirmed, t0 + Duration::from_secs(2), TIMEOUT);
        assert_eq!(outcome.cleared, vec![key]);
        assert!(!outcome.needs_refresh);
        assert!(map.is_empty());
    }

    #[test]
    fn unconfirmed_override_expires_and_requests_refresh() {
        let (p, l) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = vec![slot(p, l, "09:00", true)];
        let key = SlotKey::of(&snapshot[0]);
        let t0 = Instant::now();

        let mut map = OverrideMap::new();
        map.record(key, false, t0);

        let outcome = map.reconcile(&snapshot, t0 + Duration::from_secs(11), TIMEOUT);
        assert_eq!(
            outcome.expired,
            vec![ExpiredOverride {
                key,
                db_confirmed: false
            }]
        );
        assert!(outcome.needs_refresh);
        assert!(map.is_empty());
    }

    #[test]
    fn fresh_override_survives_mismatching_snapshot() {
        let (p, l) = (Uuid::new_v4(), Uuid::new_v4());
        let snapshot = vec![slot(p, l, "09:00", true)];
        let t0 = Instant::now();

        let mut map = OverrideMap::new();
        map.record(SlotKey::of(&snapshot[0]), false, t0);

        let outcome = map.reconcile(&snapshot, t0 + Duration::from_secs(9), TIMEOUT);
        assert_eq!(outcome, ReconcileOutcome::default());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn rollback_keeps_newer_intent() {
        let (p, l) = (Uuid::new_v4(), Uuid::new_v4());
        let key = SlotKey::of(&slot(p, l, "10:00", true));
        let t0 = Instant::now();

        let mut map = OverrideMap::new();
        map.record(key, false, t0);
        map.record(key, true, t0 + Duration::from_secs(1));

        assert!(map.rollback(&key, false).is_none());
        assert!(!map.confirm_write(&key, false));
        assert!(map.confirm_write(&key, true));
        assert!(map.get(&key).unwrap().db_confirmed);
        assert!(map.rollback(&key, true).is_some());
        assert!(map.is_empty());
    }

    #[test]
    fn expire_stale_only_drops_old_entries() {
        let (p, l) = (Uuid::new_v4(), Uuid::new_v4());
        let old = SlotKey::of(&slot(p, l, "08:00", true));
        let new = SlotKey::of(&slot(p, l, "09:00", true));
        let t0 = Instant::now();

        let mut map = OverrideMap::new();
        map.record(old, false, t0);
        map.record(new, false, t0 + Duration::from_secs(8));

        let expired = map.expire_stale(t0 + Duration::from_secs(10), TIMEOUT);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key, old);
        assert!(map.get(&new).is_some());
    }
}
