use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use chrono::NaiveDate;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    booking::{
        overrides::{ExpiredOverride, OverrideMap, SlotView},
        slots::{SlotKey, WeekGrid, week_bounds},
    },
    models::TimeSlotEntity,
};

/// Persistence seam for provider slots.
pub trait SlotStore: Send + Sync {
    fn fetch_slots(
        &self,
        provider_id: Uuid,
        listing_id: Option<Uuid>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> BoxFuture<'_, Result<Vec<TimeSlotEntity>>>;

    fn set_availability(&self, key: SlotKey, available: bool)
    -> BoxFuture<'_, Result<TimeSlotEntity>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// Message surfaced to the provider on their next grid fetch.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SlotNotice {
    pub level: NoticeLevel,
    pub slot: SlotKey,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GridDay {
    pub date: NaiveDate,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SlotGrid {
    pub week_start: NaiveDate,
    pub days: Vec<GridDay>,
    pub pending_overrides: usize,
    pub notices: Vec<SlotNotice>,
}

/// Orders the writes of one slot. Holds the sequence number of the last write that ran.
type SlotWriter = Arc<Mutex<u64>>;

#[derive(Default)]
struct ProviderOverrides {
    map: OverrideMap,
    notices: Vec<SlotNotice>,
    sequences: HashMap<SlotKey, u64>,
    writers: HashMap<SlotKey, SlotWriter>,
}

impl ProviderOverrides {
    /// `against_snapshot` is set when the expiries come from a reconcile, where every
    /// expired override disagreed with the fetched slots.
    fn note_expired(&mut self, expired: &[ExpiredOverride], against_snapshot: bool) {
        for entry in expired {
            let message = match (entry.db_confirmed, against_snapshot) {
                (false, _) => {
                    warn!(slot = %entry.key, "Slot change was not confirmed in time, discarding");
                    "The change was not confirmed in time and has been discarded"
                }
                (true, true) => {
                    warn!(slot = %entry.key, "Saved slot change is not reflected in the slots");
                    "The change was saved but the slot now shows a different state"
                }
                (true, false) => {
                    debug!(slot = %entry.key, "Confirmed override aged out");
                    continue;
                }
            };
            self.notices.push(SlotNotice {
                level: NoticeLevel::Warning,
                slot: entry.key,
                message: message.into(),
            });
        }
    }

    fn next_write(&mut self, key: SlotKey) -> (u64, SlotWriter) {
        let sequence = self.sequences.entry(key).or_default();
        *sequence += 1;
        let writer = self.writers.entry(key).or_default().clone();
        (*sequence, writer)
    }

    fn is_idle(&mut self) -> bool {
        // A writer still shared with a spawned task has a write in flight.
        self.writers.retain(|_, writer| Arc::strong_count(writer) > 1);
        self.map.is_empty() && self.notices.is_empty() && self.writers.is_empty()
    }
}

/// Per-provider optimistic overrides in front of a [`SlotStore`].
#[derive(Clone)]
pub struct SlotSync {
    store: Arc<dyn SlotStore>,
    timeout: Duration,
    providers: Arc<Mutex<HashMap<Uuid, ProviderOverrides>>>,
}

impl SlotSync {
    pub fn new(store: Arc<dyn SlotStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            providers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Records the intent and writes it in the background. Writes of one slot run
    /// one at a time and a write superseded by a newer one is skipped. A failed
    /// write rolls the override back and leaves an error notice; it is not retried.
    pub async fn toggle(&self, key: SlotKey, available: bool) -> JoinHandle<()> {
        let (sequence, writer) = {
            let mut providers = self.providers.lock().await;
            let entry = providers.entry(key.provider_id).or_default();
            entry.map.record(key, available, Instant::now());
            entry.next_write(key)
        };
        info!(slot = %key, available, sequence, "Recorded slot override");

        let this = self.clone();
        tokio::spawn(async move { this.write(key, available, sequence, writer).await })
    }

    async fn write(&self, key: SlotKey, available: bool, sequence: u64, writer: SlotWriter) {
        let mut last_written = writer.lock().await;
        if *last_written > sequence {
            debug!(slot = %key, sequence, "Skipping superseded slot write");
            return;
        }
        *last_written = sequence;

        let result = self.store.set_availability(key, available).await;
        let mut providers = self.providers.lock().await;
        let entry = providers.entry(key.provider_id).or_default();

        match result {
            Ok(_) => {
                entry.map.confirm_write(&key, available);
                debug!(slot = %key, "Slot write persisted");
            }
            Err(err) => {
                warn!(slot = %key, error = %err, "Slot write failed, rolling back override");
                if entry.map.rollback(&key, available).is_some() {
                    entry.notices.push(SlotNotice {
                        level: NoticeLevel::Error,
                        slot: key,
                        message: format!("Could not update the slot: {err}"),
                    });
                }
            }
        }
    }

    /// The week containing `week_of`, overlaid with pending overrides.
    pub async fn grid(
        &self,
        provider_id: Uuid,
        listing_id: Option<Uuid>,
        week_of: NaiveDate,
    ) -> Result<SlotGrid> {
        let (from, to) = week_bounds(week_of);
        let mut snapshot = self
            .store
            .fetch_slots(provider_id, listing_id, from, to)
            .await?;

        let needs_refresh = {
            let mut providers = self.providers.lock().await;
            let entry = providers.entry(provider_id).or_default();
            let outcome = entry.map.reconcile(&snapshot, Instant::now(), self.timeout);
            entry.note_expired(&outcome.expired, true);
            outcome.needs_refresh
        };

        if needs_refresh {
            info!(%provider_id, "Forcing slot refresh after expired overrides");
            snapshot = self
                .store
                .fetch_slots(provider_id, listing_id, from, to)
                .await?;
            let mut providers = self.providers.lock().await;
            let entry = providers.entry(provider_id).or_default();
            let outcome = entry.map.reconcile(&snapshot, Instant::now(), self.timeout);
            entry.note_expired(&outcome.expired, true);
        }

        let mut providers = self.providers.lock().await;
        let entry = providers.entry(provider_id).or_default();
        let views = entry.map.overlay(&snapshot);
        let pending_overrides = entry.map.len();
        let notices = std::mem::take(&mut entry.notices);

        let days = WeekGrid::build(from, views, |view| (view.date, view.start_time))
            .into_days()
            .into_iter()
            .map(|(date, slots)| GridDay { date, slots })
            .collect();

        Ok(SlotGrid {
            week_start: from,
            days,
            pending_overrides,
            notices,
        })
    }

    pub async fn pending(&self, provider_id: Uuid) -> usize {
        self.providers
            .lock()
            .await
            .get(&provider_id)
            .map_or(0, |entry| entry.map.len())
    }

    /// Periodically discards overrides of providers who stopped polling.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let mut providers = this.providers.lock().await;
                for entry in providers.values_mut() {
                    let expired = entry.map.expire_stale(now, this.timeout);
                    entry.note_expired(&expired, false);
                }
                providers.retain(|_, entry| !entry.is_idle());
            }
        })
    }
}
