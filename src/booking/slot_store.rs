use anyhow::{Context, Result};
use chrono::NaiveDate;
use diesel::{BoolExpressionMethods, ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    booking::{
        slot_sync::SlotStore,
        slots::{SlotKey, SlotType},
    },
    core::{app_error::AppError, db::DbPool},
    models::TimeSlotEntity,
    schema::provider_time_slots,
};

pub struct PgSlotStore {
    db_pool: DbPool,
}

impl PgSlotStore {
    pub fn new(db_pool: DbPool) -> Self {
        Self { db_pool }
    }
}

impl SlotStore for PgSlotStore {
    fn fetch_slots(
        &self,
        provider_id: Uuid,
        listing_id: Option<Uuid>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> BoxFuture<'_, Result<Vec<TimeSlotEntity>>> {
        Box::pin(async move {
            let conn = &mut self
                .db_pool
                .get()
                .await
                .context("Failed to obtain a DB connection pool")?;

            let mut query = provider_time_slots::table
                .filter(provider_time_slots::provider_id.eq(provider_id))
                .filter(provider_time_slots::slot_date.between(from, to))
                .into_boxed();

            if let Some(listing_id) = listing_id {
                query = query.filter(provider_time_slots::listing_id.eq(listing_id));
            }

            let slots = query
                .order_by((
                    provider_time_slots::slot_date.asc(),
                    provider_time_slots::start_time.asc(),
                ))
                .select(TimeSlotEntity::as_select())
                .get_results(conn)
                .await
                .context("Failed to get provider slots")?;

            Ok(slots)
        })
    }

    /// Blocking turns a free slot into a manual block; unblocking only lifts manual
    /// blocks. Reserved slots are never touched.
    fn set_availability(
        &self,
        key: SlotKey,
        available: bool,
    ) -> BoxFuture<'_, Result<TimeSlotEntity>> {
        Box::pin(async move {
            let conn = &mut self
                .db_pool
                .get()
                .await
                .context("Failed to obtain a DB connection pool")?;

            let target = provider_time_slots::table
                .filter(provider_time_slots::provider_id.eq(key.provider_id))
                .filter(provider_time_slots::listing_id.eq(key.listing_id))
                .filter(provider_time_slots::slot_date.eq(key.date))
                .filter(provider_time_slots::start_time.eq(key.start))
                .filter(provider_time_slots::is_reserved.eq(false));

            let new_type = if available {
                SlotType::Generated
            } else {
                SlotType::ManuallyBlocked
            };

            let updated = diesel::update(
                target.filter(
                    provider_time_slots::slot_type
                        .eq(SlotType::ManuallyBlocked.as_str())
                        .or(provider_time_slots::is_available.eq(true)),
                ),
            )
            .set((
                provider_time_slots::is_available.eq(available),
                provider_time_slots::slot_type.eq(new_type.as_str()),
                provider_time_slots::updated_at.eq(diesel::dsl::now),
            ))
            .returning(TimeSlotEntity::as_returning())
            .get_result(conn)
            .await
            .map_err(|err| match err {
                diesel::result::Error::NotFound => AppError::Conflict(format!(
                    "Slot {key} is reserved or blocked by a recurring booking"
                )),
                err => AppError::Other(err.into()),
            })?;

            Ok(updated)
        })
    }
}
