use std::collections::HashMap;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Datelike, Local, NaiveDate, NaiveTime};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    booking::{
        recurrence::day_of_week_index,
        slot_sync::SlotGrid,
        slots::{SlotKey, SlotType, TimeWindow, generate_day_slots},
    },
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::{AvailabilityEntity, CreateTimeSlotEntity, ListingEntity},
    schema::{listings, provider_availability, provider_time_slots},
};

/// Longest range a single generate request may cover.
const MAX_GENERATE_DAYS: i64 = 90;

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/providers/slots",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(generate_slots))
            .routes(utoipa_axum::routes!(get_grid))
            .routes(utoipa_axum::routes!(toggle_slot))
            .route_layer(axum::middleware::from_fn(
                middleware::providers_authorization,
            )),
    )
}

#[derive(Deserialize, ToSchema)]
struct GenerateSlotsReq {
    listing_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
}

#[derive(Serialize, ToSchema)]
struct GenerateSlotsRes {
    created: usize,
}

fn validate_range(from: NaiveDate, to: NaiveDate, today: NaiveDate) -> Result<(), AppError> {
    if from < today {
        return Err(AppError::BadRequest(
            "Slots cannot be generated in the past".into(),
        ));
    }
    if to < from {
        return Err(AppError::BadRequest("The range ends before it starts".into()));
    }
    if (to - from).num_days() >= MAX_GENERATE_DAYS {
        return Err(AppError::BadRequest(format!(
            "At most {MAX_GENERATE_DAYS} days can be generated at once"
        )));
    }
    Ok(())
}

/// Slices the weekly availability into slots for every date in `from..=to`.
fn plan_slots(
    listing: &ListingEntity,
    availability: &[AvailabilityEntity],
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<CreateTimeSlotEntity>, AppError> {
    let mut by_day: HashMap<i32, Vec<TimeWindow>> = HashMap::new();
    for window in availability {
        by_day
            .entry(window.day_of_week)
            .or_default()
            .push(TimeWindow::new(window.start_time, window.end_time));
    }

    let mut planned = Vec::new();
    for date in from.iter_days().take_while(|date| *date <= to) {
        let Some(windows) = by_day.get(&day_of_week_index(date.weekday())) else {
            continue;
        };
        let slots = generate_day_slots(windows, listing.slot_size_minutes)
            .map_err(|err| AppError::BadRequest(err.to_string()))?;

        planned.extend(slots.into_iter().map(|slot| CreateTimeSlotEntity {
            provider_id: listing.provider_id,
            listing_id: listing.id,
            slot_date: date,
            start_time: slot.start,
            end_time: slot.end,
            is_available: true,
            is_reserved: false,
            slot_type: SlotType::Generated.as_str().into(),
            recurring_rule_id: None,
            appointment_id: None,
        }));
    }
    Ok(planned)
}

/// Generate bookable slots for a listing from the provider's weekly availability.
/// Existing slots, including blocked and reserved ones, are left as they are.
#[utoipa::path(
    post,
    path = "/generate",
    tags = ["Provider slots"],
    security(("bearerAuth" = [])),
    request_body = GenerateSlotsReq,
    responses(
        (status = 200, description = "Generated slots successfully", body = StdResponse<GenerateSlotsRes, String>)
    )
)]
async fn generate_slots(
    State(state): State<AppState>,
    Extension(provider_id): Extension<Uuid>,
    Json(body): Json<GenerateSlotsReq>,
) -> Result<impl IntoResponse, AppError> {
    validate_range(body.from, body.to, Local::now().date_naive())?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let listing: ListingEntity = listings::table
        .find(body.listing_id)
        .filter(listings::provider_id.eq(provider_id))
        .select(ListingEntity::as_select())
        .get_result(conn)
        .await?;

    let availability: Vec<AvailabilityEntity> = provider_availability::table
        .filter(provider_availability::provider_id.eq(provider_id))
        .select(AvailabilityEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get availability")?;

    let planned = plan_slots(&listing, &availability, body.from, body.to)?;
    let created = if planned.is_empty() {
        0
    } else {
        diesel::insert_into(provider_time_slots::table)
            .values(&planned)
            .on_conflict_do_nothing()
            .execute(conn)
            .await
            .context("Failed to create slots")?
    };

    info!(listing_id = %listing.id, planned = planned.len(), created, "Generated slots");

    Ok(StdResponse {
        data: Some(GenerateSlotsRes { created }),
        message: Some("Generated slots successfully"),
    })
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct GridQuery {
    listing_id: Option<Uuid>,
    /// Any date of the wanted week; defaults to the current week.
    week: Option<NaiveDate>,
}

/// The provider's week of slots with pending changes applied.
#[utoipa::path(
    get,
    path = "/grid",
    tags = ["Provider slots"],
    security(("bearerAuth" = [])),
    params(GridQuery),
    responses(
        (status = 200, description = "Weekly slot grid", body = StdResponse<SlotGrid, String>)
    )
)]
async fn get_grid(
    Query(query): Query<GridQuery>,
    State(state): State<AppState>,
    Extension(provider_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let week_of = query.week.unwrap_or_else(|| Local::now().date_naive());
    let grid = state
        .slot_sync
        .grid(provider_id, query.listing_id, week_of)
        .await?;

    Ok(StdResponse {
        data: Some(grid),
        message: Some("Get slot grid successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct ToggleSlotReq {
    listing_id: Uuid,
    date: NaiveDate,
    start_time: NaiveTime,
    available: bool,
}

/// Block or unblock a slot. The change shows on the grid right away and is
/// written in the background; failures surface as notices on the next grid fetch.
#[utoipa::path(
    patch,
    path = "/toggle",
    tags = ["Provider slots"],
    security(("bearerAuth" = [])),
    request_body = ToggleSlotReq,
    responses(
        (status = 202, description = "Change accepted", body = StdResponse<SlotKey, String>)
    )
)]
async fn toggle_slot(
    State(state): State<AppState>,
    Extension(provider_id): Extension<Uuid>,
    Json(body): Json<ToggleSlotReq>,
) -> Result<impl IntoResponse, AppError> {
    let key = SlotKey {
        provider_id,
        listing_id: body.listing_id,
        date: body.date,
        start: body.start_time,
    };
    // The write outcome is reported through the grid, not awaited here.
    let _write = state.slot_sync.toggle(key, body.available).await;

    Ok((
        StatusCode::ACCEPTED,
        StdResponse {
            data: Some(key),
            message: Some("Slot change accepted"),
        },
    ))
}
