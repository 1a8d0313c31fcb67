use anyhow::Context;
use axum::{
    Extension,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{Local, NaiveDate};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    api::auth::AuthUser,
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::{ListingEntity, RatingEntity, TimeSlotEntity},
    schema::{listings, provider_ratings, provider_time_slots},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/listings",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(browse_listings))
            .routes(utoipa_axum::routes!(get_listing))
            .routes(utoipa_axum::routes!(get_available_slots))
            .routes(utoipa_axum::routes!(get_provider_ratings))
            .route_layer(axum::middleware::from_fn(
                middleware::optional_authorization,
            )),
    )
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct BrowseQuery {
    category: Option<String>,
    provider_id: Option<Uuid>,
}

/// Browse active listings. A signed-in provider does not see their own listings.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Listings"],
    params(BrowseQuery),
    responses(
        (status = 200, description = "List listings", body = StdResponse<Vec<ListingEntity>, String>)
    )
)]
async fn browse_listings(
    Query(query): Query<BrowseQuery>,
    State(state): State<AppState>,
    Extension(user): Extension<Option<AuthUser>>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut statement = listings::table
        .filter(listings::is_active.eq(true))
        .into_boxed();
    if let Some(category) = query.category {
        statement = statement.filter(listings::category.eq(category));
    }
    if let Some(provider_id) = query.provider_id {
        statement = statement.filter(listings::provider_id.eq(provider_id));
    }
    if let Some(user) = user {
        statement = statement.filter(listings::provider_id.ne(user.id));
    }

    let listings: Vec<ListingEntity> = statement
        .order_by(listings::created_at.desc())
        .select(ListingEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get listings")?;

    Ok(StdResponse {
        data: Some(listings),
        message: Some("Get listings successfully"),
    })
}

/// Fetch one active listing.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Listings"],
    params(
        ("id" = Uuid, Path, description = "Listing ID to fetch")
    ),
    responses(
        (status = 200, description = "Get listing successfully", body = StdResponse<ListingEntity, String>)
    )
)]
async fn get_listing(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let listing: ListingEntity = listings::table
        .find(id)
        .filter(listings::is_active.eq(true))
        .select(ListingEntity::as_select())
        .get_result(conn)
        .await?;

    Ok(StdResponse {
        data: Some(listing),
        message: Some("Get listing successfully"),
    })
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct SlotsQuery {
    /// Defaults to today.
    date: Option<NaiveDate>,
}

/// Free slots of a listing on one day.
#[utoipa::path(
    get,
    path = "/{id}/slots",
    tags = ["Listings"],
    params(
        ("id" = Uuid, Path, description = "Listing ID"),
        SlotsQuery
    ),
    responses(
        (status = 200, description = "Available slots", body = StdResponse<Vec<TimeSlotEntity>, String>)
    )
)]
async fn get_available_slots(
    Path(id): Path<Uuid>,
    Query(query): Query<SlotsQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let today = Local::now().date_naive();
    let date = query.date.unwrap_or(today);
    if date < today {
        return Ok(StdResponse {
            data: Some(Vec::<TimeSlotEntity>::new()),
            message: Some("Get available slots successfully"),
        });
    }

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let slots: Vec<TimeSlotEntity> = provider_time_slots::table
        .inner_join(listings::table)
        .filter(listings::id.eq(id))
        .filter(listings::is_active.eq(true))
        .filter(provider_time_slots::slot_date.eq(date))
        .filter(provider_time_slots::is_available.eq(true))
        .filter(provider_time_slots::is_reserved.eq(false))
        .order_by(provider_time_slots::start_time.asc())
        .select(TimeSlotEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get available slots")?;

    Ok(StdResponse {
        data: Some(slots),
        message: Some("Get available slots successfully"),
    })
}

#[derive(Serialize, ToSchema)]
struct RatingsRes {
    average: Option<f64>,
    count: usize,
    ratings: Vec<RatingEntity>,
}

fn summarize(ratings: Vec<RatingEntity>) -> RatingsRes {
    let count = ratings.len();
    let average = (count > 0).then(|| {
        let total: i32 = ratings.iter().map(|rating| rating.rating).sum();
        f64::from(total) / count as f64
    });
    RatingsRes {
        average,
        count,
        ratings,
    }
}

/// Ratings of the provider behind a listing.
#[utoipa::path(
    get,
    path = "/{id}/ratings",
    tags = ["Listings"],
    params(
        ("id" = Uuid, Path, description = "Listing ID")
    ),
    responses(
        (status = 200, description = "Provider ratings", body = StdResponse<RatingsRes, String>)
    )
)]
async fn get_provider_ratings(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let provider_id: Uuid = listings::table
        .find(id)
        .select(listings::provider_id)
        .get_result(conn)
        .await?;

    let ratings: Vec<RatingEntity> = provider_ratings::table
        .filter(provider_ratings::provider_id.eq(provider_id))
        .order_by(provider_ratings::created_at.desc())
        .select(RatingEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get ratings")?;

    Ok(StdResponse {
        data: Some(summarize(ratings)),
        message: Some("Get ratings successfully"),
    })
}
