use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::{CreateListingEntity, ListingEntity, ServiceVariant, UpdateListingEntity},
    schema::listings,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/providers/listings",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_listings))
            .routes(utoipa_axum::routes!(create_listing))
            .routes(utoipa_axum::routes!(update_listing))
            .routes(utoipa_axum::routes!(deactivate_listing))
            .route_layer(axum::middleware::from_fn(
                middleware::providers_authorization,
            )),
    )
}

#[derive(Deserialize, ToSchema)]
struct CreateListingReq {
    title: String,
    description: Option<String>,
    category: String,
    base_price: f64,
    #[serde(default = "default_currency")]
    currency: String,
    duration_minutes: i32,
    #[serde(default = "default_slot_size")]
    slot_size_minutes: i32,
    #[serde(default)]
    service_variants: Vec<ServiceVariant>,
}

fn default_currency() -> String {
    "USD".into()
}

fn default_slot_size() -> i32 {
    60
}

fn validate_pricing(
    base_price: Option<f64>,
    duration_minutes: Option<i32>,
    slot_size_minutes: Option<i32>,
    variants: &[ServiceVariant],
) -> Result<(), AppError> {
    if base_price.is_some_and(|price| !price.is_finite() || price < 0.0) {
        return Err(AppError::BadRequest("Price cannot be negative".into()));
    }
    if duration_minutes.is_some_and(|minutes| minutes <= 0) {
        return Err(AppError::BadRequest("Duration must be positive".into()));
    }
    if slot_size_minutes.is_some_and(|minutes| minutes <= 0) {
        return Err(AppError::BadRequest("Slot size must be positive".into()));
    }
    if let Some(variant) = variants.iter().find(|variant| {
        variant.name.trim().is_empty()
            || !variant.price.is_finite()
            || variant.price < 0.0
            || variant.duration_minutes.is_some_and(|minutes| minutes <= 0)
    }) {
        return Err(AppError::BadRequest(format!(
            "Service variant '{}' is invalid",
            variant.name
        )));
    }
    Ok(())
}

/// Fetch the authenticated provider's listings, including inactive ones.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Provider listings"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List my listings", body = StdResponse<Vec<ListingEntity>, String>)
    )
)]
async fn get_my_listings(
    State(state): State<AppState>,
    Extension(provider_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let listings: Vec<ListingEntity> = listings::table
        .filter(listings::provider_id.eq(provider_id))
        .order_by(listings::created_at.desc())
        .select(ListingEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get my listings")?;

    Ok(StdResponse {
        data: Some(listings),
        message: Some("Get my listings successfully"),
    })
}

/// Publish a new listing.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Provider listings"],
    security(("bearerAuth" = [])),
    request_body = CreateListingReq,
    responses(
        (status = 200, description = "Created listing successfully", body = StdResponse<ListingEntity, String>)
    )
)]
async fn create_listing(
    State(state): State<AppState>,
    Extension(provider_id): Extension<Uuid>,
    Json(body): Json<CreateListingReq>,
) -> Result<impl IntoResponse, AppError> {
    validate_pricing(
        Some(body.base_price),
        Some(body.duration_minutes),
        Some(body.slot_size_minutes),
        &body.service_variants,
    )?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let listing: ListingEntity = diesel::insert_into(listings::table)
        .values(CreateListingEntity {
            provider_id,
            title: body.title,
            description: body.description,
            category: body.category,
            base_price: body.base_price,
            currency: body.currency,
            duration_minutes: body.duration_minutes,
            slot_size_minutes: body.slot_size_minutes,
            service_variants: serde_json::to_value(&body.service_variants)
                .context("Failed to encode service variants")?,
        })
        .returning(ListingEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create listing")?;

    info!(listing_id = %listing.id, %provider_id, "Created listing");

    Ok(StdResponse {
        data: Some(listing),
        message: Some("Created listing successfully"),
    })
}

/// Update some fields of one of the provider's listings.
#[utoipa::path(
    patch,
    path = "/{id}",
    tags = ["Provider listings"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Listing ID to update")
    ),
    request_body = UpdateListingEntity,
    responses(
        (status = 200, description = "Updated listing successfully", body = StdResponse<ListingEntity, String>)
    )
)]
async fn update_listing(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(provider_id): Extension<Uuid>,
    Json(body): Json<UpdateListingEntity>,
) -> Result<impl IntoResponse, AppError> {
    let variants: Vec<ServiceVariant> = match &body.service_variants {
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|err| AppError::BadRequest(format!("Invalid service variants: {err}")))?,
        None => Vec::new(),
    };
    validate_pricing(
        body.base_price,
        body.duration_minutes,
        body.slot_size_minutes,
        &variants,
    )?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let listing: ListingEntity = diesel::update(
        listings::table
            .find(id)
            .filter(listings::provider_id.eq(provider_id)),
    )
    .set((&body, listings::updated_at.eq(diesel::dsl::now)))
    .returning(ListingEntity::as_returning())
    .get_result(conn)
    .await?;

    Ok(StdResponse {
        data: Some(listing),
        message: Some("Updated listing successfully"),
    })
}

/// Hide a listing from browsing. Existing appointments are kept.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Provider listings"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Listing ID to deactivate")
    ),
    responses(
        (status = 200, description = "Deactivated listing successfully", body = StdResponse<ListingEntity, String>)
    )
)]
async fn deactivate_listing(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(provider_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let listing: ListingEntity = diesel::update(
        listings::table
            .find(id)
            .filter(listings::provider_id.eq(provider_id)),
    )
    .set((
        listings::is_active.eq(false),
        listings::updated_at.eq(diesel::dsl::now),
    ))
    .returning(ListingEntity::as_returning())
    .get_result(conn)
    .await?;

    info!(listing_id = %listing.id, "Deactivated listing");

    Ok(StdResponse {
        data: Some(listing),
        message: Some("Deactivated listing successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(name: &str, price: f64) -> ServiceVariant {
        ServiceVariant {
            name: name.into(),
            price,
            duration_minutes: None,
        }
    }

    #[test]
    fn partial_updates_validate_only_present_fields() {
        assert!(validate_pricing(None, None, None, &[]).is_ok());
        assert!(validate_pricing(Some(0.0), Some(30), Some(30), &[]).is_ok());
        assert!(validate_pricing(Some(-1.0), None, None, &[]).is_err());
        assert!(validate_pricing(None, Some(0), None, &[]).is_err());
        assert!(validate_pricing(None, None, Some(-15), &[]).is_err());
    }

    #[test]
    fn variants_need_a_name_and_a_price() {
        assert!(validate_pricing(None, None, None, &[variant("Large dog", 55.0)]).is_ok());
        assert!(validate_pricing(None, None, None, &[variant(" ", 10.0)]).is_err());
        assert!(validate_pricing(None, None, None, &[variant("Free", f64::NAN)]).is_err());
    }
}
