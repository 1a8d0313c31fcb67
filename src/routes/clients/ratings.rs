use anyhow::Context;
use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use diesel::{
    ExpressionMethods, QueryDsl, SelectableHelper,
    result::{DatabaseErrorKind, Error as DieselError},
};
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    booking::status::AppointmentStatus,
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::{AppointmentEntity, CreateRatingEntity, RatingEntity},
    schema::{appointments, provider_ratings},
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/clients/ratings",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(rate_appointment))
            .route_layer(axum::middleware::from_fn(
                middleware::clients_authorization,
            )),
    )
}

#[derive(Deserialize, ToSchema)]
struct RateReq {
    appointment_id: Uuid,
    rating: i32,
    comment: Option<String>,
}

fn validate_rating(rating: i32) -> Result<(), AppError> {
    if !(1..=5).contains(&rating) {
        return Err(AppError::BadRequest("Rating must be between 1 and 5".into()));
    }
    Ok(())
}

/// Rate the provider of a completed appointment. Each appointment can be rated once.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Ratings"],
    security(("bearerAuth" = [])),
    request_body = RateReq,
    responses(
        (status = 200, description = "Rated successfully", body = StdResponse<RatingEntity, String>),
        (status = 409, description = "Already rated or not completed yet")
    )
)]
async fn rate_appointment(
    State(state): State<AppState>,
    Extension(client_id): Extension<Uuid>,
    Json(body): Json<RateReq>,
) -> Result<impl IntoResponse, AppError> {
    validate_rating(body.rating)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let appointment: AppointmentEntity = appointments::table
        .find(body.appointment_id)
        .filter(appointments::client_id.eq(client_id))
        .select(AppointmentEntity::as_select())
        .get_result(conn)
        .await?;

    if appointment.status != AppointmentStatus::Completed.as_str() {
        return Err(AppError::Conflict(
            "Only completed appointments can be rated".into(),
        ));
    }

    let rating: RatingEntity = diesel::insert_into(provider_ratings::table)
        .values(CreateRatingEntity {
            appointment_id: appointment.id,
            provider_id: appointment.provider_id,
            client_id,
            rating: body.rating,
            comment: body.comment,
        })
        .returning(RatingEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(|err| match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::Conflict("This appointment has already been rated".into())
            }
            err => AppError::Other(err.into()),
        })?;

    info!(appointment_id = %appointment.id, rating = rating.rating, "Rated appointment");

    Ok(StdResponse {
        data: Some(rating),
        message: Some("Rated appointment successfully"),
    })
}
