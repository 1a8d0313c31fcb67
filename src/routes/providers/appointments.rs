use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Deserialize;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    booking::status::AppointmentStatus,
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::AppointmentEntity,
    routes::clients::appointments::release_slots,
    schema::appointments,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/providers/appointments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_appointments))
            .routes(utoipa_axum::routes!(update_status))
            .route_layer(axum::middleware::from_fn(
                middleware::providers_authorization,
            )),
    )
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct AppointmentsQuery {
    status: Option<AppointmentStatus>,
}

/// Fetch the appointments booked with the authenticated provider, soonest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Provider appointments"],
    security(("bearerAuth" = [])),
    params(AppointmentsQuery),
    responses(
        (status = 200, description = "List my appointments", body = StdResponse<Vec<AppointmentEntity>, String>)
    )
)]
async fn get_my_appointments(
    Query(query): Query<AppointmentsQuery>,
    State(state): State<AppState>,
    Extension(provider_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let mut statement = appointments::table
        .filter(appointments::provider_id.eq(provider_id))
        .into_boxed();
    if let Some(status) = query.status {
        statement = statement.filter(appointments::status.eq(status.as_str()));
    }

    let appointments: Vec<AppointmentEntity> = statement
        .order_by((
            appointments::appointment_date.asc(),
            appointments::start_time.asc(),
        ))
        .select(AppointmentEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get appointments")?;

    Ok(StdResponse {
        data: Some(appointments),
        message: Some("Get my appointments successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct UpdateStatusReq {
    status: AppointmentStatus,
}

/// Confirm, complete, reject or cancel an appointment. Rejecting or cancelling
/// releases its slots.
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Provider appointments"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Appointment ID to update")
    ),
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Updated status successfully", body = StdResponse<AppointmentEntity, String>),
        (status = 409, description = "The transition is not allowed")
    )
)]
async fn update_status(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(provider_id): Extension<Uuid>,
    Json(body): Json<UpdateStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let next = body.status;
    let updated = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let appointment: AppointmentEntity = appointments::table
                    .find(id)
                    .filter(appointments::provider_id.eq(provider_id))
                    .for_update()
                    .select(AppointmentEntity::as_select())
                    .get_result(conn)
                    .await?;

                let current: AppointmentStatus = appointment
                    .status
                    .parse()
                    .map_err(|err: String| anyhow::anyhow!(err))?;
                if !current.can_transition_to(next) {
                    return Err(AppError::Conflict(format!(
                        "Cannot change a {current} appointment to {next}"
                    )));
                }

                let updated: AppointmentEntity = diesel::update(appointments::table.find(id))
                    .set((
                        appointments::status.eq(next.as_str()),
                        appointments::updated_at.eq(diesel::dsl::now),
                    ))
                    .returning(AppointmentEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update appointment status")?;

                if next.releases_slots() {
                    release_slots(conn, &[id]).await?;
                }

                Ok::<AppointmentEntity, AppError>(updated)
            })
        })
        .await?;

    info!(appointment_id = %id, status = %next, "Updated appointment status");

    Ok(StdResponse {
        data: Some(updated),
        message: Some("Updated appointment status successfully"),
    })
}
