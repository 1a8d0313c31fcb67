use anyhow::Context;
use axum::{
    Extension,
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::PaymentEntity,
    schema::payments,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/payments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_payments))
            .routes(utoipa_axum::routes!(get_payment))
            .route_layer(axum::middleware::from_fn(
                middleware::clients_authorization,
            )),
    )
}

/// Fetch the authenticated client's payments, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Payments"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List my payments", body = StdResponse<Vec<PaymentEntity>, String>)
    )
)]
async fn get_my_payments(
    State(state): State<AppState>,
    Extension(client_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let payments: Vec<PaymentEntity> = payments::table
        .filter(payments::client_id.eq(client_id))
        .order_by(payments::created_at.desc())
        .select(PaymentEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get my payments")?;

    Ok(StdResponse {
        data: Some(payments),
        message: Some("Get my payments successfully"),
    })
}

/// Fetch one payment of the authenticated client.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Payments"],
    security(("bearerAuth" = [])),
    params(
        ("id" = Uuid, Path, description = "Payment ID to fetch")
    ),
    responses(
        (status = 200, description = "Get payment successfully", body = StdResponse<PaymentEntity, String>),
        (status = 404, description = "No such payment for this client")
    )
)]
async fn get_payment(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(client_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let payment: PaymentEntity = payments::table
        .find(id)
        .filter(payments::client_id.eq(client_id))
        .select(PaymentEntity::as_select())
        .get_result(conn)
        .await?;

    Ok(StdResponse {
        data: Some(payment),
        message: Some("Get payment successfully"),
    })
}
