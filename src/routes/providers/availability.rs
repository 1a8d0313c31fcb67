use anyhow::Context;
use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use chrono::NaiveTime;
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    booking::slots::TimeWindow,
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::{AvailabilityEntity, CreateAvailabilityEntity},
    schema::provider_availability,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/providers/availability",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_availability))
            .routes(utoipa_axum::routes!(replace_availability))
            .route_layer(axum::middleware::from_fn(
                middleware::providers_authorization,
            )),
    )
}

#[derive(Deserialize, ToSchema, Debug, Clone, Copy)]
struct AvailabilityWindowReq {
    /// 0 = Sunday .. 6 = Saturday.
    day_of_week: i32,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

/// Windows must be well-formed and must not overlap on the same day.
fn validate_windows(windows: &[AvailabilityWindowReq]) -> Result<(), AppError> {
    for (index, window) in windows.iter().enumerate() {
        if !(0..=6).contains(&window.day_of_week) {
            return Err(AppError::BadRequest(format!(
                "Day of week {} is out of range",
                window.day_of_week
            )));
        }
        if window.start_time >= window.end_time {
            return Err(AppError::BadRequest(
                "Availability must end after it starts".into(),
            ));
        }

        let current = TimeWindow::new(window.start_time, window.end_time);
        let overlapping = windows[..index].iter().find(|other| {
            other.day_of_week == window.day_of_week
                && TimeWindow::new(other.start_time, other.end_time).overlaps(&current)
        });
        if let Some(other) = overlapping {
            return Err(AppError::BadRequest(format!(
                "Availability {} overlaps {} on day {}",
                current,
                TimeWindow::new(other.start_time, other.end_time),
                window.day_of_week
            )));
        }
    }
    Ok(())
}

/// Fetch the authenticated provider's weekly availability.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Provider availability"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "List my availability", body = StdResponse<Vec<AvailabilityEntity>, String>)
    )
)]
async fn get_my_availability(
    State(state): State<AppState>,
    Extension(provider_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let windows: Vec<AvailabilityEntity> = provider_availability::table
        .filter(provider_availability::provider_id.eq(provider_id))
        .order_by((
            provider_availability::day_of_week.asc(),
            provider_availability::start_time.asc(),
        ))
        .select(AvailabilityEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get availability")?;

    Ok(StdResponse {
        data: Some(windows),
        message: Some("Get my availability successfully"),
    })
}

/// Replace the whole weekly availability. Already generated slots are untouched.
#[utoipa::path(
    put,
    path = "/",
    tags = ["Provider availability"],
    security(("bearerAuth" = [])),
    request_body = Vec<AvailabilityWindowReq>,
    responses(
        (status = 200, description = "Replaced availability successfully", body = StdResponse<Vec<AvailabilityEntity>, String>)
    )
)]
async fn replace_availability(
    State(state): State<AppState>,
    Extension(provider_id): Extension<Uuid>,
    Json(body): Json<Vec<AvailabilityWindowReq>>,
) -> Result<impl IntoResponse, AppError> {
    validate_windows(&body)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let windows = conn
        .transaction(move |conn| {
            Box::pin(async move {
                diesel::delete(
                    provider_availability::table
                        .filter(provider_availability::provider_id.eq(provider_id)),
                )
                .execute(conn)
                .await
                .context("Failed to clear availability")?;

                let new_windows: Vec<CreateAvailabilityEntity> = body
                    .iter()
                    .map(|window| CreateAvailabilityEntity {
                        provider_id,
                        day_of_week: window.day_of_week,
                        start_time: window.start_time,
                        end_time: window.end_time,
                    })
                    .collect();
                if new_windows.is_empty() {
                    return Ok(Vec::new());
                }

                let windows: Vec<AvailabilityEntity> =
                    diesel::insert_into(provider_availability::table)
                        .values(&new_windows)
                        .returning(AvailabilityEntity::as_returning())
                        .get_results(conn)
                        .await
                        .context("Failed to save availability")?;

                Ok::<Vec<AvailabilityEntity>, AppError>(windows)
            })
        })
        .await?;

    info!(%provider_id, windows = windows.len(), "Replaced availability");

    Ok(StdResponse {
        data: Some(windows),
        message: Some("Replaced availability successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(day: i32, start: &str, end: &str) -> AvailabilityWindowReq {
        AvailabilityWindowReq {
            day_of_week: day,
            start_time: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            end_time: NaiveTime::parse_from_str(end, "%H:%M").unwrap(),
        }
    }

    #[test]
    fn split_days_are_accepted() {
        let windows = [
            window(1, "08:00", "12:00"),
            window(1, "13:00", "17:00"),
            window(2, "08:00", "12:00"),
        ];
        assert!(validate_windows(&windows).is_ok());
    }

    #[test]
    fn overlapping_windows_on_the_same_day_are_rejected() {
        let windows = [window(1, "08:00", "12:00"), window(1, "11:00", "14:00")];
        match validate_windows(&windows) {
            Err(AppError::BadRequest(message)) => {
                assert_eq!(message, "Availability 11:00-14:00 overlaps 08:00-12:00 on day 1")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn malformed_windows_are_rejected() {
        assert!(validate_windows(&[window(7, "08:00", "12:00")]).is_err());
        assert!(validate_windows(&[window(3, "12:00", "12:00")]).is_err());
    }
}
