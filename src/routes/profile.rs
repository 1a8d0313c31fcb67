use anyhow::Context;
use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper, upsert::excluded};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    api::auth::AuthUser,
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::{self, Role},
    },
    models::{UpsertUserEntity, UserEntity},
    schema::users,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/me",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_me))
            .routes(utoipa_axum::routes!(upsert_me))
            .route_layer(axum::middleware::from_fn(
                middleware::optional_authorization,
            )),
    )
}

#[derive(Serialize, ToSchema)]
struct MeRes {
    id: Uuid,
    email: Option<String>,
    role: Role,
    /// Where the UI should land this user.
    home: &'static str,
    profile: Option<UserEntity>,
}

#[derive(Deserialize, ToSchema)]
struct UpsertProfileReq {
    full_name: String,
    email: Option<String>,
    phone: Option<String>,
    residence: Option<String>,
    house_number: Option<String>,
}

fn require_user(user: Option<AuthUser>) -> Result<AuthUser, AppError> {
    user.ok_or(AppError::Unauthenticated)
}

/// The signed-in user, their role and their profile if one was saved.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Profile"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Get profile successfully", body = StdResponse<MeRes, String>),
        (status = 401, description = "Not signed in")
    )
)]
async fn get_me(
    State(state): State<AppState>,
    Extension(user): Extension<Option<AuthUser>>,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(user)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let profile: Option<UserEntity> = users::table
        .find(user.id)
        .select(UserEntity::as_select())
        .get_result(conn)
        .await
        .optional()
        .context("Failed to get profile")?;

    // A stored profile keeps the role it was created with.
    let role = profile
        .as_ref()
        .and_then(|profile| profile.role.parse().ok())
        .unwrap_or(user.role);

    Ok(StdResponse {
        data: Some(MeRes {
            id: user.id,
            email: user.email,
            role,
            home: role.home_path(),
            profile,
        }),
        message: Some("Get profile successfully"),
    })
}

/// Create or update the signed-in user's profile. The role is fixed on creation.
#[utoipa::path(
    put,
    path = "/",
    tags = ["Profile"],
    security(("bearerAuth" = [])),
    request_body = UpsertProfileReq,
    responses(
        (status = 200, description = "Saved profile successfully", body = StdResponse<UserEntity, String>),
        (status = 401, description = "Not signed in")
    )
)]
async fn upsert_me(
    State(state): State<AppState>,
    Extension(user): Extension<Option<AuthUser>>,
    Json(body): Json<UpsertProfileReq>,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(user)?;

    if body.full_name.trim().is_empty() {
        return Err(AppError::BadRequest("Full name is required".into()));
    }
    let email = body
        .email
        .or(user.email)
        .ok_or_else(|| AppError::BadRequest("Email is required".into()))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let profile: UserEntity = diesel::insert_into(users::table)
        .values(UpsertUserEntity {
            id: user.id,
            role: user.role.as_str().into(),
            full_name: body.full_name,
            email,
            phone: body.phone,
            residence: body.residence,
            house_number: body.house_number,
        })
        .on_conflict(users::id)
        .do_update()
        .set((
            users::full_name.eq(excluded(users::full_name)),
            users::email.eq(excluded(users::email)),
            users::phone.eq(excluded(users::phone)),
            users::residence.eq(excluded(users::residence)),
            users::house_number.eq(excluded(users::house_number)),
            users::updated_at.eq(diesel::dsl::now),
        ))
        .returning(UserEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to save profile")?;

    info!(user_id = %profile.id, role = %profile.role, "Saved profile");

    Ok(StdResponse {
        data: Some(profile),
        message: Some("Saved profile successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_callers_must_sign_in() {
        assert!(matches!(require_user(None), Err(AppError::Unauthenticated)));

        let user = AuthUser {
            id: Uuid::new_v4(),
            email: None,
            role: Role::Provider,
        };
        assert_eq!(require_user(Some(user.clone())).unwrap(), user);
    }
}
