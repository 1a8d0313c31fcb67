use std::{fmt, str::FromStr};

use axum::{
    Extension,
    extract::Request,
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    api::auth::{AuthClient, AuthUser},
    core::app_error::AppError,
};

pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Provider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Provider => "provider",
        }
    }

    /// Landing page for a signed-in user of this role.
    pub fn home_path(&self) -> &'static str {
        match self {
            Role::Client => "/client",
            Role::Provider => "/provider",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "provider" => Ok(Role::Provider),
            other => Err(format!("{other} is not a valid role")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    Allow(Uuid),
    /// No identity on a non-strict route.
    Anonymous,
    RedirectToLogin,
    /// Signed in with the other role; carries the caller's own role.
    RedirectToHome(Role),
}

pub fn evaluate_guard(user: Option<&AuthUser>, required: Role, strict: bool) -> GuardDecision {
    match user {
        None if strict => GuardDecision::RedirectToLogin,
        None => GuardDecision::Anonymous,
        Some(user) if user.role != required => GuardDecision::RedirectToHome(user.role),
        Some(user) => GuardDecision::Allow(user.id),
    }
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

async fn resolve_user(auth: &AuthClient, token: Option<&str>) -> Result<Option<AuthUser>, AppError> {
    match token {
        Some(token) => Ok(auth.get_user(token).await?),
        None => Ok(None),
    }
}

async fn authorize(
    auth: AuthClient,
    required: Role,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req);
    let user = resolve_user(&auth, token.as_deref()).await?;

    match evaluate_guard(user.as_ref(), required, true) {
        GuardDecision::Allow(user_id) => {
            req.extensions_mut().insert(user_id);
            Ok(next.run(req).await)
        }
        GuardDecision::RedirectToHome(actual) => {
            tracing::debug!(%actual, %required, "Role mismatch on guarded route");
            Err(AppError::WrongRole(actual))
        }
        GuardDecision::RedirectToLogin | GuardDecision::Anonymous => Err(AppError::Unauthenticated),
    }
}

/// Strict guard for client routes; inserts the client id as `Extension<Uuid>`.
/// Expects the app-wide `Extension<AuthClient>` layer.
pub async fn clients_authorization(
    Extension(auth): Extension<AuthClient>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(auth, Role::Client, req, next).await
}

/// Strict guard for provider routes; inserts the provider id as `Extension<Uuid>`.
pub async fn providers_authorization(
    Extension(auth): Extension<AuthClient>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(auth, Role::Provider, req, next).await
}

/// Non-strict guard for public and profile routes: resolves the caller if a token is
/// present and inserts `Extension<Option<AuthUser>>`. Invalid tokens are rejected.
pub async fn optional_authorization(
    Extension(auth): Extension<AuthClient>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req);
    let user = resolve_user(&auth, token.as_deref()).await?;

    if token.is_some() && user.is_none() {
        return Err(AppError::Unauthenticated);
    }

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
