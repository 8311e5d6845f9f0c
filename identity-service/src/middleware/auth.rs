//! Authorization guard.
//!
//! `auth_middleware` authenticates the bearer token and loads the account;
//! `require_roles` layers on top of it for role-gated routes. Missing or
//! bad credentials are 401, a valid identity without the right to the
//! resource is 403, and the two are never conflated.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::{models::Role, models::User, services::AccessTokenClaims, AppState};

/// Authenticated request identity, stored in request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub claims: AccessTokenClaims,
}

/// Require a valid access token and a live account.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::Unauthenticated(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    // Signature and expiry checks are pure; no storage involved yet.
    let claims = state.sessions.tokens().validate_access_token(token)?;
    let user_id = claims.user_id()?;

    let user = state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthenticated(anyhow::anyhow!("Account no longer exists")))?;

    if !user.is_active {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Account is deactivated"
        )));
    }

    req.extensions_mut().insert(CurrentUser { user, claims });

    Ok(next.run(req).await)
}

/// Require one of the allowed roles. Must run after `auth_middleware`.
pub async fn require_roles(
    allowed: &'static [Role],
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let current = req.extensions().get::<CurrentUser>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!("Auth context missing from request extensions"))
    })?;

    if !allowed.contains(&current.user.role()) {
        tracing::warn!(
            user_id = %current.user.user_id,
            role = %current.user.role_code,
            path = %req.uri().path(),
            "Role-gated route denied"
        );
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Insufficient privileges"
        )));
    }

    Ok(next.run(req).await)
}

/// Require the ADMIN role. Must run after `auth_middleware`.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    require_roles(&[Role::Admin], req, next).await
}

/// Extractor for the authenticated identity in handlers.
pub struct AuthUser(pub CurrentUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let current = parts.extensions.get::<CurrentUser>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Auth context missing from request extensions"
            ))
        })?;

        Ok(AuthUser(current.clone()))
    }
}
