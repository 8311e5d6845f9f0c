//! Admin handlers. All routes here sit behind the ADMIN role gate.

use axum::extract::{Json, Path, State};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use service_core::error::AppError;

use crate::middleware::AuthUser;
use crate::AppState;

use super::ErrorResponse;

/// Result of a forced global logout.
#[derive(Debug, Serialize, ToSchema)]
pub struct RevokeSessionsResponse {
    pub user_id: Uuid,
    pub sessions_revoked: u64,
}

/// Force a global logout for a user.
#[utoipa::path(
    post,
    path = "/admin/users/{user_id}/revoke-sessions",
    params(
        ("user_id" = Uuid, Path, description = "User whose sessions to revoke")
    ),
    responses(
        (status = 200, description = "Sessions revoked", body = RevokeSessionsResponse),
        (status = 401, description = "Unauthenticated", body = ErrorResponse),
        (status = 403, description = "Admin privileges required", body = ErrorResponse),
        (status = 404, description = "Unknown user", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn revoke_user_sessions(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<RevokeSessionsResponse>, AppError> {
    let user = state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or(AppError::UnknownAccount)?;

    let sessions_revoked = state.sessions.revoke_all_for_user(user.user_id).await?;

    tracing::info!(
        admin_id = %current.user.user_id,
        user_id = %user.user_id,
        sessions_revoked,
        "Admin revoked user sessions"
    );

    Ok(Json(RevokeSessionsResponse {
        user_id: user.user_id,
        sessions_revoked,
    }))
}
