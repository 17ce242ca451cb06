use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::cpf;
use crate::errors::AppResult;
use crate::events::log_activity;
use crate::jwt::AdminUser;
use crate::models::user::{DbUser, Role, User};
use crate::routes::auth::{create_admin_account, fetch_user_by_id};

/// Environment variable holding the bootstrap password for the reserved
/// admin account. The endpoint refuses to run without it.
pub const ADMIN_BOOTSTRAP_PASSWORD_VAR: &str = "ADMIN_BOOTSTRAP_PASSWORD";

#[derive(Debug, Serialize, ToSchema)]
pub struct InitAdminResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Out-of-band admin bootstrap. Idempotent: repeat calls return the same
/// uid and never create a second admin account. Unlike the rest of the
/// API, failures keep the `{success:false, error}` shape.
#[utoipa::path(
    get,
    path = "/api/init-admin",
    tag = "Admin",
    responses(
        (status = 200, description = "Admin account ensured", body = InitAdminResponse),
        (status = 500, description = "Bootstrap failed", body = InitAdminResponse)
    )
)]
pub async fn init_admin(State(state): State<AppState>) -> Response {
    match ensure_admin(&state).await {
        Ok((message, uid)) => (
            StatusCode::OK,
            Json(InitAdminResponse {
                success: true,
                message: Some(message),
                uid: Some(uid),
                email: Some(cpf::ADMIN_EMAIL.to_string()),
                error: None,
            }),
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Error initializing admin: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InitAdminResponse {
                    success: false,
                    message: None,
                    uid: None,
                    email: None,
                    error: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

async fn ensure_admin(state: &AppState) -> anyhow::Result<(String, Uuid)> {
    let password = std::env::var(ADMIN_BOOTSTRAP_PASSWORD_VAR).map_err(|_| {
        anyhow::anyhow!("{} environment variable is not set", ADMIN_BOOTSTRAP_PASSWORD_VAR)
    })?;

    let existing = sqlx::query_as::<_, DbUser>(
        "SELECT id, email, cpf, password_hash, role, created_at FROM users WHERE email = ?",
    )
    .bind(cpf::ADMIN_EMAIL)
    .fetch_optional(&state.pool)
    .await?;

    if let Some(db_user) = existing {
        // merge pass: repair role and sentinel CPF if they drifted
        sqlx::query("UPDATE users SET role = ?, cpf = ? WHERE id = ?")
            .bind(Role::Admin.as_str())
            .bind(cpf::ADMIN_CPF)
            .bind(db_user.id)
            .execute(&state.pool)
            .await?;

        return Ok(("Admin user already exists".to_string(), db_user.id));
    }

    let uid = create_admin_account(&state.pool, &password).await?;

    let db_user = fetch_user_by_id(&state.pool, uid).await?;
    let user: User = db_user.try_into()?;
    log_activity(&state.events, "admin_provisioned", Some(uid), &user);

    Ok(("Admin user created successfully".to_string(), uid))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub total_cpfs: i64,
    pub active_accounts: i64,
    pub total_forms: i64,
    pub pending_forms: i64,
}

/// Dashboard counters for the admin landing page.
#[utoipa::path(
    get,
    path = "/api/stats",
    tag = "Admin",
    responses((status = 200, description = "Portal counters", body = StatsResponse))
)]
pub async fn stats(State(state): State<AppState>, _admin: AdminUser) -> AppResult<Json<StatsResponse>> {
    let total_cpfs: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM authorized_cpfs")
        .fetch_one(&state.pool)
        .await?;
    let active_accounts: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM authorized_cpfs WHERE has_account = 1")
            .fetch_one(&state.pool)
            .await?;
    let total_forms: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM submissions")
        .fetch_one(&state.pool)
        .await?;
    let pending_forms: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM submissions WHERE status = 'pendente'")
            .fetch_one(&state.pool)
            .await?;

    Ok(Json(StatsResponse {
        total_cpfs,
        active_accounts,
        total_forms,
        pending_forms,
    }))
}
