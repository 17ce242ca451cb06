use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use sqlx::SqlitePool;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::app::AppState;
use crate::cpf;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::AdminUser;
use crate::models::identity::{BlockRequest, DbIdentity, Identity, IdentityCreateRequest, ProvisionResponse};
use crate::models::user::Role;
use crate::utils::{hash_password, utc_now};

const IDENTITY_COLUMNS: &str =
    "cpf, added_by, added_at, has_account, email, user_id, blocked";

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListQuery {
    /// Substring match on CPF digits or login email.
    pub search: Option<String>,
}

/// Allow-list listing, newest first. The search predicate runs in SQL,
/// not over a client-side copy of the collection.
#[utoipa::path(
    get,
    path = "/identities",
    tag = "Identities",
    params(ListQuery),
    responses((status = 200, description = "Clientes cadastrados", body = [Identity]))
)]
pub async fn list_identities(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Identity>>> {
    let search = query.search.unwrap_or_default();

    let rows: Vec<DbIdentity> = if search.is_empty() {
        sqlx::query_as(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM authorized_cpfs ORDER BY added_at DESC"
        ))
        .fetch_all(&state.pool)
        .await?
    } else {
        let digits = cpf::normalize(&search);
        let cpf_pattern = if digits.is_empty() {
            // no digits in the term: the CPF side of the filter matches nothing
            String::new()
        } else {
            format!("%{digits}%")
        };
        let email_pattern = format!("%{}%", search.to_lowercase());

        sqlx::query_as(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM authorized_cpfs \
             WHERE (? != '' AND cpf LIKE ?) OR lower(coalesce(email, '')) LIKE ? \
             ORDER BY added_at DESC"
        ))
        .bind(&cpf_pattern)
        .bind(&cpf_pattern)
        .bind(&email_pattern)
        .fetch_all(&state.pool)
        .await?
    };

    Ok(Json(rows.into_iter().map(Identity::from).collect()))
}

/// Admin-triggered provisioning: derives the login from the CPF, creates
/// the account with the default temporary password and writes the
/// allow-list entry, all in one transaction.
///
/// Deliberately checks digit count only, not the checksum; the
/// self-registration flow is the strict one.
#[utoipa::path(
    post,
    path = "/identities",
    tag = "Identities",
    request_body = IdentityCreateRequest,
    responses(
        (status = 201, description = "Cliente cadastrado", body = ProvisionResponse),
        (status = 409, description = "CPF já cadastrado ou conta existente")
    )
)]
pub async fn create_identity(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(payload): Json<IdentityCreateRequest>,
) -> AppResult<(StatusCode, Json<ProvisionResponse>)> {
    let cpf_key = cpf::normalize(&payload.cpf);
    if cpf_key.len() != 11 {
        return Err(AppError::bad_request("CPF deve ter 11 dígitos."));
    }

    let already_listed: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM authorized_cpfs WHERE cpf = ?")
            .bind(&cpf_key)
            .fetch_one(&state.pool)
            .await?;
    if already_listed > 0 {
        return Err(AppError::conflict("Este CPF já está cadastrado."));
    }

    let email = cpf::login_for(&cpf_key);
    let credential_taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ?")
        .bind(&email)
        .fetch_one(&state.pool)
        .await?;
    if credential_taken > 0 {
        return Err(AppError::conflict("Este CPF já tem uma conta associada."));
    }

    let password_hash = hash_password(cpf::DEFAULT_CLIENT_PASSWORD)?;
    let now = utc_now();
    let user_id = Uuid::new_v4();

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, email, cpf, password_hash, role, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(&email)
    .bind(&cpf_key)
    .bind(password_hash)
    .bind(Role::User.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO authorized_cpfs (cpf, added_by, added_at, has_account, email, user_id, blocked) \
         VALUES (?, ?, ?, 1, ?, ?, 0)",
    )
    .bind(&cpf_key)
    .bind(admin.user_id)
    .bind(now)
    .bind(&email)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let identity = fetch_identity(&state.pool, &cpf_key).await?;
    log_activity(&state.events, "created", Some(admin.user_id), &identity);

    Ok((
        StatusCode::CREATED,
        Json(ProvisionResponse {
            cpf: cpf_key,
            email,
            temporary_password: cpf::DEFAULT_CLIENT_PASSWORD.to_string(),
        }),
    ))
}

/// Remove an allow-list entry. Irreversible, and deliberately without
/// cascade: the account and any submissions stay behind as orphans.
#[utoipa::path(
    delete,
    path = "/identities/{cpf}",
    tag = "Identities",
    params(("cpf" = String, Path, description = "CPF (11 dígitos)")),
    responses(
        (status = 204, description = "CPF removido"),
        (status = 404, description = "CPF não encontrado")
    )
)]
pub async fn delete_identity(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(cpf_param): Path<String>,
) -> AppResult<StatusCode> {
    let cpf_key = cpf::normalize(&cpf_param);
    let identity = fetch_identity(&state.pool, &cpf_key).await?;

    sqlx::query("DELETE FROM authorized_cpfs WHERE cpf = ?")
        .bind(&cpf_key)
        .execute(&state.pool)
        .await?;

    log_activity(&state.events, "deleted", Some(admin.user_id), &identity);

    Ok(StatusCode::NO_CONTENT)
}

/// Manual block/unblock toggle, independent of submission status.
#[utoipa::path(
    put,
    path = "/identities/{cpf}/blocked",
    tag = "Identities",
    params(("cpf" = String, Path, description = "CPF (11 dígitos)")),
    request_body = BlockRequest,
    responses(
        (status = 200, description = "Status de acesso alterado", body = Identity),
        (status = 404, description = "CPF não encontrado")
    )
)]
pub async fn set_identity_blocked(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(cpf_param): Path<String>,
    Json(payload): Json<BlockRequest>,
) -> AppResult<Json<Identity>> {
    let cpf_key = cpf::normalize(&cpf_param);
    // existence check first so a missing entry is a 404, not a no-op
    let _ = fetch_identity(&state.pool, &cpf_key).await?;

    state.gate.set_blocked(&cpf_key, payload.blocked).await?;

    let identity = fetch_identity(&state.pool, &cpf_key).await?;
    let action = if payload.blocked { "blocked" } else { "unblocked" };
    log_activity(&state.events, action, Some(admin.user_id), &identity);

    Ok(Json(identity))
}

pub async fn fetch_identity(pool: &SqlitePool, cpf_key: &str) -> AppResult<Identity> {
    let row: Option<DbIdentity> = sqlx::query_as(&format!(
        "SELECT {IDENTITY_COLUMNS} FROM authorized_cpfs WHERE cpf = ?"
    ))
    .bind(cpf_key)
    .fetch_optional(pool)
    .await?;

    row.map(Identity::from)
        .ok_or_else(|| AppError::not_found("CPF não encontrado"))
}
