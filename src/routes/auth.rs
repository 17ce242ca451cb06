use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::cpf;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::jwt::CurrentUser;
use crate::models::user::{
    AdminSetupRequest, AuthResponse, DbUser, LoginRequest, RegisterRequest, Role, SessionResponse,
    User,
};
use crate::utils::{hash_password, utc_now, verify_password};

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    message: String,
}

/// Client self-registration. The CPF must pass full checksum validation
/// here; only admin provisioning accepts checksum-invalid CPFs.
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Conta criada", body = AuthResponse),
        (status = 403, description = "CPF não autorizado"),
        (status = 409, description = "Email já está em uso")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let cpf_key = cpf::normalize(&payload.cpf);
    if !cpf::is_well_formed(&cpf_key) {
        return Err(AppError::bad_request("CPF inválido."));
    }

    if !state.gate.is_authorized(&cpf_key).await? {
        return Err(AppError::not_authorized(
            "CPF não autorizado. Entre em contato com a administração.",
        ));
    }

    ensure_email_available(&state.pool, &payload.email).await?;

    let password_hash = hash_password(&payload.password)?;
    let now = utc_now();
    let user_id = Uuid::new_v4();

    // Account creation and the allow-list merge land together or not at
    // all; a half-provisioned identity cannot be observed.
    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, email, cpf, password_hash, role, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(&payload.email)
    .bind(&cpf_key)
    .bind(password_hash)
    .bind(Role::User.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE authorized_cpfs SET has_account = 1, email = ?, user_id = ? WHERE cpf = ?",
    )
    .bind(&payload.email)
    .bind(user_id)
    .bind(&cpf_key)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    let db_user = fetch_user_by_id(&state.pool, user_id).await?;
    let user: User = db_user.try_into()?;
    let token = state.jwt.encode(user.id)?;

    log_activity(&state.events, "registered", Some(user.id), &user);

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

/// Login with a CPF (client) or an email (administrator). A CPF input is
/// normalized and mapped to its derived login before the credential
/// check.
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login realizado", body = AuthResponse),
        (status = 401, description = "Credenciais inválidas")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let by_email = payload.login.contains('@');

    let email = if by_email {
        let email = payload.login.trim().to_string();
        if !email.contains('.') {
            return Err(AppError::bad_request("Digite um email válido."));
        }
        email
    } else {
        let digits = cpf::normalize(&payload.login);
        if digits.len() != 11 {
            return Err(AppError::bad_request("Digite um CPF válido com 11 dígitos."));
        }
        cpf::login_for(&digits)
    };

    let not_found_message = if by_email {
        "Email não encontrado ou senha incorreta."
    } else {
        "CPF não encontrado ou senha incorreta."
    };

    let db_user = sqlx::query_as::<_, DbUser>(
        "SELECT id, email, cpf, password_hash, role, created_at FROM users WHERE email = ?",
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::unauthorized(not_found_message))?;

    let password_ok = verify_password(&payload.password, &db_user.password_hash)?;
    if !password_ok {
        return Err(AppError::unauthorized("Senha incorreta. Tente novamente."));
    }

    let token = state.jwt.encode(db_user.id)?;
    let user: User = db_user.try_into()?;

    Ok(Json(AuthResponse { token, user }))
}

/// Resolve the current session: account plus the soft-deny flag. A
/// blocked regular user still authenticates; front ends use `blocked`
/// to route to the "access ended" view instead of the form.
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Sessão atual", body = SessionResponse))
)]
pub async fn me(State(state): State<AppState>, current: CurrentUser) -> AppResult<Json<SessionResponse>> {
    let blocked = match current.role {
        Role::Admin => false,
        Role::User => state.gate.is_blocked(&current.cpf).await?,
    };

    let db_user = fetch_user_by_id(&state.pool, current.user_id).await?;
    let user: User = db_user.try_into()?;

    Ok(Json(SessionResponse { user, blocked }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout confirmado"))
)]
pub async fn logout(_current: CurrentUser) -> AppResult<Json<MessageResponse>> {
    Ok(Json(MessageResponse {
        message: "Logout realizado".to_string(),
    }))
}

/// Interactive admin bootstrap. Idempotent: when the admin account
/// already exists this behaves as a sign-in (plus a profile merge that
/// repairs role and sentinel CPF if they drifted); otherwise it creates
/// the account.
#[utoipa::path(
    post,
    path = "/api/admin-setup",
    tag = "Auth",
    request_body = AdminSetupRequest,
    responses(
        (status = 200, description = "Administrador autenticado", body = AuthResponse),
        (status = 403, description = "Email não autorizado como administrador")
    )
)]
pub async fn admin_setup(
    State(state): State<AppState>,
    Json(payload): Json<AdminSetupRequest>,
) -> AppResult<Json<AuthResponse>> {
    if payload.email != cpf::ADMIN_EMAIL {
        return Err(AppError::not_authorized(
            "Este email não é autorizado como administrador.",
        ));
    }

    let existing = sqlx::query_as::<_, DbUser>(
        "SELECT id, email, cpf, password_hash, role, created_at FROM users WHERE email = ?",
    )
    .bind(cpf::ADMIN_EMAIL)
    .fetch_optional(&state.pool)
    .await?;

    let db_user = match existing {
        Some(db_user) => {
            let password_ok = verify_password(&payload.password, &db_user.password_hash)?;
            if !password_ok {
                return Err(AppError::unauthorized("Senha incorreta. Tente novamente."));
            }

            sqlx::query("UPDATE users SET role = ?, cpf = ? WHERE id = ?")
                .bind(Role::Admin.as_str())
                .bind(cpf::ADMIN_CPF)
                .bind(db_user.id)
                .execute(&state.pool)
                .await?;

            fetch_user_by_id(&state.pool, db_user.id).await?
        }
        None => {
            let user_id = create_admin_account(&state.pool, &payload.password).await?;
            let db_user = fetch_user_by_id(&state.pool, user_id).await?;

            let user: User = db_user.clone().try_into()?;
            log_activity(&state.events, "admin_provisioned", Some(user_id), &user);
            db_user
        }
    };

    let token = state.jwt.encode(db_user.id)?;
    let user: User = db_user.try_into()?;

    Ok(Json(AuthResponse { token, user }))
}

/// Insert the reserved admin account. Shared with the out-of-band
/// bootstrap endpoint and the CLI.
pub async fn create_admin_account(pool: &SqlitePool, password: &str) -> AppResult<Uuid> {
    let password_hash = hash_password(password)?;
    let user_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, email, cpf, password_hash, role, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(cpf::ADMIN_EMAIL)
    .bind(cpf::ADMIN_CPF)
    .bind(password_hash)
    .bind(Role::Admin.as_str())
    .bind(utc_now())
    .execute(pool)
    .await?;

    Ok(user_id)
}

async fn ensure_email_available(pool: &SqlitePool, email: &str) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ?")
        .bind(email)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("Este email já está em uso."));
    }

    Ok(())
}

pub async fn fetch_user_by_id(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    sqlx::query_as::<_, DbUser>(
        "SELECT id, email, cpf, password_hash, role, created_at FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("conta não encontrada"))
}
