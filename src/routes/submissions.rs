use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use sqlx::SqlitePool;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::app::AppState;
use crate::cpf;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::export::{dossier_filename, render_dossier};
use crate::jwt::{AdminUser, CurrentUser};
use crate::models::submission::{
    DbSubmission, Status, StatusUpdateRequest, Submission, SubmissionData,
};
use crate::models::user::Role;
use crate::utils::utc_now;

const SUBMISSION_COLUMNS: &str = "id, user_id, cpf, dados, status, created_at";

/// Submit the intake form. One call per identity in intended usage; the
/// store does not enforce uniqueness and duplicates are accepted.
#[utoipa::path(
    post,
    path = "/submissions",
    tag = "Submissions",
    responses(
        (status = 201, description = "Formulário enviado", body = Submission),
        (status = 403, description = "Acesso encerrado ou papel inválido")
    )
)]
pub async fn create_submission(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(raw): Json<serde_json::Value>,
) -> AppResult<(StatusCode, Json<Submission>)> {
    if current.role != Role::User {
        return Err(AppError::forbidden("apenas clientes enviam formulários"));
    }

    if state.gate.is_blocked(&current.cpf).await? {
        return Err(AppError::blocked(
            "Seu processo já foi finalizado. Se precisar de mais informações, entre em contato com nossa equipe.",
        ));
    }

    // Deserialize through serde_path_to_error so a bad payload names the
    // offending field instead of a bare type mismatch.
    let dados: SubmissionData = serde_path_to_error::deserialize(&raw)
        .map_err(|err| AppError::bad_request(format!("campo inválido `{}`: {}", err.path(), err.inner())))?;
    let dados = dados.normalized();

    let dados_json = serde_json::to_string(&dados)
        .map_err(|err| AppError::internal(format!("failed to serialize payload: {err}")))?;

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO submissions (id, user_id, cpf, dados, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(current.user_id)
    .bind(&current.cpf)
    .bind(&dados_json)
    .bind(Status::Pendente.as_str())
    .bind(now)
    .execute(&state.pool)
    .await?;

    let submission = fetch_submission(&state.pool, id).await?;
    log_activity(&state.events, "created", Some(current.user_id), &submission);

    Ok((StatusCode::CREATED, Json(submission)))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListQuery {
    /// Substring match on CPF digits, full name or contact email.
    pub search: Option<String>,
    /// Filter by status ("pendente" | "processado").
    pub status: Option<String>,
}

/// All submissions, newest first. Search and status predicates are
/// evaluated by the database, not by scanning the full set in the
/// client.
#[utoipa::path(
    get,
    path = "/submissions",
    tag = "Submissions",
    params(ListQuery),
    responses((status = 200, description = "Formulários recebidos", body = [Submission]))
)]
pub async fn list_submissions(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<Submission>>> {
    let status = match query.status.as_deref() {
        None | Some("todos") => None,
        Some(raw) => Some(raw.parse::<Status>().map_err(AppError::bad_request)?),
    };
    let search = query.search.unwrap_or_default();

    let mut sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE 1=1");
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if !search.is_empty() {
        sql.push_str(
            " AND ((? != '' AND cpf LIKE ?) \
             OR lower(coalesce(json_extract(dados, '$.fullName'), '')) LIKE ? \
             OR lower(coalesce(json_extract(dados, '$.email'), '')) LIKE ?)",
        );
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut q = sqlx::query_as::<_, DbSubmission>(&sql);
    if let Some(status) = status {
        q = q.bind(status.as_str().to_string());
    }
    if !search.is_empty() {
        let digits = cpf::normalize(&search);
        let cpf_pattern = if digits.is_empty() {
            String::new()
        } else {
            format!("%{digits}%")
        };
        let text_pattern = format!("%{}%", search.to_lowercase());
        q = q
            .bind(cpf_pattern.clone())
            .bind(cpf_pattern)
            .bind(text_pattern.clone())
            .bind(text_pattern);
    }

    let rows = q.fetch_all(&state.pool).await?;
    let submissions: Vec<Submission> = rows
        .into_iter()
        .map(Submission::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(submissions))
}

#[utoipa::path(
    get,
    path = "/submissions/{id}",
    tag = "Submissions",
    params(("id" = Uuid, Path, description = "Submission id")),
    responses((status = 200, description = "Detalhe do formulário", body = Submission))
)]
pub async fn get_submission(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Submission>> {
    let submission = fetch_submission(&state.pool, id).await?;
    Ok(Json(submission))
}

/// Review transition. Moving to "processado" blocks the owning identity;
/// back to "pendente" unblocks it. Both writes commit in a single
/// transaction so the status and the gate flag cannot diverge.
#[utoipa::path(
    put,
    path = "/submissions/{id}/status",
    tag = "Submissions",
    params(("id" = Uuid, Path, description = "Submission id")),
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, description = "Status atualizado", body = Submission),
        (status = 404, description = "Formulário não encontrado")
    )
)]
pub async fn set_submission_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusUpdateRequest>,
) -> AppResult<Json<Submission>> {
    let submission = fetch_submission(&state.pool, id).await?;
    let blocked = payload.status == Status::Processado;

    let mut tx = state.pool.begin().await?;

    sqlx::query("UPDATE submissions SET status = ? WHERE id = ?")
        .bind(payload.status.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let gate_rows = sqlx::query("UPDATE authorized_cpfs SET blocked = ? WHERE cpf = ?")
        .bind(blocked)
        .bind(&submission.cpf)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    tx.commit().await?;

    if gate_rows == 0 {
        // identity was deleted out from under the submission; the status
        // change stands and there is no flag left to toggle
        tracing::warn!(cpf = %submission.cpf, "status change without allow-list entry");
    }

    let submission = fetch_submission(&state.pool, id).await?;
    log_activity(&state.events, "status_changed", Some(admin.user_id), &submission);

    Ok(Json(submission))
}

/// Download the submission as the printable text dossier.
#[utoipa::path(
    get,
    path = "/submissions/{id}/export",
    tag = "Submissions",
    params(("id" = Uuid, Path, description = "Submission id")),
    responses((status = 200, description = "Dossiê em texto", body = String, content_type = "text/plain"))
)]
pub async fn export_submission(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let submission = fetch_submission(&state.pool, id).await?;

    let content = render_dossier(&submission, utc_now());
    let disposition = format!("attachment; filename=\"{}\"", dossier_filename(&submission));

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response())
}

pub async fn fetch_submission(pool: &SqlitePool, id: Uuid) -> AppResult<Submission> {
    let row: Option<DbSubmission> = sqlx::query_as(&format!(
        "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Submission::try_from)
        .transpose()?
        .ok_or_else(|| AppError::not_found("formulário não encontrado"))
}
