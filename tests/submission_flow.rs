use anyhow::Context;
use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::tempdir;
use tower::util::ServiceExt;

use passaporte::create_app;

async fn setup_with_admin() -> Result<(Router, SqlitePool, String, tempfile::TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("submissions.db");
    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    std::env::set_var("ADMIN_BOOTSTRAP_PASSWORD", "Admin@123");
    let app = create_app(pool.clone()).await?;

    send(&app, "GET", "/api/init-admin", None, None).await?;
    let (_, login) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"login": "admin@passaporte.com", "password": "Admin@123"})),
    )
    .await?;
    let token = login["token"].as_str().context("missing token")?.to_string();

    Ok((app, pool, token, dir))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp: Response = app.clone().oneshot(request).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok((status, value))
}

/// Provision a client and return their token.
async fn provision_client(app: &Router, admin_token: &str, cpf: &str) -> Result<String> {
    let (status, body) = send(
        app,
        "POST",
        "/identities",
        Some(admin_token),
        Some(json!({ "cpf": cpf })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "provision failed: {body}");

    let (status, login) = send(
        app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"login": cpf, "password": "123456"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    Ok(login["token"].as_str().context("missing token")?.to_string())
}

async fn submit(app: &Router, token: &str, payload: Value) -> Result<String> {
    let (status, body) = send(app, "POST", "/submissions", Some(token), Some(payload)).await?;
    assert_eq!(status, StatusCode::CREATED, "submit failed: {body}");
    Ok(body["id"].as_str().context("missing id")?.to_string())
}

#[tokio::test]
async fn blocking_is_idempotent_across_status_calls() -> Result<()> {
    let (app, pool, admin_token, _dir) = setup_with_admin().await?;
    let client_token = provision_client(&app, &admin_token, "52998224725").await?;

    let id = submit(&app, &client_token, json!({"fullName": "MARIA"})).await?;

    let blocked = |pool: &SqlitePool| {
        let pool = pool.clone();
        async move {
            let value: bool =
                sqlx::query_scalar("SELECT blocked FROM authorized_cpfs WHERE cpf = '52998224725'")
                    .fetch_one(&pool)
                    .await
                    .unwrap();
            value
        }
    };

    // processado twice: still blocked
    for _ in 0..2 {
        let (status, _) = send(
            &app,
            "PUT",
            &format!("/submissions/{}/status", id),
            Some(&admin_token),
            Some(json!({"status": "processado"})),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert!(blocked(&pool).await);
    }

    // alternating tracks the most recent call
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/submissions/{}/status", id),
        Some(&admin_token),
        Some(json!({"status": "pendente"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(!blocked(&pool).await);

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/submissions/{}/status", id),
        Some(&admin_token),
        Some(json!({"status": "processado"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(blocked(&pool).await);

    // an unknown status value is rejected before any write
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/submissions/{}/status", id),
        Some(&admin_token),
        Some(json!({"status": "aprovado"})),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

#[tokio::test]
async fn list_filters_by_search_and_status() -> Result<()> {
    let (app, _pool, admin_token, _dir) = setup_with_admin().await?;

    let maria = provision_client(&app, &admin_token, "52998224725").await?;
    let jose = provision_client(&app, &admin_token, "11144477735").await?;

    submit(
        &app,
        &maria,
        json!({"fullName": "MARIA DA SILVA", "email": "maria@exemplo.com"}),
    )
    .await?;
    let jose_submission = submit(
        &app,
        &jose,
        json!({"fullName": "JOSÉ SOUZA", "email": "jose@exemplo.com"}),
    )
    .await?;

    // search by name fragment, case-insensitive
    let (_, by_name) = send(&app, "GET", "/submissions?search=maria", Some(&admin_token), None).await?;
    let by_name = by_name.as_array().unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0]["dados"]["fullName"], json!("MARIA DA SILVA"));

    // search by masked CPF digits
    let (_, by_cpf) = send(
        &app,
        "GET",
        "/submissions?search=111.444",
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(by_cpf.as_array().unwrap().len(), 1);
    assert_eq!(by_cpf.as_array().unwrap()[0]["cpf"], json!("11144477735"));

    // status filter
    send(
        &app,
        "PUT",
        &format!("/submissions/{}/status", jose_submission),
        Some(&admin_token),
        Some(json!({"status": "processado"})),
    )
    .await?;

    let (_, pending) = send(
        &app,
        "GET",
        "/submissions?status=pendente",
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending.as_array().unwrap()[0]["cpf"], json!("52998224725"));

    let (_, processed) = send(
        &app,
        "GET",
        "/submissions?status=processado",
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(processed.as_array().unwrap().len(), 1);

    // "todos" means no status filter
    let (_, all) = send(
        &app,
        "GET",
        "/submissions?status=todos",
        Some(&admin_token),
        None,
    )
    .await?;
    assert_eq!(all.as_array().unwrap().len(), 2);

    Ok(())
}

#[tokio::test]
async fn duplicate_submissions_are_accepted() -> Result<()> {
    let (app, pool, admin_token, _dir) = setup_with_admin().await?;
    let client = provision_client(&app, &admin_token, "52998224725").await?;

    submit(&app, &client, json!({"fullName": "MARIA"})).await?;
    submit(&app, &client, json!({"fullName": "MARIA"})).await?;

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM submissions WHERE cpf = '52998224725'")
            .fetch_one(&pool)
            .await?;
    assert_eq!(count, 2);

    Ok(())
}

#[tokio::test]
async fn admins_do_not_submit_forms() -> Result<()> {
    let (app, _pool, admin_token, _dir) = setup_with_admin().await?;

    let (status, _) = send(
        &app,
        "POST",
        "/submissions",
        Some(&admin_token),
        Some(json!({"fullName": "ADMIN"})),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn bad_payload_names_the_field() -> Result<()> {
    let (app, _pool, admin_token, _dir) = setup_with_admin().await?;
    let client = provision_client(&app, &admin_token, "52998224725").await?;

    let (status, body) = send(
        &app,
        "POST",
        "/submissions",
        Some(&client),
        Some(json!({"fullName": 42})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["message"].as_str().unwrap().contains("fullName"),
        "error should name the offending field: {body}"
    );

    Ok(())
}

#[tokio::test]
async fn export_renders_the_dossier() -> Result<()> {
    let (app, _pool, admin_token, _dir) = setup_with_admin().await?;
    let client = provision_client(&app, &admin_token, "52998224725").await?;

    let id = submit(
        &app,
        &client,
        json!({
            "fullName": "MARIA DA SILVA",
            "motherName": "ANA DA SILVA",
            "birthDate": "1990-04-12",
            "gender": "F"
        }),
    )
    .await?;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/submissions/{}/export", id))
        .header("authorization", format!("Bearer {}", admin_token))
        .body(Body::empty())?;
    let resp: Response = app.clone().oneshot(request).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let disposition = resp
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains("PASSAPORTE_MARIA_DA_SILVA.txt"));

    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let text = String::from_utf8(bytes.to_vec())?;
    assert!(text.starts_with("FORMULÁRIO PARA EMISSÃO DE PASSAPORTE BRASILEIRO"));
    assert!(text.contains("CPF: 529.982.247-25"));
    assert!(text.contains("DATA DE NASCIMENTO: 12/04/1990"));

    Ok(())
}

#[tokio::test]
async fn stats_count_identities_and_forms() -> Result<()> {
    let (app, _pool, admin_token, _dir) = setup_with_admin().await?;

    let maria = provision_client(&app, &admin_token, "52998224725").await?;
    provision_client(&app, &admin_token, "11144477735").await?;

    let id = submit(&app, &maria, json!({"fullName": "MARIA"})).await?;
    submit(&app, &maria, json!({"fullName": "MARIA"})).await?;
    send(
        &app,
        "PUT",
        &format!("/submissions/{}/status", id),
        Some(&admin_token),
        Some(json!({"status": "processado"})),
    )
    .await?;

    let (status, stats) = send(&app, "GET", "/api/stats", Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_cpfs"], json!(2));
    assert_eq!(stats["active_accounts"], json!(2));
    assert_eq!(stats["total_forms"], json!(2));
    assert_eq!(stats["pending_forms"], json!(1));

    Ok(())
}
