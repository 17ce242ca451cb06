use anyhow::Context;
use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::tempdir;
use tower::util::ServiceExt;
use uuid::Uuid;

use passaporte::create_app;

async fn setup() -> Result<(Router, SqlitePool, tempfile::TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("auth_edge.db");
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
    let app = create_app(pool.clone()).await?;

    Ok((app, pool, dir))
}

async fn post_json(app: &Router, uri: &str, body: Value) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?;

    let resp: Response = app.clone().oneshot(request).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, value))
}

/// Seed an allow-list row the way a legacy import would: entry present,
/// no account yet.
async fn seed_identity(pool: &SqlitePool, cpf: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO authorized_cpfs (cpf, added_by, added_at, has_account, blocked) VALUES (?, ?, ?, 0, 0)",
    )
    .bind(cpf)
    .bind(Uuid::new_v4())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

#[tokio::test]
async fn registration_requires_allow_list_entry() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    // valid checksum, but nobody authorized this CPF
    let (status, body) = post_json(
        &app,
        "/auth/register",
        json!({"cpf": "529.982.247-25", "email": "maria@exemplo.com", "password": "segredo1"}),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("not_authorized"));

    // the failed attempt must leave no account behind
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 0);

    Ok(())
}

#[tokio::test]
async fn registration_validates_checksum_and_password() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    seed_identity(&pool, "52998224725").await?;
    // 11 digits, wrong check digit: acceptable to the admin path, never here
    seed_identity(&pool, "52998224726").await?;

    let (status, _) = post_json(
        &app,
        "/auth/register",
        json!({"cpf": "529.982.247-26", "email": "x@exemplo.com", "password": "segredo1"}),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "checksum must be enforced");

    let (status, _) = post_json(
        &app,
        "/auth/register",
        json!({"cpf": "529.982.247-25", "email": "maria@exemplo.com", "password": "abc"}),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "short password must be rejected");

    // valid registration marks the allow-list row
    let (status, body) = post_json(
        &app,
        "/auth/register",
        json!({"cpf": "529.982.247-25", "email": "maria@exemplo.com", "password": "segredo1"}),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    assert_eq!(body["user"]["cpf"], json!("52998224725"));

    let (has_account, email): (bool, Option<String>) = sqlx::query_as(
        "SELECT has_account, email FROM authorized_cpfs WHERE cpf = '52998224725'",
    )
    .fetch_one(&pool)
    .await?;
    assert!(has_account);
    assert_eq!(email.as_deref(), Some("maria@exemplo.com"));

    // duplicate email is a conflict
    let (status, _) = post_json(
        &app,
        "/auth/register",
        json!({"cpf": "529.982.247-25", "email": "maria@exemplo.com", "password": "segredo1"}),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn login_edge_cases() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    seed_identity(&pool, "52998224725").await?;

    post_json(
        &app,
        "/auth/register",
        json!({"cpf": "52998224725", "email": "maria@exemplo.com", "password": "segredo1"}),
    )
    .await?;

    // wrong password
    let (status, _) = post_json(
        &app,
        "/auth/login",
        json!({"login": "maria@exemplo.com", "password": "errada123"}),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // CPF input must have 11 digits before a lookup is even attempted
    let (status, body) = post_json(
        &app,
        "/auth/login",
        json!({"login": "123.456", "password": "segredo1"}),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], json!("bad request: Digite um CPF válido com 11 dígitos."));

    // unknown CPF: credential error, not a 404
    let (status, _) = post_json(
        &app,
        "/auth/login",
        json!({"login": "111.444.777-35", "password": "segredo1"}),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // self-registered clients log in with their chosen email
    let (status, body) = post_json(
        &app,
        "/auth/login",
        json!({"login": "maria@exemplo.com", "password": "segredo1"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "email login failed: {body}");

    Ok(())
}

#[tokio::test]
async fn protected_routes_reject_anonymous_and_non_admin() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    seed_identity(&pool, "52998224725").await?;

    // no token at all
    let request = Request::builder()
        .method("GET")
        .uri("/submissions")
        .body(Body::empty())?;
    let resp: Response = app.clone().oneshot(request).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // a regular user is not an admin
    let (_, registered) = post_json(
        &app,
        "/auth/register",
        json!({"cpf": "52998224725", "email": "maria@exemplo.com", "password": "segredo1"}),
    )
    .await?;
    let token = registered["token"].as_str().context("missing token")?;

    for uri in ["/identities", "/submissions", "/api/stats"] {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())?;
        let resp: Response = app.clone().oneshot(request).await?;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{uri} must be admin-only");
    }

    Ok(())
}

#[tokio::test]
async fn admin_setup_is_restricted_and_idempotent() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    // only the fixed admin email is accepted
    let (status, _) = post_json(
        &app,
        "/api/admin-setup",
        json!({"email": "outro@exemplo.com", "password": "Admin@123"}),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, first) = post_json(
        &app,
        "/api/admin-setup",
        json!({"email": "admin@passaporte.com", "password": "Admin@123"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "admin setup failed: {first}");
    let uid = first["user"]["id"].as_str().context("missing id")?.to_string();
    assert_eq!(first["user"]["role"], json!("admin"));
    assert_eq!(first["user"]["cpf"], json!("00000000000"));

    // second call signs in instead of creating
    let (status, second) = post_json(
        &app,
        "/api/admin-setup",
        json!({"email": "admin@passaporte.com", "password": "Admin@123"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["user"]["id"].as_str(), Some(uid.as_str()));

    // wrong password on the existing account is a credential failure
    let (status, _) = post_json(
        &app,
        "/api/admin-setup",
        json!({"email": "admin@passaporte.com", "password": "errada123"}),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn init_admin_requires_bootstrap_password() -> Result<()> {
    // run in a dedicated process-wide env window: remove the var first
    std::env::remove_var("ADMIN_BOOTSTRAP_PASSWORD");
    let (app, _pool, _dir) = setup().await?;

    let request = Request::builder()
        .method("GET")
        .uri("/api/init-admin")
        .body(Body::empty())?;
    let resp: Response = app.clone().oneshot(request).await?;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(value["success"], json!(false));
    assert!(value["error"].as_str().unwrap().contains("ADMIN_BOOTSTRAP_PASSWORD"));

    Ok(())
}
