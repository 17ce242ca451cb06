use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::events::{self, EventBus};
use crate::gate::{AccessGate, SqliteGate};
use crate::jwt::JwtConfig;
use crate::routes::{admin, auth, health, identities, submissions};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub gate: Arc<dyn AccessGate>,
    pub events: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, events: EventBus) -> Self {
        let gate = Arc::new(SqliteGate::new(pool.clone()));
        Self {
            pool,
            jwt: Arc::new(jwt),
            gate,
            events,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;

    let (events, rx) = events::init_event_bus();
    tokio::spawn(events::start_activity_listener(rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, events);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let identity_routes = Router::new()
        .route("/", get(identities::list_identities))
        .route("/", post(identities::create_identity))
        .route("/:cpf", delete(identities::delete_identity))
        .route("/:cpf/blocked", put(identities::set_identity_blocked));

    let submission_routes = Router::new()
        .route("/", get(submissions::list_submissions))
        .route("/", post(submissions::create_submission))
        .route("/:id", get(submissions::get_submission))
        .route("/:id/status", put(submissions::set_submission_status))
        .route("/:id/export", get(submissions::export_submission));

    let api_routes = Router::new()
        .route("/health", get(health::health))
        .route("/init-admin", get(admin::init_admin))
        .route("/admin-setup", post(auth::admin_setup))
        .route("/stats", get(admin::stats));

    let router = Router::new()
        .nest("/auth", auth_routes)
        .nest("/identities", identity_routes)
        .nest("/submissions", submission_routes)
        .nest("/api", api_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
