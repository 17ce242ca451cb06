use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::json;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::auth::register,
		routes::auth::login,
		routes::auth::me,
		routes::auth::logout,
		routes::auth::admin_setup,
		routes::admin::init_admin,
		routes::admin::stats,
		routes::health::health,
		routes::identities::list_identities,
		routes::identities::create_identity,
		routes::identities::delete_identity,
		routes::identities::set_identity_blocked,
		routes::submissions::create_submission,
		routes::submissions::list_submissions,
		routes::submissions::get_submission,
		routes::submissions::set_submission_status,
		routes::submissions::export_submission
	),
	components(
		schemas(
			models::user::User,
			models::user::Role,
			models::user::AuthResponse,
			models::user::SessionResponse,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::user::AdminSetupRequest,
			models::identity::Identity,
			models::identity::IdentityCreateRequest,
			models::identity::ProvisionResponse,
			models::identity::BlockRequest,
			models::submission::Submission,
			models::submission::SubmissionData,
			models::submission::Status,
			models::submission::StatusUpdateRequest,
			routes::admin::InitAdminResponse,
			routes::admin::StatsResponse,
			routes::health::HealthResponse
		)
	),
	tags(
		(name = "Auth", description = "Autenticação e sessão"),
		(name = "Identities", description = "CPFs autorizados (allow-list)"),
		(name = "Submissions", description = "Formulários de passaporte"),
		(name = "Admin", description = "Bootstrap e painel"),
		(name = "Health", description = "Diagnóstico")
	)
)]
pub struct ApiDoc;

/// Generate the OpenAPI document and splice in the bearer scheme and a
/// default server entry; the derive alone does not emit either.
pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	if let Some(components) = doc.get_mut("components").and_then(|c| c.as_object_mut()) {
		components.insert(
			"securitySchemes".to_string(),
			json!({
				"bearerAuth": {
					"type": "http",
					"scheme": "bearer",
					"bearerFormat": "JWT"
				}
			}),
		);
	}

	// global requirement; register/login/init-admin simply ignore the header
	if doc.get("security").is_none() {
		doc["security"] = json!([{ "bearerAuth": [] }]);
	}

	if doc.get("servers").is_none() {
		doc["servers"] = json!([{ "url": format!("http://localhost:{}", port) }]);
	}

	Ok(serde_json::from_value(doc)?)
}

/// Serve the pre-built document at `/api-docs/openapi.json` and mount
/// Swagger UI against it, so clients always see the spliced JSON rather
/// than a re-serialization.
pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = Router::new().route(
		"/api-docs/openapi.json",
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		}),
	);

	Ok(json_route.merge(SwaggerUi::new("/docs").config(swagger_config)))
}
