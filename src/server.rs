use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::app::App;
use crate::error::{SettingsError, WorkflowError};
use crate::settings::GenerationConfig;
use crate::{handlers, registry, schedule};

#[derive(Clone)]
pub struct AppState {
    pub app: Arc<App>,
    pub trigger_token: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/generate", post(generate_handler))
        .route("/api/schedule", get(schedule_handler))
        .route("/api/models", get(models_handler))
        .route("/api/config", get(get_config_handler).put(put_config_handler))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

/// `{"success": true, "data": ...}` envelope used by every endpoint.
fn reply(status: StatusCode, data: impl Serialize) -> Response {
    let success = status.is_success();
    (status, Json(json!({ "success": success, "data": data }))).into_response()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer realm=\"autoinsight\"")],
        Json(json!({ "success": false, "data": "Unauthorized" })),
    )
        .into_response()
}

fn internal_error(context: &str, error: anyhow::Error) -> Response {
    warn!(error = %format!("{error:#}"), "{context}");
    reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}

fn workflow_status(error: &WorkflowError) -> StatusCode {
    match error {
        WorkflowError::Configuration(_) => StatusCode::BAD_REQUEST,
        WorkflowError::Busy => StatusCode::CONFLICT,
        WorkflowError::Provider(_) | WorkflowError::Assembly(_) => StatusCode::BAD_GATEWAY,
        WorkflowError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn generate_handler(State(state): State<AppState>, Query(query): Query<TokenQuery>, headers: HeaderMap) -> Response {
    if !authenticate(&state.trigger_token, &query, &headers) {
        return unauthorized();
    }
    match handlers::run_manual(&state.app).await {
        Ok(outcome) => reply(
            StatusCode::OK,
            json!({
                "message": handlers::SUCCESS_MESSAGE,
                "post_id": outcome.post_id,
                "title": outcome.title,
                "featured_media": outcome.featured_media,
            }),
        ),
        Err(e) => reply(workflow_status(&e), e.to_string()),
    }
}

async fn schedule_handler(State(state): State<AppState>, Query(query): Query<TokenQuery>, headers: HeaderMap) -> Response {
    if !authenticate(&state.trigger_token, &query, &headers) {
        return unauthorized();
    }
    match schedule::next_run(state.app.cms.as_ref()).await {
        Ok(info) => {
            let description = schedule::describe(info.as_ref(), state.app.config.timezone());
            reply(StatusCode::OK, json!({ "next_run": info, "description": description }))
        }
        Err(e) => internal_error("failed to load schedule", e),
    }
}

async fn models_handler(State(state): State<AppState>, Query(query): Query<TokenQuery>, headers: HeaderMap) -> Response {
    if !authenticate(&state.trigger_token, &query, &headers) {
        return unauthorized();
    }
    match state.app.custom_endpoint_models().await {
        Ok(custom) => reply(
            StatusCode::OK,
            json!({ "catalog": registry::list_models(), "custom_endpoint": custom }),
        ),
        Err(e) => internal_error("failed to list models", e),
    }
}

async fn get_config_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    if !authenticate(&state.trigger_token, &query, &headers) {
        return unauthorized();
    }
    match state.app.generation_config().await {
        Ok(config) => reply(StatusCode::OK, config),
        Err(e) => internal_error("failed to load generation config", e),
    }
}

async fn put_config_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    Json(config): Json<GenerationConfig>,
) -> Response {
    if !authenticate(&state.trigger_token, &query, &headers) {
        return unauthorized();
    }
    match state.app.save_generation_config(config).await {
        Ok(saved) => reply(StatusCode::OK, saved),
        Err(e) if e.downcast_ref::<SettingsError>().is_some() => {
            reply(StatusCode::BAD_REQUEST, Value::String(format!("{e:#}")))
        }
        Err(e) => internal_error("failed to save generation config", e),
    }
}

fn authenticate(trigger_token: &str, query: &TokenQuery, headers: &HeaderMap) -> bool {
    // Method 1: query param
    if let Some(ref token) = query.token
        && constant_time_eq(token, trigger_token)
    {
        debug!("authenticated via query param");
        return true;
    }

    // Method 2: bearer token
    if let Some(auth_header) = headers.get(header::AUTHORIZATION)
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
        && constant_time_eq(token.trim(), trigger_token)
    {
        debug!("authenticated via bearer token");
        return true;
    }

    false
}

/// Constant-time string comparison to prevent timing attacks on token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
