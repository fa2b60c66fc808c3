//! API route definitions and the WebSocket handshake boundary.
//!
//! Everything that can be rejected with a plain HTTP status is checked here,
//! before the protocol upgrade: token verification, project context, and
//! template resolution. Failures after the upgrade are reported in-band on
//! the socket instead.

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::session::{SessionContext, run, terminal};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/terminal", get(terminal_handshake))
        .route("/ws/run", get(run_handshake))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct TerminalQuery {
    project: Option<String>,
    token: Option<String>,
}

#[derive(Deserialize)]
struct RunQuery {
    project: Option<String>,
    template: Option<String>,
    token: Option<String>,
}

/// GET /ws/terminal?project=..&token=..
async fn terminal_handshake(
    State(state): State<AppState>,
    Query(query): Query<TerminalQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let ctx = authorize(&state, &headers, query.token.as_deref(), query.project.as_deref(), None)?;
    Ok(ws.on_upgrade(move |socket| terminal::serve(state, ctx, socket)))
}

/// GET /ws/run?project=..&template=..&token=..
async fn run_handshake(
    State(state): State<AppState>,
    Query(query): Query<RunQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let template = query
        .template
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("missing template parameter"))?;
    // Reject unknown templates before the upgrade; the bridge re-resolves
    // the actual command.
    state.templates.resolve(template)?;

    let ctx = authorize(
        &state,
        &headers,
        query.token.as_deref(),
        query.project.as_deref(),
        Some(template),
    )?;
    Ok(ws.on_upgrade(move |socket| run::serve(state, ctx, socket)))
}

/// Shared pre-upgrade checks: token, identity, and project context.
fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
    project: Option<&str>,
    template: Option<&str>,
) -> ApiResult<SessionContext> {
    let project = project
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing project parameter"))?;

    let token = query_token
        .map(str::to_owned)
        .or_else(|| bearer_token(headers))
        .or_else(|| cookie_token(headers, "access_token"))
        .ok_or(crate::auth::AuthError::MissingToken)?;

    let identity = state.verifier.verify(&token)?;
    let workspace = state.resolver.resolve(&identity, project)?;

    Ok(SessionContext {
        identity,
        project: project.to_string(),
        workspace,
        template: template.map(str::to_owned),
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_owned)
}

fn cookie_token(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
