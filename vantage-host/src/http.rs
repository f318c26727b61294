//! HTTP surface: static client assets plus the signaling endpoints.
//!
//! Served on loopback + LAN (default port 6060) with permissive CORS.
//! `POST /api/offer` runs the offer → answer exchange against the
//! transport server; `GET /api/turn` hands the browser its ICE server
//! configuration when `turn_config.json` is present.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use vantage_core::{TransportServer, TurnConfig};

/// Script names the client is allowed to fetch under `/js/`.
const CLIENT_SCRIPTS: &[&str] = &[
    "clipboard", "input", "media", "network", "renderer", "state", "ui",
];

pub struct HttpState {
    pub transport: Arc<TransportServer>,
    pub turn: Option<TurnConfig>,
    /// Directory holding `index.html`, `styles.css` and `js/`.
    pub asset_dir: PathBuf,
}

pub fn router(state: Arc<HttpState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/styles.css", get(styles))
        .route("/js/:name", get(script))
        .route("/api/offer", post(offer))
        .route("/api/turn", get(turn))
        .with_state(state)
        .layer(cors)
}

fn asset(state: &HttpState, name: &str) -> Option<String> {
    std::fs::read_to_string(state.asset_dir.join(name)).ok()
}

async fn index(State(state): State<Arc<HttpState>>) -> Response {
    let body = asset(&state, "index.html")
        .unwrap_or_else(|| "<h1>index.html not found</h1>".to_string());
    ([(header::CONTENT_TYPE, "text/html")], body).into_response()
}

async fn styles(State(state): State<Arc<HttpState>>) -> Response {
    let body = asset(&state, "styles.css").unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/css")], body).into_response()
}

async fn script(State(state): State<Arc<HttpState>>, Path(name): Path<String>) -> Response {
    let stem = name.strip_suffix(".js").unwrap_or(name.as_str());
    if !CLIENT_SCRIPTS.contains(&stem) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let body = asset(&state, &format!("js/{stem}.js")).unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/javascript")], body).into_response()
}

#[derive(Debug, Deserialize)]
struct OfferBody {
    sdp: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Offer → answer exchange. 400 on parse failure, 500 when no local
/// description materializes within the gathering budget.
async fn offer(State(state): State<Arc<HttpState>>, body: String) -> Response {
    let Ok(body) = serde_json::from_str::<OfferBody>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if body.kind != "offer" || body.sdp.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    if let Err(e) = state.transport.set_remote_offer(&body.sdp).await {
        error!("offer rejected: {e}");
        return StatusCode::BAD_REQUEST.into_response();
    }
    match state.transport.local_description().await {
        Ok(sdp) if !sdp.is_empty() => {
            // The browser expects the host to take the active DTLS
            // role.
            let sdp = sdp.replacen("a=setup:actpass", "a=setup:active", 1);
            info!("answer returned ({} bytes)", sdp.len());
            Json(json!({ "sdp": sdp, "type": "answer" })).into_response()
        }
        Ok(_) | Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn turn(State(state): State<Arc<HttpState>>) -> Response {
    match &state.turn {
        Some(config) => Json(config.to_client_json()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no TURN configuration" })),
        )
            .into_response(),
    }
}
