//! HTTP surface: `/v1/responses`, `/v1/chat/completions`, `/v1/models`,
//! `/health`, with bearer auth, per-tenant rate limiting, and error mapping.

pub mod auth;
pub mod chat;
pub mod error;
pub mod responses;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use rants_llm::ModelBackend;
use serde_json::{json, Value};

use crate::config::GatewayConfig;
use crate::orchestrator::Orchestrator;

pub use auth::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub limiter: Arc<RateLimiter>,
    pub generator: Arc<dyn ModelBackend>,
    pub tool_compiler: Arc<dyn ModelBackend>,
    pub vision: Option<Arc<dyn ModelBackend>>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/responses", post(responses::create_response))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .with_state(state)
}

/// The gateway exposes exactly one virtual model.
async fn list_models(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [{
            "id": state.config.rlm.rants_one.name,
            "object": "model",
            "owned_by": "rants",
        }],
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let (generator, tool_compiler) =
        tokio::join!(state.generator.healthy(), state.tool_compiler.healthy());
    let mut backends = json!({
        "generator": generator,
        "tool_compiler": tool_compiler,
    });
    if let Some(vision) = &state.vision {
        backends["vision"] = json!(vision.healthy().await);
    }
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backends": backends,
    }))
}
