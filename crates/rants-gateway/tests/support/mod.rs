//! Shared test doubles and harness for gateway conformance tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use futures::stream;
use http_body_util::BodyExt;
use rants_gateway::config::{
    AuthConfig, GatewayConfig, LimitsConfig, ModelEndpointConfig, ModelsConfig, RateLimitConfig,
    ResilienceConfig, RlmConfig, ServerConfig, StateConfig,
};
use rants_gateway::http::{build_router, AppState, RateLimiter};
use rants_gateway::{default_registry, Orchestrator, SqliteStore};
use rants_llm::{
    BackendError, CompletionRequest, CompletionResult, ModelBackend, TokenStream, Usage,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// Backend that replays a scripted sequence of completions; streaming
/// splits each body into small chunks to exercise delta reassembly.
pub struct ScriptedBackend {
    name: String,
    responses: Mutex<VecDeque<String>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: "scripted".to_string(),
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn next_response(&self) -> String {
        self.responses
            .lock()
            .expect("scripted backend mutex")
            .pop_front()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResult, BackendError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(CompletionResult {
            text: self.next_response(),
            usage: Usage::default(),
        })
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<TokenStream, BackendError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let text = self.next_response();
        let chunks: Vec<Result<String, BackendError>> = text
            .chars()
            .collect::<Vec<char>>()
            .chunks(5)
            .map(|chunk| Ok(chunk.iter().collect::<String>()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Backend that always fails with a given upstream status.
pub struct FailingBackend {
    pub status: u16,
}

#[async_trait]
impl ModelBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResult, BackendError> {
        Err(BackendError::UpstreamStatus {
            status: self.status,
            body: "upstream exploded".to_string(),
        })
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<TokenStream, BackendError> {
        Err(BackendError::UpstreamStatus {
            status: self.status,
            body: "upstream exploded".to_string(),
        })
    }
}

pub struct Harness {
    pub router: Router,
    pub store: SqliteStore,
    pub workspace: TempDir,
}

pub fn test_config(workspace: &TempDir) -> GatewayConfig {
    let endpoint = |model: &str| ModelEndpointConfig {
        provider: "openai".to_string(),
        base_url: "http://127.0.0.1:0/v1".to_string(),
        model: model.to_string(),
        api_key: None,
        capabilities: Vec::new(),
        parameters: HashMap::new(),
    };
    GatewayConfig {
        server: ServerConfig::default(),
        limits: LimitsConfig {
            workspace_root: workspace.path().to_path_buf(),
            ..LimitsConfig::default()
        },
        rlm: RlmConfig::default(),
        models: ModelsConfig {
            generator: endpoint("gen-model"),
            tool_compiler: endpoint("compiler-model"),
            vision: None,
        },
        state: StateConfig::default(),
        auth: AuthConfig::default(),
        rate_limits: RateLimitConfig::default(),
        resilience: ResilienceConfig::default(),
    }
}

pub fn harness_with_config(
    config: GatewayConfig,
    workspace: TempDir,
    generator: Arc<dyn ModelBackend>,
    tool_compiler: Arc<dyn ModelBackend>,
) -> Harness {
    let config = Arc::new(config);
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    let registry = Arc::new(default_registry());
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        store.clone(),
        registry,
        generator.clone(),
        tool_compiler.clone(),
    ));
    let state = AppState {
        config: config.clone(),
        orchestrator,
        limiter: Arc::new(RateLimiter::new(&config.rate_limits)),
        generator,
        tool_compiler,
        vision: None,
    };
    Harness {
        router: build_router(state),
        store,
        workspace,
    }
}

pub fn harness(
    generator: Arc<dyn ModelBackend>,
    tool_compiler: Arc<dyn ModelBackend>,
) -> Harness {
    let workspace = TempDir::new().expect("workspace tempdir");
    let config = test_config(&workspace);
    harness_with_config(config, workspace, generator, tool_compiler)
}

pub async fn post_json(router: &Router, uri: &str, body: Value) -> Response<Body> {
    router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request builds"),
        )
        .await
        .expect("router responds")
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is json")
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Parse an SSE body into its `data:` payloads.
pub fn sse_payloads(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|payload| payload.trim().to_string())
        .collect()
}
