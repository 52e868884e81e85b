//! Composition root: config, store, backends, registry, router, bind.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rants_gateway::http::{build_router, AppState, RateLimiter};
use rants_gateway::{default_registry, GatewayConfig, Orchestrator, SqliteStore};
use rants_llm::openai::{OpenAiBackend, RetryPolicy};
use rants_llm::ModelBackend;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "rants-server")]
#[command(about = "OpenAI-compatible gateway running a recursive language model loop")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: std::path::PathBuf,
    /// Override the configured bind host.
    #[arg(long)]
    host: Option<String>,
    /// Override the configured bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("fatal: {error:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = GatewayConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let config = Arc::new(config);

    std::fs::create_dir_all(&config.limits.workspace_root).with_context(|| {
        format!(
            "creating workspace root {}",
            config.limits.workspace_root.display()
        )
    })?;
    let store = SqliteStore::open(&config.state.sqlite_path).context("opening transcript store")?;

    let policy = RetryPolicy {
        request_timeout: Duration::from_secs_f64(config.resilience.request_timeout_seconds),
        max_retries: config.resilience.max_retries,
        backoff: Duration::from_secs_f64(config.resilience.backoff_seconds),
    };
    let generator: Arc<dyn ModelBackend> = Arc::new(OpenAiBackend::new(
        "generator",
        config.models.generator.base_url.clone(),
        config.models.generator.api_key.clone(),
        policy,
    ));
    let tool_compiler: Arc<dyn ModelBackend> = Arc::new(OpenAiBackend::new(
        "tool_compiler",
        config.models.tool_compiler.base_url.clone(),
        config.models.tool_compiler.api_key.clone(),
        policy,
    ));
    let vision: Option<Arc<dyn ModelBackend>> = config.models.vision.as_ref().map(|endpoint| {
        Arc::new(OpenAiBackend::new(
            "vision",
            endpoint.base_url.clone(),
            endpoint.api_key.clone(),
            policy,
        )) as Arc<dyn ModelBackend>
    });

    let registry = Arc::new(default_registry());
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        store,
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
        vision,
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        %addr,
        model = %config.rlm.rants_one.name,
        "rants gateway listening"
    );

    axum::serve(listener, build_router(state))
        .await
        .context("server error")?;
    Ok(())
}
