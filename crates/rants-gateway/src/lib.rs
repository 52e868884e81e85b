//! RANTS gateway core.
//!
//! An OpenAI-compatible inference gateway running a recursive language
//! model loop: the generator emits user-facing text plus an optional
//! plain-English tool intent, a deterministic tool compiler turns the
//! intent into schema-validated calls, and the gateway executes the tools
//! itself inside a sandboxed workspace. Module boundaries:
//! transcripts and sessions, the SQLite store, the tool registry, the RLM
//! engine, the tool compiler, the orchestrator, the streaming assembler,
//! and the axum HTTP surface.

pub mod compiler;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod http;
pub mod orchestrator;
pub mod response;
pub mod store;
pub mod streaming;
pub mod tools;
pub mod transcript;

pub use config::GatewayConfig;
pub use errors::{ErrorKind, GatewayError};
pub use events::{ChannelEventSink, EventSink, NoopEventSink, SessionEvent};
pub use http::{build_router, AppState, RateLimiter};
pub use orchestrator::{Orchestrator, RunOptions, RunResult};
pub use response::{ChatCompletion, ResponseObject};
pub use store::{SqliteStore, StoredResponse};
pub use tools::{default_registry, ToolContext, ToolRegistry, ToolSchema};
pub use transcript::{
    CanonicalTranscript, RecursiveSession, SessionStatus, Step, ToolCallRecord, ToolResultRecord,
};
