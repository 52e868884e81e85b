//! Model backend port for the RANTS gateway.
//!
//! The gateway core talks to every upstream model (generator, tool compiler,
//! optional vision) through the [`ModelBackend`] trait: a normalized request
//! in, either a complete text result or a token stream out. The only
//! concrete transport is [`OpenAiBackend`], an OpenAI-compatible HTTP
//! adapter with timeouts, bounded retries, and SSE streaming.

pub mod backend;
pub mod errors;
pub mod openai;
pub mod sse;
pub mod types;

pub use backend::{ModelBackend, TokenStream};
pub use errors::BackendError;
pub use openai::OpenAiBackend;
pub use sse::SseParser;
pub use types::{CompletionRequest, CompletionResult, Message, Role, Usage};
