use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::BackendError;
use crate::types::{CompletionRequest, CompletionResult};

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Uniform port over upstream OpenAI-compatible endpoints.
///
/// The gateway core never constructs HTTP requests itself; it hands a
/// [`CompletionRequest`] to one of these and gets text back. Tests
/// substitute scripted implementations at this seam.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult, BackendError>;

    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, BackendError>;

    /// Cheap reachability probe for the health endpoint.
    async fn healthy(&self) -> bool {
        true
    }
}
