//! The `CompletionClient` trait -- the adapter interface for hosted
//! language models.
//!
//! The trait is object-safe so it can be stored as `Arc<dyn
//! CompletionClient>` in the planner service.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

/// Errors from a completion request.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("unexpected response shape: {0}")]
    Malformed(String),

    #[error("no API key configured")]
    MissingApiKey,
}

/// An ordered stream of text chunks from a streaming completion.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// Adapter interface for a hosted language model.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run a single completion to finish; returns the full response text.
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;

    /// Start a streaming completion. Chunks arrive in order; the stream
    /// ends after the final chunk or the first error.
    async fn stream(&self, prompt: &str) -> Result<TokenStream, CompletionError>;
}

// Compile-time assertion: CompletionClient must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn CompletionClient) {}
};
