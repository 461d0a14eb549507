//! Language-model and retrieval boundary.
//!
//! The core never talks to the network directly; it goes through the
//! [`CompletionClient`] and [`Retriever`] traits so tests can substitute
//! scripted implementations.

pub mod client;
pub mod gemini;
pub mod prompts;
pub mod retriever;

pub use client::{CompletionClient, CompletionError, TokenStream};
pub use gemini::GeminiClient;
pub use retriever::{NullRetriever, RetrievedChunk, Retriever};
