//! Planner service: orchestrates retrieval, language-model completions, the
//! grammar parser, and the plan store.
//!
//! A freshly parsed plan is admitted to the store only once the whole
//! response has been parsed successfully, immediately before the `plan`
//! event is emitted. Cancelling or failing a generation therefore never
//! leaves partial plan state behind.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ai::prompts::{self, WorkspaceFile};
use crate::ai::{CompletionClient, CompletionError, RetrievedChunk, Retriever};
use crate::events::ChatEvent;
use crate::plan::markdown::{self, ReviewSummary};
use crate::plan::model::Plan;
use crate::plan::parser::{self, ParsedPlan, PlanParseError};
use crate::store::{PlanStore, StoreError};

/// Keywords that mark a chat message as a plan request.
const PLAN_TRIGGER_KEYWORDS: &[&str] = &[
    "build",
    "create",
    "implement",
    "develop",
    "make",
    "add",
    "setup",
    "configure",
    "generate",
    "write",
    "code",
    "how to build",
    "help me create",
    "show me how to",
    "need to implement",
    "want to add",
    "can you build",
];

/// Number of chunks requested from the retriever per prompt.
const RETRIEVAL_K: usize = 5;

/// Errors from planner service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The plan has unreviewed steps; finalize/complete is refused.
    #[error("plan is not fully reviewed")]
    FinalizeNotReady,

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A chat request from the transport layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub files: Vec<WorkspaceFile>,
}

/// Result of completing a reviewed plan into an agent-ready document.
#[derive(Debug, Clone)]
pub struct CompletedPlan {
    pub agent_plan: String,
    pub metadata: ReviewSummary,
    /// Whether the artifact was served from the fingerprint cache.
    pub cached: bool,
}

/// Orchestrator over the store, the model, and the retriever.
#[derive(Clone)]
pub struct PlannerService {
    store: Arc<PlanStore>,
    llm: Arc<dyn CompletionClient>,
    retriever: Arc<dyn Retriever>,
}

impl PlannerService {
    pub fn new(
        store: Arc<PlanStore>,
        llm: Arc<dyn CompletionClient>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        Self {
            store,
            llm,
            retriever,
        }
    }

    pub fn store(&self) -> &PlanStore {
        &self.store
    }

    /// Keyword heuristic: does this message ask for a plan?
    pub fn is_plan_request(message: &str) -> bool {
        let lower = message.to_lowercase();
        PLAN_TRIGGER_KEYWORDS.iter().any(|kw| lower.contains(kw))
    }

    /// Retrieve prompt context, treating a failed retrieval as no context.
    async fn retrieve_context(&self, query: &str, session_id: &str) -> Vec<RetrievedChunk> {
        match self.retriever.retrieve(query, session_id, RETRIEVAL_K).await {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed; continuing without context");
                Vec::new()
            }
        }
    }

    /// Run the plan-generation completion and parse the result.
    ///
    /// Returns `Ok(None)` when the model produced no parseable phases
    /// (`EmptyPlan`); the caller falls back to plain chat behavior.
    async fn propose_plan(
        &self,
        query: &str,
        files: &[WorkspaceFile],
        session_id: &str,
    ) -> Result<Option<ParsedPlan>, ServiceError> {
        let retrieved = self.retrieve_context(query, session_id).await;
        let prompt = prompts::build_plan_prompt(query, files, &retrieved);
        let raw = self.llm.complete(&prompt).await?;

        match parser::parse_plan_text(&raw, query) {
            Ok(parsed) => {
                tracing::info!(
                    phases = parsed.phases.len(),
                    steps = parsed.total_steps(),
                    "parsed execution plan"
                );
                Ok(Some(parsed))
            }
            Err(PlanParseError::EmptyPlan) => {
                tracing::warn!("no phases parsed from model response");
                Ok(None)
            }
        }
    }

    /// Generate a plan and admit it into the store as the active plan.
    pub async fn generate_plan(
        &self,
        query: &str,
        files: &[WorkspaceFile],
        session_id: &str,
    ) -> Result<Option<Plan>, ServiceError> {
        let parsed = self.propose_plan(query, files, session_id).await?;
        Ok(parsed.map(|p| self.store.create_plan(p)))
    }

    /// Produce the ordered chat event stream for a request.
    ///
    /// Event order: `status`/`token` events, at most one `plan` (before the
    /// terminal event), then exactly one `done` or `error`. Cancelling the
    /// token terminates the stream with an `error` event; a plan that has
    /// not been emitted yet is never admitted to the store.
    pub fn chat_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Stream<Item = ChatEvent> + Send>> {
        let service = self.clone();
        Box::pin(async_stream::stream! {
            let ChatRequest { session_id, message, files } = request;

            if Self::is_plan_request(&message) {
                yield ChatEvent::Status {
                    message: "Analyzing request and generating execution plan...".to_owned(),
                };

                let proposed = tokio::select! {
                    _ = cancel.cancelled() => None,
                    result = service.propose_plan(&message, &files, &session_id) => Some(result),
                };
                let Some(proposed) = proposed else {
                    yield ChatEvent::Error { error: "generation cancelled".to_owned() };
                    return;
                };

                match proposed {
                    Ok(Some(parsed)) => {
                        yield ChatEvent::Status {
                            message: "Plan generated! Creating conversational response..."
                                .to_owned(),
                        };

                        let retrieved =
                            service.retrieve_context(&message, &session_id).await;
                        let prompt =
                            prompts::build_plan_summary_prompt(&message, &files, &retrieved);
                        match service.stream_tokens(&prompt, &cancel).await {
                            Ok(mut tokens) => {
                                while let Some(event) = tokens.next().await {
                                    let terminal = event.is_terminal();
                                    yield event;
                                    if terminal {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                yield ChatEvent::Error { error: e.to_string() };
                                return;
                            }
                        }

                        let plan = service.store.create_plan(parsed);
                        yield ChatEvent::Plan { plan, should_create_plan: true };
                        yield ChatEvent::Done;
                        return;
                    }
                    Ok(None) => {
                        // Fall through to the plain chat path below.
                    }
                    Err(e) => {
                        yield ChatEvent::Error { error: e.to_string() };
                        return;
                    }
                }
            }

            yield ChatEvent::Status { message: "Searching codebase...".to_owned() };
            let retrieved = service.retrieve_context(&message, &session_id).await;
            let prompt = prompts::build_chat_prompt(&message, &files, &retrieved);

            yield ChatEvent::Status { message: "Generating response...".to_owned() };
            match service.stream_tokens(&prompt, &cancel).await {
                Ok(mut tokens) => {
                    while let Some(event) = tokens.next().await {
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            return;
                        }
                    }
                    yield ChatEvent::Done;
                }
                Err(e) => {
                    yield ChatEvent::Error { error: e.to_string() };
                }
            }
        })
    }

    /// Forward a streaming completion as `token` events, watching the
    /// cancellation token between chunks. The returned stream ends either
    /// silently (all chunks forwarded) or with a terminal `error` event.
    async fn stream_tokens(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Pin<Box<dyn Stream<Item = ChatEvent> + Send>>, CompletionError> {
        let mut tokens = self.llm.stream(prompt).await?;
        let cancel = cancel.clone();
        Ok(Box::pin(async_stream::stream! {
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => None,
                    chunk = tokens.next() => Some(chunk),
                };
                let Some(chunk) = chunk else {
                    yield ChatEvent::Error { error: "generation cancelled".to_owned() };
                    return;
                };
                match chunk {
                    Some(Ok(text)) => yield ChatEvent::Token { content: text },
                    Some(Err(e)) => {
                        yield ChatEvent::Error { error: e.to_string() };
                        return;
                    }
                    None => return,
                }
            }
        }))
    }

    /// Complete a fully reviewed plan into an agent-ready document.
    ///
    /// Refused with [`ServiceError::FinalizeNotReady`] while any step is
    /// unreviewed. Served from the fingerprint cache when the plan's review
    /// state is unchanged; otherwise runs the agent-plan completion and
    /// caches the artifact. A completion failure leaves the plan untouched.
    pub async fn complete_plan(&self, plan_id: Uuid) -> Result<CompletedPlan, ServiceError> {
        if !self.store.can_finalize(plan_id)? {
            return Err(ServiceError::FinalizeNotReady);
        }
        let plan = self
            .store
            .get_plan(plan_id)
            .ok_or(StoreError::PlanNotFound(plan_id))?;
        let metadata = markdown::review_summary(&plan, self.store.policy());

        if let Some(artifact) = self.store.cached_artifact(plan_id)? {
            tracing::debug!(%plan_id, "agent plan served from cache");
            return Ok(CompletedPlan {
                agent_plan: artifact,
                metadata,
                cached: true,
            });
        }

        let context = markdown::agent_plan_context(&plan, self.store.policy());
        let prompt = prompts::build_agent_prompt(&context);
        let artifact = self.llm.complete(&prompt).await?;
        self.store.store_artifact(plan_id, artifact.clone())?;

        Ok(CompletedPlan {
            agent_plan: artifact,
            metadata,
            cached: false,
        })
    }

    /// Finalize a fully reviewed plan: mark it `finalized` and render the
    /// accepted steps as markdown. Deterministic; no model call.
    pub fn finalize_plan(&self, plan_id: Uuid) -> Result<String, ServiceError> {
        if !self.store.can_finalize(plan_id)? {
            return Err(ServiceError::FinalizeNotReady);
        }
        let plan = self.store.update_plan(
            plan_id,
            crate::store::PlanPatch {
                status: Some(crate::plan::model::PlanStatus::Finalized),
                ..Default::default()
            },
        )?;
        Ok(markdown::render_final_markdown(&plan, self.store.policy()))
    }
}
