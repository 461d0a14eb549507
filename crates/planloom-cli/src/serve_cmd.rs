use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use planloom_core::flowchart::{self, LayoutConfig};
use planloom_core::plan::model::{Plan, PlanStatus, StepStatus};
use planloom_core::plan::parser::PlanParseError;
use planloom_core::service::{ChatRequest, PlannerService, ServiceError};
use planloom_core::store::StoreError;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PlanNotFound(_)
            | StoreError::PhaseNotFound(_)
            | StoreError::StepNotFound(_)
            | StoreError::ChangeNotFound(_) => Self::not_found(err.to_string()),
            StoreError::InvalidTransition { .. } => Self::conflict(err.to_string()),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::FinalizeNotReady => Self::conflict(err.to_string()),
            ServiceError::Store(store_err) => store_err.into(),
            ServiceError::Completion(_) => Self {
                status: StatusCode::BAD_GATEWAY,
                message: err.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    pub raw_text: String,
    #[serde(default)]
    pub fallback_title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStepStatusRequest {
    pub status: StepStatus,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummaryResponse {
    pub id: Uuid,
    pub title: String,
    pub status: PlanStatus,
    pub progress: u8,
    pub total_steps: usize,
}

impl From<&Plan> for PlanSummaryResponse {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id,
            title: plan.title.clone(),
            status: plan.status,
            progress: plan.progress,
            total_steps: plan.total_steps(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub markdown: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub agent_plan: String,
    pub metadata: planloom_core::plan::markdown::ReviewSummary,
    pub cached: bool,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(service: PlannerService) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/plans", get(list_plans).post(create_plan))
        .route("/api/plans/{id}", get(get_plan_detail).delete(delete_plan))
        .route(
            "/api/plans/{id}/steps/{step_id}/status",
            post(update_step_status),
        )
        .route("/api/plans/{id}/finalize", post(finalize_plan))
        .route("/api/plans/{id}/complete", post(complete_plan))
        .route("/api/plans/{id}/flowchart", get(get_flowchart))
        .route("/api/chat/stream", post(chat_stream))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(service: PlannerService, bind: &str, port: u16) -> Result<()> {
    let app = build_router(service);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("planloom serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("planloom serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(State(service): State<PlannerService>) -> Result<Response, AppError> {
    let plans = service.store().list_plans();

    let rows = if plans.is_empty() {
        "<tr><td colspan=\"4\">No plans yet.</td></tr>".to_owned()
    } else {
        plans
            .iter()
            .map(|p| {
                format!(
                    "<tr><td><a href=\"/api/plans/{id}\">{title}</a></td><td>{status}</td><td>{progress}%</td><td>{id}</td></tr>",
                    id = p.id,
                    title = p.title,
                    status = p.status,
                    progress = p.progress,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>planloom</title></head><body>\
<h1>planloom</h1>\
<p><a href=\"/api/plans\">/api/plans</a></p>\
<table><tr><th>Plan</th><th>Status</th><th>Progress</th><th>ID</th></tr>{rows}</table>\
</body></html>"
    );

    Ok(Html(html).into_response())
}

async fn list_plans(State(service): State<PlannerService>) -> Result<Response, AppError> {
    let plans = service.store().list_plans();
    let summaries: Vec<PlanSummaryResponse> = plans.iter().map(PlanSummaryResponse::from).collect();
    Ok(Json(summaries).into_response())
}

async fn create_plan(
    State(service): State<PlannerService>,
    Json(request): Json<CreatePlanRequest>,
) -> Result<Response, AppError> {
    let fallback = request.fallback_title.as_deref().unwrap_or("Untitled plan");
    let parsed = planloom_core::plan::parse_plan_text(&request.raw_text, fallback).map_err(
        |PlanParseError::EmptyPlan| {
            AppError::unprocessable("no phases found in plan text".to_owned())
        },
    )?;
    let plan = service.store().create_plan(parsed);
    Ok((StatusCode::CREATED, Json(plan)).into_response())
}

async fn get_plan_detail(
    State(service): State<PlannerService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let plan = service
        .store()
        .get_plan(id)
        .ok_or_else(|| AppError::not_found(format!("plan {id} not found")))?;
    Ok(Json(plan).into_response())
}

async fn delete_plan(
    State(service): State<PlannerService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    service.store().delete_plan(id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn update_step_status(
    State(service): State<PlannerService>,
    Path((id, step_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateStepStatusRequest>,
) -> Result<Response, AppError> {
    let plan = service
        .store()
        .get_plan(id)
        .ok_or_else(|| AppError::not_found(format!("plan {id} not found")))?;
    if !plan.steps().any(|s| s.id == step_id) {
        return Err(AppError::not_found(format!(
            "step {step_id} not found in plan {id}"
        )));
    }

    let updated = service
        .store()
        .update_step_status(step_id, request.status, request.error)?;
    Ok(Json(updated).into_response())
}

async fn finalize_plan(
    State(service): State<PlannerService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let markdown = service.finalize_plan(id)?;
    Ok(Json(FinalizeResponse { markdown }).into_response())
}

async fn complete_plan(
    State(service): State<PlannerService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let completed = service.complete_plan(id).await?;
    Ok(Json(CompleteResponse {
        agent_plan: completed.agent_plan,
        metadata: completed.metadata,
        cached: completed.cached,
    })
    .into_response())
}

async fn get_flowchart(
    State(service): State<PlannerService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let plan = service
        .store()
        .get_plan(id)
        .ok_or_else(|| AppError::not_found(format!("plan {id} not found")))?;

    let config = LayoutConfig::default();
    let positions = flowchart::calculate_node_positions(&plan, &config);
    let nodes = flowchart::plan_to_nodes(&plan);
    let edges = flowchart::generate_edges(&plan);

    Ok(Json(serde_json::json!({
        "nodes": nodes,
        "positions": positions,
        "edges": edges,
    }))
    .into_response())
}

/// Streaming chat endpoint. Emits the event sequence as server-sent events,
/// one JSON object per `data:` line.
async fn chat_stream(
    State(service): State<PlannerService>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let cancel = CancellationToken::new();
    let events = service.chat_stream(request, cancel);

    let body_stream = events.map(|event| {
        let json = serde_json::to_string(&event)
            .unwrap_or_else(|_| "{\"type\":\"error\",\"error\":\"serialization failed\"}".to_owned());
        Ok::<_, Infallible>(format!("data: {json}\n\n"))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::internal(e.into()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use planloom_core::ai::{CompletionClient, CompletionError, NullRetriever, TokenStream};
    use planloom_core::plan::model::ReviewPolicy;
    use planloom_core::service::PlannerService;
    use planloom_core::store::{ArtifactCache, PlanStore};

    /// Returns a fixed reply for completions and a short token stream.
    struct FixedClient {
        reply: String,
    }

    #[async_trait]
    impl CompletionClient for FixedClient {
        async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
            Ok(self.reply.clone())
        }

        async fn stream(&self, _prompt: &str) -> Result<TokenStream, CompletionError> {
            let chunks: Vec<Result<String, CompletionError>> =
                vec![Ok("Sounds ".to_owned()), Ok("good.".to_owned())];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn test_service(reply: &str) -> PlannerService {
        let store = Arc::new(PlanStore::new(ReviewPolicy::Execution, ArtifactCache::new()));
        PlannerService::new(
            store,
            Arc::new(FixedClient {
                reply: reply.to_owned(),
            }),
            Arc::new(NullRetriever),
        )
    }

    const PLAN_TEXT: &str = "\
PLAN: Test Plan
PHASE 1: One
STEP 1.1: A
- Type: command
STEP 1.2: B
";

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    async fn send_json(
        service: PlannerService,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> axum::response::Response {
        let app = super::build_router(service);
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn send_get(service: PlannerService, uri: &str) -> axum::response::Response {
        let app = super::build_router(service);
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn index_returns_html() {
        let resp = send_get(test_service(""), "/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get("content-type")
            .expect("should have content-type header")
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/html"));
    }

    #[tokio::test]
    async fn list_plans_empty() {
        let resp = send_get(test_service(""), "/api/plans").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn create_and_fetch_plan() {
        let service = test_service("");
        let resp = send_json(
            service.clone(),
            "POST",
            "/api/plans",
            serde_json::json!({ "rawText": PLAN_TEXT, "fallbackTitle": "fallback" }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        assert_eq!(created["title"], "Test Plan");
        assert_eq!(created["progress"], 0);
        let id = created["id"].as_str().unwrap().to_owned();

        let resp = send_get(service, &format!("/api/plans/{id}")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let fetched = body_json(resp).await;
        assert_eq!(fetched["phases"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_plan_rejects_unstructured_text() {
        let resp = send_json(
            test_service(""),
            "POST",
            "/api/plans",
            serde_json::json!({ "rawText": "nothing structured here" }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn step_status_update_recomputes_progress() {
        let service = test_service("");
        let resp = send_json(
            service.clone(),
            "POST",
            "/api/plans",
            serde_json::json!({ "rawText": PLAN_TEXT }),
        )
        .await;
        let created = body_json(resp).await;
        let plan_id = created["id"].as_str().unwrap().to_owned();
        let step_id = created["phases"][0]["steps"][0]["id"]
            .as_str()
            .unwrap()
            .to_owned();

        let resp = send_json(
            service,
            "POST",
            &format!("/api/plans/{plan_id}/steps/{step_id}/status"),
            serde_json::json!({ "status": "completed" }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let updated = body_json(resp).await;
        assert_eq!(updated["progress"], 50);
        assert_eq!(updated["phases"][0]["steps"][0]["status"], "completed");
    }

    #[tokio::test]
    async fn invalid_transition_conflicts() {
        let service = test_service("");
        let resp = send_json(
            service.clone(),
            "POST",
            "/api/plans",
            serde_json::json!({ "rawText": PLAN_TEXT }),
        )
        .await;
        let created = body_json(resp).await;
        let plan_id = created["id"].as_str().unwrap().to_owned();
        let step_id = created["phases"][0]["steps"][0]["id"]
            .as_str()
            .unwrap()
            .to_owned();
        let uri = format!("/api/plans/{plan_id}/steps/{step_id}/status");

        let resp = send_json(
            service.clone(),
            "POST",
            &uri,
            serde_json::json!({ "status": "completed" }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = send_json(
            service,
            "POST",
            &uri,
            serde_json::json!({ "status": "failed" }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn finalize_gated_then_succeeds() {
        let service = test_service("");
        let resp = send_json(
            service.clone(),
            "POST",
            "/api/plans",
            serde_json::json!({ "rawText": PLAN_TEXT }),
        )
        .await;
        let created = body_json(resp).await;
        let plan_id = created["id"].as_str().unwrap().to_owned();

        let resp = send_json(
            service.clone(),
            "POST",
            &format!("/api/plans/{plan_id}/finalize"),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        for step in created["phases"][0]["steps"].as_array().unwrap() {
            let step_id = step["id"].as_str().unwrap();
            let resp = send_json(
                service.clone(),
                "POST",
                &format!("/api/plans/{plan_id}/steps/{step_id}/status"),
                serde_json::json!({ "status": "completed" }),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = send_json(
            service,
            "POST",
            &format!("/api/plans/{plan_id}/finalize"),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert!(
            json["markdown"]
                .as_str()
                .unwrap()
                .starts_with("# Final Plan: Test Plan")
        );
    }

    #[tokio::test]
    async fn complete_returns_agent_plan_and_metadata() {
        let service = test_service("AGENT DOC");
        let resp = send_json(
            service.clone(),
            "POST",
            "/api/plans",
            serde_json::json!({ "rawText": PLAN_TEXT }),
        )
        .await;
        let created = body_json(resp).await;
        let plan_id = created["id"].as_str().unwrap().to_owned();

        for step in created["phases"][0]["steps"].as_array().unwrap() {
            let step_id = step["id"].as_str().unwrap();
            send_json(
                service.clone(),
                "POST",
                &format!("/api/plans/{plan_id}/steps/{step_id}/status"),
                serde_json::json!({ "status": "completed" }),
            )
            .await;
        }

        let resp = send_json(
            service.clone(),
            "POST",
            &format!("/api/plans/{plan_id}/complete"),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["agentPlan"], "AGENT DOC");
        assert_eq!(json["metadata"]["totalSteps"], 2);
        assert_eq!(json["cached"], false);

        let resp = send_json(
            service,
            "POST",
            &format!("/api/plans/{plan_id}/complete"),
            serde_json::json!({}),
        )
        .await;
        let json = body_json(resp).await;
        assert_eq!(json["cached"], true);
    }

    #[tokio::test]
    async fn flowchart_projects_nodes_positions_edges() {
        let service = test_service("");
        let resp = send_json(
            service.clone(),
            "POST",
            "/api/plans",
            serde_json::json!({ "rawText": PLAN_TEXT }),
        )
        .await;
        let created = body_json(resp).await;
        let plan_id = created["id"].as_str().unwrap().to_owned();

        let resp = send_get(service, &format!("/api/plans/{plan_id}/flowchart")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        // start + end + 1 phase + 2 steps
        assert_eq!(json["nodes"].as_array().unwrap().len(), 5);
        assert!(json["positions"]["start"].is_object());
        assert!(json["positions"]["end"].is_object());
        assert!(!json["edges"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_stream_emits_sse_events() {
        let service = test_service("no structured plan in this reply");
        let resp = send_json(
            service,
            "POST",
            "/api/chat/stream",
            serde_json::json!({
                "sessionId": "s1",
                "message": "what is this?",
                "files": [],
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/event-stream"));

        let text = body_text(resp).await;
        let events: Vec<serde_json::Value> = text
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(|d| serde_json::from_str(d).unwrap())
            .collect();
        assert!(events.len() >= 3);
        assert_eq!(events[0]["type"], "status");
        assert_eq!(events.last().unwrap()["type"], "done");
        assert!(events.iter().any(|e| e["type"] == "token"));
    }

    #[tokio::test]
    async fn unknown_plan_is_404() {
        let id = uuid::Uuid::new_v4();
        let resp = send_get(test_service(""), &format!("/api/plans/{id}")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send_json(
            test_service(""),
            "POST",
            &format!("/api/plans/{id}/complete"),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_plan_removes_it() {
        let service = test_service("");
        let resp = send_json(
            service.clone(),
            "POST",
            "/api/plans",
            serde_json::json!({ "rawText": PLAN_TEXT }),
        )
        .await;
        let created = body_json(resp).await;
        let plan_id = created["id"].as_str().unwrap().to_owned();

        let app = super::build_router(service.clone());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/plans/{plan_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = send_get(service, &format!("/api/plans/{plan_id}")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
