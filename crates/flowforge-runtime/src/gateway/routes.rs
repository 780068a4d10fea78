use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use flowforge_core::workflow::{Engine, EventBus, OrchestrationContext, Persistence, StartWorkflow};
use flowforge_core::{StateStore, WorkflowId};

use super::response::{RpcError, RpcResponse};

type Response = axum::response::Response;

/// Collaborators the gateway needs: `Engine` to drive `startWorkflow`/
/// `resumeWorkflow`, `Persistence` directly for the two read-only routes
/// (§6 notes these never go through the engine).
pub struct GatewayState<S: StateStore, B: EventBus> {
    engine: Engine<S, B>,
    persistence: Arc<Persistence<S>>,
}

impl<S: StateStore, B: EventBus> GatewayState<S, B> {
    pub fn new(ctx: OrchestrationContext<S, B>) -> Self {
        Self {
            persistence: ctx.persistence.clone(),
            engine: Engine::new(ctx),
        }
    }
}

/// Builds the four §6 routes plus a plain health check. Auth, CORS,
/// websocket, and dashboard surfaces are out of scope here.
pub fn router<S, B>(state: Arc<GatewayState<S, B>>) -> Router
where
    S: StateStore + 'static,
    B: EventBus + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/workflows/start", post(start_workflow_handler::<S, B>))
        .route("/workflows", get(list_workflows_handler::<S, B>))
        .route("/workflows/{id}", get(get_workflow_handler::<S, B>))
        .route("/workflows/{id}/signal", post(signal_workflow_handler::<S, B>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct StartWorkflowRequest {
    #[serde(rename = "type")]
    workflow_type: String,
    input: Value,
    #[serde(default)]
    workflow_id: Option<String>,
}

async fn start_workflow_handler<S, B>(
    State(state): State<Arc<GatewayState<S, B>>>,
    Json(req): Json<StartWorkflowRequest>,
) -> Response
where
    S: StateStore,
    B: EventBus,
{
    let result = state
        .engine
        .start_workflow(StartWorkflow {
            workflow_type: req.workflow_type.clone(),
            input: req.input,
            workflow_id: req.workflow_id.map(WorkflowId::from_string),
        })
        .await;

    match result {
        Ok(instance) => (
            StatusCode::CREATED,
            RpcResponse::success(serde_json::json!({
                "workflow_id": instance.id,
                "workflow_type": instance.workflow_type,
                "status": instance.status,
                "message": "workflow started",
            })),
        )
            .into_response(),
        Err(e) => RpcResponse::error(RpcError::from(e)).into_response(),
    }
}

async fn list_workflows_handler<S, B>(State(state): State<Arc<GatewayState<S, B>>>) -> Response
where
    S: StateStore,
    B: EventBus,
{
    match state.persistence.list_workflows().await {
        Ok(workflows) => {
            let count = workflows.len();
            RpcResponse::success(serde_json::json!({ "workflows": workflows, "count": count }))
                .into_response()
        }
        Err(e) => RpcResponse::error(RpcError::from(e)).into_response(),
    }
}

async fn get_workflow_handler<S, B>(
    State(state): State<Arc<GatewayState<S, B>>>,
    Path(id): Path<String>,
) -> Response
where
    S: StateStore,
    B: EventBus,
{
    let workflow_id = WorkflowId::from_string(id);
    match state.persistence.get_workflow_history(&workflow_id).await {
        Ok(Some(history)) => RpcResponse::success(serde_json::json!({
            "workflow": history.instance,
            "steps": history.steps,
            "compensations": history.compensations,
        }))
        .into_response(),
        Ok(None) => {
            RpcResponse::error(RpcError::not_found(format!("unknown workflow {workflow_id}")))
                .into_response()
        }
        Err(e) => RpcResponse::error(RpcError::from(e)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SignalRequest {
    signal: String,
    #[serde(default)]
    payload: Option<Value>,
}

async fn signal_workflow_handler<S, B>(
    State(state): State<Arc<GatewayState<S, B>>>,
    Path(id): Path<String>,
    Json(req): Json<SignalRequest>,
) -> Response
where
    S: StateStore,
    B: EventBus,
{
    let workflow_id = WorkflowId::from_string(id);
    match state
        .engine
        .resume_workflow(&workflow_id, &req.signal, req.payload)
        .await
    {
        Ok(()) => RpcResponse::success(serde_json::json!({"status": "signaled"})).into_response(),
        Err(e) => RpcResponse::error(RpcError::from(e)).into_response(),
    }
}
