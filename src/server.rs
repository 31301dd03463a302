use crate::config::Config;
use crate::llm::ModelRouter;
use crate::orchestrator::routing::{self, RouteDecision, WorkerPool};
use crate::orchestrator::{AgentResult, Orchestrator};
use crate::persistence::Persistence;
use crate::progress;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Agent tasks completed this process's lifetime, per-task status, and
/// worker occupancy — enough for the status/health endpoints without a
/// separate task-tracking store.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub model_router: ModelRouter,
    pub agent_enabled: bool,
    pub default_phone_region: String,
    pub ws_base_url: String,
    pub workers: Arc<WorkerPool>,
    pub tasks: Mutex<std::collections::HashMap<Uuid, TaskRecord>>,
    pub tasks_completed: AtomicUsize,
}

#[derive(Clone)]
pub enum TaskRecord {
    Pending,
    Processing,
    Completed(Box<AgentResult>),
    Failed(String),
}

pub fn build_state(
    config: &Config,
    orchestrator: Orchestrator,
    model_router: ModelRouter,
    ws_base_url: String,
    worker_capacity: usize,
) -> Arc<AppState> {
    Arc::new(AppState {
        orchestrator,
        model_router,
        agent_enabled: config.agent.enable_mcp_agent,
        default_phone_region: config.agent.default_phone_region.clone(),
        ws_base_url,
        workers: Arc::new(WorkerPool::new(worker_capacity)),
        tasks: Mutex::new(std::collections::HashMap::new()),
        tasks_completed: AtomicUsize::new(0),
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/agent-ingress", post(ingress))
        .route("/agent-task/{task_id}/status", get(task_status))
        .route("/health/agent", get(health))
        .route("/ws/agent-progress/{task_id}", get(progress_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Deserialize)]
pub struct IngressRequest {
    pub session_id: Option<Uuid>,
    pub ocr_text: String,
}

async fn ingress(State(state): State<Arc<AppState>>, Json(req): Json<IngressRequest>) -> impl IntoResponse {
    let (decision, _latency) = routing::decide(&req.ocr_text, state.agent_enabled, &state.default_phone_region, &state.workers).await;

    match decision {
        RouteDecision::Agent { task_id, entities } => {
            let state_for_task = state.clone();
            let Some(guard) = state_for_task.workers.try_acquire() else {
                warn!(%task_id, "worker slot vanished between decide and acquire, falling back to fast path");
                let result = routing::fast_path_classify(&state.model_router, &req.ocr_text).await;
                return Json(result).into_response();
            };

            state.tasks.lock().await.insert(task_id, TaskRecord::Pending);
            let response = routing::agent_response(task_id, &entities, &state.ws_base_url);

            let ocr_text = req.ocr_text.clone();
            let session_id = req.session_id;
            tokio::spawn(async move {
                let _guard = guard;
                state_for_task.tasks.lock().await.insert(task_id, TaskRecord::Processing);
                let result = state_for_task.orchestrator.execute(task_id, &ocr_text, session_id).await;
                state_for_task.tasks_completed.fetch_add(1, Ordering::SeqCst);
                state_for_task.tasks.lock().await.insert(task_id, TaskRecord::Completed(Box::new(result)));
            });

            Json(response).into_response()
        }
        RouteDecision::FastPath => {
            let result = routing::fast_path_classify(&state.model_router, &req.ocr_text).await;
            Json(result).into_response()
        }
    }
}

async fn task_status(State(state): State<Arc<AppState>>, Path(task_id): Path<Uuid>) -> impl IntoResponse {
    let tasks = state.tasks.lock().await;
    match tasks.get(&task_id) {
        Some(TaskRecord::Pending) => Json(json!({"task_id": task_id, "status": "pending"})).into_response(),
        Some(TaskRecord::Processing) => Json(json!({"task_id": task_id, "status": "processing"})).into_response(),
        Some(TaskRecord::Completed(result)) => Json(json!({
            "task_id": task_id,
            "status": "completed",
            "result": result.as_ref(),
        }))
        .into_response(),
        Some(TaskRecord::Failed(error)) => Json(json!({
            "task_id": task_id,
            "status": "failed",
            "error": error,
        }))
        .into_response(),
        None => {
            // fall through to a database lookup — tasks older than this
            // process's lifetime (or on another instance) live there.
            match state.orchestrator.persistence.get_scan_result(task_id).await {
                Ok(Some(row)) => Json(json!({
                    "task_id": task_id,
                    "status": "completed",
                    "result": row,
                }))
                .into_response(),
                Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "unknown task_id"}))).into_response(),
                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
            }
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active_tasks = state.workers.active();
    let persistence_health = state.orchestrator.persistence.health().await;
    let status = if state.agent_enabled && state.workers.capacity() == 0 {
        "degraded"
    } else if !persistence_health.is_connected {
        "degraded"
    } else {
        "ok"
    };

    let body = json!({
        "status": status,
        "agent_enabled": state.agent_enabled,
        "active_tasks": active_tasks,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    if status == "degraded" {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    } else {
        Json(body).into_response()
    }
}

async fn progress_ws(ws: WebSocketUpgrade, Path(task_id): Path<Uuid>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_progress(socket, task_id))
}

async fn relay_progress(socket: WebSocket, task_id: Uuid) {
    let rx = progress::global().subscribe(task_id);
    let socket = Arc::new(Mutex::new(socket));
    let socket_for_deliver = socket.clone();

    progress::run_subscriber_session(rx, move |msg| {
        let socket = socket_for_deliver.clone();
        async move {
            let payload = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(%task_id, error = %e, "failed to serialize progress message");
                    return true;
                }
            };
            socket.lock().await.send(Message::Text(payload.into())).await.is_ok()
        }
    })
    .await;

    let mut socket = Arc::try_unwrap(socket).unwrap_or_else(|_| unreachable!()).into_inner();
    let _ = socket.close().await;
    info!(%task_id, "progress websocket session closed");
}

/// Background sweep: deletes `agent_scan_results` rows older than 7 days
/// and archives stale `scam_reports`. Intended to run on a fixed interval
/// from `main`.
pub async fn run_retention_sweep(persistence: &Persistence) {
    if let Err(e) = persistence.sweep_expired_scan_results().await {
        warn!(error = %e, "scan-result retention sweep failed");
    }
    if let Err(e) = persistence.sweep_archivable_reports().await {
        warn!(error = %e, "scam-report archive sweep failed");
    }
}
