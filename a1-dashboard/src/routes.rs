//! HTTP route handlers for the dashboard API.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use a1::context::{LogEntry, RunContext, RunSnapshot};
use a1::core::checkpoint::Checkpoint;
use a1::core::events::LogKind;
use a1::core::tasks::{RawThought, Task};
use a1::io::checkpoint_store::CheckpointStore;
use a1::io::config::ConfigOverrides;
use a1::io::operator::DeclineOperator;
use a1::io::queue::MessageQueue;
use a1::io::task_store::TaskStore;
use a1::start::start_run;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::sse;
use crate::state::AppState;

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        warn!(err = %format!("{err:#}"), "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// The full application: API, SSE stream and CORS, without static files.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state)
}

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/log", get(log))
        .route("/tasks", get(list_tasks).post(add_task))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/messages", post(queue_message))
}

async fn health() -> &'static str {
    "ok"
}

fn require_initialized(state: &AppState) -> ApiResult<()> {
    if state.paths().is_initialized() {
        Ok(())
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "project is not initialized (run `a1 init`)",
        ))
    }
}

#[derive(Serialize)]
struct Progress {
    done: usize,
    total: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    run: RunSnapshot,
    checkpoint: Checkpoint,
    progress: Progress,
}

/// GET /api/status - live run state, stored checkpoint and task progress.
async fn status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    require_initialized(&state)?;
    let paths = state.paths();
    let checkpoint = CheckpointStore::new(&paths.checkpoint_path, &paths.checkpoints_dir)
        .load()
        .map_err(ApiError::internal)?;
    let (done, total) = TaskStore::new(&paths.tasks_path)
        .progress()
        .map_err(ApiError::internal)?;
    Ok(Json(StatusResponse {
        run: state.ctx.snapshot(),
        checkpoint,
        progress: Progress { done, total },
    }))
}

#[derive(Deserialize)]
struct LogQuery {
    #[serde(default)]
    since: usize,
}

#[derive(Serialize)]
struct LogResponse {
    entries: Vec<LogEntry>,
    total: usize,
    since: usize,
}

/// GET /api/log?since=N - activity log entries from index N on.
async fn log(State(state): State<AppState>, Query(query): Query<LogQuery>) -> Json<LogResponse> {
    let entries = state.ctx.log_since(query.since);
    Json(LogResponse {
        total: state.ctx.snapshot().log_len,
        since: query.since,
        entries,
    })
}

#[derive(Serialize)]
struct TasksResponse {
    tasks: Vec<Task>,
    raw_thoughts: Vec<RawThought>,
    progress: Progress,
}

/// GET /api/tasks - tasks in priority order.
async fn list_tasks(State(state): State<AppState>) -> ApiResult<Json<TasksResponse>> {
    require_initialized(&state)?;
    let doc = TaskStore::new(state.paths().tasks_path)
        .load()
        .map_err(ApiError::internal)?;
    let (done, total) = doc.progress();
    Ok(Json(TasksResponse {
        tasks: doc.list(None),
        raw_thoughts: doc.raw_thoughts,
        progress: Progress { done, total },
    }))
}

#[derive(Deserialize)]
struct AddTaskRequest {
    title: String,
    #[serde(default)]
    description: String,
}

/// POST /api/tasks - add a pending task at the lowest priority.
async fn add_task(
    State(state): State<AppState>,
    Json(request): Json<AddTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    require_initialized(&state)?;
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "title must not be empty"));
    }
    let task = TaskStore::new(state.paths().tasks_path)
        .add(title, &request.description)
        .map_err(ApiError::internal)?;
    state.ctx.log(LogKind::Session, format!("Task added: {}", task.title));
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Deserialize)]
struct MessageRequest {
    text: String,
}

/// POST /api/messages - queue a message for the next session's prompt.
async fn queue_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require_initialized(&state)?;
    let text = request.text.trim();
    if text.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "text must not be empty"));
    }
    MessageQueue::new(state.paths().queue_path)
        .enqueue(text)
        .map_err(ApiError::internal)?;
    let preview: String = text.chars().take(50).collect();
    state.ctx.log(LogKind::Session, format!("Message queued: {preview}"));
    Ok((StatusCode::CREATED, Json(json!({ "ok": true }))))
}

/// POST /api/start - start a run on a background thread.
///
/// Interrupt prompts are declined, so a dashboard run only ends by
/// completion, budget, worker failure or `POST /api/stop`.
async fn start(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Value>)> {
    require_initialized(&state)?;
    if state.ctx.is_running() {
        return Err(ApiError::new(StatusCode::CONFLICT, "a run is already in progress"));
    }

    let root = state.project_dir.clone();
    let ctx = Arc::clone(&state.ctx);
    thread::Builder::new()
        .name("a1-run".to_string())
        .spawn(move || run_in_background(&root, &ctx))
        .map_err(|e| ApiError::internal(e.into()))?;
    info!(project_dir = %state.project_dir.display(), "run started from dashboard");
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true }))))
}

fn run_in_background(root: &Path, ctx: &RunContext) {
    match start_run(root, &ConfigOverrides::default(), ctx, &DeclineOperator, |_| {}) {
        Ok(outcome) => info!(stop = ?outcome.stop, sessions = outcome.sessions_run, "run finished"),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "run failed");
            ctx.log(LogKind::Error, format!("Run failed: {err:#}"));
        }
    }
}

/// POST /api/stop - ask the current run to stop after terminating its session.
async fn stop(State(state): State<AppState>) -> Json<Value> {
    let running = state.ctx.is_running();
    if running {
        state.ctx.request_stop();
        state.ctx.log(LogKind::Session, "Stop requested from dashboard");
    }
    Json(json!({ "ok": true, "running": running }))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use a1::io::init::{InitOptions, init_project};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;

    fn project() -> (TempDir, AppState) {
        let temp = tempfile::tempdir().expect("tempdir");
        init_project(temp.path(), &InitOptions::default()).expect("init");
        let state = AppState::new(temp.path().to_path_buf());
        (temp, state)
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = app(state.clone()).oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request")
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_temp, state) = project();
        let response = app(state).oneshot(get_request("/api/health")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_checkpoint_and_progress() {
        let (_temp, state) = project();
        TaskStore::new(state.paths().tasks_path).add("one", "").expect("add");

        let (status, body) = send(&state, get_request("/api/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["run"]["running"], json!(false));
        assert_eq!(body["checkpoint"]["status"], json!("STARTING"));
        assert_eq!(body["progress"], json!({ "done": 0, "total": 1 }));
    }

    #[tokio::test]
    async fn uninitialized_project_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = AppState::new(temp.path().to_path_buf());
        let (status, body) = send(&state, get_request("/api/status")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().is_some_and(|e| e.contains("a1 init")));
    }

    #[tokio::test]
    async fn log_returns_entries_since_index() {
        let (_temp, state) = project();
        state.ctx.log(LogKind::Session, "Session #1 started");
        state.ctx.log(LogKind::Text, "reading files");

        let (status, body) = send(&state, get_request("/api/log?since=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], json!(2));
        assert_eq!(body["since"], json!(1));
        let entries = body["entries"].as_array().expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["text"], json!("reading files"));
        assert_eq!(entries[0]["kind"], json!("text"));
    }

    #[tokio::test]
    async fn tasks_can_be_added_and_listed() {
        let (_temp, state) = project();
        let (status, body) = send(
            &state,
            post_json("/api/tasks", json!({ "title": "Write parser" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], json!("task_001"));

        let (status, body) = send(&state, get_request("/api/tasks")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tasks"][0]["title"], json!("Write parser"));
        assert_eq!(body["progress"]["total"], json!(1));
    }

    #[tokio::test]
    async fn blank_task_title_is_rejected() {
        let (_temp, state) = project();
        let (status, _) = send(&state, post_json("/api/tasks", json!({ "title": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn messages_are_queued() {
        let (_temp, state) = project();
        let (status, _) = send(
            &state,
            post_json("/api/messages", json!({ "text": "prefer small commits" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let queued = MessageQueue::new(state.paths().queue_path).list().expect("queue");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].text, "prefer small commits");

        let (status, _) = send(&state, post_json("/api/messages", json!({ "text": "" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_conflicts_with_running_run() {
        let (_temp, state) = project();
        assert!(state.ctx.begin_run());
        let (status, _) = send(&state, post_empty("/api/start")).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn start_failure_is_logged() {
        let (_temp, state) = project();
        let (status, _) = send(&state, post_empty("/api/start")).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let deadline = Instant::now() + Duration::from_secs(5);
        let failed = loop {
            let failed = state
                .ctx
                .log_since(0)
                .iter()
                .any(|e| e.kind == LogKind::Error && e.text.contains("no pending tasks"));
            if failed || Instant::now() > deadline {
                break failed;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };
        assert!(failed);
        assert!(!state.ctx.is_running());
    }

    #[tokio::test]
    async fn stop_requests_stop_only_while_running() {
        let (_temp, state) = project();
        let (_, body) = send(&state, post_empty("/api/stop")).await;
        assert_eq!(body["running"], json!(false));
        assert!(!state.ctx.stop_requested());

        assert!(state.ctx.begin_run());
        let (status, body) = send(&state, post_empty("/api/stop")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], json!(true));
        assert!(state.ctx.stop_requested());
    }
}
