//! HTTP route handlers.
//!
//! Handlers are thin: decode the request, run the orchestrator operation on
//! the blocking pool, encode the result. Errors render as `{"error": ".."}`.

use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, warn};

use taskflow::core::types::{Author, RoundType, TaskStatus};
use taskflow::io::store::{NewMessage, NewTask, NewWorkspace, TaskFilter};
use taskflow::{Error, Orchestrator};

use crate::sse;
use crate::state::AppState;

/// Full application: root health check plus everything under `/api`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_router())
        .with_state(state)
}

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(sse::events_handler))
        .route("/runner/report", post(runner_report))
        .route("/runner/heartbeat", post(runner_heartbeat))
        .route("/runner/poll", post(runner_poll))
        .route("/runners", get(list_runners))
        .route("/workspaces", get(list_workspaces).post(create_workspace))
        .route("/workspaces/{id}", get(get_workspace))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/status", post(set_task_status))
        .route("/tasks/{id}/messages", get(list_messages).post(append_message))
        .route("/tasks/{id}/runs", get(list_runs))
        .route("/tasks/{id}/enqueue", post(enqueue))
        .route("/tasks/{id}/actions/submit", post(action_submit))
        .route("/tasks/{id}/actions/replan", post(action_replan))
        .route("/tasks/{id}/actions/retry", post(action_retry))
        .route("/tasks/{id}/actions/continue-fix", post(action_continue_fix))
        .route("/runs/{id}/artifacts", get(list_artifacts))
}

/// Orchestrator failure rendered as a JSON error response.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::Infra(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Run a store-backed operation off the async executor.
async fn blocking<T, F>(state: &AppState, op: F) -> ApiResult<T>
where
    F: FnOnce(&Orchestrator) -> taskflow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let orchestrator = state.orchestrator.clone();
    tokio::task::spawn_blocking(move || op(&orchestrator))
        .await
        .map_err(|err| ApiError(Error::Infra(format!("worker task failed: {err}"))))?
        .map_err(ApiError)
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError(Error::Validation(rejection.body_text())))
}

fn created<T: Serialize>(value: T) -> (StatusCode, Json<T>) {
    (StatusCode::CREATED, Json(value))
}

/// GET /health, /api/health - liveness plus a database ping.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let store = state.orchestrator.store().clone();
    let db_ok = match tokio::task::spawn_blocking(move || store.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(error = %err, "database ping failed");
            false
        }
        Err(err) => {
            warn!(error = %err, "database ping task failed");
            false
        }
    };
    Json(json!({
        "ok": true,
        "service": "taskflow",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "db_path": state.database_path.display().to_string(),
        "db_ok": db_ok,
        "paths": {"api": "/api", "events": "/api/events"},
    }))
}

/// POST /api/runner/report - terminal outcome of one run.
async fn runner_report(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(body)?;
    let accepted = blocking(&state, move |o| o.apply_report(&body)).await?;
    Ok(Json(accepted))
}

fn runner_id(body: &Value) -> String {
    body.get("runner_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// POST /api/runner/heartbeat
async fn runner_heartbeat(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let runner = runner_id(&json_body(body)?);
    blocking(&state, move |o| o.heartbeat(&runner)).await?;
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/runner/poll - lease at most one job.
async fn runner_poll(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let runner = runner_id(&json_body(body)?);
    let jobs = blocking(&state, move |o| o.poll(&runner)).await?;
    Ok(Json(json!({ "jobs": jobs })))
}

async fn list_runners(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(&state, |o| o.runners()).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWorkspaceBody {
    name: String,
    repo_path: String,
    default_branch: Option<String>,
}

async fn list_workspaces(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(&state, |o| o.workspaces()).await?))
}

async fn create_workspace(
    State(state): State<AppState>,
    body: Result<Json<CreateWorkspaceBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(body)?;
    let new = NewWorkspace {
        name: body.name,
        repo_path: body.repo_path,
        default_branch: body.default_branch,
    };
    Ok(created(blocking(&state, move |o| o.create_workspace(&new)).await?))
}

async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(&state, move |o| o.workspace(&id)).await?))
}

#[derive(Deserialize)]
struct TaskQuery {
    workspace_id: Option<String>,
    status: Option<String>,
}

/// GET /api/tasks?workspace_id=&status=
async fn list_tasks(
    State(state): State<AppState>,
    query: Result<Query<TaskQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) =
        query.map_err(|rejection| ApiError(Error::Validation(rejection.body_text())))?;
    let status = query
        .status
        .filter(|raw| !raw.is_empty())
        .map(|raw| raw.parse::<TaskStatus>())
        .transpose()
        .map_err(|err| ApiError(Error::Validation(err)))?;
    let filter = TaskFilter {
        workspace_id: query.workspace_id.filter(|id| !id.is_empty()),
        status,
    };
    Ok(Json(blocking(&state, move |o| o.tasks(&filter)).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskBody {
    workspace_id: String,
    title: String,
    description: Option<String>,
}

async fn create_task(
    State(state): State<AppState>,
    body: Result<Json<CreateTaskBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(body)?;
    let new = NewTask {
        workspace_id: body.workspace_id,
        title: body.title,
        description: body.description,
    };
    Ok(created(blocking(&state, move |o| o.create_task(&new)).await?))
}

/// GET /api/tasks/{id} - task with workspace, runs and messages.
async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(&state, move |o| o.task_detail(&id)).await?))
}

#[derive(Deserialize)]
struct StatusBody {
    status: TaskStatus,
}

async fn set_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let StatusBody { status } = json_body(body)?;
    Ok(Json(blocking(&state, move |o| o.set_status(&id, status)).await?))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(&state, move |o| o.messages(&id)).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    round_type: RoundType,
    round_no: u32,
    author: Author,
    content: String,
}

async fn append_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<MessageBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(body)?;
    let new = NewMessage {
        task_id: id,
        round_type: body.round_type,
        round_no: body.round_no,
        author: body.author,
        content: body.content,
    };
    Ok(created(blocking(&state, move |o| o.append_message(&new)).await?))
}

/// GET /api/tasks/{id}/runs - newest first, each with its artifacts.
async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(&state, move |o| o.runs_with_artifacts(&id)).await?))
}

/// POST /api/tasks/{id}/enqueue - body `{mode, payload}`.
async fn enqueue(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(body)?;
    Ok(created(
        blocking(&state, move |o| o.enqueue_for_task(&id, &body)).await?,
    ))
}

async fn action_submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(blocking(&state, move |o| o.submit(&id)).await?))
}

async fn action_replan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(&state, move |o| o.replan(&id)).await?))
}

async fn action_retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(blocking(&state, move |o| o.retry(&id)).await?))
}

async fn action_continue_fix(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(&state, move |o| o.continue_fix(&id)).await?))
}

async fn list_artifacts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(&state, move |o| o.artifacts(&id)).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use taskflow::io::config::ServerConfig;
    use taskflow::test_support::TestBoard;
    use tower::ServiceExt;

    fn app(board: &TestBoard) -> Router {
        router(AppState::new(
            board.orchestrator.clone(),
            &ServerConfig::default(),
        ))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).expect("json body");
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_database() {
        let board = TestBoard::new();
        let app = app(&board);
        for uri in ["/health", "/api/health"] {
            let (status, body) = send(&app, get(uri)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["ok"], json!(true));
            assert_eq!(body["db_ok"], json!(true));
        }
    }

    #[tokio::test]
    async fn report_errors_map_to_status_codes() {
        let board = TestBoard::new();
        let app = app(&board);

        let (status, body) = send(
            &app,
            post_json("/api/runner/report", json!({"run_id": "r1", "status": "weird"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "run_id and status required"}));

        let (status, body) = send(
            &app,
            post_json("/api/runner/report", json!({"run_id": "nope", "status": "failed"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "run not found"}));

        let malformed = Request::builder()
            .method("POST")
            .uri("/api/runner/report")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .expect("request");
        let (status, body) = send(&app, malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn enqueue_then_report_then_duplicate() {
        let board = TestBoard::new();
        let app = app(&board);
        let task_id = board.task.id.clone();

        let (status, queued) = send(
            &app,
            post_json(
                &format!("/api/tasks/{task_id}/enqueue"),
                json!({"mode": "VERIFY", "payload": {"suite": "all"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let run_id = queued["runId"].as_str().expect("runId").to_string();
        assert!(queued["jobId"].is_string());

        let report = json!({"run_id": run_id, "status": "succeeded"});
        let (status, body) = send(&app, post_json("/api/runner/report", report.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"taskId": task_id}));

        let (status, _) = send(&app, post_json("/api/runner/report", report)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, detail) = send(&app, get(&format!("/api/tasks/{task_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["status"], json!("done"));
        assert_eq!(detail["runs"][0]["status"], json!("succeeded"));
    }

    #[tokio::test]
    async fn enqueue_rejects_bad_mode() {
        let board = TestBoard::new();
        let app = app(&board);
        let (status, body) = send(
            &app,
            post_json(
                &format!("/api/tasks/{}/enqueue", board.task.id),
                json!({"mode": "DEPLOY", "payload": {}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "mode and payload required"}));
    }

    #[tokio::test]
    async fn actions_return_expected_shapes() {
        let board = TestBoard::new();
        let app = app(&board);
        let base = format!("/api/tasks/{}/actions", board.task.id);

        let (status, body) = send(&app, post_json(&format!("{base}/retry"), json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, json!({"error": "no run to retry"}));

        let (status, body) = send(&app, post_json(&format!("{base}/submit"), json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["runId"].is_string());

        let (status, body) = send(&app, post_json(&format!("{base}/retry"), json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["jobId"].is_string());

        let (status, body) = send(&app, post_json(&format!("{base}/replan"), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("plan"));
        assert_eq!(body["planRound"], json!(1));

        let (status, body) =
            send(&app, post_json(&format!("{base}/continue-fix"), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("in_progress"));
        assert_eq!(body["fixRound"], json!(1));

        let (status, _) = send(
            &app,
            post_json("/api/tasks/missing/actions/replan", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn runner_poll_and_heartbeat() {
        let board = TestBoard::new();
        let app = app(&board);

        let (status, body) =
            send(&app, post_json("/api/runner/heartbeat", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "runner_id required"}));

        let (status, body) = send(
            &app,
            post_json("/api/runner/heartbeat", json!({"runner_id": "r-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));

        let (_, runners) = send(&app, get("/api/runners")).await;
        assert_eq!(runners[0]["id"], json!("r-1"));

        let (status, body) = send(
            &app,
            post_json("/api/runner/poll", json!({"runner_id": "r-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"jobs": []}));

        board.orchestrator.submit(&board.task.id).expect("submit");
        let (_, body) = send(
            &app,
            post_json("/api/runner/poll", json!({"runner_id": "r-1"})),
        )
        .await;
        let jobs = body["jobs"].as_array().expect("jobs");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["job"]["mode"], json!("SUBMIT"));
        assert_eq!(jobs[0]["job"]["lockedBy"], json!("r-1"));
        assert_eq!(jobs[0]["run"]["status"], json!("running"));
    }

    #[tokio::test]
    async fn workspace_and_task_crud() {
        let board = TestBoard::new();
        let app = app(&board);

        let (status, workspace) = send(
            &app,
            post_json(
                "/api/workspaces",
                json!({"name": "svc", "repoPath": "/repos/svc"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(workspace["defaultBranch"], json!("main"));
        let workspace_id = workspace["id"].as_str().expect("id").to_string();

        let (status, task) = send(
            &app,
            post_json(
                "/api/tasks",
                json!({"workspaceId": workspace_id, "title": "Fix bug"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(task["status"], json!("plan"));
        let task_id = task["id"].as_str().expect("id").to_string();

        let (status, _) = send(
            &app,
            post_json("/api/tasks", json!({"workspaceId": "ghost", "title": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, updated) = send(
            &app,
            post_json(
                &format!("/api/tasks/{task_id}/status"),
                json!({"status": "testing"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], json!("testing"));

        let (status, _) = send(
            &app,
            post_json(
                &format!("/api/tasks/{task_id}/status"),
                json!({"status": "archived"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, listed) = send(
            &app,
            get(&format!("/api/tasks?workspace_id={workspace_id}&status=testing")),
        )
        .await;
        assert_eq!(listed.as_array().map(Vec::len), Some(1));

        let (status, _) = send(&app, get("/api/tasks?status=archived")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, message) = send(
            &app,
            post_json(
                &format!("/api/tasks/{task_id}/messages"),
                json!({"roundType": "plan", "roundNo": 0, "author": "user", "content": "hi"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message["content"], json!("hi"));

        let (_, messages) = send(&app, get(&format!("/api/tasks/{task_id}/messages"))).await;
        assert_eq!(messages.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn runs_include_artifacts() {
        let board = TestBoard::new();
        let app = app(&board);
        let queued = board.orchestrator.submit(&board.task.id).expect("submit");
        board
            .orchestrator
            .apply_report(&json!({
                "run_id": queued.run_id,
                "status": "succeeded",
                "artifacts": [{"type": "log", "uri": "logs/submit.log"}]
            }))
            .expect("report");

        let (status, runs) = send(&app, get(&format!("/api/tasks/{}/runs", board.task.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(runs[0]["id"], json!(queued.run_id));
        assert_eq!(runs[0]["artifacts"][0]["type"], json!("log"));

        let (_, artifacts) = send(&app, get(&format!("/api/runs/{}/artifacts", queued.run_id))).await;
        assert_eq!(artifacts[0]["uri"], json!("logs/submit.log"));
    }

    #[tokio::test]
    async fn event_stream_sends_connected_then_notifications() {
        let board = TestBoard::new();
        let app = app(&board);
        let response = app.oneshot(get("/api/events")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let mut body = response.into_body();

        let first = body
            .frame()
            .await
            .expect("frame")
            .expect("frame ok")
            .into_data()
            .expect("data frame");
        let first = String::from_utf8(first.to_vec()).expect("utf8");
        assert!(first.contains("event: connected"), "got {first}");
        assert!(first.contains("data: {}"), "got {first}");

        board.orchestrator.replan(&board.task.id).expect("replan");

        let next = body
            .frame()
            .await
            .expect("frame")
            .expect("frame ok")
            .into_data()
            .expect("data frame");
        let next = String::from_utf8(next.to_vec()).expect("utf8");
        assert!(next.contains("event: task_status_changed"), "got {next}");
        assert!(next.contains("\"status\":\"plan\""), "got {next}");
    }
}
