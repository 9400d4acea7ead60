//! Route table, handlers and request middleware.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use chrono::Utc;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use super::error::ApiError;
use super::types::{
    CreateTaskRequest, HealthResponse, MessageBody, ServiceIndex, UpdateTaskRequest,
};
use crate::logger::Logger;
use crate::metrics::Metrics;
use crate::tasks::{Task, TaskManager, TaskStats};

/// Upper bound on reading a request and producing its response, taken as
/// one total rather than separate read and write limits.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<TaskManager>,
    pub metrics: Arc<Metrics>,
    pub log: Logger,
}

impl AppState {
    /// Errors the HTTP layer detects on its own are counted here; business
    /// errors are counted by the task manager.
    fn reject(&self, message: &str) -> ApiError {
        self.metrics.increment_errors();
        ApiError::InvalidArgument(message.to_string())
    }

    fn invalid_body(&self, rejection: JsonRejection) -> ApiError {
        debug!(reason = %rejection.body_text(), "rejected request body");
        self.reject("Invalid request body")
    }
}

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(index).fallback(method_not_allowed))
        .route("/health", get(health).fallback(method_not_allowed))
        .route("/stats", get(stats).fallback(method_not_allowed))
        .route(
            "/tasks",
            get(list_tasks)
                .post(create_task)
                .fallback(method_not_allowed),
        )
        .route("/tasks/", any(missing_task_id))
        .route(
            // Catch-all so ids containing '/' reach the handlers and come
            // back as "task not found".
            "/tasks/*id",
            get(get_task)
                .put(update_task)
                .delete(delete_task)
                .fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), track_requests));
    with_request_timeout(routes, REQUEST_TIMEOUT)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Cut requests off after `limit` and answer with the JSON 408.
fn with_request_timeout<S>(routes: Router<S>, limit: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    routes
        .layer(TimeoutLayer::new(limit))
        .layer(middleware::map_response(json_timeout))
}

/// `TimeoutLayer` answers with an empty 408; give it the usual error body.
async fn json_timeout(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        ApiError::Timeout.into_response()
    } else {
        response
    }
}

/// Counts every request and logs it on the way in and out.
async fn track_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    state.metrics.increment_requests();

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let started = Instant::now();
    state
        .log
        .in_scope(|| info!(method = %method, path = %path, remote = %remote, "request started"));

    let response = next.run(req).await;

    state.log.in_scope(|| {
        info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        )
    });
    response
}

async fn index() -> Json<ServiceIndex> {
    Json(ServiceIndex::new())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        time: Utc::now().to_rfc3339(),
    })
}

async fn stats(State(state): State<AppState>) -> Json<TaskStats> {
    Json(state.tasks.get_stats().await)
}

async fn list_tasks(State(state): State<AppState>) -> Json<Vec<Task>> {
    Json(state.tasks.list().await)
}

async fn create_task(
    State(state): State<AppState>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let Json(request) = body.map_err(|rejection| state.invalid_body(rejection))?;
    let task = state
        .tasks
        .create(
            request.title.as_deref().unwrap_or_default(),
            request.description.as_deref().unwrap_or_default(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.get(&id).await?))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(request) = body.map_err(|rejection| state.invalid_body(rejection))?;
    Ok(Json(state.tasks.update(&id, request.into()).await?))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageBody>, ApiError> {
    state.tasks.delete(&id).await?;
    Ok(Json(MessageBody {
        message: "Task deleted".to_string(),
    }))
}

async fn missing_task_id(State(state): State<AppState>) -> ApiError {
    state.reject("Task ID is required")
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn not_found() -> ApiError {
    ApiError::NotFound("not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::ErrorBody;
    use crate::storage::{MemoryStorage, Storage};
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use http_body_util::BodyExt;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let storage: Arc<dyn Storage<Task>> = Arc::new(MemoryStorage::new(Logger::root()));
        let tasks = Arc::new(TaskManager::new(
            storage,
            Arc::clone(&metrics),
            Logger::root(),
        ));
        let state = AppState {
            tasks,
            metrics: Arc::clone(&metrics),
            log: Logger::root(),
        };
        (router(state), metrics)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> Response {
        let mut request = HttpRequest::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("content-type", "application/json");
        }
        let request = request
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn read<T: DeserializeOwned>(response: Response) -> T {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(app: &Router) -> Task {
        let response = send(
            app,
            "POST",
            "/tasks",
            Some(r#"{"title":"Test","description":"d"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        read(response).await
    }

    #[tokio::test]
    async fn create_returns_201_with_a_pending_task() {
        let (app, _) = app();
        let response = send(
            &app,
            "POST",
            "/tasks",
            Some(r#"{"title":"Test","description":"d"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );

        let body: Value = read(response).await;
        assert!(body["id"].as_str().unwrap().starts_with("task-"));
        assert_eq!(body["title"], "Test");
        assert_eq!(body["description"], "d");
        assert_eq!(body["status"], "pending");
        assert_eq!(body["created_at"], body["updated_at"]);
    }

    #[tokio::test]
    async fn list_after_create_holds_the_task() {
        let (app, _) = app();
        let task = create(&app).await;

        let response = send(&app, "GET", "/tasks", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let tasks: Vec<Task> = read(response).await;
        assert_eq!(tasks, vec![task]);
    }

    #[tokio::test]
    async fn put_changes_only_the_given_fields() {
        let (app, _) = app();
        let task = create(&app).await;

        let response = send(
            &app,
            "PUT",
            &format!("/tasks/{}", task.id),
            Some(r#"{"status":"completed"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let updated: Task = read(response).await;
        assert_eq!(updated.status, "completed");
        assert_eq!(updated.title, task.title);
        assert_eq!(updated.description, task.description);
        assert!(updated.updated_at > updated.created_at);
    }

    #[tokio::test]
    async fn deleted_tasks_are_gone() {
        let (app, _) = app();
        let task = create(&app).await;
        let uri = format!("/tasks/{}", task.id);

        let response = send(&app, "DELETE", &uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = read(response).await;
        assert_eq!(body, json!({"message": "Task deleted"}));

        let response = send(&app, "GET", &uri, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = read(response).await;
        assert_eq!(body.error, "task not found");
    }

    #[tokio::test]
    async fn empty_title_is_a_counted_bad_request() {
        let (app, metrics) = app();
        let response = send(&app, "POST", "/tasks", Some(r#"{"title":""}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = read(response).await;
        assert_eq!(body.error, "title is required");
        assert_eq!(metrics.errors(), 1);
        assert_eq!(metrics.requests(), 1);
    }

    #[tokio::test]
    async fn malformed_json_is_a_counted_bad_request() {
        let (app, metrics) = app();
        let response = send(&app, "POST", "/tasks", Some("{not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = read(response).await;
        assert_eq!(body.error, "Invalid request body");
        assert_eq!(metrics.errors(), 1);
    }

    #[tokio::test]
    async fn empty_id_is_a_bad_request() {
        let (app, metrics) = app();
        let response = send(&app, "GET", "/tasks/", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = read(response).await;
        assert_eq!(body.error, "Task ID is required");
        assert_eq!(metrics.errors(), 1);
    }

    #[tokio::test]
    async fn unsupported_methods_get_a_json_405() {
        let (app, metrics) = app();
        for (method, uri) in [("DELETE", "/tasks"), ("POST", "/tasks/task-1"), ("PUT", "/health")] {
            let response = send(&app, method, uri, None).await;
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method} {uri}");
            let body: ErrorBody = read(response).await;
            assert_eq!(body.error, "Method not allowed");
        }
        assert_eq!(metrics.errors(), 0);
        assert_eq!(metrics.requests(), 3);
    }

    #[tokio::test]
    async fn ids_with_slashes_are_unknown_tasks() {
        let (app, metrics) = app();
        let response = send(&app, "GET", "/tasks/a/b", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = read(response).await;
        assert_eq!(body.error, "task not found");
        assert_eq!(metrics.errors(), 1);

        let response = send(&app, "DELETE", "/tasks/a/b", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(metrics.errors(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_requests_time_out_with_a_json_408() {
        let slow = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(REQUEST_TIMEOUT * 6).await;
                "late"
            }),
        );
        let app = with_request_timeout(slow, REQUEST_TIMEOUT);

        let response = send(&app, "GET", "/slow", None).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        let body: ErrorBody = read(response).await;
        assert_eq!(body.error, "request timed out");
    }

    #[tokio::test]
    async fn unknown_paths_are_json_404s() {
        let (app, _) = app();
        let response = send(&app, "GET", "/nowhere", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = read(response).await;
        assert_eq!(body.error, "not found");
    }

    #[tokio::test]
    async fn index_and_health_describe_the_service() {
        let (app, _) = app();
        let index: Value = read(send(&app, "GET", "/", None).await).await;
        assert_eq!(index["service"], "Task Manager API");
        assert_eq!(index["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(index["endpoints"]["POST /tasks"], "Create a new task");

        let health: HealthResponse = read(send(&app, "GET", "/health", None).await).await;
        assert_eq!(health.status, "healthy");
        assert!(chrono::DateTime::parse_from_rfc3339(&health.time).is_ok());
    }

    #[tokio::test]
    async fn stats_reflect_requests_and_statuses() {
        let (app, _) = app();
        create(&app).await;
        create(&app).await;
        send(&app, "POST", "/tasks", Some(r#"{"title":""}"#)).await;

        let stats: Value = read(send(&app, "GET", "/stats", None).await).await;
        assert_eq!(stats["total_tasks"], 2);
        assert_eq!(stats["total_requests"], 4);
        assert_eq!(stats["total_errors"], 1);
        assert_eq!(stats["by_status"]["pending"], 2);
    }
}
