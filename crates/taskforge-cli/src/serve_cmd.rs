//! `taskforge serve` command: minimal read-only reporting API plus the
//! Realtime Hub's WebSocket endpoint.
//!
//! The full REST CRUD surface (`/api/v1/projects`, `/api/v1/tasks`, ...) is
//! an external collaborator's responsibility; this process only exposes
//! enough to debug a running fleet and to let operator UIs subscribe to
//! live events.

use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use taskforge_core::events::EventBus;
use taskforge_core::realtime::RealtimeHub;
use taskforge_db::models::{Project, Task};
use taskforge_db::queries::tasks::TaskProgress;
use taskforge_db::queries::{projects as project_db, tasks as task_db};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: format!("{err:#}") }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub todo: i64,
    pub planning: i64,
    pub plan_reviewing: i64,
    pub implementing: i64,
    pub code_reviewing: i64,
    pub done: i64,
    pub cancelled: i64,
    pub total: i64,
}

impl From<TaskProgress> for ProgressResponse {
    fn from(p: TaskProgress) -> Self {
        Self {
            todo: p.todo,
            planning: p.planning,
            plan_reviewing: p.plan_reviewing,
            implementing: p.implementing,
            code_reviewing: p.code_reviewing,
            done: p.done,
            cancelled: p.cancelled,
            total: p.total,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectSummaryResponse {
    #[serde(flatten)]
    pub project: Project,
    pub progress: ProgressResponse,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetailResponse {
    #[serde(flatten)]
    pub project: Project,
    pub progress: ProgressResponse,
    pub tasks: Vec<Task>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool, bus: EventBus) -> Router {
    let api = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/v1/projects", get(list_projects))
        .route("/api/v1/projects/{id}", get(get_project_detail))
        .route("/api/v1/tasks/{id}", get(get_task_detail))
        .layer(CorsLayer::permissive())
        .with_state(pool);

    let realtime = RealtimeHub::new(bus).router();

    api.merge(realtime)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, bus: EventBus, bind: &str, port: u16) -> Result<()> {
    let app = build_router(pool, bus);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("taskforge serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    tracing::info!("taskforge serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn index(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let project_list = project_db::list_projects(&pool).await.map_err(AppError::internal)?;

    let rows = if project_list.is_empty() {
        "<tr><td colspan=\"3\">No projects found.</td></tr>".to_string()
    } else {
        project_list
            .iter()
            .map(|p| {
                format!(
                    "<tr><td><a href=\"/api/v1/projects/{id}\">{name}</a></td><td>{branch}</td><td>{id}</td></tr>",
                    id = p.id,
                    name = p.name,
                    branch = p.main_branch,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>taskforge</title></head><body>\
<h1>taskforge</h1>\
<p><a href=\"/api/v1/projects\">/api/v1/projects</a> | <a href=\"/health\">/health</a></p>\
<table><tr><th>Project</th><th>Main branch</th><th>ID</th></tr>{rows}</table>\
</body></html>"
    );

    Ok(Html(html).into_response())
}

async fn list_projects(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let project_list = project_db::list_projects(&pool).await.map_err(AppError::internal)?;

    let mut results = Vec::with_capacity(project_list.len());
    for project in project_list {
        let progress = task_db::get_task_progress(&pool, project.id).await.map_err(AppError::internal)?;
        results.push(ProjectSummaryResponse { project, progress: progress.into() });
    }

    Ok(Json(results).into_response())
}

async fn get_project_detail(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let project = project_db::get_project(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("project {id} not found")))?;

    let progress = task_db::get_task_progress(&pool, id).await.map_err(AppError::internal)?;
    let tasks = task_db::list_tasks_for_project(&pool, id).await.map_err(AppError::internal)?;

    Ok(Json(ProjectDetailResponse { project, progress: progress.into(), tasks }).into_response())
}

async fn get_task_detail(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<axum::response::Response, AppError> {
    let task = task_db::get_task(&pool, id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {id} not found")))?;

    Ok(Json(task).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::PgPool;
    use tower::ServiceExt;

    use taskforge_core::events::EventBus;
    use taskforge_db::queries::projects::insert_project;
    use taskforge_db::queries::tasks::insert_task;
    use taskforge_test_utils::{create_test_db, drop_test_db};

    async fn send_request(pool: PgPool, uri: &str) -> axum::response::Response {
        let app = super::build_router(pool.clone(), EventBus::new(pool));
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_index_returns_html() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_request(pool.clone(), "/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").expect("should have content-type header").to_str().unwrap();
        assert!(content_type.contains("text/html"), "content-type should contain text/html, got: {content_type}");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_health() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_request(pool.clone(), "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_list_projects_empty() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_request(pool.clone(), "/api/v1/projects").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json, serde_json::json!([]));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_get_project_detail() {
        let (pool, db_name) = create_test_db().await;

        let project = insert_project(&pool, "demo", "main", "/tmp/demo-worktrees", None, "claude-code", None)
            .await
            .expect("insert_project should succeed");

        let _task = insert_task(&pool, project.id, "add hello endpoint", "wire up GET /hello")
            .await
            .expect("insert_task should succeed");

        let resp = send_request(pool.clone(), &format!("/api/v1/projects/{}", project.id)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["name"], "demo");
        let tasks = json["tasks"].as_array().expect("should have tasks array");
        assert_eq!(tasks.len(), 1);
        assert!(json.get("progress").is_some(), "should have progress object");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_get_project_not_found() {
        let (pool, db_name) = create_test_db().await;

        let random_id = uuid::Uuid::new_v4();
        let resp = send_request(pool.clone(), &format!("/api/v1/projects/{random_id}")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_get_task_detail() {
        let (pool, db_name) = create_test_db().await;

        let project = insert_project(&pool, "demo2", "main", "/tmp/demo2-worktrees", None, "claude-code", None)
            .await
            .expect("insert_project should succeed");

        let task = insert_task(&pool, project.id, "my task", "a detailed task").await.expect("insert_task should succeed");

        let resp = send_request(pool.clone(), &format!("/api/v1/tasks/{}", task.id)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["title"], "my task");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_get_task_not_found() {
        let (pool, db_name) = create_test_db().await;

        let random_id = uuid::Uuid::new_v4();
        let resp = send_request(pool.clone(), &format!("/api/v1/tasks/{random_id}")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
