//! REST surface tests driven through the router with `tower::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use tower::util::ServiceExt;

use dispatchd::adapters::AdapterRegistry;
use dispatchd::api::{api_routes, ApiState};
use dispatchd::budget::Governor;
use dispatchd::config::DaemonConfig;
use dispatchd::context::{Injector, PersonaLoader};
use dispatchd::hub::Hub;
use dispatchd::notify::Dispatcher;
use dispatchd::queue::TaskQueue;
use dispatchd::store::model::{TaskStatus, Worker, WorkerStatus};
use dispatchd::store::{Database, LibSqlBackend};
use dispatchd::worker::{UnitDeps, WorkerPool};

async fn test_app() -> (Router, Arc<dyn Database>, tempfile::TempDir) {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let persona_dir = tempfile::tempdir().unwrap();

    let notify = Arc::new(Dispatcher::disabled());
    let queue = TaskQueue::new(Arc::clone(&db));
    let hub = Hub::new();
    let deps = UnitDeps {
        db: Arc::clone(&db),
        queue: queue.clone(),
        registry: Arc::new(AdapterRegistry::with_builtins()),
        injector: Arc::new(Injector::new(PersonaLoader::new(persona_dir.path()))),
        governor: Arc::new(Governor::new(Arc::clone(&db), Arc::clone(&notify))),
        hub: hub.clone(),
        notify,
        config: DaemonConfig {
            poll_interval: Duration::from_millis(100),
            ..DaemonConfig::default()
        },
    };

    let state = ApiState {
        db: Arc::clone(&db),
        queue,
        pool: Arc::new(WorkerPool::new(deps)),
        hub,
    };
    (api_routes(state), db, persona_dir)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn enqueue_and_fetch_task() {
    let (app, _db, _dir) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/tasks",
            serde_json::json!({ "title": "hello", "prompt": "write hello world", "priority": 3 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_i64().unwrap();

    let response = app.clone().oneshot(get(&format!("/api/tasks/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let task = body_json(response).await;
    assert_eq!(task["status"], "pending");
    assert_eq!(task["priority"], 3);

    let response = app
        .clone()
        .oneshot(get("/api/tasks?status=pending"))
        .await
        .unwrap();
    let tasks = body_json(response).await;
    assert_eq!(tasks.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn empty_prompt_is_rejected() {
    let (app, _db, _dir) = test_app().await;
    let response = app
        .oneshot(post_json("/api/tasks", serde_json::json!({ "prompt": "" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_task_is_404() {
    let (app, _db, _dir) = test_app().await;
    let response = app.oneshot(get("/api/tasks/9999")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn skip_only_applies_to_pending_tasks() {
    let (app, db, _dir) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json("/api/tasks", serde_json::json!({ "prompt": "p" })))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_i64().unwrap();

    // Claim it, then try to skip: conflict.
    db.claim_task(1).await.unwrap().unwrap();
    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/tasks/{id}/skip"), serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // A limit task requeues back to pending, then skips cleanly.
    db.update_task_status(id, TaskStatus::Limit).await.unwrap();
    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/tasks/{id}/requeue"), serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/tasks/{id}/skip"), serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        db.get_task(id).await.unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn requeue_rejects_pending_tasks() {
    let (app, _db, _dir) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json("/api/tasks", serde_json::json!({ "prompt": "p" })))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_i64().unwrap();

    let response = app
        .oneshot(post_json(&format!("/api/tasks/{id}/requeue"), serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pause_and_resume_worker() {
    let (app, db, _dir) = test_app().await;

    let worker_id = db
        .create_worker(&Worker {
            id: 0,
            name: "w".into(),
            cli_type: "claude".into(),
            command: "claude".into(),
            work_dir: String::new(),
            max_parallel: 1,
            status: WorkerStatus::Idle,
            project_id: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/workers/{worker_id}/pause"), serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        db.get_worker(worker_id).await.unwrap().status,
        WorkerStatus::Paused
    );

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/workers/{worker_id}/resume"), serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        db.get_worker(worker_id).await.unwrap().status,
        WorkerStatus::Idle
    );
}

#[tokio::test]
async fn schedules_validate_cron_expressions() {
    let (app, _db, _dir) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/schedules",
            serde_json::json!({
                "name": "nightly",
                "cron_expr": "0 0 2 * * *",
                "task_prompt": "run the nightly sweep",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(post_json(
            "/api/schedules",
            serde_json::json!({
                "name": "broken",
                "cron_expr": "whenever",
                "task_prompt": "p",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn usage_reports_daily_aggregate() {
    let (app, db, _dir) = test_app().await;

    let today = Utc::now().format("%Y-%m-%d").to_string();
    db.record_usage(Some(1), None, None, 100, 60, &today).await.unwrap();
    db.record_usage(Some(1), None, None, 40, 20, &today).await.unwrap();

    let response = app.oneshot(get("/api/usage")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary = body_json(response).await;
    let rows = summary.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["input_tokens"], 140);
    assert_eq!(rows[0]["output_tokens"], 80);
}
