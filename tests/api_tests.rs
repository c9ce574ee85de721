mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use r_maestro::manager::Manager;
use r_maestro::manager::api::router as manager_api;
use r_maestro::node::Node;
use r_maestro::scheduler::RoundRobin;
use r_maestro::tasks::{State, Task};
use r_maestro::worker::Worker;
use r_maestro::worker::api::router as worker_api;
use uuid::Uuid;

use common::{FakeExecutor, LocalWorkerClient, scheduled, task};

async fn request(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<String>,
) -> Result<(StatusCode, Value), String> {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(payload) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload)),
        None => builder.body(Body::empty()),
    }
    .map_err(|err| format!("build request: {err}"))?;

    let response = router
        .clone()
        .oneshot(req)
        .await
        .map_err(|err| format!("route request: {err}"))?;
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .map_err(|err| format!("read response body: {err}"))?;

    let parsed = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|err| format!("parse response body: {err}"))?
    };
    Ok((status, parsed))
}

fn worker_router() -> (Router, Arc<Worker>) {
    let worker = Arc::new(Worker::new("worker-api", FakeExecutor::new()));
    (worker_api(worker.clone()), worker)
}

fn manager_router() -> (Router, Arc<Manager>) {
    let w1 = Arc::new(Worker::new("w1:8080", FakeExecutor::new()));
    let client = Arc::new(LocalWorkerClient::new(&[("w1:8080", w1)]));
    let manager = Arc::new(Manager::new(
        vec![Node::for_worker("w1:8080")],
        Box::new(RoundRobin::new()),
        client,
    ));
    (manager_api(manager.clone()), manager)
}

fn event_body(task: &Task, state: &str) -> String {
    json!({
        "state": state,
        "task": {
            "id": task.id,
            "name": task.name,
            "image": task.image,
        }
    })
    .to_string()
}

#[tokio::test]
async fn worker_post_task_queues_event() -> Result<(), String> {
    let (router, worker) = worker_router();
    let t = task("nginx:latest");

    let (status, body) = request(
        &router,
        Method::POST,
        "/tasks",
        Some(event_body(&t, "Scheduled")),
    )
    .await?;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], json!(t.id));
    assert_eq!(body["image"], "nginx:latest");
    assert_eq!(worker.queue_len().await, 1);
    Ok(())
}

#[tokio::test]
async fn worker_post_rejects_unknown_fields() -> Result<(), String> {
    let (router, worker) = worker_router();
    let t = task("nginx:latest");
    let body = json!({
        "state": "Scheduled",
        "task": {"id": t.id, "image": "nginx:latest"},
        "priority": 1,
    })
    .to_string();

    let (status, body) = request(&router, Method::POST, "/tasks", Some(body)).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["http_status_code"], 400);
    assert!(
        body["message"]
            .as_str()
            .is_some_and(|m| m.starts_with("Error unmarshalling body"))
    );
    assert_eq!(worker.queue_len().await, 0);
    Ok(())
}

#[tokio::test]
async fn worker_post_rejects_invalid_task() -> Result<(), String> {
    let (router, worker) = worker_router();
    let t = task("");

    let (status, _) = request(
        &router,
        Method::POST,
        "/tasks",
        Some(event_body(&t, "Scheduled")),
    )
    .await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(worker.queue_len().await, 0);
    Ok(())
}

#[tokio::test]
async fn worker_get_tasks_lists_registry() -> Result<(), String> {
    let (router, worker) = worker_router();
    let event = scheduled(task("redis:7"));
    let task_id = event.task_id();
    worker.add_task(event).await;
    worker.run_task().await.map_err(|e| e.to_string())?;

    let (status, body) = request(&router, Method::GET, "/tasks", None).await?;

    assert_eq!(status, StatusCode::OK);
    let tasks: Vec<Task> = serde_json::from_value(body).map_err(|e| e.to_string())?;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task_id);
    assert_eq!(tasks[0].state, State::Running);
    Ok(())
}

#[tokio::test]
async fn worker_delete_task() -> Result<(), String> {
    let (router, worker) = worker_router();
    let event = scheduled(task("redis:7"));
    let task_id = event.task_id();
    worker.add_task(event).await;
    worker.run_task().await.map_err(|e| e.to_string())?;

    let (status, body) =
        request(&router, Method::DELETE, &format!("/tasks/{task_id}"), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
    assert_eq!(worker.queue_len().await, 1);

    let (status, _) = request(
        &router,
        Method::DELETE,
        &format!("/tasks/{}", Uuid::new_v4()),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = request(&router, Method::DELETE, "/tasks/not-a-uuid", None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn worker_stats() -> Result<(), String> {
    let (router, _worker) = worker_router();

    let (status, body) = request(&router, Method::GET, "/stats", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["task_count"], 0);
    assert!(body["total_memory"].is_u64());
    Ok(())
}

#[tokio::test]
async fn manager_post_task_queues_event() -> Result<(), String> {
    let (router, manager) = manager_router();
    let t = task("nginx:latest");

    let (status, body) = request(
        &router,
        Method::POST,
        "/tasks",
        Some(event_body(&t, "Scheduled")),
    )
    .await?;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], json!(t.id));
    assert_eq!(manager.pending_len().await, 1);
    Ok(())
}

#[tokio::test]
async fn manager_post_only_accepts_scheduled_events() -> Result<(), String> {
    let (router, manager) = manager_router();
    let t = task("nginx:latest");

    let (status, body) = request(
        &router,
        Method::POST,
        "/tasks",
        Some(event_body(&t, "Running")),
    )
    .await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["http_status_code"], 400);
    assert_eq!(manager.pending_len().await, 0);
    Ok(())
}

#[tokio::test]
async fn manager_post_rejects_malformed_body() -> Result<(), String> {
    let (router, manager) = manager_router();

    let (status, _) =
        request(&router, Method::POST, "/tasks", Some("{\"state\":".to_string())).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(manager.pending_len().await, 0);
    Ok(())
}

#[tokio::test]
async fn manager_get_tasks_after_dispatch() -> Result<(), String> {
    let (router, manager) = manager_router();
    let event = scheduled(task("nginx:latest"));
    let task_id = event.task_id();
    manager.add_task(event).await;
    manager.send_work().await;

    let (status, body) = request(&router, Method::GET, "/tasks", None).await?;

    assert_eq!(status, StatusCode::OK);
    let tasks: Vec<Task> = serde_json::from_value(body).map_err(|e| e.to_string())?;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task_id);
    assert_eq!(tasks[0].state, State::Scheduled);
    Ok(())
}

#[tokio::test]
async fn manager_delete_task() -> Result<(), String> {
    let (router, manager) = manager_router();
    let event = scheduled(task("nginx:latest"));
    let task_id = event.task_id();
    manager.add_task(event).await;
    manager.send_work().await;

    let (status, body) =
        request(&router, Method::DELETE, &format!("/tasks/{task_id}"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "Completed");
    assert_eq!(body["task"]["id"], json!(task_id));
    assert_eq!(manager.pending_len().await, 1);

    let (status, body) = request(
        &router,
        Method::DELETE,
        &format!("/tasks/{}", Uuid::new_v4()),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["http_status_code"], 404);
    Ok(())
}

#[tokio::test]
async fn manager_delete_unplaced_task_conflicts() -> Result<(), String> {
    let client = Arc::new(LocalWorkerClient::new(&[]));
    let manager = Arc::new(Manager::new(Vec::new(), Box::new(RoundRobin::new()), client));
    let router = manager_api(manager.clone());
    let event = scheduled(task("nginx:latest"));
    let task_id = event.task_id();
    manager.add_task(event).await;
    manager.send_work().await;

    let (status, body) =
        request(&router, Method::DELETE, &format!("/tasks/{task_id}"), None).await?;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["http_status_code"], 409);
    assert_eq!(manager.pending_len().await, 0);
    Ok(())
}
