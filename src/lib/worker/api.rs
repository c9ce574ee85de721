use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::types::{SystemStats, TaskServer, Worker, WorkerError};
use crate::server::{self, ErrResponse};
use crate::tasks::{Task, TaskEvent};

pub fn router(worker: Arc<Worker>) -> Router {
    Router::new()
        .route("/tasks", get(get_tasks).post(start_task))
        .route("/tasks/{id}", delete(stop_task))
        .route("/stats", get(collect_stats))
        .with_state(worker)
}

impl TaskServer {
    pub fn new(worker: Arc<Worker>, addr: SocketAddr) -> Self {
        Self { worker, addr }
    }

    pub async fn start_server(self, shutdown: CancellationToken) -> io::Result<()> {
        info!(worker = %self.worker.name, addr = %self.addr, "Starting TaskServer");
        let listener = server::bind(self.addr).await?;
        server::serve(listener, router(self.worker), shutdown).await
    }
}

async fn get_tasks(AxumState(worker): AxumState<Arc<Worker>>) -> Json<Vec<Task>> {
    Json(worker.get_tasks().await)
}

async fn start_task(AxumState(worker): AxumState<Arc<Worker>>, body: Bytes) -> Response {
    let event: TaskEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            let msg = format!("Error unmarshalling body: {e}");
            info!(worker = %worker.name, "{msg}");
            return ErrResponse::new(StatusCode::BAD_REQUEST, msg).into_response();
        }
    };
    if let Err(e) = event.task().validate() {
        return ErrResponse::new(StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    let task = event.task().clone();
    worker.add_task(event).await;
    info!(worker = %worker.name, task_id = %task.id, "Task added");
    (StatusCode::CREATED, Json(task)).into_response()
}

async fn stop_task(AxumState(worker): AxumState<Arc<Worker>>, Path(id): Path<String>) -> Response {
    let Ok(task_id) = Uuid::parse_str(&id) else {
        return ErrResponse::new(StatusCode::BAD_REQUEST, format!("Invalid task id {id}"))
            .into_response();
    };

    match worker.enqueue_stop(task_id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(WorkerError::TaskNotFound(_)) => ErrResponse::new(
            StatusCode::NOT_FOUND,
            format!("No task with id {task_id} found"),
        )
        .into_response(),
        Err(e) => ErrResponse::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn collect_stats(AxumState(worker): AxumState<Arc<Worker>>) -> Json<SystemStats> {
    Json(worker.collect_stats().await)
}
