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

use super::types::{Manager, ManagerError, ManagerServer};
use crate::server::{self, ErrResponse};
use crate::tasks::{State, Task, TaskEvent};

pub fn router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/tasks", get(get_tasks).post(start_task))
        .route("/tasks/{id}", delete(stop_task))
        .with_state(manager)
}

impl ManagerServer {
    pub fn new(manager: Arc<Manager>, addr: SocketAddr) -> Self {
        Self { manager, addr }
    }

    pub async fn start_server(self, shutdown: CancellationToken) -> io::Result<()> {
        info!(addr = %self.addr, "Starting manager API");
        let listener = server::bind(self.addr).await?;
        server::serve(listener, router(self.manager), shutdown).await
    }
}

async fn get_tasks(AxumState(manager): AxumState<Arc<Manager>>) -> Json<Vec<Task>> {
    Json(manager.get_tasks().await)
}

async fn start_task(AxumState(manager): AxumState<Arc<Manager>>, body: Bytes) -> Response {
    let event: TaskEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            let msg = format!("Error unmarshalling body: {e}");
            info!("{msg}");
            return ErrResponse::new(StatusCode::BAD_REQUEST, msg).into_response();
        }
    };
    if let Err(e) = event.task().validate() {
        return ErrResponse::new(StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
    if event.state() != State::Scheduled {
        return ErrResponse::new(
            StatusCode::BAD_REQUEST,
            format!("Only scheduled events can be submitted, got {}", event.state()),
        )
        .into_response();
    }

    let task = event.task().clone();
    manager.add_task(event).await;
    info!(task_id = %task.id, "Added task");
    (StatusCode::CREATED, Json(task)).into_response()
}

async fn stop_task(
    AxumState(manager): AxumState<Arc<Manager>>,
    Path(id): Path<String>,
) -> Response {
    let Ok(task_id) = Uuid::parse_str(&id) else {
        return ErrResponse::new(StatusCode::BAD_REQUEST, format!("Invalid task id {id}"))
            .into_response();
    };

    match manager.stop_task(task_id).await {
        Ok(event) => (StatusCode::OK, Json(event)).into_response(),
        Err(ManagerError::TaskNotFound(_)) => ErrResponse::new(
            StatusCode::NOT_FOUND,
            format!("No task with id {task_id} found"),
        )
        .into_response(),
        Err(e @ (ManagerError::Task(_) | ManagerError::NotAssigned(_))) => {
            ErrResponse::new(StatusCode::CONFLICT, e.to_string()).into_response()
        }
        Err(e) => ErrResponse::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
