use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::server::ErrResponse;
use crate::tasks::{Task, TaskEvent};
use crate::worker::SystemStats;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The request never got an answer. Safe to retry.
    #[error("Error connecting to worker {worker}: {message}")]
    Transport { worker: String, message: String },

    #[error("Worker {worker} responded {status}: {message}")]
    Status {
        worker: String,
        status: u16,
        message: String,
    },

    #[error("Error decoding response from worker {worker}: {message}")]
    Decode { worker: String, message: String },
}

impl ClientError {
    pub fn transport(worker: &str, err: impl ToString) -> Self {
        ClientError::Transport {
            worker: worker.to_string(),
            message: err.to_string(),
        }
    }

    pub fn decode(worker: &str, err: impl ToString) -> Self {
        ClientError::Decode {
            worker: worker.to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport { .. })
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// The manager's view of the worker HTTP surface.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// `POST /tasks`, expecting `201` and the accepted task.
    async fn send_event(&self, worker: &str, event: &TaskEvent) -> ClientResult<Task>;

    /// `DELETE /tasks/{id}`, expecting `204`.
    async fn stop_task(&self, worker: &str, task_id: Uuid) -> ClientResult<()>;

    async fn get_tasks(&self, worker: &str) -> ClientResult<Vec<Task>>;

    async fn get_stats(&self, worker: &str) -> ClientResult<SystemStats>;
}

#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    client: reqwest::Client,
}

impl HttpWorkerClient {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpWorkerClient { client })
    }

    async fn check_status(
        worker: &str,
        response: reqwest::Response,
    ) -> ClientResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(ClientError::Status {
            worker: worker.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn send_event(&self, worker: &str, event: &TaskEvent) -> ClientResult<Task> {
        let url = format!("http://{worker}/tasks");
        let response = self
            .client
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(|e| ClientError::transport(worker, e))?;

        let response = Self::check_status(worker, response).await?;
        response
            .json::<Task>()
            .await
            .map_err(|e| ClientError::decode(worker, e))
    }

    async fn stop_task(&self, worker: &str, task_id: Uuid) -> ClientResult<()> {
        let url = format!("http://{worker}/tasks/{task_id}");
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ClientError::transport(worker, e))?;

        Self::check_status(worker, response).await?;
        Ok(())
    }

    async fn get_tasks(&self, worker: &str) -> ClientResult<Vec<Task>> {
        let url = format!("http://{worker}/tasks");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::transport(worker, e))?;

        let response = Self::check_status(worker, response).await?;
        response
            .json::<Vec<Task>>()
            .await
            .map_err(|e| ClientError::decode(worker, e))
    }

    async fn get_stats(&self, worker: &str) -> ClientResult<SystemStats> {
        let url = format!("http://{worker}/stats");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::transport(worker, e))?;

        let response = Self::check_status(worker, response).await?;
        response
            .json::<SystemStats>()
            .await
            .map_err(|e| ClientError::decode(worker, e))
    }
}
