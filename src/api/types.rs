//! Request and response bodies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tasks::TaskUpdate;

/// Body of `POST /tasks`. Absent fields read as empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Body of `PUT /tasks/{id}`. Absent or empty fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl From<UpdateTaskRequest> for TaskUpdate {
    fn from(request: UpdateTaskRequest) -> Self {
        Self {
            title: request.title.unwrap_or_default(),
            description: request.description.unwrap_or_default(),
            status: request.status.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// RFC 3339.
    pub time: String,
}

/// Body of `GET /`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceIndex {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: BTreeMap<&'static str, &'static str>,
}

impl ServiceIndex {
    pub fn new() -> Self {
        let endpoints = [
            ("GET /health", "Health check"),
            ("GET /stats", "Get statistics"),
            ("GET /tasks", "List all tasks"),
            ("POST /tasks", "Create a new task"),
            ("GET /tasks/{id}", "Get a specific task"),
            ("PUT /tasks/{id}", "Update a task"),
            ("DELETE /tasks/{id}", "Delete a task"),
        ];
        Self {
            service: "Task Manager API",
            version: env!("CARGO_PKG_VERSION"),
            endpoints: endpoints.into_iter().collect(),
        }
    }
}

impl Default for ServiceIndex {
    fn default() -> Self {
        Self::new()
    }
}
