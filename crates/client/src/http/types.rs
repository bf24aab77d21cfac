//! Wire types for the backend API envelope.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized successful response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: T,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

/// Normalized failure body the backend returns on error statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub status_code: u16,
    pub error_kind: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

/// Per-call overrides of the client defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOverrides {
    /// Hard wall-clock timeout per attempt.
    pub timeout: Option<Duration>,
    /// Total attempt budget for this call.
    pub max_attempts: Option<u32>,
    /// Send without a bearer token even when one is available.
    pub skip_auth: bool,
}
