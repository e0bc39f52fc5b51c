//! Mutations waiting in the offline queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::transport::Method;

/// Default number of attempts before an operation is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Sync,
}

/// A pending remote write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Assigned when the operation is enqueued
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    /// Collection name the write targets
    pub resource: String,
    pub endpoint: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Enqueue time; replay order
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl QueuedOperation {
    pub fn new(
        operation_type: OperationType,
        resource: impl Into<String>,
        endpoint: impl Into<String>,
        method: Method,
    ) -> Self {
        Self {
            id: String::new(),
            operation_type,
            resource: resource.into(),
            endpoint: endpoint.into(),
            method,
            data: None,
            timestamp: Utc::now(),
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Stamp a fresh id and enqueue time.
    pub(crate) fn stamp(&mut self) {
        self.id = Uuid::new_v4().to_string();
        self.timestamp = Utc::now();
    }

    /// True once no attempts remain.
    pub fn is_exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }

    /// Human-readable label used in notices and logs.
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.endpoint)
    }
}
