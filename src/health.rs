//! Liveness and readiness reporting.

use crate::index::IndexManager;
use serde::Serialize;
use std::sync::Arc;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    /// Whether a snapshot is published.
    pub index_loaded: bool,
}

/// Reports process health. Never fails.
pub struct HealthReporter {
    index: Arc<IndexManager>,
}

impl HealthReporter {
    /// Reporter observing `index`.
    pub fn new(index: Arc<IndexManager>) -> Self {
        Self { index }
    }

    /// Current status.
    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            status: "ok",
            index_loaded: self.index.is_loaded(),
        }
    }
}
