//! Aggregate health reporting (SPEC_FULL.md §1 supplement).
//!
//! Each subsystem contributes a `ComponentHealth`; `HealthReport::overall`
//! rolls them up to the worst status present, so a single probe endpoint
//! can answer "is this instance healthy" without the caller knowing the
//! internal module layout.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub detail: Option<String>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self { status: HealthStatus::Healthy, detail: None }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self { status: HealthStatus::Degraded, detail: Some(detail.into()) }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self { status: HealthStatus::Unhealthy, detail: Some(detail.into()) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthReport {
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthReport {
    pub fn new() -> Self {
        Self { components: HashMap::new() }
    }

    pub fn with(mut self, name: impl Into<String>, health: ComponentHealth) -> Self {
        self.components.insert(name.into(), health);
        self
    }

    pub fn overall(&self) -> HealthStatus {
        self.components.values().map(|c| c.status).max().unwrap_or(HealthStatus::Healthy)
    }
}

impl Default for HealthReport {
    fn default() -> Self {
        Self::new()
    }
}
