//! In-memory warning log.
//!
//! Not part of the core spec surface, but the non-goal-excluded "audit/
//! telemetry consumer" needs something concrete to consume — this gives
//! bridge registry bootstrap diagnostics, outbound pressure transitions,
//! and instance lifecycle failures a place to land without implementing a
//! consumer ourselves.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum WarningCategory {
    BridgeRegistry,
    Outbound,
    SessionRouting,
    Instance,
    Onboarding,
    Security,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub enum WarningSeverity {
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Warning {
    pub id: String,
    pub category: WarningCategory,
    pub severity: WarningSeverity,
    pub message: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Warning {
    pub fn new(category: WarningCategory, severity: WarningSeverity, message: String, source: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category,
            severity,
            message,
            source,
            created_at: Utc::now(),
            acknowledged: false,
            acknowledged_at: None,
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.created_at).num_minutes()
    }
}

#[derive(Debug, Clone)]
pub struct WarningServiceConfig {
    pub max_warning_age_hours: i64,
    pub max_warnings: usize,
    pub auto_acknowledge_hours: i64,
}

impl Default for WarningServiceConfig {
    fn default() -> Self {
        Self { max_warning_age_hours: 24, max_warnings: 1000, auto_acknowledge_hours: 8 }
    }
}

pub struct WarningService {
    warnings: RwLock<HashMap<String, Warning>>,
    config: WarningServiceConfig,
}

impl WarningService {
    pub fn new(config: WarningServiceConfig) -> Self {
        Self { warnings: RwLock::new(HashMap::new()), config }
    }

    pub fn add_warning(&self, category: WarningCategory, severity: WarningSeverity, message: String, source: String) -> String {
        let warning = Warning::new(category, severity, message, source);
        let id = warning.id.clone();

        let mut warnings = self.warnings.write();
        if warnings.len() >= self.config.max_warnings {
            self.cleanup_oldest_internal(&mut warnings);
        }
        debug!(id = %id, category = ?category, severity = ?severity, "added warning");
        warnings.insert(id.clone(), warning);
        id
    }

    pub fn get_all_warnings(&self) -> Vec<Warning> {
        self.warnings.read().values().cloned().collect()
    }

    pub fn get_warnings_by_severity(&self, severity: WarningSeverity) -> Vec<Warning> {
        self.warnings.read().values().filter(|w| w.severity == severity).cloned().collect()
    }

    pub fn get_unacknowledged_warnings(&self) -> Vec<Warning> {
        self.warnings.read().values().filter(|w| !w.acknowledged).cloned().collect()
    }

    pub fn get_critical_warnings(&self) -> Vec<Warning> {
        self.get_warnings_by_severity(WarningSeverity::Critical)
    }

    pub fn acknowledge_warning(&self, id: &str) -> bool {
        let mut warnings = self.warnings.write();
        if let Some(warning) = warnings.get_mut(id) {
            warning.acknowledged = true;
            warning.acknowledged_at = Some(Utc::now());
            true
        } else {
            false
        }
    }

    pub fn auto_acknowledge_old_warnings(&self) -> usize {
        let threshold_minutes = self.config.auto_acknowledge_hours * 60;
        let mut warnings = self.warnings.write();
        let now = Utc::now();
        let mut count = 0;
        for warning in warnings.values_mut() {
            if !warning.acknowledged && warning.age_minutes() > threshold_minutes {
                warning.acknowledged = true;
                warning.acknowledged_at = Some(now);
                count += 1;
            }
        }
        count
    }

    pub fn clear_old_warnings(&self, hours_old: i64) -> usize {
        let mut warnings = self.warnings.write();
        let threshold_minutes = hours_old * 60;
        let before = warnings.len();
        warnings.retain(|_, w| w.age_minutes() <= threshold_minutes);
        before - warnings.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.read().len()
    }

    pub fn unacknowledged_count(&self) -> usize {
        self.warnings.read().values().filter(|w| !w.acknowledged).count()
    }

    pub fn has_critical_warnings(&self) -> bool {
        self.warnings.read().values().any(|w| w.severity == WarningSeverity::Critical && !w.acknowledged)
    }

    /// Periodic cleanup: auto-acknowledge stale warnings, then drop
    /// anything past the retention window.
    pub fn cleanup(&self) {
        self.auto_acknowledge_old_warnings();
        self.clear_old_warnings(self.config.max_warning_age_hours);
    }

    fn cleanup_oldest_internal(&self, warnings: &mut HashMap<String, Warning>) {
        let to_remove = warnings.len() / 10;
        if to_remove == 0 {
            return;
        }
        let mut sorted: Vec<_> = warnings.iter().collect();
        sorted.sort_by_key(|(_, w)| w.created_at);
        let ids: Vec<String> = sorted.into_iter().take(to_remove).map(|(id, _)| id.clone()).collect();
        for id in ids {
            warnings.remove(&id);
        }
    }
}

impl Default for WarningService {
    fn default() -> Self {
        Self::new(WarningServiceConfig::default())
    }
}
