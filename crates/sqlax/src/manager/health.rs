//! On-demand health reporting for the selected engine

use std::time::Duration;

use super::statistics::ManagerStats;
use crate::backends::EnginePoolStats;

/// Response time above which an engine is reported as slow
const SLOW_RESPONSE: Duration = Duration::from_millis(1000);

/// Result of a successful [`crate::DatabaseManager::health_check`]
#[derive(Debug, Clone)]
pub struct EngineHealthReport {
    /// Redacted URL of the engine that answered
    pub url: String,
    pub check_duration: Duration,
    pub pool: EnginePoolStats,
    pub manager: ManagerStats,
}

impl EngineHealthReport {
    pub fn is_responsive(&self) -> bool {
        self.check_duration < SLOW_RESPONSE
    }

    /// Get pool utilization percentage
    pub fn utilization(&self) -> f64 {
        if self.pool.total_connections > 0 {
            (self.pool.active_connections as f64 / self.pool.total_connections as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn status(&self) -> HealthStatus {
        if !self.is_responsive() {
            HealthStatus::Degraded {
                reason: format!("Slow response: {:?}", self.check_duration),
            }
        } else if self.utilization() > 80.0 {
            HealthStatus::Warning {
                reason: format!("High utilization: {:.1}%", self.utilization()),
            }
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Health status of an engine that answered its probe
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Warning { reason: String },
    Degraded { reason: String },
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Warning { reason } => write!(f, "WARNING: {}", reason),
            HealthStatus::Degraded { reason } => write!(f, "DEGRADED: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::statistics::ManagerCounters;

    fn report(check_duration: Duration, active: u32) -> EngineHealthReport {
        EngineHealthReport {
            url: "sqlite::memory:".to_string(),
            check_duration,
            pool: EnginePoolStats {
                total_connections: 10,
                idle_connections: 10 - active,
                active_connections: active,
            },
            manager: ManagerCounters::new().snapshot(),
        }
    }

    #[test]
    fn test_status_levels() {
        assert_eq!(report(Duration::from_millis(5), 1).status(), HealthStatus::Healthy);
        assert!(matches!(
            report(Duration::from_millis(5), 9).status(),
            HealthStatus::Warning { .. }
        ));
        assert!(matches!(
            report(Duration::from_secs(2), 1).status(),
            HealthStatus::Degraded { .. }
        ));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "HEALTHY");
        assert!(report(Duration::from_secs(2), 0).status().to_string().starts_with("DEGRADED"));
    }
}
