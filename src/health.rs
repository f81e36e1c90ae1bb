//! Health monitoring for handle pools

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Health status of a handle pool
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Current pool utilization (0.0 to 1.0)
    pub utilization: f64,

    /// Idle handles ready for reuse
    pub idle_handles: usize,

    /// Handles checked out by callers
    pub active_handles: usize,

    /// Callers blocked waiting for a handle
    pub waiting_callers: usize,

    /// Total capacity
    pub total_capacity: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Create a new health status
    pub fn new(idle: usize, active: usize, waiting: usize, capacity: usize) -> Self {
        let utilization = if capacity > 0 {
            active as f64 / capacity as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if waiting > 0 {
            warnings.push(format!("{} caller(s) waiting for a handle", waiting));
            is_healthy = false;
        }

        if idle == 0 && active >= capacity {
            warnings.push("No idle handles and no room to create one".to_string());
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_handles: idle,
            active_handles: active,
            waiting_callers: waiting,
            total_capacity: capacity,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_pool_is_healthy() {
        let health = HealthStatus::new(3, 1, 0, 10);
        assert!(health.is_healthy());
        assert_eq!(health.warning_count, 0);
    }

    #[test]
    fn test_waiters_make_pool_unhealthy() {
        let health = HealthStatus::new(0, 10, 2, 10);
        assert!(!health.is_healthy());
        assert_eq!(health.warning_count, 3);
        assert!(health.warnings.iter().any(|w| w.contains("waiting")));
        assert!(health.warnings.iter().any(|w| w.contains("No idle")));
    }

    #[test]
    fn test_empty_free_list_with_room_is_not_flagged() {
        let health = HealthStatus::new(0, 2, 0, 10);
        assert!(health.is_healthy());
        assert!(health.warnings.is_empty());
    }
}
