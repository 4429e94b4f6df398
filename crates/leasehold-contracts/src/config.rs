//! Lifecycle configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Contract lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// How long after activation either party may retract
    #[serde(with = "humantime_serde")]
    pub retraction_window: Duration,
    /// Delay between activation and document sealing
    #[serde(with = "humantime_serde")]
    pub seal_delay: Duration,
    /// Notice period used when a termination request names none
    pub default_notice_months: u32,
    /// Longest notice period a party may ask for
    pub max_notice_months: u32,
    /// Lifetime of the duplicate-submission lock on create operations
    #[serde(with = "humantime_serde")]
    pub submission_lock_ttl: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retraction_window: Duration::from_secs(48 * 60 * 60), // 48 hours
            seal_delay: Duration::from_secs(5 * 60),              // 5 minutes
            default_notice_months: 3,
            max_notice_months: 24,
            submission_lock_ttl: Duration::from_secs(10),
        }
    }
}

impl LifecycleConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.retraction_window.is_zero() {
            errors.push("Retraction window must be positive".to_string());
        }
        if self.default_notice_months == 0 {
            errors.push("Default notice period must be at least one month".to_string());
        }
        if self.default_notice_months > self.max_notice_months {
            errors.push("Default notice period exceeds the maximum".to_string());
        }
        if self.submission_lock_ttl.is_zero() {
            errors.push("Submission lock TTL must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
