//! Escrow configuration

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use leasehold_types::PaymentMethod;

/// Escrow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Upper bound on any single provider call
    #[serde(with = "humantime_serde")]
    pub provider_timeout: Duration,
    /// An unresolved payment younger than this blocks a new one for the
    /// same contract and payer
    #[serde(with = "humantime_serde")]
    pub duplicate_window: Duration,
    /// Lifetime of the duplicate-submission lock on initiation
    #[serde(with = "humantime_serde")]
    pub submission_lock_ttl: Duration,
    /// Webhook HMAC secret per provider-backed method, keyed by method name
    #[serde(default)]
    pub webhook_secrets: HashMap<String, String>,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(15),
            duplicate_window: Duration::from_secs(10 * 60), // 10 minutes
            submission_lock_ttl: Duration::from_secs(10),
            webhook_secrets: HashMap::new(),
        }
    }
}

impl EscrowConfig {
    pub fn webhook_secret(&self, method: PaymentMethod) -> Option<&str> {
        self.webhook_secrets.get(method.as_str()).map(String::as_str)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.provider_timeout.is_zero() {
            errors.push("provider_timeout must be positive".to_string());
        }
        if self.duplicate_window.is_zero() {
            errors.push("duplicate_window must be positive".to_string());
        }
        for (name, secret) in &self.webhook_secrets {
            match PaymentMethod::parse(name) {
                Some(method) if method.is_provider_backed() => {}
                Some(_) => errors.push(format!("{} is settled out of band and takes no webhook secret", name)),
                None => errors.push(format!("unknown payment method {}", name)),
            }
            if secret.len() < 16 {
                errors.push(format!("webhook secret for {} must be at least 16 characters", name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EscrowConfig::default();
        assert_eq!(config.provider_timeout, Duration::from_secs(15));
        assert_eq!(config.duplicate_window, Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_secrets() {
        let mut config = EscrowConfig::default();
        config.webhook_secrets.insert("mobile_money_a".into(), "short".into());
        config.webhook_secrets.insert("cash".into(), "0123456789abcdef0123".into());
        config.webhook_secrets.insert("paypal".into(), "0123456789abcdef0123".into());

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_humantime_durations() {
        let config: EscrowConfig = serde_json::from_str(
            r#"{"provider_timeout":"5s","duplicate_window":"2m","submission_lock_ttl":"1s",
                "webhook_secrets":{"mobile_money_b":"0123456789abcdef"}}"#,
        )
        .unwrap();
        assert_eq!(config.provider_timeout, Duration::from_secs(5));
        assert_eq!(
            config.webhook_secret(PaymentMethod::MobileMoneyB),
            Some("0123456789abcdef")
        );
        assert!(config.webhook_secret(PaymentMethod::MobileMoneyA).is_none());
    }
}
