//! Signature configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Signature configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureConfig {
    #[serde(default)]
    pub otp: OtpConfig,
    #[serde(default)]
    pub signing_token: SigningTokenConfig,
}

impl SignatureConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.otp.pepper.len() < 16 {
            errors.push("OTP pepper must be at least 16 characters".to_string());
        }
        if !(4..=9).contains(&self.otp.digits) {
            errors.push("OTP digits must be between 4 and 9".to_string());
        }
        if self.otp.max_attempts == 0 {
            errors.push("OTP max attempts must be at least 1".to_string());
        }
        if self.otp.ttl.is_zero() {
            errors.push("OTP lifetime must be positive".to_string());
        }
        if self.signing_token.ttl.is_zero() {
            errors.push("Signing link lifetime must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// One-time code configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpConfig {
    /// Number of digits in a code
    pub digits: u32,
    /// Code lifetime
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Wrong submissions tolerated before the code is discarded
    pub max_attempts: u32,
    /// Server-side secret mixed into every code digest
    pub pepper: String,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            digits: 6,
            ttl: Duration::from_secs(10 * 60), // 10 minutes
            max_attempts: 5,
            pepper: String::new(), // Must be set in production
        }
    }
}

/// Public signing link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningTokenConfig {
    /// Link lifetime
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Random bytes per token
    pub token_bytes: usize,
}

impl Default for SigningTokenConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            token_bytes: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_requires_pepper() {
        let errors = SignatureConfig::default().validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("pepper"));
    }

    #[test]
    fn test_humantime_durations() {
        let config: OtpConfig = serde_json::from_str(
            r#"{"digits": 6, "ttl": "5m", "max_attempts": 3, "pepper": "0123456789abcdef"}"#,
        )
        .unwrap();
        assert_eq!(config.ttl, Duration::from_secs(300));

        let full = SignatureConfig {
            otp: config,
            signing_token: SigningTokenConfig::default(),
        };
        assert!(full.validate().is_ok());
    }
}
