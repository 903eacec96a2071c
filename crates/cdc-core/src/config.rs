//! C11: a typed accessor over a flat key/value configuration bag (spec §6,
//! §4 design note "retry policy construction").
//!
//! Keys are accepted with or without a leading `--`; the prefix is stripped
//! on ingress so `--aws.region` and `aws.region` resolve identically.

use std::collections::HashMap;

use crate::error::CoreError;

#[derive(Debug, Clone, Default)]
pub struct ConfigView {
    entries: HashMap<String, String>,
}

impl ConfigView {
    pub fn from_map(raw: HashMap<String, String>) -> Self {
        let entries = raw
            .into_iter()
            .map(|(k, v)| (strip_prefix(&k), v))
            .collect();
        ConfigView { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&strip_prefix(key)).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, CoreError> {
        self.get(key)
            .ok_or_else(|| CoreError::ConfigMissing(key.to_string()))
    }

    pub fn require_u64(&self, key: &str) -> Result<u64, CoreError> {
        self.require(key)?
            .parse()
            .map_err(|_| CoreError::ConfigMissing(format!("{key} (not a valid integer)")))
    }

    pub fn get_f32(&self, key: &str, default: f32) -> f32 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

fn strip_prefix(key: &str) -> String {
    key.strip_prefix("--").unwrap_or(key).to_string()
}

/// Retry policy configuration, read once per job and shared read-only across
/// supervisors (spec §9 design note).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicyConfig {
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    pub jitter_factor: f32,
    pub max_attempts: u32,
}

impl RetryPolicyConfig {
    pub fn from_config(config: &ConfigView) -> Self {
        RetryPolicyConfig {
            min_wait_ms: config.get_u64("dataStorage.retry.minWaitMillis", 500),
            max_wait_ms: config.get_u64("dataStorage.retry.maxWaitMillis", 30_000),
            jitter_factor: config.get_f32("dataStorage.retry.jitterFactor", 0.2),
            max_attempts: config.get_u32("dataStorage.retry.maxAttempts", 3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(pairs: &[(&str, &str)]) -> ConfigView {
        ConfigView::from_map(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn dashed_and_bare_keys_are_equivalent() {
        let v = view(&[("--aws.region", "us-east-1")]);
        assert_eq!(v.get("aws.region"), Some("us-east-1"));
        assert_eq!(v.get("--aws.region"), Some("us-east-1"));
    }

    #[test]
    fn missing_mandatory_key_fails_fast() {
        let v = view(&[]);
        assert!(matches!(v.require("checkpoint.location"), Err(CoreError::ConfigMissing(_))));
    }

    #[test]
    fn retry_policy_defaults_when_absent() {
        let v = view(&[]);
        let policy = RetryPolicyConfig::from_config(&v);
        assert_eq!(policy.max_attempts, 3);
    }
}
