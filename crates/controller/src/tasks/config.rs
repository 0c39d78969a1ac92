/*
 * 5D Labs Namespace Label Operator - Kubernetes Label Reconciliation
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Controller Configuration
//!
//! Configuration for the NamespaceLabel controller, read from a mounted YAML
//! file. Every section has defaults so a missing file still yields a usable
//! controller.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main controller configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Watch and requeue settings
    #[serde(default)]
    pub controller: WatchConfig,

    /// Label apply settings
    #[serde(default)]
    pub apply: ApplyConfig,

    /// Where the protected label set is read from
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Admission policy for NamespaceLabel creation
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Watch and requeue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    /// Restrict the watch to one namespace (cluster-wide when unset)
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// Maximum parallel reconciliations (0 = unbounded)
    #[serde(default)]
    pub concurrency: u16,

    /// Requeue delay after a retryable error
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_seconds: u64,

    /// Requeue delay when the target namespace does not exist
    #[serde(default = "default_not_found_backoff")]
    pub not_found_backoff_seconds: u64,
}

fn default_retry_backoff() -> u64 {
    15
}

fn default_not_found_backoff() -> u64 {
    300
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            concurrency: 0,
            retry_backoff_seconds: default_retry_backoff(),
            not_found_backoff_seconds: default_not_found_backoff(),
        }
    }
}

impl WatchConfig {
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }

    #[must_use]
    pub fn not_found_backoff(&self) -> Duration {
        Duration::from_secs(self.not_found_backoff_seconds)
    }
}

/// Apply configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyConfig {
    /// Attempts of the fetch-merge-persist cycle before giving up on conflicts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first conflict retry, doubled on each further retry
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_millis: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    50
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_millis: default_initial_backoff(),
        }
    }
}

/// Protected label source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicySourceKind {
    /// JSON object in an environment variable
    #[default]
    Env,
    /// JSON object in a mounted file
    File,
    /// JSON object under a key of a ConfigMap
    ConfigMap,
}

/// Protected label policy configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    #[serde(default)]
    pub source: PolicySourceKind,

    /// Environment variable holding the JSON object
    #[serde(default = "default_env_var")]
    pub env_var: String,

    /// Path of the mounted JSON file
    #[serde(default)]
    pub path: Option<String>,

    /// ConfigMap holding the JSON object
    #[serde(default)]
    pub config_map_name: Option<String>,

    /// Namespace of the ConfigMap
    #[serde(default = "default_policy_namespace")]
    pub config_map_namespace: String,

    /// Key inside the ConfigMap data
    #[serde(default = "default_policy_key")]
    pub key: String,
}

fn default_env_var() -> String {
    "PROTECTED_LABELS".to_string()
}

fn default_policy_namespace() -> String {
    "namespacelabel-system".to_string()
}

fn default_policy_key() -> String {
    "protected-labels.json".to_string()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            source: PolicySourceKind::Env,
            env_var: default_env_var(),
            path: None,
            config_map_name: None,
            config_map_namespace: default_policy_namespace(),
            key: default_policy_key(),
        }
    }
}

/// How many NamespaceLabel objects may target one namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AdmissionPolicy {
    /// Any number; conflicts are resolved first writer wins
    #[default]
    Multiple,
    /// At most one per namespace, enforced by the validating webhook
    SinglePerTarget,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionConfig {
    #[serde(default)]
    pub policy: AdmissionPolicy,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable text
    #[serde(default)]
    pub json: bool,

    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: default_log_filter(),
        }
    }
}

impl ControllerConfig {
    /// Validate that the selected policy source and retry settings are usable
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.apply.max_attempts == 0 {
            return Err(anyhow::anyhow!("apply.maxAttempts must be at least 1"));
        }

        match self.policy.source {
            PolicySourceKind::Env => {
                if self.policy.env_var.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "policy.envVar is required when policy.source is env"
                    ));
                }
            }
            PolicySourceKind::File => {
                if self.policy.path.as_deref().map_or(true, |p| p.trim().is_empty()) {
                    return Err(anyhow::anyhow!(
                        "policy.path is required when policy.source is file"
                    ));
                }
            }
            PolicySourceKind::ConfigMap => {
                if self
                    .policy
                    .config_map_name
                    .as_deref()
                    .map_or(true, |n| n.trim().is_empty())
                {
                    return Err(anyhow::anyhow!(
                        "policy.configMapName is required when policy.source is configMap"
                    ));
                }
                if self.policy.key.trim().is_empty() {
                    return Err(anyhow::anyhow!("policy.key must not be empty"));
                }
            }
        }

        Ok(())
    }

    /// Load configuration from mounted YAML file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let config: ControllerConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file {config_path}: {e}"))?;

        Ok(config)
    }
}
