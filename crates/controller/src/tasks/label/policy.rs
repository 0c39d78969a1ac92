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

//! # Protected Label Policy
//!
//! Loads the cluster-wide set of label keys the controller must never write.
//! The set is read again on every reconciliation so policy edits take effect
//! without a restart. Loading fails closed: an absent or unparsable policy is
//! an error, never an empty set.

use crate::crds::Labels;
use crate::tasks::config::{PolicyConfig, PolicySourceKind};
use crate::tasks::types::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Protected label keys (values are informational only)
pub type ProtectedSet = Labels;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn load(&self) -> Result<ProtectedSet>;
}

/// Parse a JSON object of protected labels.
///
/// Only key presence matters downstream, but values must still be strings
/// like any Kubernetes label value.
pub fn parse_protected_labels(raw: &str, origin: &str) -> Result<ProtectedSet> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::ConfigMissing(format!("{origin} is empty")));
    }

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::ConfigMalformed(format!("{origin}: {e}")))?;

    let Value::Object(entries) = value else {
        return Err(Error::ConfigMalformed(format!(
            "{origin}: expected a JSON object of label keys"
        )));
    };

    entries
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key, s)),
            other => Err(Error::ConfigMalformed(format!(
                "{origin}: value of {key} must be a string, got {other}"
            ))),
        })
        .collect()
}

/// Policy held in an environment variable (`PROTECTED_LABELS` by default)
pub struct EnvPolicySource {
    var: String,
}

impl EnvPolicySource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl PolicySource for EnvPolicySource {
    async fn load(&self) -> Result<ProtectedSet> {
        let raw = std::env::var(&self.var).map_err(|_| {
            Error::ConfigMissing(format!("{} environment variable is not set", self.var))
        })?;
        let protected = parse_protected_labels(&raw, &self.var)?;
        debug!(source = %self.var, count = protected.len(), "Loaded protected labels");
        Ok(protected)
    }
}

/// Policy held in a mounted file
pub struct FilePolicySource {
    path: PathBuf,
}

impl FilePolicySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PolicySource for FilePolicySource {
    async fn load(&self) -> Result<ProtectedSet> {
        let origin = self.path.display().to_string();
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ConfigMissing(format!("{origin} does not exist")));
            }
            Err(e) => return Err(Error::TransientIo(format!("{origin}: {e}"))),
        };
        let protected = parse_protected_labels(&raw, &origin)?;
        debug!(source = %origin, count = protected.len(), "Loaded protected labels");
        Ok(protected)
    }
}

/// Policy held under a key of a ConfigMap, read through the API server
pub struct ConfigMapPolicySource {
    api: Api<ConfigMap>,
    name: String,
    key: String,
}

impl ConfigMapPolicySource {
    pub fn new(client: Client, namespace: &str, name: &str, key: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl PolicySource for ConfigMapPolicySource {
    async fn load(&self) -> Result<ProtectedSet> {
        let cm = self
            .api
            .get_opt(&self.name)
            .await
            .map_err(|e| Error::TransientIo(format!("reading ConfigMap {}: {e}", self.name)))?
            .ok_or_else(|| {
                Error::ConfigMissing(format!("ConfigMap {} does not exist", self.name))
            })?;

        let origin = format!("ConfigMap {} key {}", self.name, self.key);
        let raw = cm
            .data
            .as_ref()
            .and_then(|data| data.get(&self.key))
            .ok_or_else(|| Error::ConfigMissing(format!("{origin} is not set")))?;

        let protected = parse_protected_labels(raw, &origin)?;
        debug!(source = %origin, count = protected.len(), "Loaded protected labels");
        Ok(protected)
    }
}

/// Build the policy source selected by configuration
pub fn policy_source_from_config(config: &PolicyConfig, client: Client) -> Arc<dyn PolicySource> {
    match config.source {
        PolicySourceKind::Env => Arc::new(EnvPolicySource::new(config.env_var.clone())),
        PolicySourceKind::File => {
            Arc::new(FilePolicySource::new(config.path.clone().unwrap_or_default()))
        }
        PolicySourceKind::ConfigMap => Arc::new(ConfigMapPolicySource::new(
            client,
            &config.config_map_namespace,
            config.config_map_name.as_deref().unwrap_or_default(),
            &config.key,
        )),
    }
}
