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

//! `NamespaceLabel` Custom Resource Definition for namespace label requests

use crate::tasks::types::RequestKey;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label map as stored on Kubernetes objects (ordered for stable output)
pub type Labels = BTreeMap<String, String>;

/// `NamespaceLabel` CRD: a request to apply labels to the namespace it lives in
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(group = "labels.dana.io", version = "v1", kind = "NamespaceLabel")]
#[kube(namespaced)]
#[kube(shortname = "nslabel")]
#[kube(status = "NamespaceLabelStatus")]
#[kube(printcolumn = r#"{"name":"Message","type":"string","jsonPath":".status.message"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct NamespaceLabelSpec {
    /// Labels that should be applied to the target namespace
    #[serde(default)]
    pub labels: Labels,
}

/// Status of the `NamespaceLabel`
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceLabelStatus {
    /// Labels this request most recently applied to the namespace
    #[serde(default)]
    pub applied_labels: Labels,

    /// Labels rejected on the last pass (protected or already present)
    #[serde(default)]
    pub skipped_labels: Labels,

    /// Labels about to be written by a pass that has not reported yet
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub pending_labels: Labels,

    /// Conditions for the `NamespaceLabel`, unique by type
    #[serde(default)]
    pub conditions: Vec<NamespaceLabelCondition>,

    /// Human-readable summary of the last reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Timestamp of the last status write (RFC3339 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    /// Generation of the spec this status describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Condition for the `NamespaceLabel`
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceLabelCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, or Unknown)
    pub status: String,

    /// Last time the condition transitioned (RFC3339 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Reason for the condition's last transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message about the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation the condition was computed against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl NamespaceLabel {
    /// Identity of this request, `None` for objects without name or namespace
    #[must_use]
    pub fn key(&self) -> Option<RequestKey> {
        let namespace = self.metadata.namespace.as_deref()?;
        let name = self.metadata.name.as_deref()?;
        Some(RequestKey::new(namespace, name))
    }

    /// Name of the namespace this request labels
    #[must_use]
    pub fn target_ref(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Whether deletion has been requested
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    #[must_use]
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// Labels recorded as applied on the previous pass
    #[must_use]
    pub fn applied_labels(&self) -> Labels {
        self.status
            .as_ref()
            .map(|s| s.applied_labels.clone())
            .unwrap_or_default()
    }

    /// Labels a pass announced before writing them and never confirmed
    #[must_use]
    pub fn pending_labels(&self) -> Labels {
        self.status
            .as_ref()
            .map(|s| s.pending_labels.clone())
            .unwrap_or_default()
    }

    /// Labels recorded as skipped on the previous pass
    #[must_use]
    pub fn skipped_labels(&self) -> Labels {
        self.status
            .as_ref()
            .map(|s| s.skipped_labels.clone())
            .unwrap_or_default()
    }
}
