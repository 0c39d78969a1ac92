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

//! # Object Stores
//!
//! The engine reads and writes two kinds of objects: the `NamespaceLabel`
//! requests and the namespaces they target. Both are reached through the
//! traits below so reconciliation logic runs unchanged against the API
//! server or an in-memory fake.

use crate::crds::{Labels, NamespaceLabel, NamespaceLabelStatus};
use crate::tasks::types::{RequestKey, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Point-in-time read of a namespace's labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSnapshot {
    pub name: String,
    pub labels: Labels,
    /// Version token the next write must match
    pub resource_version: String,
}

#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Read the namespace. Absent namespaces are `Error::NotFound`.
    async fn fetch(&self, name: &str) -> Result<TargetSnapshot>;

    /// Replace the label map read in `snapshot` with `labels`.
    ///
    /// Fails with `Error::Conflict` when the namespace changed since the
    /// snapshot was taken.
    async fn persist(&self, snapshot: &TargetSnapshot, labels: &Labels) -> Result<()>;
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Read a request. Absent requests are `Error::NotFound`.
    async fn get(&self, key: &RequestKey) -> Result<NamespaceLabel>;

    /// All requests whose target is `namespace`
    async fn list_for_target(&self, namespace: &str) -> Result<Vec<NamespaceLabel>>;

    /// Replace the finalizer list of `request`, guarded by its resource
    /// version. Returns the updated object.
    async fn set_finalizers(
        &self,
        request: &NamespaceLabel,
        finalizers: Vec<String>,
    ) -> Result<NamespaceLabel>;

    /// Write `next` as the request's status. `previous` is the status the
    /// caller read, used to clear entries that no longer exist.
    async fn write_status(
        &self,
        key: &RequestKey,
        previous: Option<&NamespaceLabelStatus>,
        next: &NamespaceLabelStatus,
    ) -> Result<()>;
}

/// JSON merge patch turning `old` into `new`.
///
/// Object members missing from `new` are set to `null` so the API server
/// deletes them; nested objects are diffed recursively. Any other value is
/// replaced wholesale.
#[must_use]
pub fn merge_diff(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for key in old.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            for (key, value) in new {
                match old.get(key) {
                    Some(previous) if previous == value => {}
                    Some(previous) => {
                        patch.insert(key.clone(), merge_diff(previous, value));
                    }
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

/// Merge patch for `metadata.labels` that turns `old` into `new`
#[must_use]
pub fn label_patch(old: &Labels, new: &Labels) -> Value {
    let to_value = |labels: &Labels| {
        Value::Object(
            labels
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    };
    merge_diff(&to_value(old), &to_value(new))
}
