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

//! API server implementations of the object stores.

use super::store::{label_patch, merge_diff, RequestStore, TargetSnapshot, TargetStore};
use crate::crds::{Labels, NamespaceLabel, NamespaceLabelStatus};
use crate::tasks::types::{Error, RequestKey, Result, CONTROLLER_NAME};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

const NAMESPACE_KIND: &str = "Namespace";
const REQUEST_KIND: &str = "NamespaceLabel";

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(CONTROLLER_NAME.to_string()),
        ..PatchParams::default()
    }
}

/// Namespaces read and written through the Kubernetes API
pub struct KubeTargetStore {
    namespaces: Api<Namespace>,
}

impl KubeTargetStore {
    pub fn new(client: Client) -> Self {
        Self {
            namespaces: Api::all(client),
        }
    }
}

#[async_trait]
impl TargetStore for KubeTargetStore {
    async fn fetch(&self, name: &str) -> Result<TargetSnapshot> {
        let ns = self
            .namespaces
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, NAMESPACE_KIND, name))?;

        Ok(TargetSnapshot {
            name: name.to_string(),
            labels: ns.metadata.labels.unwrap_or_default(),
            resource_version: ns.metadata.resource_version.unwrap_or_default(),
        })
    }

    async fn persist(&self, snapshot: &TargetSnapshot, labels: &Labels) -> Result<()> {
        // resourceVersion turns the merge patch into a conditional write
        let patch = json!({
            "metadata": {
                "resourceVersion": snapshot.resource_version,
                "labels": label_patch(&snapshot.labels, labels),
            }
        });

        self.namespaces
            .patch(&snapshot.name, &patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, NAMESPACE_KIND, &snapshot.name))?;

        debug!(namespace = %snapshot.name, "Persisted namespace labels");
        Ok(())
    }
}

/// `NamespaceLabel` objects read and written through the Kubernetes API
pub struct KubeRequestStore {
    client: Client,
}

impl KubeRequestStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<NamespaceLabel> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl RequestStore for KubeRequestStore {
    async fn get(&self, key: &RequestKey) -> Result<NamespaceLabel> {
        self.api(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| Error::from_kube(e, REQUEST_KIND, key.to_string()))?
            .ok_or_else(|| Error::not_found(REQUEST_KIND, key.to_string()))
    }

    async fn list_for_target(&self, namespace: &str) -> Result<Vec<NamespaceLabel>> {
        let list = self
            .api(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube(e, REQUEST_KIND, namespace))?;
        Ok(list.items)
    }

    async fn set_finalizers(
        &self,
        request: &NamespaceLabel,
        finalizers: Vec<String>,
    ) -> Result<NamespaceLabel> {
        let key = request
            .key()
            .ok_or_else(|| Error::TypeMismatch("NamespaceLabel without namespace".to_string()))?;

        let patch = json!({
            "metadata": {
                "resourceVersion": request.resource_version(),
                "finalizers": finalizers,
            }
        });

        self.api(&key.namespace)
            .patch(&key.name, &patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, REQUEST_KIND, key.to_string()))
    }

    async fn write_status(
        &self,
        key: &RequestKey,
        previous: Option<&NamespaceLabelStatus>,
        next: &NamespaceLabelStatus,
    ) -> Result<()> {
        let next_value = serde_json::to_value(next)
            .map_err(|e| Error::TransientIo(format!("serializing status of {key}: {e}")))?;
        let status = match previous {
            Some(prev) => {
                let prev_value = serde_json::to_value(prev)
                    .map_err(|e| Error::TransientIo(format!("serializing status of {key}: {e}")))?;
                merge_diff(&prev_value, &next_value)
            }
            None => next_value,
        };

        // Status subresource, so spec watchers are not re-triggered
        self.api(&key.namespace)
            .patch_status(
                &key.name,
                &patch_params(),
                &Patch::Merge(&json!({ "status": status })),
            )
            .await
            .map_err(|e| Error::from_kube(e, REQUEST_KIND, key.to_string()))?;

        Ok(())
    }
}
