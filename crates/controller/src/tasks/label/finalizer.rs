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

//! # Deletion Guard
//!
//! A finalizer keeps a `NamespaceLabel` around after deletion is requested
//! until the labels it wrote have been removed from its namespace.

use super::events::{reasons, EventPublisher, Severity};
use super::partition::claimed_labels;
use super::policy::{PolicySource, ProtectedSet};
use super::store::{RequestStore, TargetStore};
use crate::crds::{Labels, NamespaceLabel};
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::tasks::types::{Error, Result, FINALIZER_NAME};
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

/// Lifecycle of a request with respect to its finalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// No finalizer and not deleting
    Unregistered,
    /// Finalizer present, not deleting
    Registered,
    /// Deletion requested, finalizer still present
    CleaningUp,
    /// Deletion requested, finalizer gone
    Released,
}

impl GuardState {
    #[must_use]
    pub fn of(request: &NamespaceLabel) -> Self {
        match (request.is_deleting(), request.has_finalizer(FINALIZER_NAME)) {
            (false, false) => Self::Unregistered,
            (false, true) => Self::Registered,
            (true, true) => Self::CleaningUp,
            (true, false) => Self::Released,
        }
    }
}

/// Add the finalizer if missing, returning the up-to-date request
pub async fn ensure_registered(
    requests: &dyn RequestStore,
    request: NamespaceLabel,
) -> Result<NamespaceLabel> {
    if request.has_finalizer(FINALIZER_NAME) {
        return Ok(request);
    }

    let mut finalizers = request.finalizers().to_vec();
    finalizers.push(FINALIZER_NAME.to_string());
    let updated = requests.set_finalizers(&request, finalizers).await?;
    debug!(request = %request.name_any(), "Registered finalizer");
    Ok(updated)
}

/// Labels on the namespace that `request` may remove on deletion.
///
/// Exactly the labels it still claims (see [`claimed_labels`]), minus
/// protected keys.
#[must_use]
pub fn removable_labels(
    request: &NamespaceLabel,
    peers: &[NamespaceLabel],
    protected: &ProtectedSet,
    current: &Labels,
) -> Labels {
    claimed_labels(request, peers, current)
        .into_iter()
        .filter(|(key, _)| !protected.contains_key(key))
        .collect()
}

/// Remove this request's labels from its namespace, then drop the finalizer.
///
/// The finalizer stays in place on any failure so cleanup runs again on the
/// next reconciliation.
pub async fn cleanup(
    requests: &dyn RequestStore,
    targets: &dyn TargetStore,
    policy: &dyn PolicySource,
    events: &dyn EventPublisher,
    request: &NamespaceLabel,
    retry: &RetryConfig,
) -> Result<Labels> {
    let target = request
        .target_ref()
        .ok_or_else(|| Error::TypeMismatch("NamespaceLabel without namespace".to_string()))?;

    let loaded = policy.load().await?;
    let protected = &loaded;

    let listed = if request.pending_labels().is_empty() {
        Vec::new()
    } else {
        requests.list_for_target(target).await?
    };
    let peers = listed.as_slice();

    let removed = retry_on_conflict(retry, "cleanup_labels", |_| async move {
        let snapshot = match targets.fetch(target).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_not_found() => {
                debug!(namespace = %target, "Namespace already gone, nothing to clean up");
                return Ok(Labels::new());
            }
            Err(e) => return Err(e),
        };

        let removable = removable_labels(request, peers, protected, &snapshot.labels);
        if removable.is_empty() {
            return Ok(removable);
        }

        let mut labels = snapshot.labels.clone();
        for key in removable.keys() {
            labels.remove(key);
        }
        targets.persist(&snapshot, &labels).await?;
        Ok(removable)
    })
    .await?;

    let finalizers: Vec<String> = request
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != FINALIZER_NAME)
        .cloned()
        .collect();

    match requests.set_finalizers(request, finalizers).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    if !removed.is_empty() {
        events
            .publish(
                &request.object_ref(&()),
                Severity::Normal,
                reasons::LABELS_CLEANED_UP,
                format!(
                    "Removed labels: {}",
                    removed.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            )
            .await;
    }

    info!(
        request = %request.name_any(),
        namespace = %target,
        removed = removed.len(),
        "Cleaned up labels and released finalizer"
    );
    Ok(removed)
}
