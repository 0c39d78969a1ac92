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

//! # Reconciliation Engine
//!
//! Drives one `NamespaceLabel` from its current state to the desired one:
//! deletion goes through finalizer cleanup, everything else registers the
//! finalizer, loads policy, partitions, applies and reports.

use super::applier::apply_labels;
use super::events::{EventPublisher, KubeEventPublisher};
use super::finalizer::{cleanup, ensure_registered, GuardState};
use super::kube_store::{KubeRequestStore, KubeTargetStore};
use super::partition::{claimed_labels, partition};
use super::policy::{policy_source_from_config, PolicySource};
use super::status::{record_intent, report, PassResult};
use super::store::{RequestStore, TargetStore};
use crate::crds::Labels;
use crate::retry::RetryConfig;
use crate::tasks::config::ControllerConfig;
use crate::tasks::types::{Error, RequestKey, Result, CONTROLLER_NAME};
use kube::Client;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What a reconciliation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The request no longer exists
    Gone,
    /// Cleanup ran and the finalizer was removed
    Released { removed: Labels },
    /// Deleting without a finalizer, nothing was ever applied
    NothingToRelease,
    /// Labels were partitioned, applied and reported
    Reconciled {
        applied: Labels,
        skipped_protected: Labels,
        skipped_duplicate: Labels,
        released: Labels,
    },
}

pub struct LabelEngine {
    requests: Arc<dyn RequestStore>,
    targets: Arc<dyn TargetStore>,
    policy: Arc<dyn PolicySource>,
    events: Arc<dyn EventPublisher>,
    retry: RetryConfig,
}

impl LabelEngine {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        targets: Arc<dyn TargetStore>,
        policy: Arc<dyn PolicySource>,
        events: Arc<dyn EventPublisher>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            requests,
            targets,
            policy,
            events,
            retry,
        }
    }

    /// Engine backed by the Kubernetes API
    pub fn from_client(client: Client, config: &ControllerConfig) -> Self {
        Self::new(
            Arc::new(KubeRequestStore::new(client.clone())),
            Arc::new(KubeTargetStore::new(client.clone())),
            policy_source_from_config(&config.policy, client.clone()),
            Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            RetryConfig::from(&config.apply),
        )
    }

    #[instrument(skip(self), fields(request = %key))]
    pub async fn reconcile(&self, key: &RequestKey) -> Result<ReconcileOutcome> {
        let request = match self.requests.get(key).await {
            Ok(request) => request,
            Err(e) if e.is_not_found() => {
                debug!("Request no longer exists");
                return Ok(ReconcileOutcome::Gone);
            }
            Err(e) => return Err(e),
        };

        match GuardState::of(&request) {
            GuardState::CleaningUp => {
                let removed = cleanup(
                    self.requests.as_ref(),
                    self.targets.as_ref(),
                    self.policy.as_ref(),
                    self.events.as_ref(),
                    &request,
                    &self.retry,
                )
                .await?;
                return Ok(ReconcileOutcome::Released { removed });
            }
            GuardState::Released => {
                debug!("Deleting without finalizer, nothing to release");
                return Ok(ReconcileOutcome::NothingToRelease);
            }
            GuardState::Unregistered | GuardState::Registered => {}
        }

        let request = ensure_registered(self.requests.as_ref(), request).await?;

        let protected = self.policy.load().await?;

        let target = request
            .target_ref()
            .map(str::to_string)
            .ok_or_else(|| Error::TypeMismatch("NamespaceLabel without namespace".to_string()))?;
        let snapshot = self.targets.fetch(&target).await?;

        let peers = if request.pending_labels().is_empty() {
            Vec::new()
        } else {
            self.requests.list_for_target(&target).await?
        };
        let owned = claimed_labels(&request, &peers, &snapshot.labels);
        let partition = partition(&request.spec.labels, &protected, &snapshot.labels, &owned);

        // Announce new writes first so an unreported pass stays attributable
        let intent: Labels = partition
            .to_apply
            .iter()
            .filter(|(k, v)| owned.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let request = if intent.is_empty() {
            request
        } else {
            match record_intent(self.requests.as_ref(), request, &intent).await {
                Ok(request) => request,
                Err(e) if e.is_not_found() => {
                    debug!("Request deleted before apply");
                    return Ok(ReconcileOutcome::Gone);
                }
                Err(e) => return Err(e),
            }
        };

        let outcome = apply_labels(
            self.targets.as_ref(),
            &target,
            &partition,
            &owned,
            &self.retry,
        )
        .await?;

        let mut skip_duplicate = partition.skip_duplicate;
        skip_duplicate.extend(outcome.raced);

        let result = PassResult {
            applied: outcome.applied,
            skip_protected: partition.skip_protected,
            skip_duplicate,
        };
        report(
            self.requests.as_ref(),
            self.events.as_ref(),
            &request,
            &result,
        )
        .await?;

        info!(
            namespace = %target,
            applied = result.applied.len(),
            released = outcome.released.len(),
            "Reconciled namespace labels"
        );

        Ok(ReconcileOutcome::Reconciled {
            applied: result.applied,
            skipped_protected: result.skip_protected,
            skipped_duplicate: result.skip_duplicate,
            released: outcome.released,
        })
    }

    /// Requests to reconcile after namespace `namespace` changed
    pub async fn on_target_event(&self, namespace: &str) -> Result<Vec<RequestKey>> {
        let requests = self.requests.list_for_target(namespace).await?;
        Ok(requests
            .iter()
            .filter(|r| r.target_ref() == Some(namespace))
            .filter_map(|r| r.key())
            .collect())
    }
}
