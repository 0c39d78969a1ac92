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

//! # Label Applier
//!
//! Writes a partition onto its namespace with a fetch-merge-persist cycle
//! guarded by the namespace's resource version. Every attempt re-reads the
//! namespace and re-checks each key, so a key claimed by a concurrent writer
//! between partitioning and persisting is never overwritten.

use super::partition::Partition;
use super::store::TargetStore;
use crate::crds::Labels;
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::tasks::types::Result;
use tracing::{debug, info};

/// What a successful apply actually wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Labels now on the namespace on behalf of this request
    pub applied: Labels,
    /// Labels another writer claimed before this write landed
    pub raced: Labels,
    /// Previously owned labels removed from the namespace
    pub released: Labels,
}

/// Result of merging a partition into one snapshot of the live labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub labels: Labels,
    pub outcome: ApplyOutcome,
}

/// Merge `partition` into `live`.
///
/// A key is written when it is absent or still holds the value this request
/// owns; otherwise it is left alone and reported as raced. Released keys are
/// removed only while they still hold the owned value.
#[must_use]
pub fn merge_labels(live: &Labels, partition: &Partition, owned: &Labels) -> MergeResult {
    let mut labels = live.clone();
    let mut outcome = ApplyOutcome::default();

    for (key, value) in &partition.to_apply {
        let writable = match live.get(key) {
            None => true,
            Some(current) => owned.get(key) == Some(current),
        };
        if writable {
            labels.insert(key.clone(), value.clone());
            outcome.applied.insert(key.clone(), value.clone());
        } else {
            outcome.raced.insert(key.clone(), value.clone());
        }
    }

    for (key, value) in &partition.to_release {
        if live.get(key) == Some(value) {
            labels.remove(key);
            outcome.released.insert(key.clone(), value.clone());
        }
    }

    MergeResult { labels, outcome }
}

/// Apply `partition` to namespace `target`, retrying version conflicts.
///
/// `Error::NotFound` aborts immediately with nothing applied; exhausted
/// conflict retries surface as `Error::PersistFailed`.
pub async fn apply_labels(
    targets: &dyn TargetStore,
    target: &str,
    partition: &Partition,
    owned: &Labels,
    retry: &RetryConfig,
) -> Result<ApplyOutcome> {
    let outcome = retry_on_conflict(retry, "apply_labels", |attempt| async move {
        let snapshot = targets.fetch(target).await?;
        let merged = merge_labels(&snapshot.labels, partition, owned);

        if merged.labels == snapshot.labels {
            debug!(namespace = %target, attempt, "Namespace labels already up to date");
        } else {
            targets.persist(&snapshot, &merged.labels).await?;
        }

        Ok(merged.outcome)
    })
    .await?;

    if !outcome.raced.is_empty() {
        info!(
            namespace = %target,
            raced = ?outcome.raced.keys().collect::<Vec<_>>(),
            "Labels claimed by another writer before apply"
        );
    }

    Ok(outcome)
}
