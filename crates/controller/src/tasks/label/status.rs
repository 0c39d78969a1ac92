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

//! # Status Reporting
//!
//! Records the outcome of a reconciliation pass on the request's status
//! subresource and emits one event per skipped label.

use super::events::{duplicate_note, protected_note, reasons, EventPublisher, Severity};
use super::store::RequestStore;
use crate::crds::{Labels, NamespaceLabel, NamespaceLabelCondition, NamespaceLabelStatus};
use crate::tasks::types::{Error, Result};
use chrono::{DateTime, Utc};
use kube::Resource;
use tracing::{debug, info};

/// Condition types (stable contract)
pub mod condition_types {
    pub const LABELS_APPLIED: &str = "LabelsApplied";
    pub const LABELS_SKIPPED: &str = "LabelsSkipped";
    pub const DUPLICATE_LABELS: &str = "DuplicateLabels";
}

/// Condition reasons
pub mod condition_reasons {
    pub const LABELS_RECONCILED: &str = "LabelsReconciled";
    pub const PROTECTED_LABELS_SKIPPED: &str = "ProtectedLabelsSkipped";
    pub const NO_PROTECTED_LABELS: &str = "NoProtectedLabels";
    pub const DUPLICATE_LABELS_SKIPPED: &str = "DuplicateLabelsSkipped";
    pub const NO_DUPLICATE_LABELS: &str = "NoDuplicateLabels";
}

const TRUE: &str = "True";
const FALSE: &str = "False";

/// Outcome of one pass, as handed to the reporter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassResult {
    pub applied: Labels,
    pub skip_protected: Labels,
    pub skip_duplicate: Labels,
}

/// Insert or overwrite the condition with the same type.
///
/// `lastTransitionTime` is carried over unless the status value changed.
pub fn upsert_condition(conditions: &mut Vec<NamespaceLabelCondition>, mut condition: NamespaceLabelCondition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            if existing.status == condition.status {
                condition
                    .last_transition_time
                    .clone_from(&existing.last_transition_time);
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

fn condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: String,
    generation: Option<i64>,
    now: &str,
) -> NamespaceLabelCondition {
    NamespaceLabelCondition {
        condition_type: condition_type.to_string(),
        status: status.to_string(),
        last_transition_time: Some(now.to_string()),
        reason: Some(reason.to_string()),
        message: Some(message),
        observed_generation: generation,
    }
}

fn key_list(labels: &Labels) -> String {
    labels.keys().cloned().collect::<Vec<_>>().join(", ")
}

/// Compute the status describing `result`, starting from the previous one
#[must_use]
pub fn build_status(
    previous: Option<&NamespaceLabelStatus>,
    generation: Option<i64>,
    result: &PassResult,
    now: DateTime<Utc>,
) -> NamespaceLabelStatus {
    let now = now.to_rfc3339();
    let mut conditions = previous.map(|s| s.conditions.clone()).unwrap_or_default();

    upsert_condition(
        &mut conditions,
        condition(
            condition_types::LABELS_APPLIED,
            TRUE,
            condition_reasons::LABELS_RECONCILED,
            format!("{} label(s) applied to the namespace", result.applied.len()),
            generation,
            &now,
        ),
    );

    let protected = if result.skip_protected.is_empty() {
        condition(
            condition_types::LABELS_SKIPPED,
            FALSE,
            condition_reasons::NO_PROTECTED_LABELS,
            "No protected labels requested".to_string(),
            generation,
            &now,
        )
    } else {
        condition(
            condition_types::LABELS_SKIPPED,
            TRUE,
            condition_reasons::PROTECTED_LABELS_SKIPPED,
            format!("Protected labels skipped: {}", key_list(&result.skip_protected)),
            generation,
            &now,
        )
    };
    upsert_condition(&mut conditions, protected);

    let duplicates = if result.skip_duplicate.is_empty() {
        condition(
            condition_types::DUPLICATE_LABELS,
            FALSE,
            condition_reasons::NO_DUPLICATE_LABELS,
            "No labels already present on the namespace".to_string(),
            generation,
            &now,
        )
    } else {
        condition(
            condition_types::DUPLICATE_LABELS,
            TRUE,
            condition_reasons::DUPLICATE_LABELS_SKIPPED,
            format!(
                "Labels already present on the namespace: {}",
                key_list(&result.skip_duplicate)
            ),
            generation,
            &now,
        )
    };
    upsert_condition(&mut conditions, duplicates);

    let skipped: Labels = result
        .skip_protected
        .iter()
        .chain(result.skip_duplicate.iter())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let message = format!(
        "Applied {} label(s), skipped {} protected and {} duplicate label(s)",
        result.applied.len(),
        result.skip_protected.len(),
        result.skip_duplicate.len()
    );

    NamespaceLabelStatus {
        applied_labels: result.applied.clone(),
        skipped_labels: skipped,
        pending_labels: Labels::new(),
        conditions,
        message: Some(message),
        last_updated: Some(now),
        observed_generation: generation,
    }
}

/// Announce `pending` on the request's status before it is written to the
/// namespace, so a pass whose report never lands can still be recognised.
///
/// Returns the request carrying the announced status.
pub async fn record_intent(
    requests: &dyn RequestStore,
    mut request: NamespaceLabel,
    pending: &Labels,
) -> Result<NamespaceLabel> {
    let Some(key) = request.key() else {
        return Err(Error::TypeMismatch(
            "NamespaceLabel without namespace".to_string(),
        ));
    };

    let previous = request.status.take();
    let mut next = previous.clone().unwrap_or_default();
    next.pending_labels.extend(pending.clone());

    requests.write_status(&key, previous.as_ref(), &next).await?;
    debug!(request = %key, pending = %key_list(pending), "Recorded pending labels");

    request.status = Some(next);
    Ok(request)
}

/// Persist the status for `result` and publish its events.
///
/// A request deleted meanwhile is not an error.
pub async fn report(
    requests: &dyn RequestStore,
    events: &dyn EventPublisher,
    request: &NamespaceLabel,
    result: &PassResult,
) -> Result<()> {
    let Some(key) = request.key() else {
        return Err(Error::TypeMismatch(
            "NamespaceLabel without namespace".to_string(),
        ));
    };

    let previous = request.status.as_ref();
    let status = build_status(previous, request.metadata.generation, result, Utc::now());

    match requests.write_status(&key, previous, &status).await {
        Ok(()) => debug!(request = %key, "Status updated"),
        Err(e) if e.is_not_found() => {
            debug!(request = %key, "Request deleted before status write");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    let object_ref = request.object_ref(&());
    for (k, v) in &result.skip_protected {
        events
            .publish(
                &object_ref,
                Severity::Warning,
                reasons::PROTECTED_LABEL_SKIPPED,
                protected_note(k, v),
            )
            .await;
    }
    for (k, v) in &result.skip_duplicate {
        events
            .publish(
                &object_ref,
                Severity::Warning,
                reasons::DUPLICATE_LABEL_SKIPPED,
                duplicate_note(k, v),
            )
            .await;
    }
    if !result.applied.is_empty() {
        events
            .publish(
                &object_ref,
                Severity::Normal,
                reasons::LABELS_APPLIED,
                format!("Applied labels: {}", key_list(&result.applied)),
            )
            .await;
    }

    info!(
        request = %key,
        applied = result.applied.len(),
        skipped_protected = result.skip_protected.len(),
        skipped_duplicate = result.skip_duplicate.len(),
        "Reported reconciliation outcome"
    );
    Ok(())
}
