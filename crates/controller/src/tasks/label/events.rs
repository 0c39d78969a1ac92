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

//! # Outcome Events
//!
//! Kubernetes Events emitted for every skipped label and every applied batch.
//! Publishing is fire-and-forget: a failed event is logged and never fails
//! the reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Machine-readable event reasons (stable contract)
pub mod reasons {
    pub const PROTECTED_LABEL_SKIPPED: &str = "ProtectedLabelSkipped";
    pub const DUPLICATE_LABEL_SKIPPED: &str = "DuplicateLabelSkipped";
    pub const LABELS_APPLIED: &str = "LabelsApplied";
    pub const LABELS_CLEANED_UP: &str = "LabelsCleanedUp";
}

/// Event action recorded with every outcome
pub const ACTION_RECONCILE: &str = "Reconcile";

/// Severity of an outcome event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

impl From<Severity> for EventType {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Normal => EventType::Normal,
            Severity::Warning => EventType::Warning,
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event about `resource_ref`. Never fails.
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        severity: Severity,
        reason: &str,
        note: String,
    );
}

/// Publishes through the cluster Events API via `Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        severity: Severity,
        reason: &str,
        note: String,
    ) {
        let event = Event {
            type_: severity.into(),
            reason: reason.to_string(),
            note: Some(note),
            action: ACTION_RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Note for a label skipped because it is protected
#[must_use]
pub fn protected_note(key: &str, value: &str) -> String {
    format!("Label {key}={value} is protected and was not applied")
}

/// Note for a label skipped because the namespace already carries the key
#[must_use]
pub fn duplicate_note(key: &str, value: &str) -> String {
    format!("Label {key}={value} already exists on the namespace and was not applied")
}
