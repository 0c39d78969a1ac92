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

//! Validating admission for `NamespaceLabel`
//!
//! Decodes the admission payload into a `NamespaceLabel` once, at the edge,
//! and applies the configured admission policy. Under `singlePerTarget` a
//! second request in a namespace that already has one is denied; under
//! `multiple` every well-formed request is admitted and conflicts are left to
//! the reconciler.

use crate::crds::NamespaceLabel;
use crate::tasks::config::AdmissionPolicy;
use crate::tasks::label::RequestStore;
use crate::tasks::types::{Error, Result};
use axum::{extract::State, routing::post, Json, Router};
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    ResourceExt,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Path the validating webhook configuration points at
pub const VALIDATE_PATH: &str = "/validate-labels-dana-io-v1-namespacelabel";

/// Shared state of the admission handler
pub struct AdmissionState {
    pub requests: Arc<dyn RequestStore>,
    pub policy: AdmissionPolicy,
}

/// Router serving the validating webhook
pub fn router(state: Arc<AdmissionState>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate_handler))
        .with_state(state)
}

/// Decode an admission object into a `NamespaceLabel`
pub fn decode_request(obj: &DynamicObject) -> Result<NamespaceLabel> {
    let value = serde_json::to_value(obj)
        .map_err(|e| Error::TypeMismatch(format!("unreadable admission object: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| Error::TypeMismatch(format!("expected a NamespaceLabel object: {e}")))
}

/// Decide whether `candidate` may be created next to `existing`.
///
/// Returns the denial message when it may not.
pub fn check_create(
    candidate: &NamespaceLabel,
    existing: &[NamespaceLabel],
    policy: AdmissionPolicy,
) -> std::result::Result<(), String> {
    if policy == AdmissionPolicy::Multiple {
        return Ok(());
    }

    let namespace = candidate.namespace().unwrap_or_default();
    let candidate_name = candidate.name_any();
    let conflicting = existing.iter().find(|other| {
        other.namespace().as_deref() == Some(namespace.as_str())
            && other.name_any() != candidate_name
    });

    match conflicting {
        Some(other) => Err(format!(
            "NamespaceLabel {} already exists in namespace {namespace}; only one NamespaceLabel is allowed per namespace",
            other.name_any()
        )),
        None => Ok(()),
    }
}

/// Handle a validating admission review for `NamespaceLabel`
pub async fn validate_handler(
    State(state): State<Arc<AdmissionState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(validate(&state, &req).await.into_review())
}

async fn validate(state: &AdmissionState, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);

    if !matches!(req.operation, Operation::Create) {
        return response;
    }

    let Some(obj) = req.object.as_ref() else {
        debug!(uid = %req.uid, "No object in create request, allowing");
        return response;
    };

    let candidate = match decode_request(obj) {
        Ok(candidate) => candidate,
        Err(e) => {
            warn!(uid = %req.uid, error = %e, "Rejecting malformed NamespaceLabel");
            return response.deny(e.to_string());
        }
    };

    if state.policy == AdmissionPolicy::Multiple {
        return response;
    }

    let namespace = candidate
        .namespace()
        .or_else(|| req.namespace.clone())
        .unwrap_or_default();
    let existing = match state.requests.list_for_target(&namespace).await {
        Ok(existing) => existing,
        Err(e) => {
            error!(uid = %req.uid, error = %e, "Failed to list existing NamespaceLabels");
            return response.deny(format!("unable to verify existing NamespaceLabels: {e}"));
        }
    };

    let mut candidate = candidate;
    candidate.metadata.namespace = Some(namespace);
    match check_create(&candidate, &existing, state.policy) {
        Ok(()) => response,
        Err(reason) => {
            info!(uid = %req.uid, name = %candidate.name_any(), "Denied NamespaceLabel creation");
            response.deny(reason)
        }
    }
}
