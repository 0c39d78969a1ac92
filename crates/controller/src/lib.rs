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

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Namespace label operator core library
//!
//! This crate provides the `NamespaceLabel` custom resource, the label
//! reconciliation engine that applies requested labels to namespaces while
//! honouring a cluster-wide protected set, and the kube-runtime glue that
//! drives the engine from watch events.

pub mod admission;
pub mod crds;
pub mod retry;
pub mod tasks;

// Re-export commonly used types
pub use crds::{NamespaceLabel, NamespaceLabelSpec, NamespaceLabelStatus};
pub use tasks::config::ControllerConfig;
pub use tasks::label::{LabelEngine, ReconcileOutcome};
pub use tasks::types::{Error, RequestKey, Result};
