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

//! # Namespace Label Reconciliation
//!
//! Applies the labels requested by `NamespaceLabel` objects to the namespace
//! they live in, while enforcing two rules:
//!
//! - **Protected keys** from the cluster-wide policy are never written.
//! - **First writer wins**: a key already on the namespace is never
//!   overwritten by a different request.
//!
//! ## Architecture
//!
//! - **`policy`**: loads the protected set on every pass (env, file or ConfigMap)
//! - **`store`**: object store traits, with API server implementations in `kube_store`
//! - **`partition`**: pure split of desired labels into apply / skip / release
//! - **`applier`**: fetch-merge-persist under the namespace's resource version
//! - **`status`**: status subresource, conditions and per-key events
//! - **`finalizer`**: deletion guard and label cleanup
//! - **`engine`**: the reconciliation state machine tying it together

pub mod applier;
pub mod engine;
pub mod events;
pub mod finalizer;
pub mod kube_store;
pub mod partition;
pub mod policy;
pub mod status;
pub mod store;

pub use applier::{apply_labels, ApplyOutcome};
pub use engine::{LabelEngine, ReconcileOutcome};
pub use events::{EventPublisher, KubeEventPublisher, Severity};
pub use finalizer::GuardState;
pub use partition::{claimed_labels, partition, Partition};
pub use policy::{PolicySource, ProtectedSet};
pub use store::{RequestStore, TargetSnapshot, TargetStore};
