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

use crate::tasks::config::ControllerConfig;
use crate::tasks::label::LabelEngine;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Finalizer guarding `NamespaceLabel` deletion until its labels are removed
pub const FINALIZER_NAME: &str = "namespacelabels.finalizers.dana.io";

/// Field manager / reporting controller name
pub const CONTROLLER_NAME: &str = "namespacelabel-controller";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Protected label policy is not configured: {0}")]
    ConfigMissing(String),

    #[error("Protected label policy is malformed: {0}")]
    ConfigMalformed(String),

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Concurrent modification of {kind} {name}")]
    Conflict { kind: &'static str, name: String },

    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    #[error("Failed to persist {kind} {name} after {attempts} attempt(s)")]
    PersistFailed {
        kind: &'static str,
        name: String,
        attempts: u32,
    },

    #[error("Unexpected trigger payload: {0}")]
    TypeMismatch(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Classify a Kubernetes API error for the object `kind`/`name`
    pub fn from_kube(err: kube::Error, kind: &'static str, name: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind,
                name: name.into(),
            },
            other => Self::TransientIo(other.to_string()),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the dispatch runtime should requeue after this error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::TypeMismatch(_) | Self::ConfigError(_))
    }
}

/// Identity of a `NamespaceLabel` request
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    pub namespace: String,
    pub name: String,
}

impl RequestKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Shared state handed to every reconciliation
pub struct Context {
    pub engine: LabelEngine,
    pub config: Arc<ControllerConfig>,
}
