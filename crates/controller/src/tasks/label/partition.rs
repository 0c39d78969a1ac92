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

//! # Label Partitioning
//!
//! Splits a request's desired labels into what may be written and what must
//! be skipped, given the protected set, the namespace's live labels and the
//! labels this request still holds from earlier passes.

use crate::crds::{Labels, NamespaceLabel};
use kube::ResourceExt;

/// Result of partitioning the desired labels of one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Labels that may be written to the namespace
    pub to_apply: Labels,
    /// Labels rejected because their key is protected
    pub skip_protected: Labels,
    /// Labels rejected because another writer already set the key
    pub skip_duplicate: Labels,
    /// Previously owned labels the request no longer wants, still at the
    /// owned value on the namespace
    pub to_release: Labels,
}

/// Labels on the namespace that `request` wrote and still holds.
///
/// A key recorded in `status.appliedLabels` is held while its live value is
/// the recorded one. A key in `status.pendingLabels` was announced before a
/// write whose outcome never got reported; it is held while the live value
/// matches, unless another request in `peers` records that value as applied,
/// or also announced it and sorts first by name.
#[must_use]
pub fn claimed_labels(request: &NamespaceLabel, peers: &[NamespaceLabel], current: &Labels) -> Labels {
    let name = request.name_any();
    let others: Vec<&NamespaceLabel> = peers.iter().filter(|p| p.name_any() != name).collect();

    let mut claimed: Labels = request
        .applied_labels()
        .into_iter()
        .filter(|(key, value)| current.get(key) == Some(value))
        .collect();

    for (key, value) in request.pending_labels() {
        if claimed.contains_key(&key) || current.get(&key) != Some(&value) {
            continue;
        }
        let contested = others.iter().any(|peer| {
            peer.applied_labels().get(&key) == Some(&value)
                || (peer.pending_labels().get(&key) == Some(&value) && peer.name_any() < name)
        });
        if !contested {
            claimed.insert(key, value);
        }
    }

    claimed
}

/// Partition `desired` against the protected set and the namespace state.
///
/// `owned` is what [`claimed_labels`] returns for the request. A key the
/// request already wrote, whose live value is still the one it wrote, stays
/// applicable so replays are idempotent and the owner can change its value.
#[must_use]
pub fn partition(desired: &Labels, protected: &Labels, current: &Labels, owned: &Labels) -> Partition {
    let mut result = Partition::default();

    for (key, value) in desired {
        if protected.contains_key(key) {
            result.skip_protected.insert(key.clone(), value.clone());
            continue;
        }

        match current.get(key) {
            Some(live) if owned.get(key) == Some(live) => {
                result.to_apply.insert(key.clone(), value.clone());
            }
            Some(_) => {
                result.skip_duplicate.insert(key.clone(), value.clone());
            }
            None => {
                result.to_apply.insert(key.clone(), value.clone());
            }
        }
    }

    for (key, owned_value) in owned {
        if desired.contains_key(key) || protected.contains_key(key) {
            continue;
        }
        if current.get(key) == Some(owned_value) {
            result.to_release.insert(key.clone(), owned_value.clone());
        }
    }

    result
}
