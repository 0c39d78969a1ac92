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

use crate::crds::NamespaceLabel;
use crate::tasks::label::LabelEngine;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn, Instrument};

pub mod config;
pub mod label;
pub mod types;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use types::{Error, Result};

use types::Context;

/// Run the NamespaceLabel controller until a shutdown signal arrives.
///
/// `ready` flips to true once the initial list of requests is cached.
#[instrument(skip(client, config, ready), fields(watch_namespace = ?config.controller.watch_namespace))]
pub async fn run_label_controller(
    client: Client,
    config: Arc<ControllerConfig>,
    ready: Arc<AtomicBool>,
) -> Result<()> {
    info!("Starting NamespaceLabel controller");

    let (requests, namespaces_config): (Api<NamespaceLabel>, watcher::Config) =
        match config.controller.watch_namespace.as_deref() {
            Some(ns) => (
                Api::namespaced(client.clone(), ns),
                watcher::Config::default().fields(&format!("metadata.name={ns}")),
            ),
            None => (Api::all(client.clone()), watcher::Config::default()),
        };
    let namespaces: Api<Namespace> = Api::all(client.clone());

    let context = Arc::new(Context {
        engine: LabelEngine::from_client(client, &config),
        config: config.clone(),
    });

    let controller = Controller::new(requests, watcher::Config::default().any_semantic());
    let store = controller.store();

    tokio::spawn(mark_ready_when_synced(store.clone(), ready));

    controller
        .watches(namespaces, namespaces_config, move |ns: Namespace| {
            affected_requests(&store.state(), &ns.name_any())
        })
        .with_config(controller::Config::default().concurrency(config.controller.concurrency))
        .shutdown_on_signal()
        .run(reconcile_namespace_label, error_policy, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("namespacelabel_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok((object_ref, _action)) => {
                        debug!(resource = %object_ref, "NamespaceLabel reconciliation successful");
                    }
                    Err(reconciliation_err) => {
                        warn!(error = ?reconciliation_err, "NamespaceLabel reconciliation error");
                    }
                }
            }
            .instrument(span)
        })
        .await;

    info!("NamespaceLabel controller shutting down");
    Ok(())
}

/// Set `ready` once the reflector behind `store` has listed every request
pub async fn mark_ready_when_synced(store: Store<NamespaceLabel>, ready: Arc<AtomicBool>) {
    if store.wait_until_ready().await.is_ok() {
        ready.store(true, Ordering::SeqCst);
        info!("NamespaceLabel cache synced, controller ready");
    }
}

/// Requests in `namespace`, i.e. every request targeting it
#[must_use]
pub fn affected_requests(
    requests: &[Arc<NamespaceLabel>],
    namespace: &str,
) -> Vec<ObjectRef<NamespaceLabel>> {
    requests
        .iter()
        .filter(|r| r.target_ref() == Some(namespace))
        .map(|r| ObjectRef::from_obj(r.as_ref()))
        .collect()
}

/// Reconcile one NamespaceLabel through the label engine
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = ?obj.namespace()))]
pub async fn reconcile_namespace_label(
    obj: Arc<NamespaceLabel>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let key = obj
        .key()
        .ok_or_else(|| Error::TypeMismatch("NamespaceLabel without namespace".to_string()))?;

    let outcome = ctx.engine.reconcile(&key).await?;
    debug!(request = %key, outcome = ?outcome, "Reconcile finished");

    Ok(Action::await_change())
}

/// Requeue retryable failures, give up on malformed input
fn error_policy(obj: Arc<NamespaceLabel>, err: &Error, ctx: Arc<Context>) -> Action {
    let watch = &ctx.config.controller;

    if err.is_not_found() {
        warn!(
            error = %err,
            name = %obj.name_any(),
            "Target missing, requeueing with long backoff"
        );
        return Action::requeue(watch.not_found_backoff());
    }

    if err.is_retryable() {
        warn!(error = %err, name = %obj.name_any(), "Reconciliation failed, requeueing");
        return Action::requeue(watch.retry_backoff());
    }

    error!(error = %err, name = %obj.name_any(), "Reconciliation failed permanently");
    Action::await_change()
}
