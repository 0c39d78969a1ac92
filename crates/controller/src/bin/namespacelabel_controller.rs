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

//! NamespaceLabel Controller Service
//!
//! Runs the NamespaceLabel reconciler and serves:
//! - `/health` and `/ready` probes
//! - the validating admission webhook for `NamespaceLabel`

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use controller::admission::{self, AdmissionState};
use controller::tasks::{
    config::{ControllerConfig, LoggingConfig},
    label::kube_store::KubeRequestStore,
    run_label_controller,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

#[derive(Clone)]
struct AppState {
    ready: Arc<AtomicBool>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, loaded) = read_controller_config();
    let logging = loaded
        .as_ref()
        .map(|cfg| cfg.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);

    info!(
        "Starting NamespaceLabel Controller Service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match loaded {
        Ok(cfg) => {
            info!("Loaded controller configuration from {}", config_path);
            cfg
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from {}: {}. Using defaults.",
                config_path, err
            );
            ControllerConfig::default()
        }
    };
    if let Err(validation_error) = config.validate() {
        error!("Configuration validation failed: {}", validation_error);
        return Err(controller::Error::ConfigError(validation_error.to_string()).into());
    }
    let config = Arc::new(config);

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let ready = Arc::new(AtomicBool::new(false));

    // Start the controller in the background
    let controller_handle = {
        let client = client.clone();
        let config = config.clone();
        let ready = ready.clone();
        tokio::spawn(async move {
            if let Err(e) = run_label_controller(client, config, ready.clone()).await {
                error!("Controller error: {}", e);
            }
            ready.store(false, Ordering::SeqCst);
        })
    };

    let admission_state = Arc::new(AdmissionState {
        requests: Arc::new(KubeRequestStore::new(client)),
        policy: config.admission.policy,
    });

    // Build the HTTP router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(AppState { ready })
        .merge(admission::router(admission_state))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.server.request_timeout_seconds,
                ))),
        );

    // Start the HTTP server
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!(
        "Controller HTTP server listening on {}",
        config.server.bind_address
    );

    // Run the server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller_handle.abort();
    info!("Controller service stopped");

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.filter.clone().into());

    tracing_subscriber::registry()
        .with(filter)
        .with(logging.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!logging.json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "namespacelabel-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if !state.ready.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "status": "ready",
        "service": "namespacelabel-controller",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

fn read_controller_config() -> (String, Result<ControllerConfig, anyhow::Error>) {
    let override_path = std::env::var("CONTROLLER_CONFIG_PATH").ok();
    let config_path = override_path
        .as_deref()
        .filter(|path| Path::new(path).exists())
        .unwrap_or(DEFAULT_CONFIG_PATH)
        .to_string();

    let loaded = ControllerConfig::from_mounted_file(&config_path);
    (config_path, loaded)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
