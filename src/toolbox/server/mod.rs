/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! HTTP management plane.
//!
//! Lifecycle routes (`/management/*`) go through the lifecycle manager;
//! instance routes (`/magic_toolbox/*`) go straight to the instance proxy.
//! Both sit behind the API key gate. Health and metrics are public.

pub mod auth;
mod handlers;

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use reqwest::Client;
use tokio::net::TcpListener;

use crate::toolbox::cluster::{ClusterResources, InMemoryCluster, KubeCluster};
use crate::toolbox::config::{ClusterBackend, ServerConfig};
use crate::toolbox::lifecycle::LifecycleManager;
use crate::toolbox::logger::{self, log_info, log_warn};
use crate::toolbox::observability::tracing;
use crate::toolbox::proxy::proxy_client;
use crate::toolbox::template::{StaticTemplateProvider, TemplateProvider};
use crate::toolbox::util::error::with_context;

use self::auth::{require_api_key, ApiKeyGate};

const COMPONENT: &str = "server";

/// Everything a handler may touch. Built once from [`ServerConfig`].
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: LifecycleManager,
    pub proxy_client: Client,
    pub gate: ApiKeyGate,
}

impl AppState {
    pub fn new(lifecycle: LifecycleManager, proxy_client: Client, gate: ApiKeyGate) -> Self {
        Self {
            lifecycle,
            proxy_client,
            gate,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let templates: Arc<dyn TemplateProvider> = match config.template_path.as_deref() {
            Some(path) => Arc::new(StaticTemplateProvider::from_file(path)?),
            None => Arc::new(StaticTemplateProvider::builtin()),
        };
        let template = templates.toolbox_template();
        log_info(
            COMPONENT,
            "Loaded toolbox template",
            &[
                ("template", template.name.as_str()),
                ("version", template.version.as_str()),
            ],
        );

        let cluster: Arc<dyn ClusterResources> = match &config.cluster {
            ClusterBackend::InMemory => {
                log_warn(
                    COMPONENT,
                    "No cluster configured; toolboxes are kept in memory",
                    &[("env_var", "MAGIC_TOOLBOX_CLUSTER_URL")],
                );
                Arc::new(InMemoryCluster::new())
            }
            ClusterBackend::Kubernetes {
                base_url,
                token,
                insecure,
            } => {
                log_info(
                    COMPONENT,
                    "Using Kubernetes cluster",
                    &[("url", base_url.as_str())],
                );
                Arc::new(KubeCluster::new(base_url, token.clone(), *insecure)?)
            }
        };

        Ok(Self::new(
            LifecycleManager::new(templates, cluster),
            proxy_client(config.proxy_timeout)?,
            ApiKeyGate::from_settings(&config.auth),
        ))
    }
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/management/create", post(handlers::management::create))
        .route("/management/list", get(handlers::management::list))
        .route("/management/delete", delete(handlers::management::delete))
        .route("/magic_toolbox/health", post(handlers::instance::health))
        .route(
            "/magic_toolbox/add_api_tool",
            post(handlers::instance::add_api_tool),
        )
        .route(
            "/magic_toolbox/get_tools",
            post(handlers::instance::get_tools),
        )
        .route_layer(middleware::from_fn_with_state(
            state.gate.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::observability::health))
        .route("/health/", get(handlers::observability::health))
        .route("/metrics", get(handlers::observability::metrics))
        .merge(protected)
        .with_state(state)
}

pub async fn serve(config: ServerConfig) -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing::init();
    logger::set_log_format(config.log_format);
    logger::set_log_level(config.log_level);

    let state = AppState::from_config(&config)?;
    if !state.gate.is_enabled() {
        log_warn(
            COMPONENT,
            "Authentication is disabled; this should only be used for testing",
            &[("env_var", "TL_USE_AUTH")],
        );
    }
    let app = build_router(state);

    let addr: SocketAddr = config.bind;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| with_context(e, format!("Failed to bind server listener at {addr}")))?;
    let listen_addr_text = addr.to_string();
    log_info(
        COMPONENT,
        "HTTP server listening",
        &[("addr", listen_addr_text.as_str())],
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| with_context(e, "HTTP server terminated unexpectedly"))?;
    log_info(COMPONENT, "HTTP server stopped", &[]);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            let message = err.to_string();
            log_warn(
                COMPONENT,
                "Failed to listen for Ctrl-C",
                &[("error", message.as_str())],
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                let message = err.to_string();
                log_warn(
                    COMPONENT,
                    "Failed to listen for SIGTERM",
                    &[("error", message.as_str())],
                );
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log_info(COMPONENT, "Shutdown signal received", &[]);
}
