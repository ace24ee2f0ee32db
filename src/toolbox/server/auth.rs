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

//! Shared-secret API key gate.
//!
//! Requests to protected routes must carry an `X-API-KEY` header matching
//! one of the configured keys. The gate runs before any handler, so a
//! rejected request never reaches the lifecycle manager or the proxy.

use crate::toolbox::api::types::ErrorBody;
use crate::toolbox::config::AuthSettings;
use crate::toolbox::logger::log_warn;
use crate::toolbox::observability::metrics;
use crate::toolbox::proxy::API_KEY_HEADER;
use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

const AUTH_LOG_COMPONENT: &str = "auth";
pub const INVALID_API_KEY: &str = "Invalid API Key";

#[derive(Clone)]
pub struct ApiKeyGate {
    enabled: bool,
    keys: Arc<HashSet<String>>,
}

impl fmt::Debug for ApiKeyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyGate")
            .field("enabled", &self.enabled)
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl ApiKeyGate {
    pub fn with_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            enabled: true,
            keys: Arc::new(keys.into_iter().map(Into::into).collect()),
        }
    }

    /// Admits every request.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            keys: Arc::new(HashSet::new()),
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        if settings.enabled {
            Self::with_keys(settings.master_key.iter().cloned())
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn admits(&self, presented: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }
        presented.is_some_and(|key| self.keys.contains(key))
    }
}

/// Middleware rejecting requests whose `X-API-KEY` is missing or unknown.
pub async fn require_api_key(
    State(gate): State<ApiKeyGate>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if gate.admits(presented) {
        return next.run(request).await;
    }

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let method = request.method().as_str().to_string();
    let reason = if presented.is_some() {
        "mismatched"
    } else {
        "missing"
    };
    log_warn(
        AUTH_LOG_COMPONENT,
        "Rejected request with invalid API key",
        &[
            ("method", method.as_str()),
            ("path", path.as_str()),
            ("key", reason),
        ],
    );
    metrics::record_auth_rejection();

    let body = Json(ErrorBody {
        error: INVALID_API_KEY.to_string(),
        existing: None,
    });
    (StatusCode::UNAUTHORIZED, body).into_response()
}
