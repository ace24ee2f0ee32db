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

//! Pass-through client for the API of an already running toolbox instance.
//!
//! Every outcome is reported as a [`ProxyResult`]; transport failures,
//! non-2xx responses and undecodable bodies all become `{"error": ...}`
//! payloads instead of Rust errors.

use crate::toolbox::logger::{log_debug, log_warn};
use crate::toolbox::observability::metrics::record_proxy_request;
use crate::toolbox::observability::tracing::with_span;
use crate::toolbox::util::error::{with_context, DynError};
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

const COMPONENT: &str = "instance-proxy";
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Endpoint of a running toolbox instance. Supplied by the caller on every
/// request; never derived from a deployment descriptor.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolboxInstanceHandle {
    pub service_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ToolboxInstanceHandle {
    pub fn new(service_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            service_url: service_url.into(),
            api_key,
        }
    }
}

impl fmt::Debug for ToolboxInstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolboxInstanceHandle")
            .field("service_url", &self.service_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Either the instance's JSON payload or an `{"error": message}` object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxyResult {
    Error { error: String },
    Success(Value),
}

impl ProxyResult {
    pub fn error(message: impl Into<String>) -> Self {
        ProxyResult::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ProxyResult::Error { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
struct RegisterToolBody<'a> {
    tool_url: &'a str,
    tool_routes: Option<&'a [String]>,
    tool_api_key: Option<&'a str>,
}

/// Builds the HTTP client shared by all proxy calls.
pub fn proxy_client(timeout: Duration) -> Result<Client, DynError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| with_context(err, "failed to build toolbox proxy client"))
}

/// Stateless per-call view of one toolbox instance.
pub struct InstanceProxy {
    client: Client,
    handle: ToolboxInstanceHandle,
}

impl InstanceProxy {
    pub fn new(client: Client, handle: ToolboxInstanceHandle) -> Self {
        Self { client, handle }
    }

    pub async fn health(&self) -> ProxyResult {
        self.call("health", Method::GET, "health", None).await
    }

    pub async fn register_tool(
        &self,
        tool_url: &str,
        tool_routes: Option<&[String]>,
        tool_api_key: Option<&str>,
    ) -> ProxyResult {
        let body = RegisterToolBody {
            tool_url,
            tool_routes,
            tool_api_key,
        };
        let body = match serde_json::to_value(&body) {
            Ok(body) => body,
            Err(err) => return ProxyResult::error(format!("failed to encode request: {err}")),
        };
        self.call("register_tool", Method::POST, "register_tool", Some(body))
            .await
    }

    pub async fn list_tools(&self) -> ProxyResult {
        self.call("list_tools", Method::POST, "list_tools", None).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, String> {
        let base = self.handle.service_url.trim();
        let url = format!("{}/{path}", base.trim_end_matches('/'));
        let parsed = Url::parse(&url)
            .map_err(|err| format!("invalid toolbox service URL '{base}': {err}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!(
                "invalid toolbox service URL '{base}': unsupported scheme '{}'",
                parsed.scheme()
            ));
        }
        Ok(parsed)
    }

    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> ProxyResult {
        let result = with_span(COMPONENT, operation, self.send(method, path, body)).await;
        let service_url = self.handle.service_url.as_str();
        match &result {
            ProxyResult::Error { error } => {
                record_proxy_request(operation, false);
                log_warn(
                    COMPONENT,
                    "Toolbox request failed",
                    &[
                        ("operation", operation),
                        ("service_url", service_url),
                        ("error", error.as_str()),
                    ],
                );
            }
            ProxyResult::Success(_) => {
                record_proxy_request(operation, true);
                log_debug(
                    COMPONENT,
                    "Toolbox request succeeded",
                    &[("operation", operation), ("service_url", service_url)],
                );
            }
        }
        result
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> ProxyResult {
        let url = match self.endpoint(path) {
            Ok(url) => url,
            Err(message) => return ProxyResult::error(message),
        };

        let mut request = self.client.request(method, url);
        if let Some(key) = self.handle.api_key.as_deref() {
            request = request.header(API_KEY_HEADER, key);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return ProxyResult::error(describe_transport_error(&err)),
        };
        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => return ProxyResult::error(format!("failed to read toolbox response: {err}")),
        };

        if !status.is_success() {
            let detail = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|value| {
                    value
                        .get("error")
                        .or_else(|| value.get("detail"))
                        .map(|detail| match detail {
                            Value::String(message) => message.clone(),
                            other => other.to_string(),
                        })
                })
                .unwrap_or(text);
            return ProxyResult::error(format!(
                "toolbox returned HTTP {}: {}",
                status.as_u16(),
                detail
            ));
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => ProxyResult::Success(value),
            Err(err) => ProxyResult::error(format!("toolbox returned an invalid JSON body: {err}")),
        }
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("toolbox request timed out: {err}")
    } else if err.is_connect() {
        format!("unable to connect to the toolbox service: {err}")
    } else {
        format!("toolbox request failed: {err}")
    }
}
