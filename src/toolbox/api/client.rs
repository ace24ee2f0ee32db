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

//! Client for the management plane HTTP API.
//!
//! Like the instance proxy, the client never fails through `Result` once
//! constructed: every call yields the decoded JSON body, or an
//! `{"error": ...}` object describing what went wrong.

use super::types::{
    AddApiToolRequest, CreateToolboxRequest, DeleteToolboxRequest, ListToolboxesRequest,
    ServiceRequest,
};
use crate::toolbox::proxy::API_KEY_HEADER;
use crate::toolbox::template::UserIdentity;
use crate::toolbox::util::error::{with_context, DynError};
use reqwest::{Client, Method, Url};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://0.0.0.0:8000";

pub struct ManagementClient {
    client: Client,
    api_url: Url,
    api_key: Option<String>,
}

impl ManagementClient {
    pub fn new(api_url: &str, api_key: Option<String>) -> Result<Self, DynError> {
        let api_url = Url::parse(api_url.trim_end_matches('/'))
            .map_err(|err| with_context(err, format!("invalid management API URL '{api_url}'")))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| with_context(err, "failed to construct management API client"))?;
        Ok(ManagementClient {
            client,
            api_url,
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_url.as_str().trim_end_matches('/'))
    }

    async fn send_json<B: Serialize>(&self, method: Method, path: &str, body: Option<&B>) -> Value {
        let mut request = self.client.request(method, self.url(path));
        if let Some(key) = self.api_key.as_deref() {
            request = request.header(API_KEY_HEADER, key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        match request.send().await {
            Ok(response) => handle_json(response).await,
            Err(err) => json!({ "error": err.to_string() }),
        }
    }

    pub async fn health(&self) -> Value {
        self.send_json::<()>(Method::GET, "health", None).await
    }

    pub async fn list_toolboxes(&self, namespace: &str, user_id: Option<&str>) -> Value {
        let body = ListToolboxesRequest {
            user_id: user_id.map(str::to_string),
            namespace: Some(namespace.to_string()),
        };
        self.send_json(Method::GET, "management/list", Some(&body))
            .await
    }

    pub async fn create_toolbox(
        &self,
        deployment_name: &str,
        user: UserIdentity,
        override_params: Option<Map<String, Value>>,
    ) -> Value {
        let body = CreateToolboxRequest {
            user,
            deployment_name: deployment_name.to_string(),
            override_params,
        };
        self.send_json(Method::POST, "management/create", Some(&body))
            .await
    }

    pub async fn delete_toolbox(
        &self,
        namespace: &str,
        deployment_name: &str,
        user_id: Option<&str>,
    ) -> Value {
        let body = DeleteToolboxRequest {
            user_id: user_id.map(str::to_string),
            namespace: namespace.to_string(),
            deployment_name: deployment_name.to_string(),
        };
        self.send_json(Method::DELETE, "management/delete", Some(&body))
            .await
    }

    pub async fn toolbox_health(&self, mt_service_url: &str, mt_api_key: Option<&str>) -> Value {
        let body = service_request(mt_service_url, mt_api_key);
        self.send_json(Method::POST, "magic_toolbox/health", Some(&body))
            .await
    }

    pub async fn add_api_tool(
        &self,
        mt_service_url: &str,
        mt_api_key: Option<&str>,
        tool_url: &str,
        tool_routes: Option<Vec<String>>,
        tool_api_key: Option<&str>,
    ) -> Value {
        let body = AddApiToolRequest {
            mt_service_url: mt_service_url.to_string(),
            mt_api_key: mt_api_key.map(str::to_string),
            tool_url: tool_url.to_string(),
            tool_routes,
            tool_api_key: tool_api_key.map(str::to_string),
        };
        self.send_json(Method::POST, "magic_toolbox/add_api_tool", Some(&body))
            .await
    }

    pub async fn get_tools(&self, mt_service_url: &str, mt_api_key: Option<&str>) -> Value {
        let body = service_request(mt_service_url, mt_api_key);
        self.send_json(Method::POST, "magic_toolbox/get_tools", Some(&body))
            .await
    }
}

fn service_request(mt_service_url: &str, mt_api_key: Option<&str>) -> ServiceRequest {
    ServiceRequest {
        mt_service_url: mt_service_url.to_string(),
        mt_api_key: mt_api_key.map(str::to_string),
    }
}

/// Error bodies produced by the server already carry `error` (and, for
/// conflicts, `existing`) and are returned as-is.
async fn handle_json(response: reqwest::Response) -> Value {
    let status = response.status();
    let text = match response.text().await {
        Ok(text) => text,
        Err(err) => return json!({ "error": err.to_string() }),
    };

    if status.is_success() {
        return serde_json::from_str::<Value>(&text).unwrap_or_else(|err| {
            json!({ "error": format!("invalid JSON in response: {err}") })
        });
    }

    if let Ok(Value::Object(body)) = serde_json::from_str::<Value>(&text) {
        if body.contains_key("error") {
            return Value::Object(body);
        }
    }
    let message = if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        text
    };
    json!({ "error": format!("HTTP {}: {message}", status.as_u16()) })
}

/// True when `value` is an `{"error": ...}` payload.
pub fn is_error_payload(value: &Value) -> bool {
    value.get("error").is_some()
}
