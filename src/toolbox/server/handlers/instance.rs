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

use axum::extract::State;
use axum::Json;

use crate::toolbox::api::types::{AddApiToolRequest, ServiceRequest};
use crate::toolbox::proxy::{InstanceProxy, ProxyResult, ToolboxInstanceHandle};
use crate::toolbox::server::AppState;

fn proxy_for(state: &AppState, mt_service_url: String, mt_api_key: Option<String>) -> InstanceProxy {
    InstanceProxy::new(
        state.proxy_client.clone(),
        ToolboxInstanceHandle::new(mt_service_url, mt_api_key),
    )
}

pub(in crate::toolbox::server) async fn health(
    State(state): State<AppState>,
    Json(request): Json<ServiceRequest>,
) -> Json<ProxyResult> {
    let proxy = proxy_for(&state, request.mt_service_url, request.mt_api_key);
    Json(proxy.health().await)
}

pub(in crate::toolbox::server) async fn add_api_tool(
    State(state): State<AppState>,
    Json(request): Json<AddApiToolRequest>,
) -> Json<ProxyResult> {
    let proxy = proxy_for(&state, request.mt_service_url, request.mt_api_key);
    Json(
        proxy
            .register_tool(
                &request.tool_url,
                request.tool_routes.as_deref(),
                request.tool_api_key.as_deref(),
            )
            .await,
    )
}

pub(in crate::toolbox::server) async fn get_tools(
    State(state): State<AppState>,
    Json(request): Json<ServiceRequest>,
) -> Json<ProxyResult> {
    let proxy = proxy_for(&state, request.mt_service_url, request.mt_api_key);
    Json(proxy.list_tools().await)
}
