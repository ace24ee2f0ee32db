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

use axum::extract::{Query, State};
use axum::Json;

use super::error::ApiError;
use crate::toolbox::api::types::{CreateToolboxRequest, DeleteToolboxRequest, ListToolboxesRequest};
use crate::toolbox::cluster::{ClusterResource, DeletionReport, DeploymentReceipt};
use crate::toolbox::logger::log_debug;
use crate::toolbox::server::AppState;

const COMPONENT: &str = "management";

/// The toolbox is created in the namespace of the requesting user.
pub(in crate::toolbox::server) async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateToolboxRequest>,
) -> Result<Json<DeploymentReceipt>, ApiError> {
    let namespace = request.user.namespace.clone();
    let receipt = state
        .lifecycle
        .create(
            &namespace,
            &request.deployment_name,
            &request.user,
            request.override_params.unwrap_or_default(),
        )
        .await?;
    Ok(Json(receipt))
}

/// Accepts the namespace either as a JSON body (as sent by the bundled
/// client) or as a query parameter. The body wins when both are present.
pub(in crate::toolbox::server) async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListToolboxesRequest>,
    body: Option<Json<ListToolboxesRequest>>,
) -> Result<Json<Vec<ClusterResource>>, ApiError> {
    let request = match body {
        Some(Json(body)) if body.namespace.is_some() => body,
        _ => query,
    };
    let namespace = request
        .namespace
        .filter(|namespace| !namespace.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("namespace is required"))?;
    if let Some(user_id) = request.user_id.as_deref() {
        log_debug(
            COMPONENT,
            "Listing is not scoped by user id",
            &[("namespace", namespace.as_str()), ("user_id", user_id)],
        );
    }
    let resources = state.lifecycle.list(&namespace).await?;
    Ok(Json(resources))
}

pub(in crate::toolbox::server) async fn delete(
    State(state): State<AppState>,
    Json(request): Json<DeleteToolboxRequest>,
) -> Result<Json<DeletionReport>, ApiError> {
    let report = state
        .lifecycle
        .delete(&request.namespace, &request.deployment_name)
        .await?;
    Ok(Json(report))
}
