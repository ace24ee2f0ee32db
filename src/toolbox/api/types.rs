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

use crate::toolbox::cluster::ClusterResource;
use crate::toolbox::template::UserIdentity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateToolboxRequest {
    pub user: UserIdentity,
    pub deployment_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_params: Option<Map<String, Value>>,
}

/// `user_id` is accepted for compatibility with existing clients but does
/// not scope the listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolboxesRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteToolboxRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    pub namespace: String,
    pub deployment_name: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub mt_service_url: String,
    #[serde(default)]
    pub mt_api_key: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AddApiToolRequest {
    pub mt_service_url: String,
    #[serde(default)]
    pub mt_api_key: Option<String>,
    pub tool_url: String,
    #[serde(default)]
    pub tool_routes: Option<Vec<String>>,
    #[serde(default)]
    pub tool_api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing: Option<Vec<ClusterResource>>,
}
