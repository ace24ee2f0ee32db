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

use super::meta::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: u16,
    #[serde(rename = "targetPort", skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ServicePort>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ServiceSpec,
}

impl Service {
    /// ClusterIP service exposing `port` on the pods matched by `selector`.
    pub fn cluster_ip(metadata: ObjectMeta, selector: BTreeMap<String, String>, port: u16) -> Self {
        Service {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            metadata,
            spec: ServiceSpec {
                selector,
                ports: vec![ServicePort {
                    name: Some("http".to_string()),
                    port,
                    target_port: Some(port),
                    protocol: Some("TCP".to_string()),
                }],
                type_name: Some("ClusterIP".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cluster_ip_service_serializes_kubernetes_field_names() {
        let selector = BTreeMap::from([("magic_toolbox".to_string(), "test".to_string())]);
        let service = Service::cluster_ip(
            ObjectMeta::named("test", "adam", selector.clone()),
            selector,
            8000,
        );
        let value = serde_json::to_value(&service).unwrap();
        assert_eq!(value["apiVersion"], json!("v1"));
        assert_eq!(value["spec"]["type"], json!("ClusterIP"));
        assert_eq!(value["spec"]["ports"][0]["targetPort"], json!(8000));
        assert_eq!(value["spec"]["selector"]["magic_toolbox"], json!("test"));
        assert_eq!(value["metadata"]["namespace"], json!("adam"));
    }
}
