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

use super::{
    ClusterError, ClusterFuture, ClusterResource, ClusterResources, DeletionReport,
    DeploymentReceipt,
};
use crate::toolbox::k8s::labels::{
    validate_deployment_name, validate_dns_label, LabelSelector,
};
use crate::toolbox::k8s::meta::{ApiStatus, ObjectList, PartialObject};
use crate::toolbox::logger::{log_debug, log_warn};
use crate::toolbox::template::ResolvedDeploymentConfig;
use crate::toolbox::util::error::{new_error, with_context, DynError};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

const COMPONENT: &str = "kube-cluster";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The object kinds a toolbox is made of, with their collection paths.
#[derive(Clone, Copy, Debug)]
enum ToolboxKind {
    Deployment,
    Service,
}

impl ToolboxKind {
    const ALL: [ToolboxKind; 2] = [ToolboxKind::Deployment, ToolboxKind::Service];

    fn name(self) -> &'static str {
        match self {
            ToolboxKind::Deployment => "Deployment",
            ToolboxKind::Service => "Service",
        }
    }

    fn collection(self, base_url: &str, namespace: &str) -> String {
        match self {
            ToolboxKind::Deployment => {
                format!("{base_url}/apis/apps/v1/namespaces/{namespace}/deployments")
            }
            ToolboxKind::Service => format!("{base_url}/api/v1/namespaces/{namespace}/services"),
        }
    }
}

/// Talks to a Kubernetes API server over REST.
#[derive(Clone)]
pub struct KubeCluster {
    inner: KubeApi,
}

#[derive(Clone)]
struct KubeApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl KubeCluster {
    pub fn new(base_url: &str, token: Option<String>, insecure: bool) -> Result<Self, DynError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|err| with_context(err, "failed to build Kubernetes client"))?;
        Ok(KubeCluster {
            inner: KubeApi {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                token,
            },
        })
    }
}

impl KubeApi {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response, ClusterError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|err| ClusterError::Unavailable(with_context(err, action.to_string())))
    }

    async fn list(
        &self,
        kind: ToolboxKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterResource>, ClusterError> {
        let action = format!("listing {}s in {namespace}", kind.name());
        let request = self
            .client
            .get(kind.collection(&self.base_url, namespace))
            .query(&[("labelSelector", selector.to_query())]);
        let response = self.send(request, &action).await?;
        let list: ObjectList<PartialObject> = decode(response, &action).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|object| {
                let name = object.metadata.name?;
                Some(ClusterResource {
                    kind: kind.name().to_string(),
                    name,
                    namespace: object
                        .metadata
                        .namespace
                        .unwrap_or_else(|| namespace.to_string()),
                    labels: object.metadata.labels,
                })
            })
            .collect())
    }

    async fn find(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterResource>, ClusterError> {
        let mut found = Vec::new();
        for kind in ToolboxKind::ALL {
            found.extend(self.list(kind, namespace, selector).await?);
        }
        Ok(found)
    }

    /// Deletes one object; an object that is already gone counts as deleted.
    async fn delete(&self, kind: ToolboxKind, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let action = format!("deleting {} {namespace}/{name}", kind.name());
        let url = format!("{}/{name}", kind.collection(&self.base_url, namespace));
        let response = self.send(self.client.delete(url), &action).await?;
        if response.status() == StatusCode::NOT_FOUND {
            log_debug(
                COMPONENT,
                "Object already deleted",
                &[("kind", kind.name()), ("namespace", namespace), ("name", name)],
            );
            return Ok(false);
        }
        check(response, &action).await?;
        Ok(true)
    }

    async fn create<T: Serialize>(
        &self,
        kind: ToolboxKind,
        namespace: &str,
        object: &T,
    ) -> Result<(), ClusterError> {
        let action = format!("creating {} in {namespace}", kind.name());
        let request = self
            .client
            .post(kind.collection(&self.base_url, namespace))
            .json(object);
        let response = self.send(request, &action).await?;
        check(response, &action).await.map(|_| ())
    }

    async fn deploy(
        &self,
        config: ResolvedDeploymentConfig,
    ) -> Result<DeploymentReceipt, ClusterError> {
        validate_dns_label("namespace", &config.namespace).map_err(ClusterError::Validation)?;
        validate_deployment_name(&config.deployment_name).map_err(ClusterError::Validation)?;

        let namespace = config.namespace.clone();
        let name = config.deployment_name.clone();
        let (deployment, service) = config.to_manifests();

        self.create(ToolboxKind::Deployment, &namespace, &deployment)
            .await?;
        if let Err(err) = self.create(ToolboxKind::Service, &namespace, &service).await {
            // Remove the deployment created above.
            if let Err(rollback) = self.delete(ToolboxKind::Deployment, &namespace, &name).await {
                let rollback = rollback.to_string();
                log_warn(
                    COMPONENT,
                    "Failed to roll back deployment after service creation failed",
                    &[("namespace", &namespace), ("name", &name), ("error", &rollback)],
                );
            }
            return Err(err);
        }

        Ok(DeploymentReceipt {
            resources: vec![
                ClusterResource {
                    kind: deployment.kind,
                    name: name.clone(),
                    namespace: namespace.clone(),
                    labels: deployment.metadata.labels,
                },
                ClusterResource {
                    kind: service.kind,
                    name: name.clone(),
                    namespace: namespace.clone(),
                    labels: service.metadata.labels,
                },
            ],
            namespace,
            deployment_name: name,
            template: config.template,
            template_version: config.template_version,
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response, action: &str) -> Result<T, ClusterError> {
    let response = check(response, action).await?;
    response
        .json::<T>()
        .await
        .map_err(|err| ClusterError::Unavailable(with_context(err, format!("{action}: invalid response"))))
}

/// Maps a non-success response onto the collaborator error classes.
async fn check(response: Response, action: &str) -> Result<Response, ClusterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<ApiStatus>(&text).unwrap_or_default();
    let already_exists = parsed.is_already_exists();
    let message = parsed
        .message
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text
            }
        });
    let message = format!("{action}: {message}");

    Err(match status {
        StatusCode::CONFLICT if already_exists => ClusterError::AlreadyExists(message),
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::CONFLICT
        | StatusCode::UNPROCESSABLE_ENTITY => ClusterError::Validation(message),
        _ => ClusterError::Unavailable(new_error(format!("{message} (HTTP {})", status.as_u16()))),
    })
}

impl ClusterResources for KubeCluster {
    fn find_resources_with_label(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterFuture<Vec<ClusterResource>> {
        let api = self.inner.clone();
        let namespace = namespace.to_string();
        let selector = selector.clone();
        Box::pin(async move {
            validate_dns_label("namespace", &namespace).map_err(ClusterError::Validation)?;
            api.find(&namespace, &selector).await
        })
    }

    fn delete_labeled_resources(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterFuture<DeletionReport> {
        let api = self.inner.clone();
        let namespace = namespace.to_string();
        let selector = selector.clone();
        Box::pin(async move {
            validate_dns_label("namespace", &namespace).map_err(ClusterError::Validation)?;
            let mut deleted = Vec::new();
            for kind in ToolboxKind::ALL {
                for resource in api.list(kind, &namespace, &selector).await? {
                    if api.delete(kind, &namespace, &resource.name).await? {
                        deleted.push(resource);
                    }
                }
            }
            Ok(DeletionReport {
                namespace,
                selector: selector.to_query(),
                deleted,
            })
        })
    }

    fn deploy_generic_model(
        &self,
        config: ResolvedDeploymentConfig,
    ) -> ClusterFuture<DeploymentReceipt> {
        let api = self.inner.clone();
        Box::pin(async move { api.deploy(config).await })
    }
}
