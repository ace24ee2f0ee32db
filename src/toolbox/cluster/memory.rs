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
    selector_for, validate_deployment_name, validate_dns_label, LabelSelector,
};
use crate::toolbox::template::ResolvedDeploymentConfig;
use crate::toolbox::util::error::new_error;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct ClusterState {
    resources: Vec<ClusterResource>,
    submitted: Vec<ResolvedDeploymentConfig>,
    outage: Option<String>,
}

/// Process-local cluster used for development and tests. The existence check
/// and the insert of `deploy_generic_model` happen under one lock.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every object currently stored, in creation order.
    pub fn resources(&self) -> Vec<ClusterResource> {
        self.lock().resources.clone()
    }

    /// Configurations accepted by `deploy_generic_model`, in order.
    pub fn submitted_configs(&self) -> Vec<ResolvedDeploymentConfig> {
        self.lock().submitted.clone()
    }

    /// Seeds an object, bypassing validation.
    pub fn insert_resource(&self, resource: ClusterResource) {
        self.lock().resources.push(resource);
    }

    /// While set, every call fails with `Unavailable(reason)`.
    pub fn set_outage(&self, reason: Option<&str>) {
        self.lock().outage = reason.map(str::to_string);
    }

    fn check_outage(state: &ClusterState) -> Result<(), ClusterError> {
        match &state.outage {
            Some(reason) => Err(ClusterError::Unavailable(new_error(reason.clone()))),
            None => Ok(()),
        }
    }

    fn find_locked(
        state: &ClusterState,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Vec<ClusterResource> {
        state
            .resources
            .iter()
            .filter(|resource| resource.namespace == namespace && selector.matches(&resource.labels))
            .cloned()
            .collect()
    }
}

impl ClusterResources for InMemoryCluster {
    fn find_resources_with_label(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterFuture<Vec<ClusterResource>> {
        let result = validate_dns_label("namespace", namespace)
            .map_err(ClusterError::Validation)
            .and_then(|_| {
                let state = self.lock();
                Self::check_outage(&state)?;
                Ok(Self::find_locked(&state, namespace, selector))
            });
        Box::pin(async move { result })
    }

    fn delete_labeled_resources(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterFuture<DeletionReport> {
        let result = validate_dns_label("namespace", namespace)
            .map_err(ClusterError::Validation)
            .and_then(|_| {
                let mut state = self.lock();
                Self::check_outage(&state)?;
                let (deleted, kept): (Vec<_>, Vec<_>) =
                    state.resources.drain(..).partition(|resource| {
                        resource.namespace == namespace && selector.matches(&resource.labels)
                    });
                state.resources = kept;
                Ok(DeletionReport {
                    namespace: namespace.to_string(),
                    selector: selector.to_query(),
                    deleted,
                })
            });
        Box::pin(async move { result })
    }

    fn deploy_generic_model(
        &self,
        config: ResolvedDeploymentConfig,
    ) -> ClusterFuture<DeploymentReceipt> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            validate_dns_label("namespace", &config.namespace).map_err(ClusterError::Validation)?;
            validate_deployment_name(&config.deployment_name).map_err(ClusterError::Validation)?;
            if config.replicas == 0 {
                return Err(ClusterError::Validation(
                    "replicas must be at least 1".to_string(),
                ));
            }

            let mut state = state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            InMemoryCluster::check_outage(&state)?;
            let selector = selector_for(&config.deployment_name);
            if !InMemoryCluster::find_locked(&state, &config.namespace, &selector).is_empty() {
                return Err(ClusterError::AlreadyExists(format!(
                    "toolbox '{}' already exists in namespace '{}'",
                    config.deployment_name, config.namespace
                )));
            }

            let (deployment, service) = config.to_manifests();
            let resources = vec![
                ClusterResource {
                    kind: deployment.kind,
                    name: config.deployment_name.clone(),
                    namespace: config.namespace.clone(),
                    labels: deployment.metadata.labels,
                },
                ClusterResource {
                    kind: service.kind,
                    name: config.deployment_name.clone(),
                    namespace: config.namespace.clone(),
                    labels: service.metadata.labels,
                },
            ];
            state.resources.extend(resources.iter().cloned());
            state.submitted.push(config.clone());

            Ok(DeploymentReceipt {
                namespace: config.namespace,
                deployment_name: config.deployment_name,
                template: config.template,
                template_version: config.template_version,
                resources,
            })
        })
    }
}
