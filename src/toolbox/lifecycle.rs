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

//! Toolbox lifecycle manager: create, list and delete toolbox instances.
//!
//! The manager holds no state of its own. Every decision is made against
//! what the cluster collaborator reports at the time of the call, and
//! resources are only ever located through the `magic_toolbox` label.

use crate::toolbox::cluster::{
    ClusterError, ClusterResource, ClusterResources, DeletionReport, DeploymentReceipt,
};
use crate::toolbox::k8s::labels::{any_toolbox, ToolboxInstanceDescriptor};
use crate::toolbox::logger::{log_info, log_warn};
use crate::toolbox::observability::metrics::{
    observe_lifecycle_operation, LifecycleOperation, OperationOutcome,
};
use crate::toolbox::observability::tracing::with_span;
use crate::toolbox::template::{
    render, TemplateError, TemplateProvider, UserIdentity, SLOT_DEPLOYMENT_NAME,
};
use crate::toolbox::util::error::DynError;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

const COMPONENT: &str = "lifecycle";

#[derive(Debug)]
pub enum LifecycleError {
    /// A toolbox with this name already exists in the namespace.
    Conflict {
        namespace: String,
        deployment_name: String,
        existing: Vec<ClusterResource>,
    },
    /// The collaborator rejected the rendered configuration.
    InvalidConfig(String),
    InvalidRequest(String),
    CollaboratorUnavailable(DynError),
    Template(TemplateError),
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::Conflict {
                namespace,
                deployment_name,
                ..
            } => write!(
                f,
                "Deployment with name {deployment_name} already exists in namespace {namespace}"
            ),
            LifecycleError::InvalidConfig(message) => {
                write!(f, "invalid deployment configuration: {message}")
            }
            LifecycleError::InvalidRequest(message) => write!(f, "invalid request: {message}"),
            LifecycleError::CollaboratorUnavailable(source) => {
                write!(f, "cluster collaborator unavailable: {source}")
            }
            LifecycleError::Template(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LifecycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LifecycleError::CollaboratorUnavailable(source) => Some(source.as_ref()),
            LifecycleError::Template(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TemplateError> for LifecycleError {
    fn from(err: TemplateError) -> Self {
        LifecycleError::Template(err)
    }
}

impl LifecycleError {
    fn outcome(&self) -> OperationOutcome {
        match self {
            LifecycleError::Conflict { .. } => OperationOutcome::Conflict,
            LifecycleError::CollaboratorUnavailable(_) => OperationOutcome::Error,
            LifecycleError::InvalidConfig(_)
            | LifecycleError::InvalidRequest(_)
            | LifecycleError::Template(_) => OperationOutcome::Rejected,
        }
    }
}

/// Maps collaborator failures for read and delete paths, where a validation
/// failure means the caller sent a bad namespace or name.
fn request_error(err: ClusterError) -> LifecycleError {
    match err {
        ClusterError::Validation(message) | ClusterError::AlreadyExists(message) => {
            LifecycleError::InvalidRequest(message)
        }
        ClusterError::Unavailable(source) => LifecycleError::CollaboratorUnavailable(source),
    }
}

#[derive(Clone)]
pub struct LifecycleManager {
    templates: Arc<dyn TemplateProvider>,
    cluster: Arc<dyn ClusterResources>,
}

impl LifecycleManager {
    pub fn new(templates: Arc<dyn TemplateProvider>, cluster: Arc<dyn ClusterResources>) -> Self {
        Self { templates, cluster }
    }

    /// Creates a toolbox named `deployment_name` in `namespace` for `identity`.
    ///
    /// Fails with [`LifecycleError::Conflict`] when any resource already
    /// carries the toolbox label, including when a concurrent create wins
    /// the race inside the collaborator. A name held by an object without
    /// the label is reported as [`LifecycleError::InvalidConfig`].
    pub async fn create(
        &self,
        namespace: &str,
        deployment_name: &str,
        identity: &UserIdentity,
        overrides: Map<String, Value>,
    ) -> Result<DeploymentReceipt, LifecycleError> {
        let span_name = format!("create:{namespace}/{deployment_name}");
        with_span(
            COMPONENT,
            span_name,
            observe_lifecycle_operation(
                LifecycleOperation::Create,
                LifecycleError::outcome,
                self.create_inner(namespace, deployment_name, identity, overrides),
            ),
        )
        .await
    }

    async fn create_inner(
        &self,
        namespace: &str,
        deployment_name: &str,
        identity: &UserIdentity,
        mut overrides: Map<String, Value>,
    ) -> Result<DeploymentReceipt, LifecycleError> {
        if identity.namespace != namespace {
            return Err(LifecycleError::InvalidRequest(format!(
                "user namespace '{}' does not match target namespace '{namespace}'",
                identity.namespace
            )));
        }
        self.templates
            .validate_identity(identity)
            .map_err(LifecycleError::InvalidRequest)?;

        let descriptor = ToolboxInstanceDescriptor::new(namespace, deployment_name);
        let existing = self.find_existing(&descriptor).await?;
        if !existing.is_empty() {
            return Err(self.conflict(namespace, deployment_name, existing));
        }

        overrides.insert(
            SLOT_DEPLOYMENT_NAME.to_string(),
            Value::String(deployment_name.to_string()),
        );
        let config = render(self.templates.toolbox_template(), identity, &overrides)?;
        let template = config.template.clone();

        match self.cluster.deploy_generic_model(config).await {
            Ok(receipt) => {
                log_info(
                    COMPONENT,
                    "Created toolbox",
                    &[
                        ("namespace", namespace),
                        ("deployment", deployment_name),
                        ("owner", identity.id.as_str()),
                        ("template", template.as_str()),
                    ],
                );
                Ok(receipt)
            }
            Err(ClusterError::AlreadyExists(message)) => {
                let existing = self.find_existing(&descriptor).await?;
                if existing.is_empty() {
                    // The name is held by an object outside the toolbox label,
                    // which delete cannot reach.
                    return Err(LifecycleError::InvalidConfig(message));
                }
                Err(self.conflict(namespace, deployment_name, existing))
            }
            Err(ClusterError::Validation(message)) => Err(LifecycleError::InvalidConfig(message)),
            Err(ClusterError::Unavailable(source)) => {
                Err(LifecycleError::CollaboratorUnavailable(source))
            }
        }
    }

    async fn find_existing(
        &self,
        descriptor: &ToolboxInstanceDescriptor,
    ) -> Result<Vec<ClusterResource>, LifecycleError> {
        self.cluster
            .find_resources_with_label(&descriptor.namespace, &descriptor.selector())
            .await
            .map_err(request_error)
    }

    fn conflict(
        &self,
        namespace: &str,
        deployment_name: &str,
        existing: Vec<ClusterResource>,
    ) -> LifecycleError {
        let count = existing.len().to_string();
        log_warn(
            COMPONENT,
            "Toolbox already exists",
            &[
                ("namespace", namespace),
                ("deployment", deployment_name),
                ("existing", count.as_str()),
            ],
        );
        LifecycleError::Conflict {
            namespace: namespace.to_string(),
            deployment_name: deployment_name.to_string(),
            existing,
        }
    }

    /// Every toolbox resource in `namespace`, regardless of owner.
    pub async fn list(&self, namespace: &str) -> Result<Vec<ClusterResource>, LifecycleError> {
        with_span(
            COMPONENT,
            format!("list:{namespace}"),
            observe_lifecycle_operation(LifecycleOperation::List, LifecycleError::outcome, async {
                let resources = self
                    .cluster
                    .find_resources_with_label(namespace, &any_toolbox())
                    .await
                    .map_err(request_error)?;
                let count = resources.len().to_string();
                log_info(
                    COMPONENT,
                    "Listed toolboxes",
                    &[("namespace", namespace), ("resources", count.as_str())],
                );
                Ok::<_, LifecycleError>(resources)
            }),
        )
        .await
    }

    /// Deletes every resource labelled for `deployment_name`. Deleting a
    /// toolbox that does not exist yields an empty report.
    pub async fn delete(
        &self,
        namespace: &str,
        deployment_name: &str,
    ) -> Result<DeletionReport, LifecycleError> {
        with_span(
            COMPONENT,
            format!("delete:{namespace}/{deployment_name}"),
            observe_lifecycle_operation(LifecycleOperation::Delete, LifecycleError::outcome, async {
                let descriptor = ToolboxInstanceDescriptor::new(namespace, deployment_name);
                let report = self
                    .cluster
                    .delete_labeled_resources(namespace, &descriptor.selector())
                    .await
                    .map_err(request_error)?;
                let count = report.deleted.len().to_string();
                log_info(
                    COMPONENT,
                    "Deleted toolbox",
                    &[
                        ("namespace", namespace),
                        ("deployment", deployment_name),
                        ("deleted", count.as_str()),
                    ],
                );
                Ok::<_, LifecycleError>(report)
            }),
        )
        .await
    }
}
