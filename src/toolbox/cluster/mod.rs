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

//! Cluster resource collaborator.
//!
//! The lifecycle manager never talks to a cluster directly; it goes through
//! [`ClusterResources`], which locates objects by label, bulk-deletes them,
//! and submits rendered configurations. The collaborator is the only source
//! of truth for which toolboxes exist.

pub mod kube;
pub mod memory;

use crate::toolbox::k8s::labels::LabelSelector;
use crate::toolbox::template::ResolvedDeploymentConfig;
use crate::toolbox::util::error::DynError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub use kube::KubeCluster;
pub use memory::InMemoryCluster;

pub type ClusterFuture<T> = Pin<Box<dyn Future<Output = Result<T, ClusterError>> + Send>>;

/// One labelled object as seen by the collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterResource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub namespace: String,
    pub selector: String,
    pub deleted: Vec<ClusterResource>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReceipt {
    pub namespace: String,
    pub deployment_name: String,
    pub template: String,
    pub template_version: String,
    pub resources: Vec<ClusterResource>,
}

#[derive(Debug)]
pub enum ClusterError {
    /// The request was malformed (bad namespace, name, or manifest).
    Validation(String),
    /// An object with the same identity already exists.
    AlreadyExists(String),
    Unavailable(DynError),
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::Validation(message) => write!(f, "invalid request: {message}"),
            ClusterError::AlreadyExists(message) => write!(f, "already exists: {message}"),
            ClusterError::Unavailable(source) => write!(f, "cluster unavailable: {source}"),
        }
    }
}

impl Error for ClusterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClusterError::Unavailable(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub trait ClusterResources: Send + Sync {
    /// Lists every object in `namespace` matched by `selector`.
    fn find_resources_with_label(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterFuture<Vec<ClusterResource>>;

    /// Deletes every object in `namespace` matched by `selector`.
    fn delete_labeled_resources(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterFuture<DeletionReport>;

    /// Creates the objects for `config`. Fails with
    /// [`ClusterError::AlreadyExists`] rather than creating a second resource
    /// set for the same name.
    fn deploy_generic_model(&self, config: ResolvedDeploymentConfig)
        -> ClusterFuture<DeploymentReceipt>;
}
