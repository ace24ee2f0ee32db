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

//! Deployment template rendering.
//!
//! A [`DeploymentTemplate`] is the immutable base configuration for the
//! toolbox workload. [`render`] combines it with the requesting user's
//! identity and per-request overrides into a [`ResolvedDeploymentConfig`],
//! which the cluster collaborator turns into manifests. Rendering is pure.

pub mod provider;

use crate::toolbox::k8s::deployment::{
    ContainerPort, ContainerSpec, Deployment, DeploymentSpec, EnvVar, LabelSelector, PodSpec,
    PodTemplateSpec,
};
use crate::toolbox::k8s::labels::{self, LABEL_MAGIC_TOOLBOX};
use crate::toolbox::k8s::meta::ObjectMeta;
use crate::toolbox::k8s::service::Service;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

pub use provider::{StaticTemplateProvider, TemplateProvider};

pub const SLOT_DEPLOYMENT_NAME: &str = "deployment_name";
const SLOT_IMAGE: &str = "image";
const SLOT_PORT: &str = "port";
const SLOT_REPLICAS: &str = "replicas";

const ENV_MASTER_KEY: &str = "TL_MASTER_KEY";
const ENV_USE_AUTH: &str = "TL_USE_AUTH";
const ENV_PARAM_PREFIX: &str = "TL_PARAM_";

/// The user a toolbox is created for. `credential` becomes the API key of
/// the toolbox instance itself and is never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub namespace: String,
    #[serde(rename = "API_key", default)]
    pub credential: String,
}

impl UserIdentity {
    pub fn new(
        id: impl Into<String>,
        namespace: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            namespace: namespace.into(),
            credential: credential.into(),
        }
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserIdentity")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("credential", &"<redacted>")
            .finish()
    }
}

fn default_workload_type() -> String {
    "toolbox".to_string()
}

fn default_replicas() -> u32 {
    1
}

fn default_required_slots() -> Vec<String> {
    vec![SLOT_DEPLOYMENT_NAME.to_string()]
}

/// Versioned base configuration for the toolbox workload type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTemplate {
    pub name: String,
    pub version: String,
    #[serde(default = "default_workload_type")]
    pub workload_type: String,
    pub image: String,
    pub port: u16,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
    #[serde(default = "default_required_slots")]
    pub required_slots: Vec<String>,
}

impl DeploymentTemplate {
    /// The template shipped with the binary.
    pub fn builtin() -> Self {
        let mut defaults = BTreeMap::new();
        defaults.insert("log_level".to_string(), Value::String("info".to_string()));
        DeploymentTemplate {
            name: "tool-library".to_string(),
            version: "v1".to_string(),
            workload_type: default_workload_type(),
            image: "ghcr.io/magic-toolbox/tool-library:v1".to_string(),
            port: 8000,
            replicas: 1,
            defaults,
            required_slots: default_required_slots(),
        }
    }

    /// Rejects templates that could never render a usable deployment.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("template name must not be empty".to_string());
        }
        if self.version.trim().is_empty() {
            return Err(format!("template '{}' has no version", self.name));
        }
        if self.image.trim().is_empty() {
            return Err(format!("template '{}' has no image", self.name));
        }
        if self.port == 0 {
            return Err(format!("template '{}' has port 0", self.name));
        }
        if !self.required_slots.iter().any(|slot| slot == SLOT_DEPLOYMENT_NAME) {
            return Err(format!(
                "template '{}' must require the '{SLOT_DEPLOYMENT_NAME}' slot",
                self.name
            ));
        }
        Ok(())
    }
}

/// Fully rendered configuration, handed to the cluster collaborator as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedDeploymentConfig {
    pub template: String,
    pub template_version: String,
    pub namespace: String,
    pub deployment_name: String,
    pub owner: UserIdentity,
    pub labels: BTreeMap<String, String>,
    pub image: String,
    pub port: u16,
    pub replicas: u32,
    pub parameters: BTreeMap<String, Value>,
}

impl ResolvedDeploymentConfig {
    /// Builds the Deployment and Service objects submitted to Kubernetes.
    pub fn to_manifests(&self) -> (Deployment, Service) {
        let selector = BTreeMap::from([(
            LABEL_MAGIC_TOOLBOX.to_string(),
            self.deployment_name.clone(),
        )]);

        let mut env = Vec::new();
        if self.owner.credential.is_empty() {
            env.push(EnvVar::new(ENV_USE_AUTH, "false"));
        } else {
            env.push(EnvVar::new(ENV_USE_AUTH, "true"));
            env.push(EnvVar::new(ENV_MASTER_KEY, self.owner.credential.clone()));
        }
        for (key, value) in &self.parameters {
            if let Some(rendered) = scalar_env_value(value) {
                env.push(EnvVar::new(param_env_name(key), rendered));
            }
        }

        let container = ContainerSpec {
            name: self.template.clone(),
            image: self.image.clone(),
            env,
            ports: vec![ContainerPort {
                container_port: self.port,
                name: Some("http".to_string()),
            }],
        };

        let deployment = Deployment::new(
            ObjectMeta::named(&self.deployment_name, &self.namespace, self.labels.clone()),
            DeploymentSpec {
                replicas: self.replicas,
                selector: LabelSelector {
                    match_labels: selector.clone(),
                },
                template: PodTemplateSpec {
                    metadata: ObjectMeta {
                        labels: self.labels.clone(),
                        ..Default::default()
                    },
                    spec: PodSpec {
                        containers: vec![container],
                    },
                },
            },
        );
        let service = Service::cluster_ip(
            ObjectMeta::named(&self.deployment_name, &self.namespace, self.labels.clone()),
            selector,
            self.port,
        );
        (deployment, service)
    }
}

fn param_env_name(key: &str) -> String {
    let mut name = String::from(ENV_PARAM_PREFIX);
    name.extend(key.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    name
}

fn scalar_env_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    MissingSlot(String),
    InvalidSlot { slot: String, reason: String },
    MissingIdentityField(&'static str),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::MissingSlot(slot) => {
                write!(f, "required template slot '{slot}' was not provided")
            }
            TemplateError::InvalidSlot { slot, reason } => {
                write!(f, "template slot '{slot}' is invalid: {reason}")
            }
            TemplateError::MissingIdentityField(field) => {
                write!(f, "user identity is missing '{field}'")
            }
        }
    }
}

impl Error for TemplateError {}

/// Renders `template` for `identity`. Overrides win over template defaults.
/// Required slots must be supplied by the overrides as non-empty strings;
/// template defaults never fill them.
pub fn render(
    template: &DeploymentTemplate,
    identity: &UserIdentity,
    overrides: &Map<String, Value>,
) -> Result<ResolvedDeploymentConfig, TemplateError> {
    if identity.namespace.trim().is_empty() {
        return Err(TemplateError::MissingIdentityField("namespace"));
    }

    let mut merged: BTreeMap<String, Value> = template.defaults.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }

    for slot in &template.required_slots {
        match overrides.get(slot) {
            Some(Value::String(value)) if !value.trim().is_empty() => {}
            _ => return Err(TemplateError::MissingSlot(slot.clone())),
        }
    }
    let deployment_name = match merged.remove(SLOT_DEPLOYMENT_NAME) {
        Some(Value::String(name)) => name,
        _ => return Err(TemplateError::MissingSlot(SLOT_DEPLOYMENT_NAME.to_string())),
    };

    let image = match merged.remove(SLOT_IMAGE) {
        None => template.image.clone(),
        Some(Value::String(image)) if !image.trim().is_empty() => image,
        Some(_) => return Err(invalid(SLOT_IMAGE, "expected a non-empty string")),
    };
    let port = match merged.remove(SLOT_PORT) {
        None => template.port,
        Some(value) => value
            .as_u64()
            .filter(|port| (1..=u64::from(u16::MAX)).contains(port))
            .map(|port| port as u16)
            .ok_or_else(|| invalid(SLOT_PORT, "expected an integer between 1 and 65535"))?,
    };
    let replicas = match merged.remove(SLOT_REPLICAS) {
        None => template.replicas,
        Some(value) => value
            .as_u64()
            .and_then(|replicas| u32::try_from(replicas).ok())
            .ok_or_else(|| invalid(SLOT_REPLICAS, "expected a non-negative integer"))?,
    };

    Ok(ResolvedDeploymentConfig {
        template: template.name.clone(),
        template_version: template.version.clone(),
        namespace: identity.namespace.clone(),
        labels: labels::toolbox_labels(&deployment_name, &identity.id),
        deployment_name,
        owner: identity.clone(),
        image,
        port,
        replicas,
        parameters: merged,
    })
}

fn invalid(slot: &str, reason: &str) -> TemplateError {
    TemplateError::InvalidSlot {
        slot: slot.to_string(),
        reason: reason.to_string(),
    }
}
