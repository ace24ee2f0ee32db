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

//! Label addressing for toolbox resources.
//!
//! Every object created for a toolbox carries `magic_toolbox=<deployment name>`
//! and is only ever located through that label. The selector does not include
//! the owning user, so any caller that knows the namespace and name can list
//! or delete the instance.

use std::collections::BTreeMap;
use std::fmt;

pub const LABEL_MAGIC_TOOLBOX: &str = "magic_toolbox";
pub const LABEL_OWNER: &str = "magic_toolbox_owner";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "magic-toolbox";

const MAX_DNS_LABEL_LEN: usize = 63;

/// A single label requirement: either `key=value` or bare existence of `key`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LabelSelector {
    key: String,
    value: Option<String>,
}

impl LabelSelector {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match (&self.value, labels.get(&self.key)) {
            (Some(expected), Some(actual)) => expected == actual,
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }

    /// Renders the requirement in Kubernetes `labelSelector` query syntax.
    pub fn to_query(&self) -> String {
        match &self.value {
            Some(value) => format!("{}={}", self.key, value),
            None => self.key.clone(),
        }
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

/// Selector addressing every resource of one toolbox instance.
pub fn selector_for(deployment_name: &str) -> LabelSelector {
    LabelSelector::equals(LABEL_MAGIC_TOOLBOX, deployment_name)
}

/// Identity of one toolbox instance: a deployment name within a namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolboxInstanceDescriptor {
    pub namespace: String,
    pub deployment_name: String,
}

impl ToolboxInstanceDescriptor {
    pub fn new(namespace: impl Into<String>, deployment_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment_name: deployment_name.into(),
        }
    }

    pub fn selector(&self) -> LabelSelector {
        selector_for(&self.deployment_name)
    }
}

/// Selector matching resources of any toolbox instance.
pub fn any_toolbox() -> LabelSelector {
    LabelSelector::exists(LABEL_MAGIC_TOOLBOX)
}

/// Labels stamped on every object created for `deployment_name`. The owner
/// label is omitted when the user id is not a legal label value.
pub fn toolbox_labels(deployment_name: &str, owner: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MAGIC_TOOLBOX.to_string(), deployment_name.to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
    if is_label_value(owner) {
        labels.insert(LABEL_OWNER.to_string(), owner.to_string());
    }
    labels
}

fn is_label_value(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_DNS_LABEL_LEN
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Checks `value` against RFC 1123 label syntax; `kind` names the field in the message.
pub fn validate_dns_label(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must not be empty"));
    }
    if value.len() > MAX_DNS_LABEL_LEN {
        return Err(format!(
            "{kind} '{value}' exceeds {MAX_DNS_LABEL_LEN} characters"
        ));
    }
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let bytes = value.as_bytes();
    let alnum_edges =
        bytes[0].is_ascii_alphanumeric() && bytes[bytes.len() - 1].is_ascii_alphanumeric();
    if !valid_chars || !alnum_edges {
        return Err(format!(
            "{kind} '{value}' must consist of lowercase alphanumeric characters or '-', \
             and must start and end with an alphanumeric character"
        ));
    }
    Ok(())
}

/// Deployment names also name the Service, so they must be RFC 1035 labels:
/// an RFC 1123 label that starts with a letter.
pub fn validate_deployment_name(value: &str) -> Result<(), String> {
    validate_dns_label("deployment name", value)?;
    if !value.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(format!("deployment name '{value}' must start with a lowercase letter"));
    }
    Ok(())
}
