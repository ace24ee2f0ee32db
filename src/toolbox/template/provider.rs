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

use super::{DeploymentTemplate, UserIdentity};
use crate::toolbox::util::error::{new_error, with_context, DynError};
use std::fs;
use std::path::Path;

/// Source of the toolbox template and gatekeeper for user identities.
pub trait TemplateProvider: Send + Sync {
    fn toolbox_template(&self) -> &DeploymentTemplate;

    /// Checks the identity shape before anything is rendered or submitted.
    fn validate_identity(&self, identity: &UserIdentity) -> Result<(), String> {
        if identity.id.trim().is_empty() {
            return Err("user id must not be empty".to_string());
        }
        if identity.namespace.trim().is_empty() {
            return Err("user namespace must not be empty".to_string());
        }
        Ok(())
    }
}

/// Serves a single template fixed at construction.
#[derive(Clone, Debug)]
pub struct StaticTemplateProvider {
    template: DeploymentTemplate,
}

impl StaticTemplateProvider {
    pub fn new(template: DeploymentTemplate) -> Result<Self, DynError> {
        template.validate().map_err(new_error)?;
        Ok(Self { template })
    }

    pub fn builtin() -> Self {
        Self {
            template: DeploymentTemplate::builtin(),
        }
    }

    /// Loads a template from a YAML or JSON document.
    pub fn from_file(path: &Path) -> Result<Self, DynError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            with_context(err, format!("failed to read template {}", path.display()))
        })?;
        let template: DeploymentTemplate = serde_yaml::from_str(&raw).map_err(|err| {
            with_context(err, format!("failed to parse template {}", path.display()))
        })?;
        Self::new(template)
            .map_err(|err| with_context(err, format!("invalid template {}", path.display())))
    }
}

impl TemplateProvider for StaticTemplateProvider {
    fn toolbox_template(&self) -> &DeploymentTemplate {
        &self.template
    }
}
