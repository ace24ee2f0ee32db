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

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::toolbox::logger::{LogFormat, LogLevel};
use crate::toolbox::util::error::{new_error, with_context, DynError};

const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 30;

/// Settings recognised by the management plane, one per environment variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Config {
    UseAuth,
    MasterKey,
    Bind,
    ClusterUrl,
    ClusterToken,
    ClusterInsecure,
    Template,
    ProxyTimeout,
    LogFormat,
    LogLevel,
}

impl Config {
    /// Returns the environment variable backing the setting.
    pub fn env_var(&self) -> &'static str {
        match self {
            Config::UseAuth => "TL_USE_AUTH",
            Config::MasterKey => "TL_MASTER_KEY",
            Config::Bind => "MAGIC_TOOLBOX_BIND",
            Config::ClusterUrl => "MAGIC_TOOLBOX_CLUSTER_URL",
            Config::ClusterToken => "MAGIC_TOOLBOX_CLUSTER_TOKEN",
            Config::ClusterInsecure => "MAGIC_TOOLBOX_CLUSTER_INSECURE",
            Config::Template => "MAGIC_TOOLBOX_TEMPLATE",
            Config::ProxyTimeout => "MAGIC_TOOLBOX_PROXY_TIMEOUT_SECS",
            Config::LogFormat => "MAGIC_TOOLBOX_LOG_FORMAT",
            Config::LogLevel => "MAGIC_TOOLBOX_LOG_LEVEL",
        }
    }

    /// Reads the setting through `lookup`, treating blank values as unset.
    fn read(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
        lookup(self.env_var())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Auth is on unless the flag is one of the recognised false spellings.
fn parse_use_auth(value: Option<&str>) -> bool {
    match value {
        Some(value) => !matches!(
            value.to_ascii_lowercase().as_str(),
            "false" | "0" | "f" | "no"
        ),
        None => true,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub enabled: bool,
    pub master_key: Option<String>,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("enabled", &self.enabled)
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where lifecycle operations are sent.
#[derive(Clone, PartialEq, Eq)]
pub enum ClusterBackend {
    InMemory,
    Kubernetes {
        base_url: String,
        token: Option<String>,
        insecure: bool,
    },
}

impl std::fmt::Debug for ClusterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterBackend::InMemory => f.write_str("InMemory"),
            ClusterBackend::Kubernetes {
                base_url,
                token,
                insecure,
            } => f
                .debug_struct("Kubernetes")
                .field("base_url", base_url)
                .field("token", &token.as_ref().map(|_| "<redacted>"))
                .field("insecure", insecure)
                .finish(),
        }
    }
}

/// Process-wide settings, resolved once at startup and handed to the server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub auth: AuthSettings,
    pub cluster: ClusterBackend,
    pub template_path: Option<PathBuf>,
    pub proxy_timeout: Duration,
    pub log_format: LogFormat,
    pub log_level: LogLevel,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, DynError> {
        Self::from_lookup(&|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, DynError> {
        let enabled = parse_use_auth(Config::UseAuth.read(lookup).as_deref());
        let master_key = Config::MasterKey.read(lookup);
        if enabled && master_key.is_none() {
            return Err(new_error(format!(
                "authentication is enabled but {} is not set",
                Config::MasterKey.env_var()
            )));
        }

        let bind_raw = Config::Bind
            .read(lookup)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse::<SocketAddr>().map_err(|err| {
            with_context(
                err,
                format!("invalid {} value '{bind_raw}'", Config::Bind.env_var()),
            )
        })?;

        let cluster = match Config::ClusterUrl.read(lookup) {
            Some(base_url) => {
                let insecure = match Config::ClusterInsecure.read(lookup) {
                    Some(raw) => parse_flag(&raw).ok_or_else(|| {
                        new_error(format!(
                            "invalid {} value '{raw}'",
                            Config::ClusterInsecure.env_var()
                        ))
                    })?,
                    None => false,
                };
                ClusterBackend::Kubernetes {
                    base_url,
                    token: Config::ClusterToken.read(lookup),
                    insecure,
                }
            }
            None => ClusterBackend::InMemory,
        };

        let proxy_timeout = match Config::ProxyTimeout.read(lookup) {
            Some(raw) => {
                let seconds = raw.parse::<u64>().map_err(|err| {
                    with_context(
                        err,
                        format!("invalid {} value '{raw}'", Config::ProxyTimeout.env_var()),
                    )
                })?;
                if seconds == 0 {
                    return Err(new_error(format!(
                        "{} must be greater than zero",
                        Config::ProxyTimeout.env_var()
                    )));
                }
                Duration::from_secs(seconds)
            }
            None => Duration::from_secs(DEFAULT_PROXY_TIMEOUT_SECS),
        };

        let log_format = match Config::LogFormat.read(lookup) {
            Some(raw) => raw.parse::<LogFormat>().map_err(new_error)?,
            None => LogFormat::Text,
        };
        let log_level = match Config::LogLevel.read(lookup) {
            Some(raw) => raw.parse::<LogLevel>().map_err(new_error)?,
            None => LogLevel::Info,
        };

        Ok(ServerConfig {
            bind,
            auth: AuthSettings {
                enabled,
                master_key,
            },
            cluster,
            template_path: Config::Template.read(lookup).map(PathBuf::from),
            proxy_timeout,
            log_format,
            log_level,
        })
    }
}
