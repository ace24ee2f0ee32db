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

use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::toolbox::api::client::DEFAULT_API_URL;

/// Parse a key=value argument into a tuple, validating the format.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!(
            "Invalid option '{}'. Must be in key=value format.",
            s
        )),
    }
}

/// Manage Magic Toolbox deployments.
#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct MagicToolbox {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Base URL of the management API
    #[arg(long, global = true, env = "MAGIC_TOOLBOX_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// API key sent as X-API-KEY
    #[arg(long, global = true, env = "MAGIC_TOOLBOX_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Output format for responses
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the management API server
    Server(ServerArgs),

    /// Check the management API is up
    Health,

    /// List toolboxes in a namespace
    List(ListArgs),

    /// Create a toolbox
    Create(CreateArgs),

    /// Delete a toolbox and all of its resources
    Delete(DeleteArgs),

    /// Check the health of a running toolbox
    ToolboxHealth(InstanceArgs),

    /// Register an API tool with a running toolbox
    AddTool(AddToolArgs),

    /// List the tools registered with a running toolbox
    GetTools(InstanceArgs),
}

#[derive(Args)]
pub struct ServerArgs {
    /// Address to bind (overrides MAGIC_TOOLBOX_BIND)
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long)]
    pub namespace: String,

    /// Accepted for compatibility; listings are not scoped by user
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Args)]
pub struct CreateArgs {
    /// Deployment name of the new toolbox
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub user: String,

    #[arg(long)]
    pub namespace: String,

    /// API key the new toolbox will require
    #[arg(long, env = "MAGIC_TOOLBOX_TOOLBOX_KEY", hide_env_values = true)]
    pub toolbox_key: String,

    /// Template override in key=value form (repeatable)
    #[arg(long = "set", value_parser = parse_key_val)]
    pub overrides: Vec<(String, String)>,
}

#[derive(Args)]
pub struct DeleteArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub namespace: String,

    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Args)]
pub struct InstanceArgs {
    /// Service URL of the running toolbox
    #[arg(long)]
    pub url: String,

    /// API key of the running toolbox
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Args)]
pub struct AddToolArgs {
    #[command(flatten)]
    pub instance: InstanceArgs,

    /// URL of the API tool to register
    #[arg(long)]
    pub tool_url: String,

    /// Route of the tool to expose (repeatable)
    #[arg(long = "route")]
    pub routes: Vec<String>,

    /// API key the toolbox should use when calling the tool
    #[arg(long)]
    pub tool_api_key: Option<String>,
}
