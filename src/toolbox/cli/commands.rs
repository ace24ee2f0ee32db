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

use serde_json::{Map, Value};

use crate::toolbox::api::client::{is_error_payload, ManagementClient};
use crate::toolbox::config::ServerConfig;
use crate::toolbox::server;
use crate::toolbox::template::UserIdentity;
use crate::toolbox::util::error::{new_error, DynError};

use super::args::{Commands, MagicToolbox, ServerArgs};
use super::output::print_value;

/// `--set` values are read as JSON scalars where possible, so `replicas=2`
/// yields a number and `log_level=debug` a string.
fn override_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn overrides_from(pairs: &[(String, String)]) -> Option<Map<String, Value>> {
    if pairs.is_empty() {
        return None;
    }
    Some(
        pairs
            .iter()
            .map(|(key, value)| (key.clone(), override_value(value)))
            .collect(),
    )
}

fn client(cli: &MagicToolbox) -> Result<ManagementClient, DynError> {
    ManagementClient::new(&cli.global.api_url, cli.global.api_key.clone())
}

async fn serve(args: &ServerArgs) -> Result<(), DynError> {
    let mut config = ServerConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    server::serve(config).await
}

pub async fn run(cli: &MagicToolbox) -> Result<(), DynError> {
    let response = match &cli.command {
        Commands::Server(args) => return serve(args).await,
        Commands::Health => client(cli)?.health().await,
        Commands::List(args) => {
            client(cli)?
                .list_toolboxes(&args.namespace, args.user.as_deref())
                .await
        }
        Commands::Create(args) => {
            let user = UserIdentity::new(&args.user, &args.namespace, &args.toolbox_key);
            client(cli)?
                .create_toolbox(&args.name, user, overrides_from(&args.overrides))
                .await
        }
        Commands::Delete(args) => {
            client(cli)?
                .delete_toolbox(&args.namespace, &args.name, args.user.as_deref())
                .await
        }
        Commands::ToolboxHealth(args) => {
            client(cli)?
                .toolbox_health(&args.url, args.key.as_deref())
                .await
        }
        Commands::AddTool(args) => {
            let routes = (!args.routes.is_empty()).then(|| args.routes.clone());
            client(cli)?
                .add_api_tool(
                    &args.instance.url,
                    args.instance.key.as_deref(),
                    &args.tool_url,
                    routes,
                    args.tool_api_key.as_deref(),
                )
                .await
        }
        Commands::GetTools(args) => {
            client(cli)?
                .get_tools(&args.url, args.key.as_deref())
                .await
        }
    };

    print_value(&response, cli.global.output)?;
    if is_error_payload(&response) {
        let message = response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        return Err(new_error(message));
    }
    Ok(())
}
