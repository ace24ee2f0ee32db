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

use serde_json::Value;

use crate::toolbox::cli::args::OutputFormat;
use crate::toolbox::cli::Terminal;
use crate::toolbox::util::error::{with_context, DynError};

pub(super) fn render(value: &Value, format: OutputFormat) -> Result<String, DynError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|err| with_context(err, "failed to render JSON output")),
        OutputFormat::Yaml => serde_yaml::to_string(value)
            .map(|text| text.trim_end().to_string())
            .map_err(|err| with_context(err, "failed to render YAML output")),
    }
}

pub(super) fn print_value(value: &Value, format: OutputFormat) -> Result<(), DynError> {
    let rendered = render(value, format)?;
    Terminal::print(&rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_json_and_yaml() {
        let value = json!({"status": "OK"});
        assert_eq!(
            render(&value, OutputFormat::Json).unwrap(),
            "{\n  \"status\": \"OK\"\n}"
        );
        assert_eq!(render(&value, OutputFormat::Yaml).unwrap(), "status: OK");
    }
}
