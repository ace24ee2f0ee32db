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

use clap::Parser;
use magic_toolbox::toolbox::cli::{self, MagicToolbox, Terminal};
use std::process;

#[tokio::main]
async fn main() {
    let args = MagicToolbox::parse();
    if let Err(err) = cli::run(&args).await {
        Terminal::error(&err);
        process::exit(1);
    }
}
