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

//! Terminal output for the CLI. Response bodies go to stdout undecorated so
//! they can be piped; errors go to stderr, coloured only on a terminal.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};

const COLOR_ERROR: &str = "\x1b[31m";
const COLOR_RESET: &str = "\x1b[0m";

pub struct Terminal;

impl Terminal {
    /// Prints a rendered response body.
    pub fn print(rendered: &str) {
        let _ = write_body(&mut io::stdout().lock(), rendered);
    }

    pub fn error(err: &dyn Display) {
        let stderr = io::stderr();
        let colored = stderr.is_terminal();
        let _ = write_error(&mut stderr.lock(), err, colored);
    }
}

fn write_body(out: &mut dyn Write, rendered: &str) -> io::Result<()> {
    out.write_all(rendered.as_bytes())?;
    if !rendered.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    out.flush()
}

fn write_error(out: &mut dyn Write, err: &dyn Display, colored: bool) -> io::Result<()> {
    if colored {
        writeln!(out, "{COLOR_ERROR}Error: {err}{COLOR_RESET}")
    } else {
        writeln!(out, "Error: {err}")
    }
}
