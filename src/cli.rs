// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Command-line surface, mirroring the original `-S`/`-o`/`-d`/`--` getopt parsing one to
//! one but through `clap`'s derive macros, matching how this repository's other binaries parse
//! arguments.

use std::path::PathBuf;

use clap::Parser;

/// A Wayland protocol dumper: sits between a client and a compositor and logs every message that
/// crosses the wire.
#[derive(Debug, Parser)]
pub struct Cli {
    /// Run in server mode, listening on this socket name (e.g. "wayland-0") instead of spawning a
    /// single traced client.
    #[arg(short = 'S', long = "server", value_name = "NAME")]
    pub server: Option<String>,

    /// Write trace output to this file instead of stdout.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Add a protocol description file. May be given more than once; once given at least once,
    /// output switches from a raw hex dump to the typed decoder.
    #[arg(short = 'd', long = "protocol", value_name = "FILE")]
    pub protocol: Vec<PathBuf>,

    /// In single mode: the client command to spawn and trace, given after `--`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub client: Vec<String>,
}

impl Cli {
    pub fn is_server_mode(&self) -> bool {
        self.server.is_some()
    }
}
