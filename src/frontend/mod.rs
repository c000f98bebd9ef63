// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Frontend strategy: how a batch of newly-readable bytes on one side of an instance gets
//! logged and forwarded. Chosen once at startup, based on whether any `--protocol` file was given.

pub mod analyze;
pub mod binary;

use std::io::Write;

use crate::catalog::ProtocolCatalog;
use crate::error::Result;
use crate::instance::Instance;
use crate::registry::Side;

/// A strategy for turning queued-but-unprocessed bytes on one side of an instance into forwarded
/// bytes on the other, plus a human-readable trace of what it saw.
///
/// The trace itself is the program's primary output (written to `output`, not through the `log`
/// facade): stdout by default, or the `--output` file. `log`/`env_logger` is reserved for this
/// tool's own operational diagnostics (connection failures, catalog errors), which are a separate
/// stream from the protocol trace.
pub trait Frontend {
    /// Called once at startup, after the catalog (if any) has been loaded.
    fn init(&mut self, _catalog: &ProtocolCatalog) -> Result<()> {
        Ok(())
    }

    /// Drains every complete frame currently queued on `side`'s connection, forwarding each to the
    /// peer connection's outgoing queue and writing its trace to `output`. Returns once fewer than
    /// a full frame remains buffered.
    fn handle_readable(
        &self,
        instance: &mut Instance,
        side: Side,
        catalog: &ProtocolCatalog,
        output: &mut dyn Write,
    ) -> Result<()>;
}

pub fn arrow(side: Side) -> &'static str {
    match side {
        Side::Client => "->",
        Side::Compositor => "<-",
    }
}
