// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The hex-dump frontend: forwards every frame untouched and traces its raw bytes, without
//! consulting a protocol catalog at all. Used when no `--protocol` file is given.

use std::io::Write;

use super::{arrow, Frontend};
use crate::catalog::ProtocolCatalog;
use crate::error::Result;
use crate::instance::Instance;
use crate::registry::Side;

#[derive(Debug, Default)]
pub struct BinaryFrontend;

impl Frontend for BinaryFrontend {
    fn handle_readable(
        &self,
        instance: &mut Instance,
        side: Side,
        _catalog: &ProtocolCatalog,
        output: &mut dyn Write,
    ) -> Result<()> {
        let mut message_count = 0u64;

        loop {
            let header = match instance.peek_frame(side)? {
                Some(header) => header,
                None => break,
            };
            let frame = instance.take_frame(side, header.size);

            let _ = writeln!(
                output,
                "[{}] {} Message {} opcode {}, size {}",
                instance.id,
                arrow(side),
                header.object_id,
                header.opcode,
                header.size
            );
            let _ = writeln!(output, "{}", hex_dump(&frame));
            message_count += 1;

            let (_conn, peer) = instance.connection_and_peer_mut(side);
            peer.queue_write(&frame)?;
        }

        if message_count > 0 {
            let _ = writeln!(output, "[{}]       {message_count} messages", instance.id);
        }

        // Fds are not attached to any single decoded message by this frontend (it never inspects
        // a signature), so every fd queued since the last drain moves as one batch.
        let (conn, peer) = instance.connection_and_peer_mut(side);
        let mut moved = 0u64;
        while let Some(fd) = conn.fds_in().pop_front() {
            peer.put_fd(fd);
            moved += 1;
        }
        if moved > 0 {
            let _ = writeln!(output, "[{}]       >>> {moved} fds in control data", instance.id);
        }

        Ok(())
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for b in bytes {
        out.push_str(&format!("{b:02x} "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProtocolCatalog;
    use crate::instance::Instance;
    use crate::wire::WireConnection;
    use std::os::unix::net::UnixStream;

    fn paired_instance() -> Instance {
        let (client_sock, _client_remote) = UnixStream::pair().unwrap();
        let (compositor_sock, _compositor_remote) = UnixStream::pair().unwrap();
        let catalog = ProtocolCatalog::default();
        Instance::new(
            1,
            WireConnection::new(client_sock).unwrap(),
            WireConnection::new(compositor_sock).unwrap(),
            &catalog,
        )
    }

    #[test]
    fn forwards_a_complete_frame_and_waits_on_a_partial_one() {
        let mut instance = paired_instance();
        let catalog = ProtocolCatalog::default();
        let frontend = BinaryFrontend;
        let mut output = Vec::new();

        let mut frame = Vec::new();
        frame.extend_from_slice(&1u32.to_le_bytes());
        frame.extend_from_slice(&((12u32) << 16).to_le_bytes()); // opcode 0, size 12
        frame.extend_from_slice(&7u32.to_le_bytes());
        instance.client_side.data_in().push(&frame);
        instance.client_side.data_in().push(&[0xAA]); // partial next frame

        frontend.handle_readable(&mut instance, Side::Client, &catalog, &mut output).unwrap();

        assert_eq!(instance.client_side.data_in().size(), 1); // partial byte still waiting
        assert_eq!(instance.compositor_side.data_out().size(), frame.len());
        let logged = String::from_utf8(output).unwrap();
        assert!(logged.contains("Message 1 opcode 0, size 12"));
    }
}
