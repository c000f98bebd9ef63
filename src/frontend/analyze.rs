// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The typed-decode frontend: resolves each frame's object id and opcode against a loaded
//! protocol catalog and traces the call or event with its arguments rendered. Used
//! whenever at least one `--protocol` file is given.

use std::io::Write;

use super::{arrow, Frontend};
use crate::catalog::ProtocolCatalog;
use crate::decoder::{self, DecodeError};
use crate::error::Result;
use crate::instance::Instance;
use crate::registry::Side;

#[derive(Debug, Default)]
pub struct AnalyzeFrontend;

impl Frontend for AnalyzeFrontend {
    fn handle_readable(
        &self,
        instance: &mut Instance,
        side: Side,
        catalog: &ProtocolCatalog,
        output: &mut dyn Write,
    ) -> Result<()> {
        loop {
            let header = match instance.peek_frame(side)? {
                Some(header) => header,
                None => break,
            };
            let frame = instance.take_frame(side, header.size);
            let payload = frame[8..].to_vec();

            let (registry, conn, peer) = instance.registry_and_connections_mut(side);
            let interface = registry.lookup(header.object_id);
            if interface.is_none() {
                let _ = writeln!(
                    output,
                    "[{}] Unknown object {} opcode {}, size {}",
                    instance.id, header.object_id, header.opcode, header.size
                );
                let _ = writeln!(
                    output,
                    "[{}] warning: we can't guarantee the following result",
                    instance.id
                );
            }

            let decoded = decoder::decode(
                &payload,
                interface,
                side,
                header.opcode,
                registry,
                peer.fds_out(),
                conn.fds_in(),
                catalog,
            );

            match decoded {
                Ok(decoded) => {
                    let rendered = decoded
                        .args
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    let _ = writeln!(
                        output,
                        "[{}] {} {}@{}.{}({rendered})",
                        instance.id,
                        arrow(side),
                        decoded.interface_name,
                        header.object_id,
                        decoded.message_name
                    );
                    if decoded.is_destroy {
                        instance.registry.remove(header.object_id);
                    }
                }
                Err(DecodeError::UnknownOpcode { interface, opcode }) => {
                    let _ = writeln!(
                        output,
                        "[{}] {interface} has no message at opcode {opcode}, forwarding opaque",
                        instance.id
                    );
                }
                Err(DecodeError::UnknownObject { .. }) => {
                    // Already traced above; nothing further to decode.
                }
                Err(DecodeError::Truncated { signature, consumed_words }) => {
                    let _ = writeln!(
                        output,
                        "[{}] signature \"{signature}\" ran out of payload after {consumed_words} words",
                        instance.id
                    );
                }
            }

            let (_conn, peer) = instance.connection_and_peer_mut(side);
            peer.queue_write(&frame)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InterfaceDescriptor, MessageSignature};
    use crate::instance::Instance;
    use crate::wire::WireConnection;
    use std::collections::HashMap;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;

    fn display_catalog() -> ProtocolCatalog {
        let callback_iface =
            Arc::new(InterfaceDescriptor { name: "wl_callback".to_string(), methods: vec![], events: vec![] });
        let display_iface = Arc::new(InterfaceDescriptor {
            name: "wl_display".to_string(),
            methods: vec![MessageSignature {
                name: "sync".to_string(),
                signature: "n".to_string(),
                arg_interfaces: vec![Some(callback_iface)],
            }],
            events: vec![],
        });
        let mut interfaces = HashMap::new();
        interfaces.insert("wl_display".to_string(), display_iface);
        ProtocolCatalog { interfaces, display_name: Some("wl_display".to_string()) }
    }

    #[test]
    fn traces_and_forwards_a_known_method_call() {
        let (client_sock, _a) = UnixStream::pair().unwrap();
        let (compositor_sock, _b) = UnixStream::pair().unwrap();
        let catalog = display_catalog();
        let mut instance = Instance::new(
            9,
            WireConnection::new(client_sock).unwrap(),
            WireConnection::new(compositor_sock).unwrap(),
            &catalog,
        );

        let mut frame = Vec::new();
        frame.extend_from_slice(&1u32.to_le_bytes()); // display object id
        frame.extend_from_slice(&(12u32 << 16).to_le_bytes()); // opcode 0, size 12
        frame.extend_from_slice(&2u32.to_le_bytes()); // new_id
        instance.client_side.data_in().push(&frame);

        let mut output = Vec::new();
        AnalyzeFrontend
            .handle_readable(&mut instance, Side::Client, &catalog, &mut output)
            .unwrap();

        let logged = String::from_utf8(output).unwrap();
        assert!(logged.contains("wl_display@1.sync"));
        assert_eq!(instance.compositor_side.data_out().size(), frame.len());
        assert_eq!(instance.registry.lookup(2).unwrap().name, "wl_callback");
    }
}
