// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! One traced client↔compositor pairing: two `WireConnection`s and the object registry shared
//! between them.
//!
//! An instance owns both connections directly as named fields rather than through mutual
//! back-pointers, so that "the other side" is reached by matching on which side is being
//! serviced, never by a reference cycle.

use std::sync::Arc;

use crate::catalog::ProtocolCatalog;
use crate::error::{Error, FramingError, Result};
use crate::registry::{ObjectRegistry, Side};
use crate::wire::WireConnection;

/// The decoded 8-byte frame header: object id plus the packed opcode/size word.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub object_id: u32,
    pub opcode: u16,
    /// Total frame size in bytes, header included.
    pub size: u32,
}

pub struct Instance {
    /// Monotonic id assigned at creation, used only to prefix this instance's log lines.
    pub id: u64,
    pub client_side: WireConnection,
    pub compositor_side: WireConnection,
    pub registry: ObjectRegistry,
}

impl Instance {
    pub fn new(
        id: u64,
        client_side: WireConnection,
        compositor_side: WireConnection,
        catalog: &ProtocolCatalog,
    ) -> Self {
        let mut registry = ObjectRegistry::new();
        if let Some(display) = catalog.display() {
            registry.bind_display(display);
        }
        Self { id, client_side, compositor_side, registry }
    }

    pub fn connection_mut(&mut self, side: Side) -> &mut WireConnection {
        match side {
            Side::Client => &mut self.client_side,
            Side::Compositor => &mut self.compositor_side,
        }
    }

    /// Returns `(this side's connection, the other side's connection)`, without ever forming a
    /// reference cycle between the two.
    pub fn connection_and_peer_mut(&mut self, side: Side) -> (&mut WireConnection, &mut WireConnection) {
        match side {
            Side::Client => (&mut self.client_side, &mut self.compositor_side),
            Side::Compositor => (&mut self.compositor_side, &mut self.client_side),
        }
    }

    /// Returns `(registry, this side's connection, the other side's connection)` as three
    /// disjoint borrows in one step, for the decode step, which needs to mutate the registry and
    /// both connections' fd queues at once.
    pub fn registry_and_connections_mut(
        &mut self,
        side: Side,
    ) -> (&mut ObjectRegistry, &mut WireConnection, &mut WireConnection) {
        match side {
            Side::Client => (&mut self.registry, &mut self.client_side, &mut self.compositor_side),
            Side::Compositor => {
                (&mut self.registry, &mut self.compositor_side, &mut self.client_side)
            }
        }
    }

    /// Looks at (without consuming) the next frame queued on `side`'s connection. Returns `None`
    /// when fewer than a full frame's worth of bytes has arrived yet.
    pub fn peek_frame(&mut self, side: Side) -> Result<Option<FrameHeader>> {
        let conn = self.connection_mut(side);
        if conn.data_in().size() < 8 {
            return Ok(None);
        }
        let mut header = [0u8; 8];
        conn.data_in().copy(&mut header);
        let object_id = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let second = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let opcode = (second & 0xffff) as u16;
        let size = second >> 16;

        if size < 8 {
            return Err(Error::Framing(FramingError::TooShort { size }));
        }
        if size as usize > conn.data_in().capacity() {
            return Err(Error::Framing(FramingError::ExceedsCapacity {
                size,
                capacity: conn.data_in().capacity(),
            }));
        }
        if conn.data_in().size() < size as usize {
            return Ok(None);
        }
        Ok(Some(FrameHeader { object_id, opcode, size }))
    }

    /// Copies out and consumes exactly `size` bytes (the full frame, header included) from
    /// `side`'s incoming queue. Caller must have just confirmed via `peek_frame` that this many
    /// bytes are queued.
    pub fn take_frame(&mut self, side: Side, size: u32) -> Vec<u8> {
        let conn = self.connection_mut(side);
        let mut frame = vec![0u8; size as usize];
        conn.data_in().copy(&mut frame);
        conn.data_in().consume(size as usize);
        frame
    }

    /// The interface resolved for `object_id` against this instance's registry.
    pub fn resolve(&self, object_id: u32) -> Option<Arc<crate::catalog::InterfaceDescriptor>> {
        self.registry.lookup(object_id)
    }
}
