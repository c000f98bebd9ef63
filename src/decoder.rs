// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The signature decoder: walks a message signature over a payload slice, rendering each
//! argument while side-effecting the object registry and the peer's fd-out queue.
//!
//! This is the one piece of the pipeline that is unavoidably effectful in both directions at
//! once — it must both *read* the registry (to resolve `o`/`N` types) and *write* it (to bind
//! `n`/`N` new ids) as it walks, and it must move fds from the source connection's fds-in queue to
//! the peer's fds-out queue. Those effects are threaded through as explicit `&mut` parameters,
//! never through global state (Design Note 9).

use std::os::fd::RawFd;
use std::sync::Arc;

use crate::catalog::{InterfaceDescriptor, MessageSignature, ProtocolCatalog};
use crate::registry::{ObjectRegistry, Side};
use crate::ring_buffer::RingBuffer;

/// One rendered argument, in the order they appeared in the signature.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedArg {
    Uint(u32),
    Int(i32),
    Fixed(f64),
    Str(Option<String>),
    Object(u32),
    NewId(u32),
    Array { length: u32 },
    Fd(RawFd),
    /// The dynamic `N` form: new id, resolved type name (if any), and the numeric `name`.
    DynamicNewId { new_id: u32, type_name: Option<String>, name: u32 },
}

/// The result of successfully decoding one message whose target interface was known.
#[derive(Debug)]
pub struct DecodedMessage {
    pub interface_name: String,
    pub message_name: String,
    pub args: Vec<RenderedArg>,
    /// True when this was a `destroy` call on the resolved interface; the caller removes the
    /// object from the registry *after* forwarding.
    pub is_destroy: bool,
}

#[derive(Debug)]
pub enum DecodeError {
    /// The object id had no (or no longer had a) bound interface.
    UnknownObject { id: u32, opcode: u16 },
    /// The interface was known but had no method/event at this opcode.
    UnknownOpcode { interface: String, opcode: u16 },
    /// The payload ran out of words partway through the signature walk.
    Truncated { signature: String, consumed_words: usize },
}

/// Decodes one message. `payload` is the frame's argument bytes only (the 8-byte header already
/// stripped). `side` says which connection this message was read from, which determines both the
/// method/event table to consult and the half-space any `new_id` it introduces is allocated from.
pub fn decode(
    payload: &[u8],
    interface: Option<Arc<InterfaceDescriptor>>,
    side: Side,
    opcode: u16,
    registry: &mut ObjectRegistry,
    peer_fds_out: &mut RingBuffer<RawFd>,
    source_fds_in: &mut RingBuffer<RawFd>,
    catalog: &ProtocolCatalog,
) -> Result<DecodedMessage, DecodeError> {
    let interface = interface.ok_or(DecodeError::UnknownObject { id: 0, opcode })?;

    let message = match side {
        Side::Client => interface.method(opcode),
        Side::Compositor => interface.event(opcode),
    }
    .ok_or_else(|| DecodeError::UnknownOpcode { interface: interface.name.clone(), opcode })?;

    let args = walk_signature(
        message,
        payload,
        side,
        registry,
        peer_fds_out,
        source_fds_in,
        catalog,
    )?;

    Ok(DecodedMessage {
        interface_name: interface.name.clone(),
        message_name: message.name.clone(),
        is_destroy: message.name == "destroy",
        args,
    })
}

fn walk_signature(
    message: &MessageSignature,
    payload: &[u8],
    side: Side,
    registry: &mut ObjectRegistry,
    peer_fds_out: &mut RingBuffer<RawFd>,
    source_fds_in: &mut RingBuffer<RawFd>,
    catalog: &ProtocolCatalog,
) -> Result<Vec<RenderedArg>, DecodeError> {
    let mut cursor = 0usize; // word index into `payload`
    let mut arg_interface_slot = 0usize; // index into message.arg_interfaces
    let mut args = Vec::with_capacity(message.signature.len());

    let read_word = |cursor: &mut usize| -> Result<u32, DecodeError> {
        let start = *cursor * 4;
        let bytes = payload.get(start..start + 4).ok_or(DecodeError::Truncated {
            signature: message.signature.clone(),
            consumed_words: *cursor,
        })?;
        *cursor += 1;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    };

    for ch in message.signature.chars() {
        match ch {
            'u' => args.push(RenderedArg::Uint(read_word(&mut cursor)?)),
            'i' => args.push(RenderedArg::Int(read_word(&mut cursor)? as i32)),
            'f' => {
                let raw = read_word(&mut cursor)? as i32;
                args.push(RenderedArg::Fixed(raw as f64 / 256.0));
            }
            's' => {
                let len = read_word(&mut cursor)?;
                let value = if len == 0 {
                    None
                } else {
                    let start = cursor * 4;
                    let string_bytes = payload
                        .get(start..start + (len as usize).saturating_sub(1))
                        .ok_or(DecodeError::Truncated {
                            signature: message.signature.clone(),
                            consumed_words: cursor,
                        })?;
                    Some(String::from_utf8_lossy(string_bytes).into_owned())
                };
                cursor += div_roundup(len, 4) as usize;
                args.push(RenderedArg::Str(value));
            }
            'o' => {
                args.push(RenderedArg::Object(read_word(&mut cursor)?));
                arg_interface_slot += 1;
            }
            'n' => {
                let new_id = read_word(&mut cursor)?;
                let static_interface =
                    message.arg_interfaces.get(arg_interface_slot).cloned().flatten();
                arg_interface_slot += 1;
                if new_id != 0 {
                    let _ = registry.reserve_new(new_id, side);
                    let _ = registry.insert_at(new_id, static_interface);
                }
                args.push(RenderedArg::NewId(new_id));
            }
            'a' => {
                let len = read_word(&mut cursor)?;
                cursor += div_roundup(len, 4) as usize;
                args.push(RenderedArg::Array { length: len });
            }
            'h' => {
                let fd = source_fds_in.pop_front().unwrap_or(-1);
                peer_fds_out.push(&[fd]);
                args.push(RenderedArg::Fd(fd));
            }
            'N' => {
                let len = read_word(&mut cursor)?;
                let type_name = if len == 0 {
                    None
                } else {
                    let start = cursor * 4;
                    let string_bytes = payload
                        .get(start..start + (len as usize).saturating_sub(1))
                        .ok_or(DecodeError::Truncated {
                            signature: message.signature.clone(),
                            consumed_words: cursor,
                        })?;
                    Some(String::from_utf8_lossy(string_bytes).into_owned())
                };
                cursor += div_roundup(len, 4) as usize;

                let name = read_word(&mut cursor)?;
                let new_id = read_word(&mut cursor)?;

                if new_id != 0 {
                    let resolved = type_name.as_deref().and_then(|n| catalog.lookup(n));
                    let _ = registry.reserve_new(new_id, side);
                    let _ = registry.insert_at(new_id, resolved);
                }

                args.push(RenderedArg::DynamicNewId { new_id, type_name, name });
            }
            other => unreachable!("catalog loader should reject unknown signature char {other}"),
        }
    }

    Ok(args)
}

fn div_roundup(n: u32, align: u32) -> u32 {
    (n + (align - 1)) / align
}

impl std::fmt::Display for RenderedArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uint(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Fixed(v) => write!(f, "{v}"),
            Self::Str(Some(s)) => write!(f, "\"{s}\""),
            Self::Str(None) => write!(f, "(null)"),
            Self::Object(v) => write!(f, "obj {v}"),
            Self::NewId(v) => write!(f, "new_id {v}"),
            Self::Array { length } => write!(f, "array: {length}"),
            Self::Fd(v) => write!(f, "fd {v}"),
            Self::DynamicNewId { new_id, type_name, name } => {
                write!(f, "new_id {new_id}[{},{name}]", type_name.as_deref().unwrap_or(""))
            }
        }
    }
}
