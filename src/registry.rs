// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The per-instance object-id registry.
//!
//! Conceptually a map from a 32-bit object id to the interface it is currently bound to (or
//! `None`, for an id that is reserved but whose type could not be resolved — e.g. an unknown
//! `N`-form type name). The id space is partitioned into a client half and a server half; which
//! half a given `new_id` is allocated from is determined by which direction the message carrying
//! it travelled in, not by anything in the id's own bit pattern other than its range.

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::InterfaceDescriptor;

/// First id in the server-allocated half-space.
pub const SERVER_ID_BASE: u32 = 0xFF00_0000;

/// The well-known id of the display object, pre-bound at instance creation.
pub const DISPLAY_OBJECT_ID: u32 = 1;

/// Which direction a message allocating a new id travelled, which determines which half of the
/// id space it must come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The message was read off the client-side connection, travelling toward the compositor.
    /// New ids it introduces are client-allocated.
    Client,
    /// The message was read off the compositor-side connection, travelling toward the client.
    /// New ids it introduces are server-allocated.
    Compositor,
}

impl Side {
    fn half_space(self) -> std::ops::RangeInclusive<u32> {
        match self {
            Side::Client => 1..=SERVER_ID_BASE - 1,
            Side::Compositor => SERVER_ID_BASE..=u32::MAX,
        }
    }
}

#[derive(Debug)]
pub enum RegistryError {
    /// `id` does not fall within the half-space implied by `side`.
    WrongHalfSpace { id: u32, side: Side },
    /// `id` is already present in the registry.
    AlreadyReserved { id: u32 },
    /// `insert_at`/`remove` was called on an id that was never reserved.
    NotReserved { id: u32 },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongHalfSpace { id, side } => {
                write!(f, "id {id} is not in the {side:?} half-space")
            }
            Self::AlreadyReserved { id } => write!(f, "id {id} is already reserved"),
            Self::NotReserved { id } => write!(f, "id {id} was never reserved"),
        }
    }
}

/// The per-instance object-id registry.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: HashMap<u32, Option<Arc<InterfaceDescriptor>>>,
    next_client_id: u32,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            // id 1 is reserved for the display object; synthetic client-side allocation (via
            // `insert_new`) starts just above it.
            next_client_id: DISPLAY_OBJECT_ID + 1,
        }
    }

    /// Pre-binds id 1 to the display interface, as done at instance creation when a catalog is
    /// available.
    pub fn bind_display(&mut self, display: Arc<InterfaceDescriptor>) {
        self.objects.insert(DISPLAY_OBJECT_ID, Some(display));
    }

    /// Allocates `id` (marking it present with no bound interface yet) if it is not already
    /// present and falls within the half-space implied by `side`.
    pub fn reserve_new(&mut self, id: u32, side: Side) -> Result<(), RegistryError> {
        if !side.half_space().contains(&id) {
            return Err(RegistryError::WrongHalfSpace { id, side });
        }
        if self.objects.contains_key(&id) {
            return Err(RegistryError::AlreadyReserved { id });
        }
        self.objects.insert(id, None);
        Ok(())
    }

    /// Binds an already-reserved id to `interface` (possibly `None`, for an unresolved dynamic
    /// type name).
    pub fn insert_at(
        &mut self,
        id: u32,
        interface: Option<Arc<InterfaceDescriptor>>,
    ) -> Result<(), RegistryError> {
        match self.objects.get_mut(&id) {
            Some(slot) => {
                *slot = interface;
                Ok(())
            }
            None => Err(RegistryError::NotReserved { id }),
        }
    }

    /// Allocates the next free client-side id and binds it to `interface` in one step. Used by
    /// tests and any future mode that synthesizes client requests rather than only observing
    /// them.
    pub fn insert_new(&mut self, interface: Arc<InterfaceDescriptor>) -> u32 {
        loop {
            let id = self.next_client_id;
            self.next_client_id += 1;
            if !self.objects.contains_key(&id) {
                self.objects.insert(id, Some(interface));
                return id;
            }
        }
    }

    /// Returns the interface bound to `id`, or `None` if `id` is unknown or reserved without a
    /// resolved type.
    pub fn lookup(&self, id: u32) -> Option<Arc<InterfaceDescriptor>> {
        self.objects.get(&id).and_then(|slot| slot.clone())
    }

    /// Frees `id`'s slot entirely (used after a `destroy` message).
    pub fn remove(&mut self, id: u32) {
        self.objects.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InterfaceDescriptor, MessageSignature};

    fn dummy_interface(name: &str) -> Arc<InterfaceDescriptor> {
        Arc::new(InterfaceDescriptor {
            name: name.to_string(),
            methods: vec![MessageSignature {
                name: "destroy".to_string(),
                signature: String::new(),
                arg_interfaces: vec![],
            }],
            events: vec![],
        })
    }

    #[test]
    fn reserve_and_lookup_roundtrip() {
        let mut registry = ObjectRegistry::new();
        let registry_iface = dummy_interface("wl_registry");
        registry.reserve_new(2, Side::Client).unwrap();
        registry.insert_at(2, Some(registry_iface.clone())).unwrap();
        assert_eq!(registry.lookup(2).unwrap().name, "wl_registry");
    }

    #[test]
    fn destroy_removes_entry() {
        let mut registry = ObjectRegistry::new();
        registry.reserve_new(7, Side::Client).unwrap();
        registry.insert_at(7, Some(dummy_interface("wl_buffer"))).unwrap();
        assert!(registry.lookup(7).is_some());
        registry.remove(7);
        assert!(registry.lookup(7).is_none());
    }

    #[test]
    fn half_space_discipline_is_enforced() {
        let mut registry = ObjectRegistry::new();
        assert!(matches!(
            registry.reserve_new(SERVER_ID_BASE, Side::Client),
            Err(RegistryError::WrongHalfSpace { .. })
        ));
        assert!(matches!(
            registry.reserve_new(5, Side::Compositor),
            Err(RegistryError::WrongHalfSpace { .. })
        ));
        registry.reserve_new(SERVER_ID_BASE + 1, Side::Compositor).unwrap();
        registry.reserve_new(5, Side::Client).unwrap();
    }

    #[test]
    fn top_of_server_half_space_is_accepted() {
        let mut registry = ObjectRegistry::new();
        registry.reserve_new(u32::MAX, Side::Compositor).unwrap();
    }

    #[test]
    fn collision_is_rejected() {
        let mut registry = ObjectRegistry::new();
        registry.reserve_new(3, Side::Client).unwrap();
        assert!(matches!(
            registry.reserve_new(3, Side::Client),
            Err(RegistryError::AlreadyReserved { .. })
        ));
    }

    #[test]
    fn insert_new_skips_reserved_ids() {
        let mut registry = ObjectRegistry::new();
        registry.reserve_new(2, Side::Client).unwrap();
        let id = registry.insert_new(dummy_interface("wl_surface"));
        assert_eq!(id, 3);
    }
}
