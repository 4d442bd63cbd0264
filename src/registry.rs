//! Type registry: bidirectional mapping between payload types and descriptors.

use std::any::TypeId;
use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::message::{MessageDescriptor, Payload};

/// Error returned when a registration is refused.
///
/// A refused registration leaves the store unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("type `{type_name}` is already registered as `{descriptor}`")]
    AlreadyRegistered {
        type_name: &'static str,
        descriptor: MessageDescriptor,
    },
    #[error("descriptor `{descriptor}` is already claimed by `{existing}`, cannot register `{requested}`")]
    DescriptorConflict {
        descriptor: MessageDescriptor,
        existing: &'static str,
        requested: &'static str,
    },
}

/// A payload type known to this process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredType {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub descriptor: MessageDescriptor,
}

#[derive(Default)]
struct Maps {
    by_type: HashMap<TypeId, RegisteredType>,
    by_descriptor: HashMap<MessageDescriptor, RegisteredType>,
}

/// Keeps type -> descriptor and descriptor -> type consistent.
///
/// Populated while subscriptions are declared and read on every inbound
/// message. Both maps live behind a single lock so a reader never sees one
/// side of a registration without the other.
#[derive(Default)]
pub struct MessageDescriptorStore {
    maps: RwLock<Maps>,
}

impl std::fmt::Debug for MessageDescriptorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDescriptorStore")
            .field("registered_types", &self.len())
            .finish()
    }
}

impl MessageDescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its own descriptor.
    pub fn register_type<T: Payload>(&self) -> Result<MessageDescriptor, RegistryError> {
        let descriptor = T::descriptor();
        self.register(
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            descriptor.clone(),
        )?;
        Ok(descriptor)
    }

    /// Register a type under `descriptor`.
    ///
    /// The first registration of a type succeeds. Registering the same type
    /// again fails with [`RegistryError::AlreadyRegistered`]; a different type
    /// claiming a descriptor already in use fails with
    /// [`RegistryError::DescriptorConflict`].
    pub fn register(
        &self,
        type_id: TypeId,
        type_name: &'static str,
        descriptor: MessageDescriptor,
    ) -> Result<(), RegistryError> {
        let mut maps = self.maps.write();

        if let Some(existing) = maps.by_type.get(&type_id) {
            return Err(RegistryError::AlreadyRegistered {
                type_name: existing.type_name,
                descriptor: existing.descriptor.clone(),
            });
        }

        if let Some(existing) = maps.by_descriptor.get(&descriptor) {
            return Err(RegistryError::DescriptorConflict {
                descriptor,
                existing: existing.type_name,
                requested: type_name,
            });
        }

        let entry = RegisteredType {
            type_id,
            type_name,
            descriptor: descriptor.clone(),
        };
        maps.by_descriptor.insert(descriptor, entry.clone());
        maps.by_type.insert(type_id, entry);
        Ok(())
    }

    pub fn descriptor_of(&self, type_id: TypeId) -> Option<MessageDescriptor> {
        self.maps
            .read()
            .by_type
            .get(&type_id)
            .map(|entry| entry.descriptor.clone())
    }

    pub fn type_for(&self, descriptor: &MessageDescriptor) -> Option<RegisteredType> {
        self.maps.read().by_descriptor.get(descriptor).cloned()
    }

    pub fn contains_type(&self, type_id: TypeId) -> bool {
        self.maps.read().by_type.contains_key(&type_id)
    }

    pub fn contains_descriptor(&self, descriptor: &MessageDescriptor) -> bool {
        self.maps.read().by_descriptor.contains_key(descriptor)
    }

    /// All registered types, in no particular order.
    pub fn registered(&self) -> Vec<RegisteredType> {
        self.maps.read().by_type.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.maps.read().by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
