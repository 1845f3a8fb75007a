//! Logical object identities.
//!
//! The instrumentation hands us objects as opaque handles (typically an
//! address). A handle is only meaningful within one run, so every object we see
//! being created gets a logical `ObjectId`: its index in the creation order
//! observed by this generator. Recorded locations name objects by this index.

use crate::log::LogLevel::LogDebug;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// An object as seen at a hook: the collaborator's handle for it and the name
/// of its runtime class.
///
/// Handles must be unique among live objects. A handle may be reused once its
/// object dies; `register_new` rebinds it to a fresh identity.
#[derive(Copy, Clone, Debug)]
pub struct ObjectRef<'a> {
    pub handle: usize,
    pub class_name: &'a str,
}

impl<'a> ObjectRef<'a> {
    pub fn new(handle: usize, class_name: &'a str) -> ObjectRef<'a> {
        ObjectRef { handle, class_name }
    }
}

pub struct ObjectIdGenerator {
    next_id: AtomicU64,
    id_map: DashMap<usize, ObjectId>,
}

impl Default for ObjectIdGenerator {
    fn default() -> Self {
        ObjectIdGenerator::new()
    }
}

impl ObjectIdGenerator {
    pub fn new() -> ObjectIdGenerator {
        ObjectIdGenerator {
            next_id: AtomicU64::new(0),
            id_map: DashMap::new(),
        }
    }

    /// Returns the id of `obj`, allocating the next one if this is the first
    /// time we see it.
    ///
    /// Two threads racing on the same handle both get the id of whichever one
    /// inserted first. Ids of objects created concurrently on different threads
    /// are ordered by whoever wins the counter, which is not necessarily the
    /// order seen during recording.
    pub fn create_id(&self, obj: ObjectRef) -> ObjectId {
        if let Some(id) = self.id_map.get(&obj.handle) {
            return *id;
        }

        let next_id = &self.next_id;
        let id = *self
            .id_map
            .entry(obj.handle)
            .or_insert_with(|| ObjectId(next_id.fetch_add(1, Ordering::SeqCst)));
        log!(
            LogDebug,
            "{} ({}) is handle {:#x}",
            id,
            obj.class_name,
            obj.handle
        );
        id
    }

    /// Binds `obj` to a fresh id even if its handle was seen before. Used when
    /// the collaborator announces a new object, whose handle may have belonged
    /// to one that has since died.
    pub fn register_new(&self, obj: ObjectRef) -> ObjectId {
        let id = ObjectId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Some(old) = self.id_map.insert(obj.handle, id) {
            log!(
                LogDebug,
                "handle {:#x} reused: {} replaces {}",
                obj.handle,
                id,
                old
            );
        } else {
            log!(
                LogDebug,
                "{} ({}) is handle {:#x}",
                id,
                obj.class_name,
                obj.handle
            );
        }
        id
    }

    /// `None` if the object was never observed being created.
    pub fn get_id(&self, obj: ObjectRef) -> Option<ObjectId> {
        self.id_map.get(&obj.handle).map(|id| *id)
    }

    /// Number of identities handed out so far, including those of objects
    /// whose handle has since been reused.
    pub fn len(&self) -> usize {
        self.next_id.load(Ordering::SeqCst) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
