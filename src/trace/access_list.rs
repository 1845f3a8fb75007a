use crate::{event::AccessKind, shared_memory::LocationKey};
use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap};

/// One access as it happened during recording.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct RecordedAccess {
    /// Recording-time runtime id of the accessing thread.
    pub thread: u64,
    pub op: AccessKind,
    /// Global position of this access in the recording, when the recorder
    /// provides one. Only needed to re-enact a recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl RecordedAccess {
    pub fn read(thread: u64) -> RecordedAccess {
        RecordedAccess {
            thread,
            op: AccessKind::Read,
            seq: None,
        }
    }

    pub fn write(thread: u64) -> RecordedAccess {
        RecordedAccess {
            thread,
            op: AccessKind::Write,
            seq: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecordedLocation {
    pub class_name: String,
    pub events: Vec<RecordedAccess>,
}

/// For every shared location, the accesses made to it during recording, in
/// the order they happened.
#[derive(Clone, Debug, Default)]
pub struct ReadWriteAccessList {
    locations: BTreeMap<LocationKey, RecordedLocation>,
}

impl ReadWriteAccessList {
    pub fn new() -> ReadWriteAccessList {
        ReadWriteAccessList::default()
    }

    /// Returns false (and changes nothing) if `key` already has a sequence.
    pub fn add(&mut self, key: LocationKey, location: RecordedLocation) -> bool {
        match self.locations.entry(key) {
            btree_map::Entry::Occupied(_) => false,
            btree_map::Entry::Vacant(v) => {
                v.insert(location);
                true
            }
        }
    }

    pub fn get(&self, key: &LocationKey) -> Option<&RecordedLocation> {
        self.locations.get(key)
    }

    pub fn iter(&self) -> btree_map::Iter<LocationKey, RecordedLocation> {
        self.locations.iter()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.locations.values().map(|l| l.events.len()).sum()
    }
}
