//! The parsed form of a recorded dump.
//!
//! On disk a dump is JSON:
//!
//! ```text
//! {
//!   "threads": [ { "id": 1, "position": [] }, { "id": 12, "position": [0] } ],
//!   "shared_fields": { "Counter": ["count"] },
//!   "locations": [
//!     { "object": 0, "class": "Counter", "field": "count",
//!       "events": [ { "thread": 1, "op": "write", "seq": 0 },
//!                   { "thread": 12, "op": "read", "seq": 1 } ] }
//!   ]
//! }
//! ```
//!
//! `position` is the thread's place in the spawn tree (child indices starting
//! from the root thread, whose position is empty).

use crate::{
    log::LogLevel::LogWarn,
    object_id::ObjectId,
    shared_memory::LocationKey,
    thread_id::ThreadId,
    trace::{
        access_list::{ReadWriteAccessList, RecordedAccess, RecordedLocation},
        trace_reader::LoadError,
    },
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DumpThread {
    pub id: u64,
    pub position: Vec<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DumpLocation {
    pub object: ObjectId,
    pub class: String,
    pub field: String,
    pub events: Vec<RecordedAccess>,
}

/// Exactly what is in the file. See `RecordingOutput` for the validated form.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordedDump {
    pub threads: Vec<DumpThread>,
    #[serde(default)]
    pub shared_fields: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub locations: Vec<DumpLocation>,
}

pub struct RecordingOutput {
    /// Sorted by spawn position, so the root comes first.
    threads: Vec<ThreadId>,
    by_position: HashMap<Vec<u32>, usize>,
    shared_fields: HashMap<String, HashSet<String>>,
    access_list: ReadWriteAccessList,
}

impl RecordingOutput {
    pub fn parse(text: &str) -> Result<RecordingOutput, LoadError> {
        let dump: RecordedDump = serde_json::from_str(text).map_err(LoadError::Parse)?;
        RecordingOutput::from_dump(dump)
    }

    pub fn from_dump(dump: RecordedDump) -> Result<RecordingOutput, LoadError> {
        let mut dump_threads = dump.threads;
        // Parents sort before their children.
        dump_threads.sort_by(|a, b| a.position.cmp(&b.position));

        let mut threads: Vec<ThreadId> = Vec::with_capacity(dump_threads.len());
        let mut by_position: HashMap<Vec<u32>, usize> = HashMap::new();
        let mut ids: HashSet<u64> = HashSet::new();
        for t in dump_threads {
            if !ids.insert(t.id) {
                return Err(LoadError::Invalid(format!(
                    "thread {} is listed more than once",
                    t.id
                )));
            }
            if by_position.contains_key(&t.position) {
                return Err(LoadError::Invalid(format!(
                    "thread {} has the same spawn position {:?} as another thread",
                    t.id, t.position
                )));
            }

            let id = match t.position.split_last() {
                None => ThreadId::root(t.id),
                Some((&index, parent_position)) => match by_position.get(parent_position) {
                    Some(&parent) => threads[parent].child(t.id, index),
                    None => {
                        return Err(LoadError::Invalid(format!(
                            "parent of thread {} at {:?} was not recorded",
                            t.id, t.position
                        )))
                    }
                },
            };
            by_position.insert(t.position, threads.len());
            threads.push(id);
        }

        if threads.first().map_or(true, |t| !t.is_root()) {
            return Err(LoadError::Invalid("no root thread was recorded".into()));
        }

        let shared_fields: HashMap<String, HashSet<String>> = dump
            .shared_fields
            .into_iter()
            .map(|(class, fields)| (class, fields.into_iter().collect()))
            .collect();

        let mut access_list = ReadWriteAccessList::new();
        for l in dump.locations {
            if let Some(e) = l.events.iter().find(|e| !ids.contains(&e.thread)) {
                return Err(LoadError::Invalid(format!(
                    "{}.{} was accessed by unrecorded thread {}",
                    l.object, l.field, e.thread
                )));
            }
            let is_shared = shared_fields
                .get(&l.class)
                .map_or(false, |fields| fields.contains(&l.field));
            if !is_shared {
                log!(
                    LogWarn,
                    "{}.{} has recorded accesses but {}.{} is not a shared field; it will not be replayed",
                    l.object,
                    l.field,
                    l.class,
                    l.field
                );
            }

            let key = LocationKey::new(l.object, &l.field);
            let added = access_list.add(
                key,
                RecordedLocation {
                    class_name: l.class,
                    events: l.events,
                },
            );
            if !added {
                return Err(LoadError::Invalid(format!(
                    "{}.{} is listed more than once",
                    l.object, l.field
                )));
            }
        }

        Ok(RecordingOutput {
            threads,
            by_position,
            shared_fields,
            access_list,
        })
    }

    pub fn threads(&self) -> &[ThreadId] {
        &self.threads
    }

    pub fn root_thread(&self) -> &ThreadId {
        // from_dump() refuses recordings without a root.
        &self.threads[0]
    }

    pub fn thread_at(&self, position: &[u32]) -> Option<&ThreadId> {
        self.by_position.get(position).map(|&i| &self.threads[i])
    }

    pub fn is_shared_field(&self, class_name: &str, field: &str) -> bool {
        self.shared_fields
            .get(class_name)
            .map_or(false, |fields| fields.contains(field))
    }

    /// Shared fields per class, sorted.
    pub fn shared_fields(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        self.shared_fields
            .iter()
            .map(|(class, fields)| {
                (
                    class.as_str(),
                    fields.iter().map(|f| f.as_str()).collect(),
                )
            })
            .collect()
    }

    pub fn access_list(&self) -> &ReadWriteAccessList {
        &self.access_list
    }
}
