//! Shared locations: (object, field) slots that more than one thread touched
//! during recording.
//!
//! Whether a field is shared is settled by the recording's catalogue. A
//! location's identity is its logical object id plus the field name, which is
//! what lets a recorded sequence find the live location it describes.
//!
//! Anything we cannot classify (class or field not in the catalogue, object
//! never seen being created, no recorded sequence for the location) is treated
//! as unshared: its accesses run freely, so replay of that location may not
//! match the recording.

use crate::{
    event::{AccessKind, Event},
    log::LogLevel::LogDebug,
    object_id::{ObjectId, ObjectIdGenerator, ObjectRef},
    replay::{
        access_list_replay::{AccessSchedule, ReadWriteAccessListReplay},
        oracle::Verdict,
        read_count_vector::ReadCountVector,
    },
    trace::recording::RecordingOutput,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{fmt, sync::Arc};

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LocationKey {
    object: ObjectId,
    field: Arc<str>,
}

impl LocationKey {
    pub fn new(object: ObjectId, field: &str) -> LocationKey {
        LocationKey {
            object,
            field: Arc::from(field),
        }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object, self.field)
    }
}

/// The last write committed to a location during this replay.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct LastWrite {
    /// Recorded thread id of the writer.
    pub thread: u64,
    /// Index of the write in the location's recorded write order.
    pub index: usize,
}

struct LocationState {
    /// Writes done so far; also the index of the next recorded write.
    committed_writes: usize,
    /// A write was granted and its after-hook hasn't run yet.
    write_in_flight: bool,
    last_write: Option<LastWrite>,
    read_counts: ReadCountVector,
    /// Once set, accesses go through unchecked.
    diverged: bool,
}

pub struct SharedMemoryLocation {
    key: LocationKey,
    schedule: Arc<AccessSchedule>,
    state: Mutex<LocationState>,
}

impl SharedMemoryLocation {
    pub fn new(key: LocationKey, schedule: Arc<AccessSchedule>) -> SharedMemoryLocation {
        SharedMemoryLocation {
            key,
            schedule,
            state: Mutex::new(LocationState {
                committed_writes: 0,
                write_in_flight: false,
                last_write: None,
                read_counts: ReadCountVector::new(),
                diverged: false,
            }),
        }
    }

    pub fn key(&self) -> &LocationKey {
        &self.key
    }

    /// Ask the oracle whether `thread` (a recorded thread id) may make this
    /// access now. A granted write is reserved until it is committed.
    pub fn poll(&self, thread: u64, kind: AccessKind) -> Verdict {
        let mut state = self.state.lock();
        if state.diverged {
            return Verdict::Grant;
        }
        match kind {
            AccessKind::Read => {
                self.schedule
                    .check_read(thread, state.committed_writes, &state.read_counts)
            }
            AccessKind::Write => {
                let verdict = self.schedule.check_write(
                    thread,
                    state.committed_writes,
                    state.write_in_flight,
                    &state.read_counts,
                );
                if verdict == Verdict::Grant {
                    state.write_in_flight = true;
                }
                verdict
            }
        }
    }

    /// The access in `event` has been performed by the program.
    pub fn commit(&self, event: &Event) {
        let mut state = self.state.lock();
        if event.is_forced() || state.diverged {
            // The recorded order is no longer being followed here. Keep the
            // counters as they were.
            if event.kind() == AccessKind::Write && !event.is_forced() {
                state.write_in_flight = false;
            }
            return;
        }
        match event.kind() {
            AccessKind::Read => {
                state.read_counts.increment(event.thread());
            }
            AccessKind::Write => {
                state.last_write = Some(LastWrite {
                    thread: event.thread(),
                    index: state.committed_writes,
                });
                state.committed_writes += 1;
                state.write_in_flight = false;
            }
        }
    }

    /// Stop enforcing the recorded order for this location.
    pub fn mark_diverged(&self) {
        self.state.lock().diverged = true;
    }

    pub fn is_diverged(&self) -> bool {
        self.state.lock().diverged
    }

    pub fn committed_writes(&self) -> usize {
        self.state.lock().committed_writes
    }

    pub fn last_write(&self) -> Option<LastWrite> {
        self.state.lock().last_write
    }

    pub fn read_count(&self, thread: u64) -> u64 {
        self.state.lock().read_counts.get(thread)
    }

    /// Recorded writers still to come, in order.
    pub fn pending_writes(&self) -> Vec<u64> {
        let state = self.state.lock();
        self.schedule
            .pending_writes(state.committed_writes)
            .to_vec()
    }

    pub fn next_writer(&self) -> Option<u64> {
        self.schedule.next_writer(self.state.lock().committed_writes)
    }
}

impl fmt::Debug for SharedMemoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedMemoryLocation({})", self.key)
    }
}

pub struct SharedMemoryGenerator {
    object_ids: Arc<ObjectIdGenerator>,
    recording: Option<Arc<RecordingOutput>>,
    replay: ReadWriteAccessListReplay,
    locations: DashMap<LocationKey, Arc<SharedMemoryLocation>>,
}

impl SharedMemoryGenerator {
    /// Nothing is shared until `init()` is called.
    pub fn new(object_ids: Arc<ObjectIdGenerator>) -> SharedMemoryGenerator {
        SharedMemoryGenerator {
            object_ids,
            recording: None,
            replay: ReadWriteAccessListReplay::default(),
            locations: DashMap::new(),
        }
    }

    pub fn init(&mut self, recording: Arc<RecordingOutput>) {
        self.replay = ReadWriteAccessListReplay::new(recording.access_list());
        self.recording = Some(recording);
        self.locations.clear();
    }

    /// Did the recording mark `field` of `obj`'s class as shared?
    pub fn is_shared_object(&self, obj: ObjectRef, field: &str) -> bool {
        match &self.recording {
            Some(r) => r.is_shared_field(obj.class_name, field),
            None => false,
        }
    }

    /// The location for `field` of `obj`, or `None` if it is not a shared
    /// location we have a recorded sequence for.
    pub fn of_field(&self, obj: ObjectRef, field: &str) -> Option<Arc<SharedMemoryLocation>> {
        let object = match self.object_ids.get_id(obj) {
            Some(id) => id,
            None => {
                log!(
                    LogDebug,
                    "{} handle {:#x} was never created; `{}' treated as unshared",
                    obj.class_name,
                    obj.handle,
                    field
                );
                return None;
            }
        };

        let key = LocationKey::new(object, field);
        if let Some(l) = self.locations.get(&key) {
            return Some(Arc::clone(&*l));
        }

        let schedule = match self.replay.schedule_for(&key) {
            Some(s) => s,
            None => {
                log!(LogDebug, "nothing recorded for {}; treated as unshared", key);
                return None;
            }
        };
        let l = self
            .locations
            .entry(key.clone())
            .or_insert_with(|| Arc::new(SharedMemoryLocation::new(key, schedule)));
        Some(Arc::clone(&*l))
    }

    /// Every location handed out so far, sorted.
    pub fn locations(&self) -> Vec<Arc<SharedMemoryLocation>> {
        let mut v: Vec<Arc<SharedMemoryLocation>> =
            self.locations.iter().map(|l| Arc::clone(&*l)).collect();
        v.sort_by(|a, b| a.key().cmp(b.key()));
        v
    }
}

#[cfg(test)]
mod test {
    use super::{LastWrite, LocationKey, SharedMemoryGenerator};
    use crate::{
        event::{AccessKind, Event},
        object_id::{ObjectId, ObjectIdGenerator, ObjectRef},
        replay::oracle::Verdict,
        trace::recording::RecordingOutput,
    };
    use std::sync::Arc;

    fn generator() -> (Arc<ObjectIdGenerator>, SharedMemoryGenerator) {
        let recording = RecordingOutput::parse(
            r#"{
                "threads": [ { "id": 1, "position": [] }, { "id": 2, "position": [0] } ],
                "shared_fields": { "Counter": ["count"] },
                "locations": [
                    { "object": 0, "class": "Counter", "field": "count",
                      "events": [ { "thread": 1, "op": "write" },
                                  { "thread": 2, "op": "read" },
                                  { "thread": 2, "op": "write" } ] }
                ]
            }"#,
        )
        .unwrap();
        let ids = Arc::new(ObjectIdGenerator::new());
        let mut gen = SharedMemoryGenerator::new(ids.clone());
        gen.init(Arc::new(recording));
        (ids, gen)
    }

    #[test]
    fn classification_is_stable() {
        let (ids, gen) = generator();
        let counter = ObjectRef::new(0x10, "Counter");
        assert!(gen.is_shared_object(counter, "count"));
        assert!(!gen.is_shared_object(counter, "name"));
        assert!(!gen.is_shared_object(ObjectRef::new(0x20, "Other"), "count"));

        ids.create_id(counter);
        let l = gen.of_field(counter, "count").unwrap();
        assert!(gen.is_shared_object(counter, "count"));
        assert!(Arc::ptr_eq(&l, &gen.of_field(counter, "count").unwrap()));
        assert_eq!(l.key(), &LocationKey::new(ObjectId(0), "count"));
        assert_eq!(gen.locations().len(), 1);
    }

    #[test]
    fn uninitialised_generator_shares_nothing() {
        let gen = SharedMemoryGenerator::new(Arc::new(ObjectIdGenerator::new()));
        assert!(!gen.is_shared_object(ObjectRef::new(0x10, "Counter"), "count"));
    }

    #[test]
    fn misses_are_unshared() {
        let (ids, gen) = generator();
        let first = ObjectRef::new(0x10, "Counter");
        // Never created.
        assert!(gen.of_field(first, "count").is_none());
        ids.create_id(first);
        let second = ObjectRef::new(0x20, "Counter");
        ids.create_id(second);
        // Object 1 has no recorded sequence.
        assert!(gen.of_field(second, "count").is_none());
        assert!(gen.of_field(first, "count").is_some());
    }

    #[test]
    fn poll_and_commit_follow_the_recording() {
        let (ids, gen) = generator();
        let counter = ObjectRef::new(0x10, "Counter");
        ids.create_id(counter);
        let l = gen.of_field(counter, "count").unwrap();

        assert_eq!(l.poll(2, AccessKind::Read), Verdict::Wait);
        assert_eq!(l.poll(2, AccessKind::Write), Verdict::Wait);
        assert_eq!(l.poll(1, AccessKind::Write), Verdict::Grant);
        // Reserved until committed.
        assert_eq!(l.poll(1, AccessKind::Write), Verdict::Wait);
        l.commit(&Event::new(l.clone(), 1, AccessKind::Write));
        assert_eq!(l.last_write(), Some(LastWrite { thread: 1, index: 0 }));
        assert_eq!(l.pending_writes(), vec![2]);

        assert_eq!(l.poll(2, AccessKind::Write), Verdict::Wait);
        assert_eq!(l.poll(2, AccessKind::Read), Verdict::Grant);
        l.commit(&Event::new(l.clone(), 2, AccessKind::Read));
        assert_eq!(l.read_count(2), 1);

        assert_eq!(l.poll(2, AccessKind::Write), Verdict::Grant);
        l.commit(&Event::new(l.clone(), 2, AccessKind::Write));
        assert_eq!(l.committed_writes(), 2);
        assert_eq!(l.next_writer(), None);
    }

    #[test]
    fn diverged_location_lets_everything_through() {
        let (ids, gen) = generator();
        let counter = ObjectRef::new(0x10, "Counter");
        ids.create_id(counter);
        let l = gen.of_field(counter, "count").unwrap();
        l.mark_diverged();
        assert!(l.is_diverged());
        assert_eq!(l.poll(2, AccessKind::Read), Verdict::Grant);
        l.commit(&Event::forced(l.clone(), 2, AccessKind::Read));
        assert_eq!(l.read_count(2), 0);
    }
}
