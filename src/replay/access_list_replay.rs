//! The recorded sequences rearranged into what the ordering oracle asks about.
//!
//! Writes to a location are replayed in exactly the recorded order. Reads only
//! need to land between the right two writes: a read must see the write that
//! preceded it during recording, and the next write must wait until every read
//! recorded before it has happened. Reads between the same two writes are free
//! to reorder among themselves.

use crate::{
    event::AccessKind,
    replay::{
        oracle::{DivergenceReason, Verdict},
        read_count_vector::ReadCountVector,
    },
    shared_memory::LocationKey,
    trace::access_list::{ReadWriteAccessList, RecordedAccess},
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

#[derive(Debug, Default)]
pub struct AccessSchedule {
    /// Recorded thread of each write, in order.
    writes: Vec<u64>,
    /// For write k: how many reads each thread made before it.
    reads_before: Vec<HashMap<u64, u64>>,
    /// For each thread: for its j-th read, how many writes preceded it.
    read_sources: HashMap<u64, Vec<usize>>,
    /// For each thread: indices into `writes` of its writes.
    write_indices: HashMap<u64, Vec<usize>>,
}

impl AccessSchedule {
    pub fn new(events: &[RecordedAccess]) -> AccessSchedule {
        let mut schedule = AccessSchedule::default();
        let mut reads_so_far: HashMap<u64, u64> = HashMap::new();
        for e in events {
            match e.op {
                AccessKind::Write => {
                    schedule.reads_before.push(reads_so_far.clone());
                    schedule
                        .write_indices
                        .entry(e.thread)
                        .or_default()
                        .push(schedule.writes.len());
                    schedule.writes.push(e.thread);
                }
                AccessKind::Read => {
                    schedule
                        .read_sources
                        .entry(e.thread)
                        .or_default()
                        .push(schedule.writes.len());
                    *reads_so_far.entry(e.thread).or_insert(0) += 1;
                }
            }
        }
        schedule
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Recorded writers from write index `committed` on.
    pub fn pending_writes(&self, committed: usize) -> &[u64] {
        &self.writes[committed.min(self.writes.len())..]
    }

    pub fn next_writer(&self, committed: usize) -> Option<u64> {
        self.writes.get(committed).copied()
    }

    /// May `thread` write now, given `committed` writes are done and the reads
    /// consumed so far?
    pub fn check_write(
        &self,
        thread: u64,
        committed: usize,
        write_in_flight: bool,
        rcv: &ReadCountVector,
    ) -> Verdict {
        let has_more = self
            .write_indices
            .get(&thread)
            .and_then(|w| w.last())
            .map_or(false, |&last| last >= committed);
        if !has_more {
            return Verdict::Diverged(DivergenceReason::NoRecordedWrite {
                committed_writes: committed,
            });
        }

        if self.writes[committed] != thread || write_in_flight {
            return Verdict::Wait;
        }

        if rcv.covers(&self.reads_before[committed]) {
            Verdict::Grant
        } else {
            Verdict::Wait
        }
    }

    /// May `thread` make its next read now?
    pub fn check_read(&self, thread: u64, committed: usize, rcv: &ReadCountVector) -> Verdict {
        let consumed = rcv.get(thread);
        let expected = self
            .read_sources
            .get(&thread)
            .and_then(|sources| sources.get(consumed as usize));
        match expected {
            None => Verdict::Diverged(DivergenceReason::NoRecordedRead { consumed }),
            Some(&expected) if committed < expected => Verdict::Wait,
            Some(&expected) if committed > expected => {
                Verdict::Diverged(DivergenceReason::StaleRead {
                    expected_writes: expected,
                    committed_writes: committed,
                })
            }
            Some(_) => Verdict::Grant,
        }
    }
}

/// The oracle's view of the whole recording: one schedule per recorded
/// location.
#[derive(Default)]
pub struct ReadWriteAccessListReplay {
    schedules: BTreeMap<LocationKey, Arc<AccessSchedule>>,
}

impl ReadWriteAccessListReplay {
    pub fn new(access_list: &ReadWriteAccessList) -> ReadWriteAccessListReplay {
        let schedules = access_list
            .iter()
            .map(|(key, location)| (key.clone(), Arc::new(AccessSchedule::new(&location.events))))
            .collect();
        ReadWriteAccessListReplay { schedules }
    }

    pub fn schedule_for(&self, key: &LocationKey) -> Option<Arc<AccessSchedule>> {
        self.schedules.get(key).cloned()
    }

    /// The oracle question for reads: may `thread` make its next read of
    /// `key` now? `None` if nothing was recorded for `key`.
    pub fn check_read(
        &self,
        key: &LocationKey,
        rcv: &ReadCountVector,
        thread: u64,
        committed: usize,
    ) -> Option<Verdict> {
        self.schedules
            .get(key)
            .map(|s| s.check_read(thread, committed, rcv))
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }
}
