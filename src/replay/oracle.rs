//! Answers for "may this access happen now?" and what we report when the
//! answer never becomes yes.

use crate::{event::AccessKind, shared_memory::LocationKey};
use std::{fmt, sync::Arc};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Verdict {
    /// Go ahead.
    Grant,
    /// Not yet. Something recorded before this access still has to happen.
    Wait,
    /// This access can never be matched with the recording.
    Diverged(DivergenceReason),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum DivergenceReason {
    /// The thread already consumed all the reads it made of this location
    /// during recording.
    NoRecordedRead { consumed: u64 },
    /// The thread already made all the writes it made to this location during
    /// recording.
    NoRecordedWrite { committed_writes: usize },
    /// The write this read observed during recording has already been
    /// overwritten.
    StaleRead {
        expected_writes: usize,
        committed_writes: usize,
    },
    /// We backed off for the whole retry budget without the oracle granting
    /// the access.
    Stalled {
        /// Recorded thread whose write the location is waiting for, if any.
        next_writer: Option<u64>,
        committed_writes: usize,
    },
}

impl fmt::Display for DivergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivergenceReason::NoRecordedRead { consumed } => {
                write!(f, "no recorded read left (already consumed {})", consumed)
            }
            DivergenceReason::NoRecordedWrite { committed_writes } => write!(
                f,
                "no recorded write left for this thread ({} writes committed)",
                committed_writes
            ),
            DivergenceReason::StaleRead {
                expected_writes,
                committed_writes,
            } => write!(
                f,
                "recorded read observed write #{} but {} writes are already committed",
                expected_writes, committed_writes
            ),
            DivergenceReason::Stalled {
                next_writer: Some(t),
                committed_writes,
            } => write!(
                f,
                "retry budget exhausted; recorded order expects a write by thread {} next ({} committed)",
                t, committed_writes
            ),
            DivergenceReason::Stalled {
                next_writer: None,
                committed_writes,
            } => write!(
                f,
                "retry budget exhausted; no further recorded writes ({} committed)",
                committed_writes
            ),
        }
    }
}

/// A replay-ordering violation: the recorded order for `location` could not
/// be reproduced for this access. The access went ahead anyway.
#[derive(Clone, Debug)]
pub struct Divergence {
    pub location: LocationKey,
    /// Runtime id of the thread that made the access.
    pub live_thread: u64,
    /// The recorded thread it was replaying.
    pub recorded_thread: u64,
    pub kind: AccessKind,
    pub reason: DivergenceReason,
    pub retries: u32,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} by thread {} (recorded {}) after {} retries: {}",
            self.kind, self.location, self.live_thread, self.recorded_thread, self.retries, self.reason
        )
    }
}

/// Called for every divergence, on the diverging thread, after it is logged.
pub type DivergenceObserver = Arc<dyn Fn(&Divergence) + Send + Sync>;
