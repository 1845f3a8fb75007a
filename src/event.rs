use crate::shared_memory::{LocationKey, SharedMemoryLocation};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Read,
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => write!(f, "R"),
            AccessKind::Write => write!(f, "W"),
        }
    }
}

/// An access to a shared location that passed its before-hook and is waiting
/// for the matching after-hook.
///
/// `thread` is the *recorded* thread id the accessing thread replays, which is
/// what the recorded sequences are written in terms of.
#[derive(Clone)]
pub struct Event {
    location: Arc<SharedMemoryLocation>,
    thread: u64,
    kind: AccessKind,
    /// The oracle never granted this access; it went through after a divergence.
    forced: bool,
}

impl Event {
    pub fn new(location: Arc<SharedMemoryLocation>, thread: u64, kind: AccessKind) -> Event {
        Event {
            location,
            thread,
            kind,
            forced: false,
        }
    }

    pub fn forced(location: Arc<SharedMemoryLocation>, thread: u64, kind: AccessKind) -> Event {
        Event {
            location,
            thread,
            kind,
            forced: true,
        }
    }

    pub fn location(&self) -> &Arc<SharedMemoryLocation> {
        &self.location
    }

    pub fn key(&self) -> &LocationKey {
        self.location.key()
    }

    pub fn thread(&self) -> u64 {
        self.thread
    }

    pub fn kind(&self) -> AccessKind {
        self.kind
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) @ {}{}",
            self.kind,
            self.thread,
            self.location.key(),
            if self.forced { " [forced]" } else { "" }
        )
    }
}
