//! Logical thread identities.
//!
//! Runtime thread ids differ between the recording and the replay. What does
//! not change (for a program whose spawning is deterministic) is where a thread
//! sits in the spawn tree: "the second thread started by the first thread
//! started by main". A `ThreadId` is that position, plus the runtime id it
//! belongs to in the current run.

use crate::{log::LogLevel::LogDebug, trace::recording::RecordingOutput};
use dashmap::DashMap;
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

/// A thread as seen at a hook.
#[derive(Copy, Clone, Debug)]
pub struct ThreadRef<'a> {
    /// Runtime (OS or VM level) id of the thread.
    pub raw: u64,
    pub name: &'a str,
}

impl<'a> ThreadRef<'a> {
    pub fn new(raw: u64, name: &'a str) -> ThreadRef<'a> {
        ThreadRef { raw, name }
    }
}

/// Equality and hashing only look at the spawn position, so ids from a
/// recording and from a replay compare equal when they denote the same thread.
#[derive(Clone)]
pub struct ThreadId {
    raw: u64,
    position: Arc<[u32]>,
    parent: Option<Arc<ThreadId>>,
}

impl ThreadId {
    pub fn root(raw: u64) -> ThreadId {
        ThreadId {
            raw,
            position: Arc::from(Vec::new()),
            parent: None,
        }
    }

    /// The `index`-th child spawned by `self`.
    pub fn child(&self, raw: u64, index: u32) -> ThreadId {
        let mut position = self.position.to_vec();
        position.push(index);
        ThreadId {
            raw,
            position: Arc::from(position),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// Child indices on the path from the root to this thread.
    pub fn position(&self) -> &[u32] {
        &self.position
    }

    pub fn parent(&self) -> Option<&ThreadId> {
        self.parent.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.position.is_empty()
    }
}

impl PartialEq for ThreadId {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
    }
}

impl Eq for ThreadId {}

impl Hash for ThreadId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.position.hash(state);
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({} @ {:?})", self.raw, &*self.position)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {}", self.raw)?;
        if !self.is_root() {
            write!(f, " (")?;
            for (i, p) in self.position.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                write!(f, "{}", p)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

struct ThreadNode {
    id: ThreadId,
    next_child: AtomicU32,
}

impl ThreadNode {
    fn new(id: ThreadId) -> Arc<ThreadNode> {
        Arc::new(ThreadNode {
            id,
            next_child: AtomicU32::new(0),
        })
    }
}

pub struct ThreadIdGenerator {
    root: Arc<ThreadNode>,
    id_map: DashMap<u64, Arc<ThreadNode>>,
    /// Replay-time runtime id -> recording-time runtime id.
    recorded_map: DashMap<u64, u64>,
}

impl ThreadIdGenerator {
    /// `root_raw` is the runtime id of the thread that starts replaying.
    pub fn new(root_raw: u64) -> ThreadIdGenerator {
        let root = ThreadNode::new(ThreadId::root(root_raw));
        let id_map = DashMap::new();
        id_map.insert(root_raw, root.clone());
        ThreadIdGenerator {
            root,
            id_map,
            recorded_map: DashMap::new(),
        }
    }

    pub fn root(&self) -> &ThreadId {
        &self.root.id
    }

    /// Returns the id of `child_raw`, started by `parent_raw`.
    ///
    /// A parent we have never seen is treated as the root. Calling this again
    /// for a known thread returns the existing id and does not consume a child
    /// index.
    pub fn create_id(&self, parent_raw: u64, child_raw: u64) -> ThreadId {
        if let Some(node) = self.id_map.get(&child_raw) {
            return node.id.clone();
        }

        let parent = match self.id_map.get(&parent_raw) {
            Some(node) => Arc::clone(&*node),
            None => {
                log!(
                    LogDebug,
                    "parent {} of {} unknown, using root",
                    parent_raw,
                    child_raw
                );
                self.root.clone()
            }
        };

        let node = self.id_map.entry(child_raw).or_insert_with(|| {
            let index = parent.next_child.fetch_add(1, Ordering::SeqCst);
            ThreadNode::new(parent.id.child(child_raw, index))
        });
        node.id.clone()
    }

    /// `None` if the thread was never observed.
    pub fn get_id(&self, raw: u64) -> Option<ThreadId> {
        self.id_map.get(&raw).map(|node| node.id.clone())
    }

    pub fn thread_ids(&self) -> Vec<ThreadId> {
        let mut ids: Vec<ThreadId> = self.id_map.iter().map(|n| n.id.clone()).collect();
        ids.sort_by(|a, b| a.position().cmp(b.position()));
        ids
    }

    /// Find the recorded thread that sits at the same place in the spawn tree
    /// as `live` and remember the correspondence.
    pub fn map_to_recorded(&self, live: &ThreadId, recording: &RecordingOutput) -> Option<u64> {
        let recorded = recording.thread_at(live.position())?.raw();
        self.recorded_map.insert(live.raw(), recorded);
        log!(LogDebug, "{} replays recorded thread {}", live, recorded);
        Some(recorded)
    }

    pub fn recorded_id_of(&self, raw: u64) -> Option<u64> {
        self.recorded_map.get(&raw).map(|r| *r)
    }
}
