//! The boundary the instrumentation calls into.
//!
//! Instrumented code calls the hooks synchronously, on the thread doing the
//! operation, right around it: `before_read`, then the program's own load,
//! then `after_read` (same for writes). Whatever a thread needs to carry from a
//! before-hook to its after-hook lives in that thread's `ThreadContext`, which
//! the instrumentation keeps for the thread and passes back in each time.

use crate::{
    event::Event,
    object_id::ObjectRef,
    thread_id::{ThreadId, ThreadRef},
    trace::trace_writer::{AccessRecord, HarvestedTrace, TraceFlags},
};
use parking_lot::Mutex;
use std::sync::Arc;

/// None of these may panic or block forever. Anything that goes wrong inside
/// is logged and the access is treated as unshared.
pub trait ReplayHooks: Send + Sync {
    fn on_object_created(&self, obj: ObjectRef);

    /// Called on the parent thread when it starts `child`. The returned
    /// context belongs to `child` and must be moved to it.
    fn on_thread_started(&self, parent: &ThreadContext, child: ThreadRef) -> ThreadContext;

    fn before_read(&self, cx: &mut ThreadContext, obj: ObjectRef, field: &str);
    fn after_read(&self, cx: &mut ThreadContext);
    fn before_write(&self, cx: &mut ThreadContext, obj: ObjectRef, field: &str);
    fn after_write(&self, cx: &mut ThreadContext);
}

/// What a replayed thread did, as it will be harvested at shutdown.
pub struct ThreadHistory {
    thread_id: u64,
    recorded_thread_id: Option<u64>,
    name: String,
    flags: TraceFlags,
    accesses: Vec<AccessRecord>,
}

impl ThreadHistory {
    pub fn new(thread: ThreadRef, recorded_thread_id: Option<u64>, main: bool) -> ThreadHistory {
        ThreadHistory {
            thread_id: thread.raw,
            recorded_thread_id,
            name: thread.name.to_owned(),
            flags: if main {
                TraceFlags::MAIN_THREAD
            } else {
                TraceFlags::empty()
            },
            accesses: Vec::new(),
        }
    }

    pub fn push(&mut self, record: AccessRecord) {
        self.accesses.push(record);
    }

    pub fn set_diverged(&mut self) {
        self.flags.insert(TraceFlags::DIVERGED);
    }

    pub fn accesses(&self) -> &[AccessRecord] {
        &self.accesses
    }

    pub fn harvest(&self) -> HarvestedTrace {
        HarvestedTrace {
            thread_id: self.thread_id,
            recorded_thread_id: self.recorded_thread_id,
            thread_name: self.name.clone(),
            flags: self.flags,
            accesses: self.accesses.clone(),
        }
    }
}

pub type ThreadHistorySharedPtr = Arc<Mutex<ThreadHistory>>;

/// Per-thread replay state.
pub struct ThreadContext {
    live: ThreadId,
    /// The recorded thread this one replays. `None` if the recording has no
    /// thread at this spawn position.
    recorded: Option<u64>,
    /// Set by a before-hook that let a shared access through; consumed by the
    /// after-hook.
    pending: Option<Event>,
    /// Retries spent on `pending`.
    pending_retries: u32,
    history: ThreadHistorySharedPtr,
}

impl ThreadContext {
    pub fn new(live: ThreadId, recorded: Option<u64>, history: ThreadHistorySharedPtr) -> ThreadContext {
        ThreadContext {
            live,
            recorded,
            pending: None,
            pending_retries: 0,
            history,
        }
    }

    /// A context not known to any agent, for threads started while no replay
    /// is active. Its accesses are never checked and its history is never
    /// harvested.
    pub fn detached(thread: ThreadRef) -> ThreadContext {
        let history = Arc::new(Mutex::new(ThreadHistory::new(thread, None, false)));
        ThreadContext::new(ThreadId::root(thread.raw), None, history)
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.live
    }

    pub fn recorded_thread_id(&self) -> Option<u64> {
        self.recorded
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn history(&self) -> &ThreadHistorySharedPtr {
        &self.history
    }

    pub(crate) fn set_pending(&mut self, event: Event, retries: u32) {
        self.pending = Some(event);
        self.pending_retries = retries;
    }

    pub(crate) fn take_pending(&mut self) -> Option<(Event, u32)> {
        let retries = self.pending_retries;
        self.pending_retries = 0;
        self.pending.take().map(|e| (e, retries))
    }
}
