//! Everything a replay needs while the replayed program runs. Built once the
//! dump is loaded and shared by every hook call.

use crate::{
    event::{AccessKind, Event},
    hooks::{ThreadContext, ThreadHistory, ThreadHistorySharedPtr},
    log::LogLevel::{LogDebug, LogError, LogInfo, LogWarn},
    object_id::{ObjectIdGenerator, ObjectRef},
    replay::{
        backoff::{Backoff, BackoffPolicy},
        oracle::{Divergence, DivergenceObserver, DivergenceReason, Verdict},
    },
    shared_memory::{SharedMemoryGenerator, SharedMemoryLocation},
    thread_id::{ThreadIdGenerator, ThreadRef},
    trace::{
        recording::RecordingOutput,
        trace_reader::TraceReader,
        trace_writer::{AccessOutcome, AccessRecord, ReplayOutput},
    },
};
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// One access counted in `in_flight`. Dropping it, including while unwinding,
/// uncounts the access unless `hold` handed it over to the after-hook.
struct InFlight<'a> {
    count: &'a AtomicUsize,
    held: bool,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize) -> InFlight<'a> {
        count.fetch_add(1, Ordering::SeqCst);
        InFlight { count, held: false }
    }

    fn hold(mut self) {
        self.held = true;
    }
}

impl<'a> Drop for InFlight<'a> {
    fn drop(&mut self) {
        if !self.held {
            self.count.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct ReplayContext {
    dump_checksum: u32,
    recording: Arc<RecordingOutput>,
    object_ids: Arc<ObjectIdGenerator>,
    thread_ids: ThreadIdGenerator,
    shared_memory: SharedMemoryGenerator,
    backoff: BackoffPolicy,
    observer: Option<DivergenceObserver>,
    /// Cleared when shutdown starts. New accesses are then let through
    /// unchecked.
    accepting: AtomicBool,
    /// Hook calls in progress plus accesses between their before- and
    /// after-hooks.
    in_flight: AtomicUsize,
    divergences: AtomicUsize,
    root_name: String,
    /// Keyed by runtime thread id.
    histories: Mutex<BTreeMap<u64, ThreadHistorySharedPtr>>,
}

impl ReplayContext {
    pub fn new(
        reader: TraceReader,
        root_raw: u64,
        root_name: &str,
        backoff: BackoffPolicy,
        observer: Option<DivergenceObserver>,
    ) -> ReplayContext {
        let dump_checksum = reader.checksum();
        ReplayContext::from_recording(
            reader.into_recording(),
            dump_checksum,
            root_raw,
            root_name,
            backoff,
            observer,
        )
    }

    pub fn from_recording(
        recording: RecordingOutput,
        dump_checksum: u32,
        root_raw: u64,
        root_name: &str,
        backoff: BackoffPolicy,
        observer: Option<DivergenceObserver>,
    ) -> ReplayContext {
        let recording = Arc::new(recording);
        let object_ids = Arc::new(ObjectIdGenerator::new());
        let mut shared_memory = SharedMemoryGenerator::new(object_ids.clone());
        shared_memory.init(recording.clone());
        let thread_ids = ThreadIdGenerator::new(root_raw);
        let root_recorded = thread_ids.map_to_recorded(thread_ids.root(), &recording);
        let mut histories = BTreeMap::new();
        histories.insert(
            root_raw,
            Arc::new(Mutex::new(ThreadHistory::new(
                ThreadRef::new(root_raw, root_name),
                root_recorded,
                true,
            ))),
        );

        ReplayContext {
            dump_checksum,
            recording,
            object_ids,
            thread_ids,
            shared_memory,
            backoff,
            observer,
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            divergences: AtomicUsize::new(0),
            root_name: root_name.to_owned(),
            histories: Mutex::new(histories),
        }
    }

    /// The context of the thread that started the replay. Call once, on that
    /// thread.
    pub fn root_context(&self) -> ThreadContext {
        let root_id = self.thread_ids.root().clone();
        let recorded = self.thread_ids.recorded_id_of(root_id.raw());
        let history = {
            let mut histories = self.histories.lock();
            histories
                .entry(root_id.raw())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(ThreadHistory::new(
                        ThreadRef::new(root_id.raw(), &self.root_name),
                        recorded,
                        true,
                    )))
                })
                .clone()
        };
        ThreadContext::new(root_id, recorded, history)
    }

    pub fn recording(&self) -> &RecordingOutput {
        &self.recording
    }

    pub fn object_ids(&self) -> &ObjectIdGenerator {
        &self.object_ids
    }

    pub fn thread_ids(&self) -> &ThreadIdGenerator {
        &self.thread_ids
    }

    pub fn shared_memory(&self) -> &SharedMemoryGenerator {
        &self.shared_memory
    }

    pub fn divergence_count(&self) -> usize {
        self.divergences.load(Ordering::SeqCst)
    }

    pub fn on_object_created(&self, obj: ObjectRef) {
        if self.accepting.load(Ordering::SeqCst) {
            self.object_ids.register_new(obj);
        }
    }

    pub fn on_thread_started(&self, parent: &ThreadContext, child: ThreadRef) -> ThreadContext {
        let id = self.thread_ids.create_id(parent.thread_id().raw(), child.raw);
        let recorded = self.thread_ids.map_to_recorded(&id, &self.recording);
        if recorded.is_none() {
            log!(
                LogWarn,
                "{} `{}' has no recorded counterpart; its accesses are replayed as the root thread's",
                id,
                child.name
            );
        }

        let history = self
            .histories
            .lock()
            .entry(child.raw)
            .or_insert_with(|| Arc::new(Mutex::new(ThreadHistory::new(child, recorded, false))))
            .clone();
        ThreadContext::new(id, recorded, history)
    }

    /// The recorded thread `cx` replays. Threads without one fall back to the
    /// recorded root.
    fn recorded_thread(&self, cx: &ThreadContext) -> u64 {
        cx.recorded_thread_id()
            .unwrap_or_else(|| self.recording.root_thread().raw())
    }

    /// Returns once the access may go ahead, possibly after backing off.
    pub fn before_access(
        &self,
        cx: &mut ThreadContext,
        obj: ObjectRef,
        field: &str,
        kind: AccessKind,
    ) {
        // Counted before looking at `accepting` so that shutdown, which clears
        // `accepting` and then waits for this to drop to zero, can't miss us.
        let in_flight = InFlight::enter(&self.in_flight);

        if let Some((stale, retries)) = cx.take_pending() {
            log!(
                LogWarn,
                "{:?} never reached its after-hook; assuming it happened",
                stale
            );
            self.finish(cx, stale, retries);
        }

        let location = if self.accepting.load(Ordering::SeqCst)
            && self.shared_memory.is_shared_object(obj, field)
        {
            self.shared_memory.of_field(obj, field)
        } else {
            None
        };
        let location = match location {
            Some(l) => l,
            None => return,
        };

        let thread = self.recorded_thread(cx);
        let mut backoff = Backoff::new(&self.backoff);
        let event = loop {
            match location.poll(thread, kind) {
                Verdict::Grant => break Event::new(location, thread, kind),
                Verdict::Diverged(reason) => {
                    self.diverge(cx, &location, thread, kind, reason, backoff.retries());
                    break Event::forced(location, thread, kind);
                }
                Verdict::Wait => {
                    if !self.accepting.load(Ordering::SeqCst) {
                        log!(
                            LogInfo,
                            "replay is stopping; letting {} of {} through",
                            kind,
                            location.key()
                        );
                        break Event::forced(location, thread, kind);
                    }
                    if !backoff.snooze() {
                        let reason = DivergenceReason::Stalled {
                            next_writer: location.next_writer(),
                            committed_writes: location.committed_writes(),
                        };
                        self.diverge(cx, &location, thread, kind, reason, backoff.retries());
                        break Event::forced(location, thread, kind);
                    }
                }
            }
        };

        log!(LogDebug, "{:?} after {} retries", event, backoff.retries());
        cx.set_pending(event, backoff.retries());
        // Released by `finish`.
        in_flight.hold();
    }

    pub fn after_access(&self, cx: &mut ThreadContext, kind: AccessKind) {
        if let Some((event, retries)) = cx.take_pending() {
            if event.kind() != kind {
                log!(
                    LogWarn,
                    "after-hook for a {} follows a before-hook for {:?}",
                    kind,
                    event
                );
            }
            self.finish(cx, event, retries);
        }
    }

    fn finish(&self, cx: &ThreadContext, event: Event, retries: u32) {
        event.location().commit(&event);
        cx.history().lock().push(AccessRecord {
            location: event.key().to_string(),
            op: event.kind(),
            outcome: if event.is_forced() {
                AccessOutcome::Forced
            } else {
                AccessOutcome::Granted
            },
            retries,
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn diverge(
        &self,
        cx: &ThreadContext,
        location: &SharedMemoryLocation,
        recorded_thread: u64,
        kind: AccessKind,
        reason: DivergenceReason,
        retries: u32,
    ) {
        location.mark_diverged();
        let d = Divergence {
            location: location.key().clone(),
            live_thread: cx.thread_id().raw(),
            recorded_thread,
            kind,
            reason,
            retries,
        };
        log!(LogWarn, "replay diverged: {}", d);
        if is_logging!(LogDebug) {
            log!(
                LogDebug,
                "writers still expected at {}: {:?}",
                d.location,
                location.pending_writes()
            );
        }
        cx.history().lock().set_diverged();
        self.divergences.fetch_add(1, Ordering::SeqCst);
        if let Some(observer) = &self.observer {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(&d))).is_err() {
                log!(LogError, "divergence observer panicked on {}", d.location);
            }
        }
    }

    /// Let every access from now on through unchecked.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Wait until no access is between its hooks. Returns false on timeout.
    pub fn settle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            let in_flight = self.in_flight.load(Ordering::SeqCst);
            if in_flight == 0 {
                return true;
            }
            if start.elapsed() >= timeout {
                log!(
                    LogWarn,
                    "{} accesses still in flight after {:?}",
                    in_flight,
                    timeout
                );
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn harvest(&self) -> ReplayOutput {
        let mut traces: Vec<_> = self
            .histories
            .lock()
            .values()
            .map(|h| h.lock().harvest())
            .collect();
        traces.sort_by_key(|t| (!t.is_main(), t.thread_id));

        let diverged_locations = self
            .shared_memory
            .locations()
            .iter()
            .filter(|l| l.is_diverged())
            .map(|l| l.key().to_string())
            .collect();

        ReplayOutput {
            dump_checksum: self.dump_checksum,
            diverged_locations,
            traces,
        }
    }
}
