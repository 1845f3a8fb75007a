//! The replay agent: owns a replay from loading the dump to harvesting the
//! thread histories, and is what the instrumentation talks to.

use crate::{
    config::ReplayConfig,
    context::ReplayContext,
    event::AccessKind,
    hooks::{ReplayHooks, ThreadContext},
    log::LogLevel::{LogError, LogInfo, LogWarn},
    object_id::ObjectRef,
    replay::oracle::{Divergence, DivergenceObserver},
    thread_id::ThreadRef,
    trace::{
        trace_reader::{LoadError, TraceReader},
        trace_writer::{ReplayOutput, TraceStore},
    },
};
use parking_lot::RwLock;
use std::{
    any::Any,
    error::Error,
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AgentState {
    Uninitialized = 0,
    LoadingTrace = 1,
    Active = 2,
    ShuttingDown = 3,
    Terminated = 4,
}

impl AgentState {
    fn from_u8(v: u8) -> AgentState {
        match v {
            0 => AgentState::Uninitialized,
            1 => AgentState::LoadingTrace,
            2 => AgentState::Active,
            3 => AgentState::ShuttingDown,
            _ => AgentState::Terminated,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Uninitialized => "UNINITIALIZED",
            AgentState::LoadingTrace => "LOADING_TRACE",
            AgentState::Active => "ACTIVE",
            AgentState::ShuttingDown => "SHUTTING_DOWN",
            AgentState::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum AgentError {
    /// The agent was not in the state the operation starts from.
    WrongState {
        expected: AgentState,
        actual: AgentState,
    },
    Load(LoadError),
    Store(io::Error),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::WrongState { expected, actual } => write!(
                f,
                "replay agent is {} but needs to be {}",
                actual, expected
            ),
            AgentError::Load(e) => write!(f, "could not load the recorded dump: {}", e),
            AgentError::Store(e) => write!(f, "could not store the harvested traces: {}", e),
        }
    }
}

impl Error for AgentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AgentError::WrongState { .. } => None,
            AgentError::Load(e) => Some(e),
            AgentError::Store(e) => Some(e),
        }
    }
}

pub struct ReplayAgent {
    config: ReplayConfig,
    state: AtomicU8,
    /// Set once the dump is loaded. Kept after shutdown so that after-hooks of
    /// accesses let through while shutting down can still be committed.
    context: RwLock<Option<Arc<ReplayContext>>>,
    observer: Option<DivergenceObserver>,
}

assert_impl_all!(ReplayAgent: Send, Sync);

impl ReplayAgent {
    pub fn new(config: ReplayConfig) -> ReplayAgent {
        ReplayAgent {
            config,
            state: AtomicU8::new(AgentState::Uninitialized as u8),
            context: RwLock::new(None),
            observer: None,
        }
    }

    /// `f` is called on the diverging thread for every divergence. Must be set
    /// before startup.
    pub fn with_divergence_observer<F>(mut self, f: F) -> ReplayAgent
    where
        F: Fn(&Divergence) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn state(&self) -> AgentState {
        AgentState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: AgentState, to: AgentState) -> Result<(), AgentError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| AgentError::WrongState {
                expected: from,
                actual: AgentState::from_u8(actual),
            })
    }

    /// Load the dump and start replaying. `root` is the calling thread; the
    /// returned context is its own.
    pub fn try_startup(&self, root: ThreadRef) -> Result<ThreadContext, AgentError> {
        self.transition(AgentState::Uninitialized, AgentState::LoadingTrace)?;
        log!(
            LogInfo,
            "loading recorded dump `{}'",
            self.config.dump_path.display()
        );

        let reader = match TraceReader::open(&self.config.dump_path) {
            Ok(reader) => reader,
            Err(e) => {
                self.state
                    .store(AgentState::Terminated as u8, Ordering::SeqCst);
                return Err(AgentError::Load(e));
            }
        };
        let context = Arc::new(ReplayContext::new(
            reader,
            root.raw,
            root.name,
            self.config.backoff,
            self.observer.clone(),
        ));
        log!(
            LogInfo,
            "replaying {} locations recorded by {} threads",
            context.recording().access_list().len(),
            context.recording().threads().len()
        );

        let cx = context.root_context();
        *self.context.write() = Some(context);
        self.state
            .store(AgentState::Active as u8, Ordering::SeqCst);
        Ok(cx)
    }

    /// Like `try_startup()` but a dump that can't be loaded is fatal.
    pub fn startup(&self, root: ThreadRef) -> ThreadContext {
        match self.try_startup(root) {
            Ok(cx) => cx,
            Err(e) => fatal!("Failed to start replay: {}", e),
        }
    }

    /// The context of the thread that started the replay. Anything else gets a
    /// detached context.
    pub fn root_context(&self, root: ThreadRef) -> ThreadContext {
        match self.active() {
            Some(c) if c.thread_ids().root().raw() == root.raw => c.root_context(),
            _ => ThreadContext::detached(root),
        }
    }

    /// Stop replaying, wait for accesses still between their hooks and hand
    /// every thread's history to `store`.
    pub fn shutdown(&self, store: &mut dyn TraceStore) -> Result<ReplayOutput, AgentError> {
        self.transition(AgentState::Active, AgentState::ShuttingDown)?;
        let context = match self.context.read().clone() {
            Some(c) => c,
            None => {
                self.state
                    .store(AgentState::Terminated as u8, Ordering::SeqCst);
                return Err(AgentError::WrongState {
                    expected: AgentState::Active,
                    actual: AgentState::Uninitialized,
                });
            }
        };

        context.stop_accepting();
        if !context.settle(self.config.settle_timeout) {
            log!(LogWarn, "harvesting with accesses still in flight");
        }
        let output = context.harvest();
        let stored = store.store(&output).map_err(AgentError::Store);
        self.state
            .store(AgentState::Terminated as u8, Ordering::SeqCst);
        log!(
            LogInfo,
            "replay finished: {} threads, {} divergences",
            output.traces.len(),
            context.divergence_count()
        );
        stored.map(|()| output)
    }

    fn active(&self) -> Option<Arc<ReplayContext>> {
        if self.state() != AgentState::Active {
            return None;
        }
        self.context.read().clone()
    }

    fn before_access(&self, cx: &mut ThreadContext, obj: ObjectRef, field: &str, kind: AccessKind) {
        if let Some(c) = self.active() {
            guarded("before-hook", || c.before_access(cx, obj, field, kind));
        }
    }

    fn after_access(&self, cx: &mut ThreadContext, kind: AccessKind) {
        if !cx.has_pending() {
            return;
        }
        let context = self.context.read().clone();
        match context {
            Some(c) => guarded("after-hook", || c.after_access(cx, kind)),
            None => {
                cx.take_pending();
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<unknown>"
    }
}

fn guarded<F: FnOnce()>(what: &str, f: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        log!(
            LogError,
            "{} panicked: {}; access treated as unshared",
            what,
            panic_message(&*payload)
        );
    }
}

impl ReplayHooks for ReplayAgent {
    fn on_object_created(&self, obj: ObjectRef) {
        if let Some(c) = self.active() {
            guarded("object hook", || c.on_object_created(obj));
        }
    }

    fn on_thread_started(&self, parent: &ThreadContext, child: ThreadRef) -> ThreadContext {
        let c = match self.active() {
            Some(c) => c,
            None => return ThreadContext::detached(child),
        };
        panic::catch_unwind(AssertUnwindSafe(|| c.on_thread_started(parent, child)))
            .unwrap_or_else(|payload| {
                log!(
                    LogError,
                    "thread hook panicked: {}; `{}' will not be replayed",
                    panic_message(&*payload),
                    child.name
                );
                ThreadContext::detached(child)
            })
    }

    fn before_read(&self, cx: &mut ThreadContext, obj: ObjectRef, field: &str) {
        self.before_access(cx, obj, field, AccessKind::Read)
    }

    fn after_read(&self, cx: &mut ThreadContext) {
        self.after_access(cx, AccessKind::Read)
    }

    fn before_write(&self, cx: &mut ThreadContext, obj: ObjectRef, field: &str) {
        self.before_access(cx, obj, field, AccessKind::Write)
    }

    fn after_write(&self, cx: &mut ThreadContext) {
        self.after_access(cx, AccessKind::Write)
    }
}

#[cfg(test)]
mod test {
    use super::{AgentError, AgentState, ReplayAgent};
    use crate::{
        config::ReplayConfig,
        hooks::{ReplayHooks, ThreadContext},
        object_id::ObjectRef,
        replay::{backoff::BackoffPolicy, oracle::DivergenceReason},
        thread_id::ThreadRef,
        trace::trace_writer::{AccessOutcome, JsonTraceStore, MemoryTraceStore},
    };
    use parking_lot::Mutex;
    use std::{
        fs,
        io::Write,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    const COUNTER: ObjectRef<'static> = ObjectRef {
        handle: 0x1000,
        class_name: "Counter",
    };

    fn dump(text: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f
    }

    /// A dump with the root thread 1 and its children 2 and 3, and one shared
    /// location `Counter.count` with `events`.
    fn counter_dump(events: &str) -> tempfile::NamedTempFile {
        dump(&format!(
            r#"{{
                "threads": [ {{ "id": 1, "position": [] }},
                             {{ "id": 2, "position": [0] }},
                             {{ "id": 3, "position": [1] }} ],
                "shared_fields": {{ "Counter": ["count"] }},
                "locations": [ {{ "object": 0, "class": "Counter", "field": "count",
                                  "events": [ {} ] }} ]
            }}"#,
            events
        ))
    }

    fn start(f: &tempfile::NamedTempFile, backoff: BackoffPolicy) -> (Arc<ReplayAgent>, ThreadContext) {
        let agent = Arc::new(ReplayAgent::new(
            ReplayConfig::new(f.path()).with_backoff(backoff),
        ));
        let root = agent.startup(ThreadRef::new(100, "main"));
        (agent, root)
    }

    fn small_budget() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 5,
            yield_limit: 2,
            sleep: Duration::from_micros(50),
        }
    }

    #[test]
    fn lifecycle() {
        let f = counter_dump(r#"{ "thread": 1, "op": "write" }"#);
        let agent = ReplayAgent::new(ReplayConfig::new(f.path()));
        assert_eq!(agent.state(), AgentState::Uninitialized);

        // Before startup everything passes through.
        let mut early = agent.root_context(ThreadRef::new(100, "main"));
        agent.on_object_created(COUNTER);
        agent.before_write(&mut early, COUNTER, "count");
        assert!(!early.has_pending());

        let mut root = agent.try_startup(ThreadRef::new(100, "main")).unwrap();
        assert_eq!(agent.state(), AgentState::Active);
        match agent.try_startup(ThreadRef::new(100, "main")) {
            Err(AgentError::WrongState { expected, actual }) => {
                assert_eq!(expected, AgentState::Uninitialized);
                assert_eq!(actual, AgentState::Active);
            }
            _ => panic!("second startup must fail"),
        }

        agent.on_object_created(COUNTER);
        agent.before_write(&mut root, COUNTER, "count");
        agent.after_write(&mut root);

        let mut store = MemoryTraceStore::default();
        let output = agent.shutdown(&mut store).unwrap();
        assert_eq!(agent.state(), AgentState::Terminated);
        assert!(!output.diverged());
        assert_eq!(store.stored.unwrap().traces.len(), 1);

        // After shutdown hooks pass through again.
        agent.before_write(&mut root, COUNTER, "count");
        assert!(!root.has_pending());
        assert!(agent.shutdown(&mut MemoryTraceStore::default()).is_err());
    }

    #[test]
    fn load_failure_is_reported() {
        let f = dump(r#"{ "threads": [ { "id": 2, "position": [0] } ] }"#);
        let agent = ReplayAgent::new(ReplayConfig::new(f.path()));
        match agent.try_startup(ThreadRef::new(100, "main")) {
            Err(AgentError::Load(_)) => (),
            _ => panic!("expected a load error"),
        }
        assert_eq!(agent.state(), AgentState::Terminated);

        let mut cx = agent.root_context(ThreadRef::new(100, "main"));
        agent.before_read(&mut cx, COUNTER, "count");
        assert!(!cx.has_pending());
    }

    #[test]
    fn counter_increment_follows_the_recording() {
        // Recorded: main wrote 10, then the worker read it and wrote 11.
        let f = counter_dump(
            r#"{ "thread": 1, "op": "write" },
               { "thread": 2, "op": "read" },
               { "thread": 2, "op": "write" }"#,
        );
        let (agent, mut root) = start(&f, BackoffPolicy::default());
        let count = Arc::new(AtomicU64::new(0));

        agent.on_object_created(COUNTER);
        let mut cx = agent.on_thread_started(&root, ThreadRef::new(200, "worker"));
        let worker = {
            let agent = agent.clone();
            let count = count.clone();
            thread::spawn(move || {
                agent.before_read(&mut cx, COUNTER, "count");
                let seen = count.load(Ordering::SeqCst);
                agent.after_read(&mut cx);
                agent.before_write(&mut cx, COUNTER, "count");
                count.store(seen + 1, Ordering::SeqCst);
                agent.after_write(&mut cx);
                seen
            })
        };

        // Give the worker a head start; it has to wait for us anyway.
        thread::sleep(Duration::from_millis(20));
        agent.before_write(&mut root, COUNTER, "count");
        count.store(10, Ordering::SeqCst);
        agent.after_write(&mut root);

        assert_eq!(worker.join().unwrap(), 10);
        assert_eq!(count.load(Ordering::SeqCst), 11);

        let output = agent.shutdown(&mut MemoryTraceStore::default()).unwrap();
        assert!(!output.diverged());
        let worker_trace = &output.traces[1];
        assert_eq!(worker_trace.recorded_thread_id, Some(2));
        assert_eq!(worker_trace.accesses.len(), 2);
        assert!(worker_trace
            .accesses
            .iter()
            .all(|a| a.outcome == AccessOutcome::Granted));
    }

    #[test]
    fn writes_happen_in_recorded_order() {
        let f = counter_dump(
            r#"{ "thread": 2, "op": "write" },
               { "thread": 3, "op": "write" },
               { "thread": 1, "op": "write" }"#,
        );
        let (agent, mut root) = start(&f, BackoffPolicy::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        agent.on_object_created(COUNTER);

        let mut handles = Vec::new();
        for (raw, name, delay) in vec![(200, "first", 30), (300, "second", 0)] {
            let mut cx = agent.on_thread_started(&root, ThreadRef::new(raw, name));
            let agent = agent.clone();
            let order = order.clone();
            handles.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(delay));
                agent.before_write(&mut cx, COUNTER, "count");
                order.lock().push(raw);
                agent.after_write(&mut cx);
            }));
        }

        agent.before_write(&mut root, COUNTER, "count");
        order.lock().push(100);
        agent.after_write(&mut root);
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*order.lock(), vec![200, 300, 100]);
        assert!(!agent
            .shutdown(&mut MemoryTraceStore::default())
            .unwrap()
            .diverged());
    }

    #[test]
    fn late_writer_waits_for_the_earlier_write_and_read() {
        // Recorded: main writes, worker 2 reads, worker 3 writes. Worker 3
        // reaches its write first and has to wait for both.
        let f = counter_dump(
            r#"{ "thread": 1, "op": "write" },
               { "thread": 2, "op": "read" },
               { "thread": 3, "op": "write" }"#,
        );
        let (agent, mut root) = start(&f, BackoffPolicy::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        agent.on_object_created(COUNTER);

        let mut reader_cx = agent.on_thread_started(&root, ThreadRef::new(200, "reader"));
        let mut writer_cx = agent.on_thread_started(&root, ThreadRef::new(300, "writer"));
        let writer = {
            let agent = agent.clone();
            let order = order.clone();
            thread::spawn(move || {
                agent.before_write(&mut writer_cx, COUNTER, "count");
                order.lock().push((300, "write"));
                agent.after_write(&mut writer_cx);
            })
        };
        let reader = {
            let agent = agent.clone();
            let order = order.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                agent.before_read(&mut reader_cx, COUNTER, "count");
                order.lock().push((200, "read"));
                agent.after_read(&mut reader_cx);
            })
        };

        thread::sleep(Duration::from_millis(40));
        agent.before_write(&mut root, COUNTER, "count");
        order.lock().push((100, "write"));
        agent.after_write(&mut root);
        reader.join().unwrap();
        writer.join().unwrap();

        assert_eq!(
            *order.lock(),
            vec![(100, "write"), (200, "read"), (300, "write")]
        );
        let output = agent.shutdown(&mut MemoryTraceStore::default()).unwrap();
        assert!(!output.diverged());
        let writer_trace = &output.traces[2];
        assert_eq!(writer_trace.thread_id, 300);
        assert_eq!(writer_trace.accesses[0].outcome, AccessOutcome::Granted);
        assert!(writer_trace.accesses[0].retries > 0);
    }

    #[test]
    fn reads_see_the_recorded_write() {
        // The worker read the first of main's two writes.
        let f = counter_dump(
            r#"{ "thread": 1, "op": "write" },
               { "thread": 2, "op": "read" },
               { "thread": 1, "op": "write" }"#,
        );
        let (agent, mut root) = start(&f, BackoffPolicy::default());
        let value = Arc::new(AtomicU64::new(0));
        agent.on_object_created(COUNTER);

        let mut cx = agent.on_thread_started(&root, ThreadRef::new(200, "reader"));
        let reader = {
            let agent = agent.clone();
            let value = value.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                agent.before_read(&mut cx, COUNTER, "count");
                let seen = value.load(Ordering::SeqCst);
                agent.after_read(&mut cx);
                seen
            })
        };

        for v in 1..=2 {
            agent.before_write(&mut root, COUNTER, "count");
            value.store(v, Ordering::SeqCst);
            agent.after_write(&mut root);
        }

        assert_eq!(reader.join().unwrap(), 1);
        assert!(!agent
            .shutdown(&mut MemoryTraceStore::default())
            .unwrap()
            .diverged());
    }

    #[test]
    fn divergence_is_reported_and_the_access_proceeds() {
        // Only the worker ever wrote, and it never runs.
        let f = counter_dump(r#"{ "thread": 2, "op": "write" }, { "thread": 1, "op": "read" }"#);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let agent = {
            let seen = seen.clone();
            ReplayAgent::new(ReplayConfig::new(f.path()).with_backoff(small_budget()))
                .with_divergence_observer(move |d| seen.lock().push(d.reason))
        };
        let mut root = agent.startup(ThreadRef::new(100, "main"));
        agent.on_object_created(COUNTER);

        agent.before_read(&mut root, COUNTER, "count");
        agent.after_read(&mut root);
        // The location is now diverged; this goes through without a report.
        agent.before_write(&mut root, COUNTER, "count");
        agent.after_write(&mut root);

        assert_eq!(
            *seen.lock(),
            vec![DivergenceReason::Stalled {
                next_writer: Some(2),
                committed_writes: 0
            }]
        );

        let output = agent.shutdown(&mut MemoryTraceStore::default()).unwrap();
        assert!(output.diverged());
        assert_eq!(output.diverged_locations, vec!["obj#0.count".to_owned()]);
        let main = &output.traces[0];
        assert!(main.is_main());
        assert!(main.diverged());
        assert_eq!(main.accesses[0].retries, 5);
        assert_eq!(main.accesses[0].outcome, AccessOutcome::Forced);
    }

    #[test]
    fn unexpected_write_diverges_without_waiting() {
        let f = counter_dump(r#"{ "thread": 2, "op": "write" }"#);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let agent = {
            let seen = seen.clone();
            ReplayAgent::new(ReplayConfig::new(f.path()))
                .with_divergence_observer(move |d| seen.lock().push((d.reason, d.retries)))
        };
        let mut root = agent.startup(ThreadRef::new(100, "main"));
        agent.on_object_created(COUNTER);
        agent.before_write(&mut root, COUNTER, "count");
        agent.after_write(&mut root);

        assert_eq!(
            *seen.lock(),
            vec![(
                DivergenceReason::NoRecordedWrite {
                    committed_writes: 0
                },
                0
            )]
        );
    }

    #[test]
    fn panicking_observer_does_not_escape_the_hook() {
        let f = counter_dump(r#"{ "thread": 2, "op": "write" }"#);
        let agent = ReplayAgent::new(ReplayConfig::new(f.path()))
            .with_divergence_observer(|_| panic!("observer"));
        let mut root = agent.startup(ThreadRef::new(100, "main"));
        agent.on_object_created(COUNTER);
        agent.before_write(&mut root, COUNTER, "count");
        agent.after_write(&mut root);
        let output = agent.shutdown(&mut MemoryTraceStore::default()).unwrap();
        assert!(output.traces[0].diverged());
    }

    #[test]
    fn harvest_is_written_as_json() {
        let f = counter_dump(
            r#"{ "thread": 1, "op": "write" }, { "thread": 2, "op": "read" }"#,
        );
        let (agent, mut root) = start(&f, BackoffPolicy::default());
        agent.on_object_created(COUNTER);
        let mut cx = agent.on_thread_started(&root, ThreadRef::new(200, "worker"));
        agent.before_write(&mut root, COUNTER, "count");
        agent.after_write(&mut root);
        agent.before_read(&mut cx, COUNTER, "count");
        agent.after_read(&mut cx);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.json");
        agent.shutdown(&mut JsonTraceStore::new(&out)).unwrap();

        let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(
            v["dump_checksum"],
            crc32fast::hash(&fs::read(f.path()).unwrap())
        );
        assert_eq!(v["traces"][0]["thread_name"], "main");
        assert_eq!(v["traces"][0]["flags"], serde_json::json!(["main"]));
        assert_eq!(v["traces"][1]["thread_id"], 200);
        assert_eq!(v["traces"][1]["recorded_thread_id"], 2);
        assert_eq!(v["traces"][1]["accesses"][0]["location"], "obj#0.count");
        assert_eq!(v["diverged_locations"], serde_json::json!([]));
    }

    #[test]
    fn unrecorded_thread_replays_as_the_root() {
        let f = counter_dump(r#"{ "thread": 1, "op": "write" }"#);
        let (agent, root) = start(&f, BackoffPolicy::default());
        agent.on_object_created(COUNTER);
        let _first = agent.on_thread_started(&root, ThreadRef::new(200, "a"));
        let _second = agent.on_thread_started(&root, ThreadRef::new(300, "b"));
        let mut third = agent.on_thread_started(&root, ThreadRef::new(400, "c"));
        assert_eq!(third.recorded_thread_id(), None);

        agent.before_write(&mut third, COUNTER, "count");
        agent.after_write(&mut third);
        let output = agent.shutdown(&mut MemoryTraceStore::default()).unwrap();
        assert!(!output.diverged());
        assert_eq!(output.traces.len(), 4);
    }
}
