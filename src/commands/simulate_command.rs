//! `shreplay simulate`: stands in for an instrumented program. Every recorded
//! thread becomes an OS thread started from its recorded parent, and makes the
//! accesses the recording attributes to it, in recorded order, through the
//! replay hooks. A consistent dump replays without divergence however the OS
//! schedules the threads.

use super::exit_result::ExitResult;
use crate::{
    agent::ReplayAgent,
    commands::{
        shreplay_options::{ShreplayOptions, ShreplaySubCommand},
        ShreplayCommand,
    },
    config::ReplayConfig,
    event::AccessKind,
    hooks::{ReplayHooks, ThreadContext},
    log::LogLevel::{LogDebug, LogWarn},
    object_id::ObjectRef,
    replay::backoff::BackoffPolicy,
    thread_id::ThreadRef,
    trace::{
        recording::RecordingOutput,
        trace_reader::TraceReader,
        trace_writer::{JsonTraceStore, MemoryTraceStore, ReplayOutput},
    },
};
use rand::{thread_rng, Rng};
use std::{
    collections::HashMap,
    convert::TryFrom,
    error::Error,
    fmt, io,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

/// Objects that no recorded location mentions still need an id, so that the
/// ones after them get the ids they were recorded with.
const FILLER_CLASS: &str = "<unrecorded>";

/// Ids are handed out densely, so simulating object `n` means creating `n`
/// objects before it.
const MAX_SIMULATED_OBJECTS: usize = 1 << 20;

pub struct SimulateCommand {
    dump: PathBuf,
    output: Option<PathBuf>,
    chaos: bool,
    backoff: BackoffPolicy,
    settle_timeout: Duration,
}

impl SimulateCommand {
    pub fn new(options: &ShreplayOptions) -> SimulateCommand {
        match options.cmd.clone() {
            ShreplaySubCommand::Simulate {
                output,
                chaos,
                settle_ms,
                dump,
            } => SimulateCommand {
                dump,
                output,
                chaos,
                backoff: options.backoff(),
                settle_timeout: Duration::from_millis(settle_ms),
            },
            _ => panic!("Unexpected ShreplaySubCommand variant. Not a `Simulate` variant!"),
        }
    }

    fn simulate(&self, plan: Arc<SimulationPlan>) -> Result<(ReplayOutput, usize), Box<dyn Error>> {
        let divergences = Arc::new(AtomicUsize::new(0));
        let agent = {
            let divergences = divergences.clone();
            Arc::new(
                ReplayAgent::new(
                    ReplayConfig::new(&self.dump)
                        .with_backoff(self.backoff)
                        .with_settle_timeout(self.settle_timeout),
                )
                .with_divergence_observer(move |_| {
                    divergences.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };

        let sim = Arc::new(Simulation {
            agent: agent.clone(),
            plan,
            chaos: self.chaos,
            next_raw: AtomicU64::new(2),
        });
        let root = agent.try_startup(ThreadRef::new(1, "sim-root"))?;
        for o in &sim.plan.objects {
            agent.on_object_created(o.object_ref());
        }
        sim.run_thread(Vec::new(), root)?;

        let output = match &self.output {
            Some(path) => agent.shutdown(&mut JsonTraceStore::new(path))?,
            None => agent.shutdown(&mut MemoryTraceStore::default())?,
        };
        Ok((output, divergences.load(Ordering::SeqCst)))
    }
}

#[derive(Debug)]
struct Diverged(usize);

impl fmt::Display for Diverged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replay diverged {} times", self.0)
    }
}

impl Error for Diverged {}

#[derive(Debug)]
struct TooManyObjects(u64);

impl fmt::Display for TooManyObjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recorded object id {} is beyond the {} objects a simulation creates",
            self.0, MAX_SIMULATED_OBJECTS
        )
    }
}

impl Error for TooManyObjects {}

impl ShreplayCommand for SimulateCommand {
    fn run(&mut self) -> ExitResult<()> {
        let plan = match TraceReader::open(&self.dump) {
            Ok(trace) => match SimulationPlan::new(trace.recording()) {
                Ok(plan) => plan,
                Err(e) => return ExitResult::err_from(e, 1),
            },
            Err(e) => return ExitResult::err_from(e, 1),
        };
        match self.simulate(Arc::new(plan)) {
            Ok((output, divergences)) => {
                println!("{} divergences", divergences);
                if output.diverged() {
                    ExitResult::err_from(Diverged(divergences), 1)
                } else {
                    ExitResult::Ok(())
                }
            }
            Err(e) => ExitResult::Err(e, 2),
        }
    }
}

struct SimObject {
    handle: usize,
    class_name: String,
}

impl SimObject {
    fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.handle, &self.class_name)
    }
}

struct SimAccess {
    /// Index into `SimulationPlan::objects`, which is also the object id.
    object: usize,
    field: String,
    kind: AccessKind,
}

/// What each recorded thread has to do, keyed by spawn position.
struct SimulationPlan {
    objects: Vec<SimObject>,
    accesses: HashMap<Vec<u32>, Vec<SimAccess>>,
    /// How many children to start. Gaps in the recorded child indices are
    /// filled with threads that do nothing.
    children: HashMap<Vec<u32>, u32>,
}

impl SimulationPlan {
    /// Accesses are ordered by their recorded `seq`. Those without one go
    /// after, in location order.
    fn new(recording: &RecordingOutput) -> Result<SimulationPlan, TooManyObjects> {
        let mut objects: Vec<SimObject> = Vec::new();
        let mut positions: HashMap<u64, Vec<u32>> = HashMap::new();
        let mut children: HashMap<Vec<u32>, u32> = HashMap::new();
        for t in recording.threads() {
            positions.insert(t.raw(), t.position().to_vec());
            if let Some((&index, parent)) = t.position().split_last() {
                let n = children.entry(parent.to_vec()).or_insert(0);
                *n = (*n).max(index + 1);
            }
        }

        let mut ordered: HashMap<Vec<u32>, Vec<((u64, u64), SimAccess)>> = HashMap::new();
        let mut unsequenced = 0u64;
        for (key, location) in recording.access_list().iter() {
            let id = key.object().0;
            let object = match usize::try_from(id) {
                Ok(object) if object < MAX_SIMULATED_OBJECTS => object,
                _ => return Err(TooManyObjects(id)),
            };
            while objects.len() <= object {
                objects.push(SimObject {
                    handle: 0x1000 + 0x10 * objects.len(),
                    class_name: FILLER_CLASS.to_owned(),
                });
            }
            objects[object].class_name = location.class_name.clone();

            for e in &location.events {
                let order = match e.seq {
                    Some(seq) => (0, seq),
                    None => {
                        unsequenced += 1;
                        (1, unsequenced)
                    }
                };
                // from_dump() checked every event's thread.
                if let Some(position) = positions.get(&e.thread) {
                    ordered.entry(position.clone()).or_default().push((
                        order,
                        SimAccess {
                            object,
                            field: key.field().to_owned(),
                            kind: e.op,
                        },
                    ));
                }
            }
        }

        let accesses = ordered
            .into_iter()
            .map(|(position, mut list)| {
                list.sort_by_key(|(order, _)| *order);
                (position, list.into_iter().map(|(_, a)| a).collect())
            })
            .collect();

        Ok(SimulationPlan {
            objects,
            accesses,
            children,
        })
    }
}

struct Simulation {
    agent: Arc<ReplayAgent>,
    plan: Arc<SimulationPlan>,
    chaos: bool,
    next_raw: AtomicU64,
}

impl Simulation {
    /// Start the children of `position`, make its accesses, wait for the
    /// children.
    fn run_thread(self: &Arc<Self>, position: Vec<u32>, mut cx: ThreadContext) -> io::Result<()> {
        let n_children = self.plan.children.get(&position).copied().unwrap_or(0);
        let mut handles = Vec::with_capacity(n_children as usize);
        for index in 0..n_children {
            let raw = self.next_raw.fetch_add(1, Ordering::SeqCst);
            let mut child_position = position.clone();
            child_position.push(index);
            let name = format!("sim-{:?}", child_position);
            let child_cx = self.agent.on_thread_started(&cx, ThreadRef::new(raw, &name));
            let sim = self.clone();
            handles.push(
                thread::Builder::new()
                    .name(name)
                    .spawn(move || sim.run_thread(child_position, child_cx))?,
            );
        }

        let none = Vec::new();
        let accesses = self.plan.accesses.get(&position).unwrap_or(&none);
        log!(
            LogDebug,
            "{:?} makes {} accesses",
            position,
            accesses.len()
        );
        for a in accesses {
            if self.chaos {
                thread::sleep(Duration::from_micros(thread_rng().gen_range(0..2000)));
            }
            let obj = self.plan.objects[a.object].object_ref();
            match a.kind {
                AccessKind::Read => {
                    self.agent.before_read(&mut cx, obj, &a.field);
                    self.agent.after_read(&mut cx);
                }
                AccessKind::Write => {
                    self.agent.before_write(&mut cx, obj, &a.field);
                    self.agent.after_write(&mut cx);
                }
            }
        }

        for h in handles {
            match h.join() {
                Ok(result) => result?,
                Err(_) => {
                    log!(LogWarn, "a simulated thread panicked");
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "simulated thread panicked",
                    ));
                }
            }
        }
        Ok(())
    }
}
