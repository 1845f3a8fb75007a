//! Output of a replay: one history per replayed thread, handed to a
//! `TraceStore` when the agent shuts down.

use crate::{event::AccessKind, log::LogLevel::LogInfo};
use serde::{ser::SerializeSeq, Serialize, Serializer};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

bitflags! {
    pub struct TraceFlags: u32 {
        /// The history belongs to the thread that started the agent.
        const MAIN_THREAD = 1 << 0;
        /// At least one access of this thread could not be replayed in the
        /// recorded order. Nothing after it is guaranteed to match the
        /// recording.
        const DIVERGED = 1 << 1;
    }
}

fn serialize_flags<S: Serializer>(flags: &TraceFlags, s: S) -> Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(None)?;
    if flags.contains(TraceFlags::MAIN_THREAD) {
        seq.serialize_element("main")?;
    }
    if flags.contains(TraceFlags::DIVERGED) {
        seq.serialize_element("diverged")?;
    }
    seq.end()
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOutcome {
    /// Went ahead in the recorded order.
    Granted,
    /// Went ahead without the recorded order being satisfied.
    Forced,
}

/// One shared access as it happened during replay.
#[derive(Clone, Debug, Serialize)]
pub struct AccessRecord {
    /// `obj#<id>.<field>`
    pub location: String,
    pub op: AccessKind,
    pub outcome: AccessOutcome,
    /// How many times the thread backed off before going ahead.
    pub retries: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct HarvestedTrace {
    pub thread_id: u64,
    pub recorded_thread_id: Option<u64>,
    pub thread_name: String,
    #[serde(serialize_with = "serialize_flags")]
    pub flags: TraceFlags,
    pub accesses: Vec<AccessRecord>,
}

impl HarvestedTrace {
    pub fn is_main(&self) -> bool {
        self.flags.contains(TraceFlags::MAIN_THREAD)
    }

    pub fn diverged(&self) -> bool {
        self.flags.contains(TraceFlags::DIVERGED)
    }
}

/// Everything harvested from one replay run.
#[derive(Clone, Debug, Serialize)]
pub struct ReplayOutput {
    /// CRC32 of the dump that was replayed.
    pub dump_checksum: u32,
    pub diverged_locations: Vec<String>,
    pub traces: Vec<HarvestedTrace>,
}

impl ReplayOutput {
    pub fn diverged(&self) -> bool {
        !self.diverged_locations.is_empty() || self.traces.iter().any(|t| t.diverged())
    }
}

/// Where harvested traces go. Storage formats beyond the JSON file below are
/// someone else's business.
pub trait TraceStore {
    fn store(&mut self, output: &ReplayOutput) -> io::Result<()>;
}

/// Writes the output as pretty-printed JSON.
pub struct JsonTraceStore {
    path: PathBuf,
}

impl JsonTraceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> JsonTraceStore {
        JsonTraceStore {
            path: path.as_ref().to_owned(),
        }
    }
}

impl TraceStore for JsonTraceStore {
    fn store(&mut self, output: &ReplayOutput) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(&mut w, output)?;
        writeln!(w)?;
        w.flush()?;
        log!(
            LogInfo,
            "wrote {} thread histories to `{}'",
            output.traces.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Keeps the output in memory.
#[derive(Default)]
pub struct MemoryTraceStore {
    pub stored: Option<ReplayOutput>,
}

impl TraceStore for MemoryTraceStore {
    fn store(&mut self, output: &ReplayOutput) -> io::Result<()> {
        self.stored = Some(output.clone());
        Ok(())
    }
}
