use super::exit_result::ExitResult;
use crate::{
    commands::{
        shreplay_options::{ShreplayOptions, ShreplaySubCommand},
        ShreplayCommand,
    },
    trace::trace_reader::TraceReader,
};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    io::{self, stdout, Write},
    path::PathBuf,
};

pub struct InfoCommand {
    dump: PathBuf,
}

impl InfoCommand {
    pub fn new(options: &ShreplayOptions) -> InfoCommand {
        match options.cmd.clone() {
            ShreplaySubCommand::Info { dump } => InfoCommand { dump },
            _ => panic!("Unexpected ShreplaySubCommand variant. Not an `Info` variant!"),
        }
    }
}

#[derive(Serialize)]
struct ThreadInfo {
    id: u64,
    position: Vec<u32>,
    parent: Option<u64>,
}

#[derive(Serialize)]
struct DumpInfo<'a> {
    checksum: u32,
    threads: Vec<ThreadInfo>,
    shared_fields: BTreeMap<&'a str, BTreeSet<&'a str>>,
    locations: usize,
    events: usize,
}

fn write_info(trace: &TraceReader, f: &mut dyn Write) -> io::Result<()> {
    let recording = trace.recording();
    let info = DumpInfo {
        checksum: trace.checksum(),
        threads: recording
            .threads()
            .iter()
            .map(|t| ThreadInfo {
                id: t.raw(),
                position: t.position().to_vec(),
                parent: t.parent().map(|p| p.raw()),
            })
            .collect(),
        shared_fields: recording.shared_fields(),
        locations: recording.access_list().len(),
        events: recording.access_list().event_count(),
    };
    serde_json::to_writer_pretty(&mut *f, &info)?;
    writeln!(f)
}

impl ShreplayCommand for InfoCommand {
    fn run(&mut self) -> ExitResult<()> {
        let trace = match TraceReader::open(&self.dump) {
            Ok(trace) => trace,
            Err(e) => return ExitResult::err_from(e, 1),
        };
        match write_info(&trace, &mut stdout()) {
            Ok(()) => ExitResult::Ok(()),
            Err(e) => ExitResult::err_from(e, 1),
        }
    }
}
