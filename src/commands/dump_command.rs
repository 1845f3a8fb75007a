use super::exit_result::ExitResult;
use crate::{
    commands::{
        shreplay_options::{ShreplayOptions, ShreplaySubCommand},
        ShreplayCommand,
    },
    shared_memory::LocationKey,
    trace::{recording::RecordingOutput, trace_reader::TraceReader},
};
use std::{
    io::{self, stdout, Write},
    path::PathBuf,
};

pub struct DumpCommand {
    only_location: Option<LocationKey>,
    dump: PathBuf,
}

impl DumpCommand {
    pub fn new(options: &ShreplayOptions) -> DumpCommand {
        match options.cmd.clone() {
            ShreplaySubCommand::Dump { location, dump } => DumpCommand {
                only_location: location.map(|(object, field)| LocationKey::new(object, &field)),
                dump,
            },
            _ => panic!("Unexpected ShreplaySubCommand variant. Not a `Dump` variant!"),
        }
    }

    fn dump(&self, recording: &RecordingOutput, f: &mut dyn Write) -> io::Result<()> {
        if self.only_location.is_none() {
            for t in recording.threads() {
                writeln!(f, "thread {} at {:?}", t.raw(), t.position())?;
            }
        }

        for (key, location) in recording.access_list().iter() {
            if let Some(only) = &self.only_location {
                if only != key {
                    continue;
                }
            }
            let shared = recording.is_shared_field(&location.class_name, key.field());
            writeln!(
                f,
                "{} ({}){}: {} events",
                key,
                location.class_name,
                if shared { "" } else { " [not shared]" },
                location.events.len()
            )?;
            for (i, e) in location.events.iter().enumerate() {
                match e.seq {
                    Some(seq) => writeln!(f, "  {:>4} {} thread {} @{}", i, e.op, e.thread, seq)?,
                    None => writeln!(f, "  {:>4} {} thread {}", i, e.op, e.thread)?,
                }
            }
        }
        Ok(())
    }
}

impl ShreplayCommand for DumpCommand {
    fn run(&mut self) -> ExitResult<()> {
        let trace = match TraceReader::open(&self.dump) {
            Ok(trace) => trace,
            Err(e) => return ExitResult::err_from(e, 1),
        };
        if let Some(key) = &self.only_location {
            if trace.recording().access_list().get(key).is_none() {
                return ExitResult::err_from(
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("nothing was recorded for {}", key),
                    ),
                    1,
                );
            }
        }
        match self.dump(trace.recording(), &mut stdout()) {
            Ok(()) => ExitResult::Ok(()),
            Err(e) => ExitResult::err_from(e, 1),
        }
    }
}
