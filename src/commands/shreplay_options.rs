use crate::{object_id::ObjectId, replay::backoff::BackoffPolicy};
use std::{error::Error, path::PathBuf, time::Duration};
use structopt::{clap, clap::AppSettings, StructOpt};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "shreplay",
    about = "Replays the recorded order of shared memory accesses",
    after_help = "Use SHREPLAY_LOG to control logging; e.g. SHREPLAY_LOG=all:warn,oracle:debug"
)]
#[structopt(global_settings = &[AppSettings::UnifiedHelpMessage])]
pub struct ShreplayOptions {
    /// How many times a thread re-asks for its access before the access is
    /// declared divergent and let through.
    #[structopt(long, default_value = "20000")]
    pub max_retries: u32,

    /// The first <yield-limit> retries only yield the CPU; later ones sleep.
    #[structopt(long, default_value = "1000")]
    pub yield_limit: u32,

    #[structopt(long, default_value = "100", help = "Microseconds slept per retry after <yield-limit>.")]
    pub sleep_us: u64,

    #[structopt(subcommand)]
    pub cmd: ShreplaySubCommand,
}

impl ShreplayOptions {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            yield_limit: self.yield_limit,
            sleep: Duration::from_micros(self.sleep_us),
        }
    }
}

/// `<object>:<field>`, e.g. `3:count`
fn parse_location(location_s: &str) -> Result<(ObjectId, String), Box<dyn Error>> {
    match location_s.find(':') {
        Some(i) if i + 1 < location_s.len() => {
            let object = location_s[..i].parse::<u64>()?;
            Ok((ObjectId(object), location_s[i + 1..].to_owned()))
        }
        _ => Err(Box::new(clap::Error::with_description(
            "Expected <object>:<field>, e.g. `3:count`",
            clap::ErrorKind::InvalidValue,
        ))),
    }
}

#[derive(StructOpt, Debug, Clone)]
pub enum ShreplaySubCommand {
    /// Print a JSON summary of a recorded dump
    #[structopt(name = "info")]
    Info {
        /// The recorded dump
        dump: PathBuf,
    },

    /// Print the recorded access sequences
    #[structopt(name = "dump")]
    Dump {
        /// Only this location
        #[structopt(short = "l", long = "location", parse(try_from_str = parse_location))]
        location: Option<(ObjectId, String)>,

        /// The recorded dump
        dump: PathBuf,
    },

    /// Re-enact a recorded dump: one thread per recorded thread, each making
    /// its recorded accesses through the replay hooks
    #[structopt(name = "simulate")]
    Simulate {
        /// Write the harvested traces here
        #[structopt(short = "o", long = "output")]
        output: Option<PathBuf>,

        /// Sleep a random while before every access
        #[structopt(long)]
        chaos: bool,

        /// Milliseconds shutdown waits for accesses still in flight
        #[structopt(long, default_value = "5000")]
        settle_ms: u64,

        /// The recorded dump
        dump: PathBuf,
    },
}
