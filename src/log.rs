//! Logging for the replay engine and its tools.
//!
//! Levels are set per module through `SHREPLAY_LOG`, e.g.
//! `SHREPLAY_LOG=all:warn,oracle:debug,context:info`. A module is named by the
//! last component of its path (`shreplay::replay::oracle` is `oracle`).
//! Output goes to stderr unless `SHREPLAY_LOG_FILE` (truncate) or
//! `SHREPLAY_APPEND_LOG_FILE` (append) names a file. `SHREPLAY_LOG_BUFFER=<n>`
//! buffers `n` bytes of output; the buffer is flushed at exit and before a
//! fatal abort.
//!
//! Hook threads may panic. Nothing here poisons or panics in return.

use backtrace::Backtrace;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    env,
    ffi::OsString,
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    thread,
};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

impl LogLevel {
    /// Unknown names mean warn.
    fn from_name(name: &str) -> LogLevel {
        match name {
            "fatal" => LogFatal,
            "error" => LogError,
            "warn" => LogWarn,
            "info" => LogInfo,
            "debug" => LogDebug,
            _ => LogWarn,
        }
    }

    fn label(self) -> &'static str {
        match self {
            LogFatal => "FATAL",
            LogError => "ERROR",
            LogWarn => "WARN",
            LogInfo => "INFO",
            LogDebug => "DEBUG",
        }
    }
}

/// A parsed `SHREPLAY_LOG`.
#[derive(Debug, Eq, PartialEq)]
struct LogSpec {
    default_level: LogLevel,
    module_levels: HashMap<String, LogLevel>,
}

impl LogSpec {
    /// `all:<level>` sets the default, which is debug if not given. Entries
    /// without a colon are ignored.
    fn parse(spec: &str) -> LogSpec {
        let mut parsed = LogSpec {
            default_level: LogDebug,
            module_levels: HashMap::new(),
        };
        for entry in spec.split(',') {
            let (module, level) = match entry.find(':') {
                Some(i) => (entry[..i].trim(), LogLevel::from_name(entry[i + 1..].trim())),
                None => continue,
            };
            if module == "all" {
                parsed.default_level = level;
            } else {
                parsed.module_levels.insert(module.to_owned(), level);
            }
        }
        parsed
    }

    fn level_of(&self, module: &str) -> LogLevel {
        self.module_levels
            .get(module)
            .copied()
            .unwrap_or(self.default_level)
    }
}

/// `shreplay::replay::oracle` -> `oracle`
fn short_module_name(module_path: &str) -> &str {
    module_path.rsplit("::").next().unwrap_or(module_path)
}

fn open_sink() -> Box<dyn Write + Send> {
    fn opened(var: &str, name: OsString, f: io::Result<File>) -> Box<dyn Write + Send> {
        match f {
            Ok(f) => Box::new(f),
            Err(e) => {
                eprintln!(
                    "shreplay: can't open {:?} named by {}: {}; logging to stderr",
                    name, var, e
                );
                Box::new(io::stderr())
            }
        }
    }

    let sink: Box<dyn Write + Send> = if let Some(name) = env::var_os("SHREPLAY_LOG_FILE") {
        let f = File::create(&name);
        opened("SHREPLAY_LOG_FILE", name, f)
    } else if let Some(name) = env::var_os("SHREPLAY_APPEND_LOG_FILE") {
        let f = OpenOptions::new().append(true).create(true).open(&name);
        opened("SHREPLAY_APPEND_LOG_FILE", name, f)
    } else {
        Box::new(io::stderr())
    };

    match env::var("SHREPLAY_LOG_BUFFER").map(|s| s.parse::<usize>()) {
        Ok(Ok(size)) => Box::new(BufWriter::with_capacity(size, sink)),
        Ok(Err(e)) => {
            eprintln!("shreplay: ignoring SHREPLAY_LOG_BUFFER: {}", e);
            sink
        }
        Err(_) => sink,
    }
}

extern "C" fn flush_log_buffer() {
    LOG_SINK.lock().flush().unwrap_or(());
}

lazy_static! {
    /// Read-only once parsed, so level checks never lock.
    static ref LOG_SPEC: LogSpec = match env::var("SHREPLAY_LOG") {
        Ok(s) => LogSpec::parse(&s),
        Err(_) => LogSpec {
            default_level: LogError,
            module_levels: HashMap::new(),
        },
    };
    /// Only locked to write out a line that is being logged.
    static ref LOG_SINK: Mutex<Box<dyn Write + Send>> = {
        let sink = open_sink();
        if unsafe { libc::atexit(flush_log_buffer) } != 0 {
            eprintln!("shreplay: could not register the log flush at exit");
        }
        Mutex::new(sink)
    };
}

/// Low level. Use the is_logging!() macro instead.
pub fn is_logging(level: LogLevel, module_path: &str) -> bool {
    level <= LOG_SPEC.level_of(short_module_name(module_path))
}

/// One log line. The message is collected while formatting and written out,
/// newline included, in one go when the line is dropped, so lines from
/// different threads never interleave.
pub struct LogLine {
    message: Vec<u8>,
}

impl Write for LogLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.message.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogLine {
    fn drop(&mut self) {
        self.message.push(b'\n');
        // Not flushed: a buffered sink keeps it until exit or abort.
        LOG_SINK.lock().write_all(&self.message).unwrap_or(());
    }
}

pub fn write_prefix(stream: &mut dyn Write, level: LogLevel, filename: &str, line: u32) {
    let current = thread::current();
    write!(
        stream,
        "[{} {}:{} {}] ",
        level.label(),
        filename,
        line,
        current.name().unwrap_or("<unnamed>")
    )
    .unwrap_or(());
}

/// This is almost always not the method you want. Use the log!() macro instead.
pub fn log(
    level: LogLevel,
    filename: &str,
    line: u32,
    module_path: &str,
    always_enabled: bool,
) -> Option<LogLine> {
    if !always_enabled && !is_logging(level, module_path) {
        return None;
    }
    let mut l = LogLine {
        message: Vec::new(),
    };
    if level == LogDebug {
        write!(l, "[{}] ", short_module_name(module_path)).unwrap_or(());
    } else {
        write_prefix(&mut l, level, filename, line);
    }
    Some(l)
}

/// Logs to the log file (or stderr), possibly buffered. Execution continues.
#[macro_export]
macro_rules! log {
    ($log_level:expr, $($args:tt)+) => {
        {
            use std::io::Write;
            if let Some(mut line) = $crate::log::log(
                $log_level,
                file!(),
                line!(),
                module_path!(),
                false
            ) {
                write!(line, $($args)+).unwrap_or(());
            }
        }
    };
}

#[macro_export]
macro_rules! is_logging {
    ($log_level:expr) => {
        $crate::log::is_logging($log_level, module_path!())
    };
}

/// Logs regardless of level, then prints a backtrace to stderr and aborts.
#[macro_export]
macro_rules! fatal {
    ($($args:tt)+) => {
        {
            {
                use std::io::Write;
                if let Some(mut line) = $crate::log::log(
                    $crate::log::LogLevel::LogFatal,
                    file!(),
                    line!(),
                    module_path!(),
                    true
                ) {
                    write!(line, $($args)+).unwrap_or(());
                }
            }
            $crate::log::notifying_abort(backtrace::Backtrace::new());
            unreachable!();
        }
    };
}

/// Flush the log, dump the stack and abort.
pub fn notifying_abort(bt: Backtrace) {
    flush_log_buffer();
    eprintln!("=== Start shreplay backtrace:");
    eprintln!("{:?}", bt);
    eprintln!("=== End shreplay backtrace");
    std::process::abort();
}

#[cfg(test)]
mod test {
    use super::{
        is_logging, short_module_name, LogDebug, LogError, LogFatal, LogInfo, LogLine, LogSpec,
        LogWarn, LOG_SINK,
    };
    use std::{io::Write, sync::mpsc, thread, time::Duration};

    #[test]
    fn parse_log_spec() {
        let spec = LogSpec::parse("all:error, oracle:debug,hooks:bogus,garbage");
        assert_eq!(spec.default_level, LogError);
        assert_eq!(spec.level_of("oracle"), LogDebug);
        // Unknown level names fall back to warn.
        assert_eq!(spec.level_of("hooks"), LogWarn);
        assert_eq!(spec.level_of("agent"), LogError);
        assert_eq!(spec.module_levels.len(), 2);
    }

    #[test]
    fn parse_log_spec_without_all() {
        let spec = LogSpec::parse("agent:info");
        assert_eq!(spec.default_level, LogDebug);
        assert_eq!(spec.level_of("agent"), LogInfo);
    }

    #[test]
    fn module_names_are_last_path_components() {
        assert_eq!(short_module_name("shreplay::replay::oracle"), "oracle");
        assert_eq!(short_module_name("shreplay"), "shreplay");
    }

    #[test]
    fn level_checks_do_not_wait_for_the_sink() {
        let sink = LOG_SINK.lock();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            tx.send(is_logging(LogFatal, "shreplay::context")).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        drop(sink);
    }

    #[test]
    fn log_line_collects_the_message() {
        let mut l = LogLine {
            message: Vec::new(),
        };
        write!(l, "{} of {}", 'W', "obj#0.count").unwrap();
        assert_eq!(l.message, b"W of obj#0.count");
    }
}
