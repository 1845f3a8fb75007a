use crate::{log::LogLevel::LogInfo, trace::recording::RecordingOutput};
use std::{
    error::Error,
    fmt, fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug)]
pub enum LoadError {
    Io(PathBuf, io::Error),
    Parse(serde_json::Error),
    /// The file parsed but does not describe a consistent recording.
    Invalid(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(path, e) => write!(f, "could not read dump `{}': {}", path.display(), e),
            LoadError::Parse(e) => write!(f, "could not parse dump: {}", e),
            LoadError::Invalid(msg) => write!(f, "invalid dump: {}", msg),
        }
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoadError::Io(_, e) => Some(e),
            LoadError::Parse(e) => Some(e),
            LoadError::Invalid(_) => None,
        }
    }
}

/// A recorded dump read from disk.
pub struct TraceReader {
    path: PathBuf,
    /// CRC32 of the file contents. Harvested output carries it so a replay's
    /// results can be matched to the recording they replayed.
    checksum: u32,
    recording: RecordingOutput,
}

impl TraceReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<TraceReader, LoadError> {
        let path = path.as_ref().to_owned();
        let bytes = fs::read(&path).map_err(|e| LoadError::Io(path.clone(), e))?;
        let checksum = crc32fast::hash(&bytes);
        let text = String::from_utf8(bytes)
            .map_err(|e| LoadError::Invalid(format!("dump is not valid UTF-8: {}", e)))?;
        let recording = RecordingOutput::parse(&text)?;
        log!(
            LogInfo,
            "loaded `{}' (crc32 {:08x}): {} threads, {} locations, {} events",
            path.display(),
            checksum,
            recording.threads().len(),
            recording.access_list().len(),
            recording.access_list().event_count()
        );

        Ok(TraceReader {
            path,
            checksum,
            recording,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn recording(&self) -> &RecordingOutput {
        &self.recording
    }

    pub fn into_recording(self) -> RecordingOutput {
        self.recording
    }
}

#[cfg(test)]
mod test {
    use super::{LoadError, TraceReader};
    use std::io::Write;

    #[test]
    fn reads_and_checksums_a_dump() {
        let text = br#"{ "threads": [ { "id": 1, "position": [] } ] }"#;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(text).unwrap();
        let reader = TraceReader::open(f.path()).unwrap();
        assert_eq!(reader.checksum(), crc32fast::hash(text));
        assert_eq!(reader.path(), f.path());
        assert_eq!(reader.recording().root_thread().raw(), 1);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        match TraceReader::open(dir.path().join("nope.json")) {
            Err(LoadError::Io(path, _)) => assert!(path.ends_with("nope.json")),
            _ => panic!("expected an io error"),
        }
    }

    #[test]
    fn binary_garbage_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0xff, 0xfe, 0x00]).unwrap();
        assert!(TraceReader::open(f.path()).is_err());
    }
}
