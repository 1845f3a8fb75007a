use crate::replay::backoff::BackoffPolicy;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Clone, Debug)]
pub struct ReplayConfig {
    /// The recorded dump to replay. Required.
    pub dump_path: PathBuf,
    pub backoff: BackoffPolicy,
    /// How long shutdown waits for accesses that are between their before- and
    /// after-hooks.
    pub settle_timeout: Duration,
}

impl ReplayConfig {
    pub fn new<P: AsRef<Path>>(dump_path: P) -> ReplayConfig {
        ReplayConfig {
            dump_path: dump_path.as_ref().to_owned(),
            backoff: BackoffPolicy::default(),
            settle_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> ReplayConfig {
        self.backoff = backoff;
        self
    }

    pub fn with_settle_timeout(mut self, settle_timeout: Duration) -> ReplayConfig {
        self.settle_timeout = settle_timeout;
        self
    }
}
