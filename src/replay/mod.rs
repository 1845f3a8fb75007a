//! Replaying the recorded order of shared accesses.

pub mod access_list_replay;
pub mod backoff;
pub mod oracle;
pub mod read_count_vector;
