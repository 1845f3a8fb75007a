use std::collections::HashMap;

/// How many recorded reads of one location each (recorded) thread has
/// consumed so far in this replay.
///
/// There is one of these per shared location, living under that location's
/// lock, so the vector as a whole is the (thread, location) -> count map split
/// by location. Counts only ever go up.
#[derive(Clone, Debug, Default)]
pub struct ReadCountVector {
    counts: HashMap<u64, u64>,
}

impl ReadCountVector {
    pub fn new() -> ReadCountVector {
        ReadCountVector::default()
    }

    pub fn get(&self, thread: u64) -> u64 {
        self.counts.get(&thread).copied().unwrap_or(0)
    }

    /// Returns the new count.
    pub fn increment(&mut self, thread: u64) -> u64 {
        let c = self.counts.entry(thread).or_insert(0);
        *c += 1;
        *c
    }

    /// True if every thread has consumed at least as many reads as `needed`
    /// says.
    pub fn covers(&self, needed: &HashMap<u64, u64>) -> bool {
        needed.iter().all(|(&t, &n)| self.get(t) >= n)
    }
}
