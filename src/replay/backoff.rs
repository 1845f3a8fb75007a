use std::{thread, time::Duration};

/// How long a thread keeps re-asking the oracle before giving up.
///
/// The budget is a count of retries, not a time: the first `yield_limit`
/// retries just yield the CPU, the remaining ones sleep for `sleep` each.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub yield_limit: u32,
    pub sleep: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            max_retries: 20_000,
            yield_limit: 1_000,
            sleep: Duration::from_micros(100),
        }
    }
}

impl BackoffPolicy {
    /// Worst case time spent on one access before it is declared divergent,
    /// not counting the time spent yielding.
    pub fn max_sleep(&self) -> Duration {
        self.sleep * self.max_retries.saturating_sub(self.yield_limit)
    }
}

pub struct Backoff<'a> {
    policy: &'a BackoffPolicy,
    retries: u32,
}

impl<'a> Backoff<'a> {
    pub fn new(policy: &'a BackoffPolicy) -> Backoff<'a> {
        Backoff { policy, retries: 0 }
    }

    /// Back off once. Returns false, without waiting, once the budget is used up.
    pub fn snooze(&mut self) -> bool {
        if self.retries >= self.policy.max_retries {
            return false;
        }
        if self.retries < self.policy.yield_limit {
            thread::yield_now();
        } else {
            thread::sleep(self.policy.sleep);
        }
        self.retries += 1;
        true
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}

#[cfg(test)]
mod test {
    use super::{Backoff, BackoffPolicy};
    use std::time::Duration;

    #[test]
    fn stops_after_the_budget() {
        let policy = BackoffPolicy {
            max_retries: 5,
            yield_limit: 2,
            sleep: Duration::from_micros(1),
        };
        let mut b = Backoff::new(&policy);
        let mut n = 0;
        while b.snooze() {
            n += 1;
        }
        assert_eq!(n, 5);
        assert_eq!(b.retries(), 5);
        assert!(!b.snooze());
    }

    #[test]
    fn zero_budget_never_waits() {
        let policy = BackoffPolicy {
            max_retries: 0,
            ..BackoffPolicy::default()
        };
        let mut b = Backoff::new(&policy);
        assert!(!b.snooze());
        assert_eq!(b.retries(), 0);
    }

    #[test]
    fn sleep_budget() {
        let policy = BackoffPolicy {
            max_retries: 10,
            yield_limit: 4,
            sleep: Duration::from_millis(2),
        };
        assert_eq!(policy.max_sleep(), Duration::from_millis(12));
    }
}
