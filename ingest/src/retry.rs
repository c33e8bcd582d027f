use std::time;

/// The backoff policy used when a load fails with a retryable error, to
/// space out attempts before the record is finally rejected.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// Calculate the time to wait before the given retry attempt.
    pub fn retry_interval(&self, attempt: u32) -> time::Duration {
        let candidate_interval = self.initial_interval * self.backoff_coefficient.pow(attempt);

        match self.maximum_interval {
            Some(maximum_interval) => std::cmp::min(candidate_interval, maximum_interval),
            None => candidate_interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_grow_exponentially_up_to_the_maximum() {
        let policy = RetryPolicy::new(
            2,
            time::Duration::from_secs(1),
            Some(time::Duration::from_secs(5)),
        );

        assert_eq!(policy.retry_interval(0), time::Duration::from_secs(1));
        assert_eq!(policy.retry_interval(1), time::Duration::from_secs(2));
        assert_eq!(policy.retry_interval(2), time::Duration::from_secs(4));
        assert_eq!(policy.retry_interval(3), time::Duration::from_secs(5));
    }
}
