//! Reconnect-and-retry wrapper around remote calls.
//!
//! A transient failure (transport drop, framing error, protocol exception)
//! closes and reopens the connection, then runs the call again. By default
//! this happens exactly once per logical call; every other error, and the
//! error after the last retry, propagates unchanged. The attempt counter
//! lives on the stack of each call, never on the connection.

use std::time::Duration;

use serde::Deserialize;

use crate::{
    error::Result,
    metrics::ConnectionMetrics,
    observability::log_warn,
    option::duration_from_millis,
};

/// How often a transient failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Reconnect-and-retry cycles per call.
    pub max_retries: u32,
    /// Fixed pause before each retry.
    #[serde(rename = "backoff_ms", deserialize_with = "duration_from_millis")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the number of retries.
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    /// Set the pause before each retry.
    pub fn with_backoff(self, backoff: Duration) -> Self {
        Self { backoff, ..self }
    }
}

/// Connections that can drop their transport and open it again with the
/// same address and timeout.
pub trait Reconnect {
    /// Close the current transport and open a fresh one.
    fn reconnect(&mut self) -> Result<()>;
}

/// Run `op` against `conn`, reconnecting and retrying on transient errors
/// as allowed by `policy`.
///
/// A failing reconnect propagates its own error.
pub fn with_reconnect<C, T, F>(
    policy: &RetryPolicy,
    conn: &mut C,
    metrics: &mut ConnectionMetrics,
    method: &str,
    mut op: F,
) -> Result<T>
where
    C: Reconnect + ?Sized,
    F: FnMut(&mut C) -> Result<T>,
{
    let mut retries = 0u32;
    loop {
        match op(conn) {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && retries < policy.max_retries => {
                retries += 1;
                log_warn!(
                    component = "retry",
                    event = "reconnect",
                    method = method,
                    attempt = retries,
                    error = %err,
                );
                if !policy.backoff.is_zero() {
                    std::thread::sleep(policy.backoff);
                }
                metrics.record_reconnect();
                conn.reconnect()?;
            }
            Err(err) => {
                if err.is_transient() {
                    metrics.record_retry_exhausted();
                    log_warn!(
                        component = "retry",
                        event = "retry_exhausted",
                        method = method,
                        retries = retries,
                        error = %err,
                    );
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use proptest::prelude::*;

    use super::*;
    use crate::error::{HyperError, TransportError};

    #[derive(Default)]
    struct Flaky {
        outcomes: VecDeque<Result<u32>>,
        calls: u32,
        reconnects: u32,
        fail_reconnect: bool,
    }

    impl Flaky {
        fn new(outcomes: Vec<Result<u32>>) -> Self {
            Self {
                outcomes: outcomes.into(),
                ..Self::default()
            }
        }

        fn call(&mut self) -> Result<u32> {
            self.calls += 1;
            self.outcomes.pop_front().unwrap_or(Ok(0))
        }
    }

    impl Reconnect for Flaky {
        fn reconnect(&mut self) -> Result<()> {
            self.reconnects += 1;
            if self.fail_reconnect {
                return Err(TransportError::protocol("refused").into());
            }
            Ok(())
        }
    }

    fn transient() -> Result<u32> {
        Err(TransportError::Closed.into())
    }

    fn run(flaky: &mut Flaky, metrics: &mut ConnectionMetrics) -> Result<u32> {
        with_reconnect(&RetryPolicy::default(), flaky, metrics, "test", |c| c.call())
    }

    #[test]
    fn transient_then_success_reconnects_once() {
        let mut flaky = Flaky::new(vec![transient(), Ok(7)]);
        let mut metrics = ConnectionMetrics::default();
        assert_eq!(run(&mut flaky, &mut metrics).unwrap(), 7);
        assert_eq!(flaky.calls, 2);
        assert_eq!(flaky.reconnects, 1);
        assert_eq!(metrics.reconnects, 1);
        assert_eq!(metrics.retries_exhausted, 0);
    }

    #[test]
    fn second_transient_failure_propagates_after_one_reconnect() {
        let mut flaky = Flaky::new(vec![
            transient(),
            Err(TransportError::protocol("second").into()),
            Ok(1),
        ]);
        let mut metrics = ConnectionMetrics::default();
        let err = run(&mut flaky, &mut metrics).unwrap_err();
        assert!(matches!(
            err,
            HyperError::Transport(TransportError::Protocol(ref m)) if m == "second"
        ));
        assert_eq!(flaky.calls, 2);
        assert_eq!(flaky.reconnects, 1);
        assert_eq!(metrics.retries_exhausted, 1);
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let mut flaky = Flaky::new(vec![Err(HyperError::configuration("nope")), Ok(1)]);
        let mut metrics = ConnectionMetrics::default();
        assert!(matches!(
            run(&mut flaky, &mut metrics),
            Err(HyperError::Configuration(_))
        ));
        assert_eq!(flaky.calls, 1);
        assert_eq!(flaky.reconnects, 0);
    }

    #[test]
    fn retry_state_is_per_call() {
        let mut flaky = Flaky::new(vec![transient(), Ok(1), transient(), Ok(2)]);
        let mut metrics = ConnectionMetrics::default();
        assert_eq!(run(&mut flaky, &mut metrics).unwrap(), 1);
        assert_eq!(run(&mut flaky, &mut metrics).unwrap(), 2);
        assert_eq!(flaky.reconnects, 2);
    }

    #[test]
    fn failed_reconnect_propagates() {
        let mut flaky = Flaky::new(vec![transient(), Ok(1)]);
        flaky.fail_reconnect = true;
        let mut metrics = ConnectionMetrics::default();
        let err = run(&mut flaky, &mut metrics).unwrap_err();
        assert!(matches!(
            err,
            HyperError::Transport(TransportError::Protocol(ref m)) if m == "refused"
        ));
        assert_eq!(flaky.calls, 1);
    }

    #[test]
    fn no_retry_policy_fails_immediately() {
        let mut flaky = Flaky::new(vec![transient(), Ok(1)]);
        let mut metrics = ConnectionMetrics::default();
        let result = with_reconnect(&RetryPolicy::no_retry(), &mut flaky, &mut metrics, "t", |c| {
            c.call()
        });
        assert!(result.is_err());
        assert_eq!(flaky.reconnects, 0);
    }

    proptest! {
        #[test]
        fn prop_reconnects_never_exceed_policy(
            failures in 0u32..6,
            max_retries in 0u32..4,
        ) {
            let mut outcomes: Vec<Result<u32>> = (0..failures).map(|_| transient()).collect();
            outcomes.push(Ok(99));
            let mut flaky = Flaky::new(outcomes);
            let mut metrics = ConnectionMetrics::default();
            let policy = RetryPolicy::default().with_max_retries(max_retries);
            let result = with_reconnect(&policy, &mut flaky, &mut metrics, "prop", |c| c.call());

            prop_assert_eq!(flaky.reconnects, failures.min(max_retries));
            prop_assert_eq!(result.is_ok(), failures <= max_retries);
        }
    }
}
