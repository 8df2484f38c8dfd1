// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Backoff Runner (§4.2): repeats an attempt with exponential delay until
//! success, terminal error, attempt cap, or cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use slog::{debug, info, o, warn, Logger};

use crate::cancel::CancelToken;
use crate::clock::Clock;

const INITIAL_INTERVAL: Duration = Duration::from_millis(10);
const MAX_INTERVAL: Duration = Duration::from_millis(5000);
const MULTIPLIER: f64 = 2.0;

/// How a run of the Backoff Runner ended, for a caller whose attempt
/// function returns `E` on failure.
#[derive(Debug)]
pub enum RunOutcome<E> {
    /// The underlying error classified as terminal; no further attempts.
    Terminal(E),
    /// Attempts were exhausted without success or a terminal error.
    MaxAttemptsReached,
    /// A cancellation signal fired mid-run.
    Cancelled,
}

fn new_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: INITIAL_INTERVAL,
        initial_interval: INITIAL_INTERVAL,
        multiplier: MULTIPLIER,
        max_interval: MAX_INTERVAL,
        max_elapsed_time: None,
        randomization_factor: 0.0,
        ..ExponentialBackoff::default()
    }
}

/// Runs `attempt_fn` until it succeeds, returns a terminal error (per
/// `is_transient`), exhausts `max_attempts`, or `cancel` fires.
///
/// `on_transient` is invoked with each transient error before the next
/// delay, so callers can update a status model's `latestError` (§7:
/// "visible only in `latestError`/`latestErrors` during retries").
///
/// Contract (§4.2): a single in-flight attempt at a time; attempt *k+1*
/// never begins before attempt *k* completes, which this loop's structure
/// guarantees directly.
pub async fn run<T, E, Fut>(
    log: &Logger,
    clock: &Arc<dyn Clock>,
    phase_name: &'static str,
    max_attempts: Option<u32>,
    cancel: &CancelToken,
    mut attempt_fn: impl FnMut() -> Fut,
    is_transient: impl Fn(&E) -> bool,
    mut on_transient: impl FnMut(&E),
) -> Result<T, RunOutcome<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    let log = log.new(o!("phase" => phase_name));
    let mut backoff = new_backoff();
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RunOutcome::Cancelled);
        }
        attempts += 1;
        let result = attempt_fn().await;
        match result {
            Ok(value) => {
                if attempts > 1 {
                    info!(log, "attempt succeeded after retries"; "attempts" => attempts);
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_transient(&err) {
                    warn!(log, "terminal error, aborting phase"; "attempts" => attempts);
                    return Err(RunOutcome::Terminal(err));
                }
                if let Some(max) = max_attempts {
                    if attempts >= max {
                        warn!(log, "max attempts reached"; "attempts" => attempts);
                        return Err(RunOutcome::MaxAttemptsReached);
                    }
                }
                on_transient(&err);
                let delay = backoff.next_backoff().unwrap_or(MAX_INTERVAL);
                debug!(log, "transient error, retrying";
                    "attempts" => attempts, "delay_ms" => delay.as_millis() as u64);
                drop(err);

                tokio::select! {
                    _ = clock.sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(RunOutcome::Cancelled);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::cell::Cell;

    #[tokio::test]
    async fn succeeds_first_try() {
        let log = crate::testing::test_logger();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cancel = CancelToken::new();
        let result: Result<u32, RunOutcome<String>> = run(
            &log,
            &clock,
            "test",
            None,
            &cancel,
            || async { Ok::<u32, String>(42) },
            |_e: &String| true,
            |_e| {},
        )
        .await;
        assert!(matches!(result, Ok(42)));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let log = crate::testing::test_logger();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cancel = CancelToken::new();
        let attempts = Cell::new(0);
        let result = run(
            &log,
            &clock,
            "test",
            None,
            &cancel,
            || {
                attempts.set(attempts.get() + 1);
                let n = attempts.get();
                async move { if n < 3 { Err("transient".to_string()) } else { Ok(7) } }
            },
            |_e: &String| true,
            |_e| {},
        )
        .await;
        assert!(matches!(result, Ok(7)));
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn terminal_error_stops_immediately() {
        let log = crate::testing::test_logger();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cancel = CancelToken::new();
        let attempts = Cell::new(0);
        let result: Result<u32, RunOutcome<String>> = run(
            &log,
            &clock,
            "test",
            None,
            &cancel,
            || {
                attempts.set(attempts.get() + 1);
                async { Err("boom".to_string()) }
            },
            |_e: &String| false,
            |_e| {},
        )
        .await;
        assert!(matches!(result, Err(RunOutcome::Terminal(_))));
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn max_attempts_reached() {
        let log = crate::testing::test_logger();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cancel = CancelToken::new();
        let result: Result<u32, RunOutcome<String>> = run(
            &log,
            &clock,
            "test",
            Some(3),
            &cancel,
            || async { Err("transient".to_string()) },
            |_e: &String| true,
            |_e| {},
        )
        .await;
        assert!(matches!(result, Err(RunOutcome::MaxAttemptsReached)));
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let log = crate::testing::test_logger();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result: Result<u32, RunOutcome<String>> = run(
            &log,
            &clock,
            "test",
            None,
            &cancel,
            || async { Err("transient".to_string()) },
            |_e: &String| true,
            |_e| {},
        )
        .await;
        assert!(matches!(result, Err(RunOutcome::Cancelled)));
    }
}
