//! Retry across candidates
//!
//! A generic round-based failover loop. It knows nothing about URLs or
//! engines: the caller hands it a candidate count, a starting index and an
//! `attempt` closure, and gets back the first success or an [`Exhausted`]
//! summary. Time is read from `tokio::time`, so tests can pause the clock.

use std::future::Future;

use tokio::time::{sleep, timeout, Instant};

use crate::config::{FailoverStrategy, RetryPolicy};
use crate::error::{DatabaseError, DbResult};

/// First successful attempt
#[derive(Debug)]
pub(crate) struct Success<T> {
    pub index: usize,
    pub value: T,
    pub attempts: u32,
}

/// Every candidate failed within the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Exhausted {
    pub candidates: usize,
    pub attempts: u32,
    pub rounds: u32,
}

impl From<Exhausted> for DatabaseError {
    fn from(exhausted: Exhausted) -> Self {
        DatabaseError::ConnectionUnavailable {
            candidates: exhausted.candidates,
            attempts: exhausted.attempts,
            rounds: exhausted.rounds,
        }
    }
}

/// Visit order of one round
pub(crate) fn round_order(strategy: FailoverStrategy, candidates: usize, cursor: usize) -> impl Iterator<Item = usize> {
    let start = match strategy {
        FailoverStrategy::ResumeAndWrap if candidates > 0 => cursor % candidates,
        _ => 0,
    };
    (0..candidates).map(move |offset| (start + offset) % candidates)
}

/// Run `attempt` over the candidates, round after round, until one succeeds
///
/// Rounds are bounded by `policy.max_attempts`. When a deadline is set it is
/// checked before every attempt and each attempt is cut off at the remaining
/// budget. The backoff sleep happens only between rounds, never after the last.
pub(crate) async fn failover<T, F, Fut>(
    policy: &RetryPolicy,
    candidates: usize,
    cursor: usize,
    mut attempt: F,
) -> Result<Success<T>, Exhausted>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;
    let mut rounds = 0u32;

    let exhausted = |attempts, rounds| Exhausted {
        candidates,
        attempts,
        rounds,
    };

    if candidates == 0 {
        return Err(exhausted(attempts, rounds));
    }

    while rounds < policy.max_attempts {
        rounds += 1;

        for (offset, index) in round_order(policy.strategy, candidates, cursor).enumerate() {
            let remaining = match policy.deadline {
                Some(deadline) => match deadline.checked_sub(started.elapsed()) {
                    Some(remaining) if !remaining.is_zero() => Some(remaining),
                    _ => {
                        tracing::debug!("Acquisition deadline of {:?} exceeded in round {}", deadline, rounds);
                        let started_rounds = if offset == 0 { rounds - 1 } else { rounds };
                        return Err(exhausted(attempts, started_rounds));
                    }
                },
                None => None,
            };

            attempts += 1;
            let outcome = match remaining {
                Some(remaining) => match timeout(remaining, attempt(index)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!("Attempt on candidate {} cut off by the acquisition deadline", index);
                        continue;
                    }
                },
                None => attempt(index).await,
            };

            match outcome {
                Ok(value) => {
                    return Ok(Success {
                        index,
                        value,
                        attempts,
                    })
                }
                Err(e) => tracing::debug!("Candidate {} failed in round {}: {}", index, rounds, e),
            }
        }

        if rounds < policy.max_attempts {
            let pause = match policy.deadline {
                Some(deadline) => policy.backoff.min(deadline.saturating_sub(started.elapsed())),
                None => policy.backoff,
            };
            tracing::debug!("Round {} found no usable candidate, retrying in {:?}", rounds, pause);
            sleep(pause).await;
        }
    }

    Err(exhausted(attempts, rounds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    fn fail(index: usize) -> DbResult<usize> {
        Err(DatabaseError::ConnectionAttemptFailed {
            url: format!("candidate-{}", index),
            reason: "refused".to_string(),
        })
    }

    #[test]
    fn test_round_order() {
        let resume: Vec<_> = round_order(FailoverStrategy::ResumeAndWrap, 3, 1).collect();
        assert_eq!(resume, vec![1, 2, 0]);

        let restart: Vec<_> = round_order(FailoverStrategy::RestartFromFirst, 3, 1).collect();
        assert_eq!(restart, vec![0, 1, 2]);

        let wrapped: Vec<_> = round_order(FailoverStrategy::ResumeAndWrap, 2, 5).collect();
        assert_eq!(wrapped, vec![1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_wins() {
        let visited = RefCell::new(Vec::new());
        let policy = RetryPolicy::new(3, Duration::from_secs(1));

        let success = failover(&policy, 3, 0, |index| {
            visited.borrow_mut().push(index);
            async move {
                if index == 2 {
                    Ok(index)
                } else {
                    fail(index)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(success.index, 2);
        assert_eq!(success.value, 2);
        assert_eq!(success.attempts, 3);
        assert_eq!(*visited.borrow(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_counts_rounds_and_sleeps_between_them() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let started = Instant::now();

        let exhausted = failover(&policy, 2, 0, |index| async move { fail(index) })
            .await
            .unwrap_err();

        assert_eq!(
            exhausted,
            Exhausted {
                candidates: 2,
                attempts: 6,
                rounds: 3
            }
        );
        // Two pauses between three rounds, none after the last
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_in_later_round() {
        let calls = RefCell::new(0u32);
        let policy = RetryPolicy::new(5, Duration::from_millis(100));

        let success = failover(&policy, 2, 0, |index| {
            *calls.borrow_mut() += 1;
            let call = *calls.borrow();
            async move {
                if call == 5 {
                    Ok(index)
                } else {
                    fail(index)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(success.attempts, 5);
        assert_eq!(success.index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_unbounded_rounds() {
        let policy = RetryPolicy::deadline_only(Duration::from_secs(5)).with_backoff(Duration::from_secs(1));
        let started = Instant::now();

        let exhausted = failover(&policy, 1, 0, |index| async move { fail(index) })
            .await
            .unwrap_err();

        assert!(started.elapsed() <= Duration::from_secs(5));
        assert!(exhausted.rounds >= 5);
        assert_eq!(exhausted.attempts, exhausted.rounds);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_off_a_hanging_attempt() {
        let policy = RetryPolicy::new(10, Duration::from_millis(10)).with_deadline(Duration::from_secs(2));
        let started = Instant::now();

        let exhausted = failover(&policy, 1, 0, |_| async {
            sleep(Duration::from_secs(60)).await;
            Ok(0usize)
        })
        .await
        .unwrap_err();

        assert_eq!(exhausted.attempts, 1);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let exhausted = failover(&RetryPolicy::default(), 0, 0, |index| async move { fail(index) })
            .await
            .unwrap_err();
        assert_eq!(exhausted.attempts, 0);
    }
}
