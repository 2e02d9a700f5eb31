//! Dispatch retry state machine.
//!
//! A dispatch is at most [`MAX_ATTEMPTS`] POSTs. A 404 on the first attempt re-provisions the
//! workflow and retries the primary URL; a 404 on the second resolves a fallback URL from the
//! workflow id and makes the last attempt there. Everything else is terminal.

use crate::config::RetryConfig;

pub const MAX_ATTEMPTS: u8 = 3;

/// Which 404 recoveries are allowed. Both are on by default; either can be switched off when a
/// 404 is known to come from something other than a missing workflow (e.g. a proxy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub resync_on_not_found: bool,
    pub fallback_on_not_found: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            resync_on_not_found: true,
            fallback_on_not_found: true,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(c: RetryConfig) -> Self {
        Self {
            resync_on_not_found: c.resync_on_not_found,
            fallback_on_not_found: c.fallback_on_not_found,
        }
    }
}

/// Classified result of one POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Timeout,
    NotFound,
    /// Any other status or network error.
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// About to make attempt `n` (1-based).
    Attempting(u8),
    /// Attempt `n` got a 404: re-provision, then attempt `n + 1`.
    ResyncAndRetry(u8),
    /// Attempt `n` got a 404 again: resolve the fallback URL, then attempt `n + 1` there.
    ResolveFallbackAndRetry(u8),
    Failed,
    Succeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEvent {
    Attempted(AttemptOutcome),
    Resynced,
    FallbackResolved(bool),
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Failed | DispatchState::Succeeded)
    }
}

/// Pure transition function. A recovery state fed the wrong event fails; attempting and
/// terminal states ignore events that do not belong to them.
pub fn transition(state: DispatchState, event: DispatchEvent, policy: &RetryPolicy) -> DispatchState {
    use DispatchEvent::*;
    use DispatchState::*;

    match (state, event) {
        (Attempting(_), Attempted(AttemptOutcome::Success)) => Succeeded,
        (Attempting(_), Attempted(AttemptOutcome::Timeout | AttemptOutcome::Failure)) => Failed,
        (Attempting(n), Attempted(AttemptOutcome::NotFound)) => {
            if n == 1 && policy.resync_on_not_found {
                ResyncAndRetry(n)
            } else if n == 2 && policy.fallback_on_not_found {
                ResolveFallbackAndRetry(n)
            } else {
                Failed
            }
        }
        (ResyncAndRetry(n), Resynced) if n < MAX_ATTEMPTS => Attempting(n + 1),
        (ResolveFallbackAndRetry(n), FallbackResolved(true)) if n < MAX_ATTEMPTS => {
            Attempting(n + 1)
        }
        (ResolveFallbackAndRetry(_), FallbackResolved(false)) => Failed,
        (ResyncAndRetry(_) | ResolveFallbackAndRetry(_), _) => Failed,
        (s, _) => s,
    }
}

/// URL for attempt `n`: the fallback on the last attempt when one is known, else the primary.
pub fn target_url<'a>(attempt: u8, primary: &'a str, fallback: Option<&'a str>) -> &'a str {
    match fallback {
        Some(url) if attempt == MAX_ATTEMPTS => url,
        _ => primary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DispatchEvent::*;
    use DispatchState::*;

    fn run(outcomes: &[AttemptOutcome], fallback_ok: bool, policy: RetryPolicy) -> (DispatchState, u8) {
        let mut state = Attempting(1);
        let mut attempts = 0;
        let mut outcomes = outcomes.iter();
        while !state.is_terminal() {
            state = match state {
                Attempting(_) => {
                    attempts += 1;
                    let o = *outcomes.next().unwrap_or(&AttemptOutcome::Failure);
                    transition(state, Attempted(o), &policy)
                }
                ResyncAndRetry(_) => transition(state, Resynced, &policy),
                ResolveFallbackAndRetry(_) => transition(state, FallbackResolved(fallback_ok), &policy),
                s => s,
            };
        }
        (state, attempts)
    }

    #[test]
    fn success_first_try() {
        assert_eq!(
            run(&[AttemptOutcome::Success], true, RetryPolicy::default()),
            (Succeeded, 1)
        );
    }

    #[test]
    fn not_found_then_resync_then_success() {
        let p = RetryPolicy::default();
        assert_eq!(transition(Attempting(1), Attempted(AttemptOutcome::NotFound), &p), ResyncAndRetry(1));
        assert_eq!(transition(ResyncAndRetry(1), Resynced, &p), Attempting(2));
        assert_eq!(
            run(&[AttemptOutcome::NotFound, AttemptOutcome::Success], true, p),
            (Succeeded, 2)
        );
    }

    #[test]
    fn second_not_found_goes_to_fallback() {
        let p = RetryPolicy::default();
        assert_eq!(
            transition(Attempting(2), Attempted(AttemptOutcome::NotFound), &p),
            ResolveFallbackAndRetry(2)
        );
        assert_eq!(transition(ResolveFallbackAndRetry(2), FallbackResolved(true), &p), Attempting(3));
        assert_eq!(transition(ResolveFallbackAndRetry(2), FallbackResolved(false), &p), Failed);
        assert_eq!(
            run(
                &[AttemptOutcome::NotFound, AttemptOutcome::NotFound, AttemptOutcome::Success],
                true,
                p
            ),
            (Succeeded, 3)
        );
    }

    #[test]
    fn unresolved_fallback_stops_after_two_attempts() {
        assert_eq!(
            run(
                &[AttemptOutcome::NotFound, AttemptOutcome::NotFound],
                false,
                RetryPolicy::default()
            ),
            (Failed, 2)
        );
    }

    #[test]
    fn timeouts_and_other_failures_are_terminal() {
        let p = RetryPolicy::default();
        for n in 1..=MAX_ATTEMPTS {
            assert_eq!(transition(Attempting(n), Attempted(AttemptOutcome::Timeout), &p), Failed);
            assert_eq!(transition(Attempting(n), Attempted(AttemptOutcome::Failure), &p), Failed);
        }
        assert_eq!(run(&[AttemptOutcome::Timeout], true, p), (Failed, 1));
    }

    #[test]
    fn never_more_than_three_attempts() {
        let all_404 = [AttemptOutcome::NotFound; 10];
        let (state, attempts) = run(&all_404, true, RetryPolicy::default());
        assert_eq!(state, Failed);
        assert_eq!(attempts, MAX_ATTEMPTS);
        assert_eq!(
            transition(Attempting(MAX_ATTEMPTS), Attempted(AttemptOutcome::NotFound), &RetryPolicy::default()),
            Failed
        );
    }

    #[test]
    fn disabled_recoveries_make_not_found_terminal() {
        let no_resync = RetryPolicy {
            resync_on_not_found: false,
            fallback_on_not_found: true,
        };
        assert_eq!(run(&[AttemptOutcome::NotFound], true, no_resync), (Failed, 1));
        let no_fallback = RetryPolicy {
            resync_on_not_found: true,
            fallback_on_not_found: false,
        };
        assert_eq!(
            run(&[AttemptOutcome::NotFound, AttemptOutcome::NotFound], true, no_fallback),
            (Failed, 2)
        );
    }

    #[test]
    fn mismatched_events_do_not_advance() {
        let p = RetryPolicy::default();
        assert_eq!(transition(Attempting(1), Resynced, &p), Attempting(1));
        assert_eq!(transition(Succeeded, Attempted(AttemptOutcome::NotFound), &p), Succeeded);
        assert_eq!(transition(ResyncAndRetry(1), FallbackResolved(true), &p), Failed);
    }

    #[test]
    fn fallback_only_on_last_attempt() {
        assert_eq!(target_url(1, "primary", Some("fallback")), "primary");
        assert_eq!(target_url(2, "primary", Some("fallback")), "primary");
        assert_eq!(target_url(3, "primary", Some("fallback")), "fallback");
        assert_eq!(target_url(3, "primary", None), "primary");
    }
}
