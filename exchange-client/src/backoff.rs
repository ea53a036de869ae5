use std::time::Duration;

use tokio::time::Instant;

const INITIAL_ERROR_DELAY: Duration = Duration::from_millis(1);
const MAX_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Tracks how long the current error streak has lasted and how long to wait
/// before the next attempt. Uses the tokio clock so tests can pause and
/// advance time.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    error_delay: Duration,
    error_since: Option<Instant>,
}

impl Backoff {
    /// Start the error clock if it is not already running. Idempotent, so
    /// repeated failures before a retry fires keep the original streak start.
    pub(crate) fn start_error_timer(&mut self) {
        if self.error_since.is_none() {
            self.error_since = Some(Instant::now());
        }
    }

    /// Record one failed attempt: keep the clock running and take the next
    /// step up the delay ladder.
    pub(crate) fn note_error(&mut self) {
        self.start_error_timer();
        self.error_delay = if self.error_delay.is_zero() {
            INITIAL_ERROR_DELAY
        } else {
            (self.error_delay * 2).min(MAX_ERROR_DELAY)
        };
    }

    /// A successful response ends the streak: stop the clock and drop the
    /// delay back to zero so the next request fires immediately.
    pub(crate) fn reset(&mut self) {
        self.error_since = None;
        self.error_delay = Duration::ZERO;
    }

    /// Wall-clock duration of the current error streak, zero if there is
    /// none.
    pub(crate) fn elapsed(&self) -> Duration {
        self.error_since
            .map(|since| since.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// How long to wait before the next attempt.
    pub(crate) fn delay(&self) -> Duration {
        self.error_delay
    }
}
