use core::convert::Infallible;
use core::ops::RangeInclusive;

use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use rand::{Rng, SeedableRng};

use crate::time::{self, Clock, Millis};

/// A non-blocking timer pacing the retransmissions of a single
/// confirmable message.
///
/// The timer is armed when the message is first sent; every
/// time the current delay elapses it says [`YouShould::Retry`]
/// until the allowed number of transmissions is used up, then
/// (once the last delay has also elapsed) [`YouShould::Cry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer<C: Clock> {
  last: Instant<C>,
  delay: Millis,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

/// A number of transmissions
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attempts(pub u16);

/// Result of [`RetryTimer::what_should_i_do`].
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Every transmission went unanswered; give up on the message.
  Cry,
  /// Send the message again
  Retry,
}

impl<C: Clock> RetryTimer<C> {
  /// Arm a timer for a message first sent at `sent`.
  ///
  /// `seed` picks the initial delay when the strategy has jitter.
  pub fn new(sent: Instant<C>, strategy: Strategy, max_attempts: Attempts, seed: u64) -> Self {
    let range = strategy.range();
    let delay = if strategy.has_jitter() {
      rand_chacha::ChaCha8Rng::seed_from_u64(seed).gen_range(range)
    } else {
      *range.start()
    };

    Self { last: sent,
           delay: Milliseconds(delay),
           strategy,
           attempts: Attempts(1),
           max_attempts }
  }

  /// Number of transmissions so far, including the first
  pub fn attempts(&self) -> Attempts {
    self.attempts
  }

  /// Ask the timer what to do about a message that is still unanswered.
  ///
  /// Returns `nb::Error::WouldBlock` while the current delay
  /// has not yet elapsed.
  pub fn what_should_i_do(&mut self, now: Instant<C>) -> nb::Result<YouShould, Infallible> {
    if time::elapsed(self.last, now) < self.delay {
      return Err(nb::Error::WouldBlock);
    }

    if self.attempts >= self.max_attempts {
      return Ok(YouShould::Cry);
    }

    self.attempts.0 += 1;
    self.last = now;
    if let Strategy::Exponential { .. } = self.strategy {
      self.delay = Milliseconds(self.delay.0.saturating_mul(2));
    }

    Ok(YouShould::Retry)
  }
}

/// Strategy to employ when retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strategy {
  /// Wait a random delay between `init_min` and `init_max`
  /// before the first retry, doubling it after every retry.
  Exponential {
    /// Minimum (inclusive) delay before the first retry
    init_min: Millis,
    /// Maximum (inclusive) delay before the first retry
    init_max: Millis,
  },
  /// Wait a random delay between `min` and `max` between every attempt.
  Delay {
    /// Minimum (inclusive) delay
    min: Millis,
    /// Maximum (inclusive) delay
    max: Millis,
  },
}

impl Strategy {
  /// Are min & max delays the same? if so, we can skip the random number generation.
  pub fn has_jitter(&self) -> bool {
    let rng = self.range();
    rng.start() != rng.end()
  }

  /// Get the min & max durations as an inclusive range
  pub fn range(&self) -> RangeInclusive<u64> {
    match *self {
      | Self::Delay { min: Milliseconds(min),
                      max: Milliseconds(max), } => min..=max,
      | Self::Exponential { init_min: Milliseconds(min),
                            init_max: Milliseconds(max), } => min..=max,
    }
  }

  /// Longest time a message may go unanswered before it's given up on
  pub fn max_time(&self, max_attempts: Attempts) -> Millis {
    let n = max_attempts.0 as u64;
    Milliseconds(match *self {
                   | Self::Exponential { init_max: Milliseconds(max),
                                         .. } => max * (2u64.pow(n as u32) - 1),
                   | Self::Delay { max: Milliseconds(max),
                                   .. } => max * n,
                 })
  }
}
