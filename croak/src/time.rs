use embedded_time::duration::Milliseconds;
use embedded_time::rate::Fraction;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Milliseconds elapsed between `earlier` and `now`.
///
/// Zero if `now` is before `earlier`.
pub fn elapsed<C: Clock>(earlier: Instant<C>, now: Instant<C>) -> Millis {
  now.checked_duration_since(&earlier)
     .and_then(|d| Millis::try_from(d).ok())
     .unwrap_or(Milliseconds(0))
}

/// Implement [`embedded_time::Clock`] with [`std::time::Instant`],
/// ticking in microseconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct Monotonic(std::time::Instant);

impl Default for Monotonic {
  fn default() -> Self {
    Self::new()
  }
}

impl Monotonic {
  /// Create a new clock
  pub fn new() -> Self {
    Self(std::time::Instant::now())
  }

  /// Get the current time; unlike [`embedded_time::Clock::try_now`] this can't fail
  pub fn now(&self) -> Instant<Self> {
    Instant::new(self.0.elapsed().as_micros() as u64)
  }
}

impl embedded_time::Clock for Monotonic {
  type T = u64;

  // microseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(self.now())
  }
}

#[cfg(test)]
mod tests {
  use embedded_time::Clock as _;

  use super::*;

  #[test]
  fn monotonic_elapsed() {
    let clock = Monotonic::new();
    let a = clock.try_now().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let b = clock.try_now().unwrap();

    assert!(elapsed(a, b) >= Milliseconds(5u64));
    assert_eq!(elapsed(b, a), Milliseconds(0u64));
  }
}
