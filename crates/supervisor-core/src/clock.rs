//! Monotonic time source, abstracted so tests can substitute a fake clock.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of wall-clock time. The real implementation wraps [`SystemTime`];
/// tests can swap in a clock that advances deterministically.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;

    fn epoch_secs(&self) -> u64 {
        self.now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A clock that only advances when told to; used to make backoff and
    /// stabilization-window tests deterministic.
    #[derive(Debug, Default)]
    pub struct FakeClock {
        secs: AtomicU64,
    }

    impl FakeClock {
        pub fn new(start_secs: u64) -> Self {
            Self {
                secs: AtomicU64::new(start_secs),
            }
        }

        pub fn advance(&self, dur: Duration) {
            self.secs.fetch_add(dur.as_secs(), Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> SystemTime {
            UNIX_EPOCH + Duration::from_secs(self.secs.load(Ordering::SeqCst))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_epoch_secs_is_recent() {
        let clock = SystemClock;
        assert!(clock.epoch_secs() > 1_700_000_000);
    }

    #[test]
    fn fake_clock_advances() {
        let clock = test_support::FakeClock::new(100);
        assert_eq!(clock.epoch_secs(), 100);
        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.epoch_secs(), 130);
    }
}
