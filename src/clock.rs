use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock timestamps.
///
/// The queue engine uses this to seed the time-ordered half of message
/// identifiers and to evaluate expiry during purges. Implementations must be
/// cheap enough to call on the enqueue path.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time in nanoseconds since the UNIX epoch.
    fn now_ns(&self) -> u64;
}

/// A clock backed by `std::time::SystemTime`.
///
/// The default implementation. Susceptible to NTP adjustments, which the
/// identifier generator absorbs by flooring against recovered identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ns(&self) -> u64 {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX epoch");
        u64::try_from(timestamp.as_nanos()).expect("system time exceeds timestamp range")
    }
}

/// A clock that anchors to `SystemTime` once and then advances on the CPU's
/// Time-Stamp Counter via the `quanta` crate. Faster than `SystemClock` and
/// monotonic within the process.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    start_wall_ns: u64,
    start_instant: quanta::Instant,
}

impl Default for QuantaClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let start_instant = clock.now();
        let start_wall_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX epoch")
            .as_nanos() as u64;

        Self {
            clock,
            start_wall_ns,
            start_instant,
        }
    }
}

impl QuantaClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for QuantaClock {
    fn now_ns(&self) -> u64 {
        let delta = self.clock.now().duration_since(self.start_instant);
        self.start_wall_ns + delta.as_nanos() as u64
    }
}
