use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::Clock;
use crate::{Error, Result};

/// A 128-bit, time-ordered message identifier.
///
/// The high half is a wall-clock timestamp captured when the generator was
/// created; the low half is a per-process counter. Later identifiers compare
/// greater than earlier ones, strictly within a process lifetime and
/// best-effort across restarts. The identifier doubles as the consumer
/// cursor token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId {
    // Field order drives the derived ordering.
    hi: u64,
    lo: u64,
}

impl MessageId {
    /// The "beginning of time" sentinel, smaller than every generated id.
    pub const MIN: MessageId = MessageId { hi: 0, lo: 0 };

    pub(crate) const fn from_parts(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    pub fn is_min(&self) -> bool {
        *self == Self::MIN
    }

    /// Serializes to 16 big-endian bytes, so byte order equals numeric order.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..8].copy_from_slice(&self.hi.to_be_bytes());
        buf[8..16].copy_from_slice(&self.lo.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let hi = u64::from_be_bytes(bytes[0..8].try_into().expect("slice length"));
        let lo = u64::from_be_bytes(bytes[8..16].try_into().expect("slice length"));
        Self { hi, lo }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{:016x}", self.hi, self.lo)
    }
}

impl FromStr for MessageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (hi, lo) = s
            .split_once('-')
            .ok_or(Error::InvalidArgument("malformed message id"))?;
        if hi.len() != 16 || lo.len() != 16 {
            return Err(Error::InvalidArgument("malformed message id"));
        }
        let hi = u64::from_str_radix(hi, 16)
            .map_err(|_| Error::InvalidArgument("malformed message id"))?;
        let lo = u64::from_str_radix(lo, 16)
            .map_err(|_| Error::InvalidArgument("malformed message id"))?;
        Ok(Self { hi, lo })
    }
}

/// Issues strictly increasing message identifiers.
///
/// The high half is fixed at construction from the clock; `next` performs a
/// single atomic increment on the low half, which is the only serialization
/// point between concurrent enqueues. Generation cannot fail.
#[derive(Debug)]
pub struct IdGenerator {
    hi: u64,
    lo: AtomicU64,
}

impl IdGenerator {
    pub fn new(clock: &dyn Clock) -> Self {
        Self::with_floor(clock, MessageId::MIN)
    }

    /// Creates a generator whose every output is strictly greater than
    /// `floor`. Used at open time to stay above identifiers recovered from
    /// the log even if the wall clock went backward between runs.
    pub fn with_floor(clock: &dyn Clock, floor: MessageId) -> Self {
        let mut hi = clock.now_ns();
        if hi <= floor.hi {
            hi = floor.hi + 1;
        }
        Self {
            hi,
            lo: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> MessageId {
        // Counter starts at 1 so the first id already exceeds the floor.
        let lo = self.lo.fetch_add(1, Ordering::Relaxed) + 1;
        MessageId { hi: self.hi, lo }
    }
}
