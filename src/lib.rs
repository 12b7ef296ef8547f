//! Persistent message queue core.
//!
//! Durably records enqueued messages in an append-only log, assigns them
//! time-ordered 128-bit identifiers, and lets independent consumers read
//! forward from any cursor position. Transport, authentication, and process
//! lifecycle live in the surrounding server, not here.

pub mod clock;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod id;
pub mod record;
pub mod table;

pub use clock::{Clock, QuantaClock, SystemClock};
pub use config::TableConfig;
pub use cursor::ConsumerCursor;
pub use engine::{OutgoingMessage, QueueEngine};
pub use error::{Error, Result};
pub use id::{IdGenerator, MessageId};
pub use table::{IndexEntry, MessageTable};
