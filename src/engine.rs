use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::clock::{Clock, SystemClock};
use crate::config::TableConfig;
use crate::cursor::ConsumerCursor;
use crate::id::{IdGenerator, MessageId};
use crate::table::{IndexEntry, MessageTable};
use crate::{Error, Result};

/// A message handed back to a consumer. The id is the cursor token to pass
/// as `after` on the next dequeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub id: MessageId,
    pub queue: String,
    pub data: Vec<u8>,
}

/// The queue engine: enqueue and dequeue over the durable message table.
///
/// Stateless between calls apart from the store itself; all position state
/// lives in caller-held cursors. Safe for concurrent producers and
/// consumers; identifier assignment is the only enqueue serialization point
/// beyond the storage lock.
pub struct QueueEngine {
    table: MessageTable,
    ids: IdGenerator,
    clock: Box<dyn Clock>,
}

impl QueueEngine {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, TableConfig::default(), SystemClock)
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        config: TableConfig,
        clock: impl Clock,
    ) -> Result<Self> {
        let table = MessageTable::open_with(path, config)?;
        let clock: Box<dyn Clock> = Box::new(clock);
        // Floor above everything already in the log so ids keep increasing
        // across restarts even if the wall clock went backward.
        let ids = IdGenerator::with_floor(clock.as_ref(), table.last_id());
        Ok(Self { table, ids, clock })
    }

    /// Assigns the next identifier and durably writes the record. On success
    /// the message is visible to every subsequent scan; on failure it is not
    /// enqueued at all.
    pub fn enqueue(&self, queue: &str, expiry: SystemTime, payload: &[u8]) -> Result<MessageId> {
        if queue.is_empty() {
            return Err(Error::InvalidArgument("queue name cannot be empty"));
        }
        self.table.put(&self.ids, queue, system_time_ms(expiry), payload)
    }

    /// Returns the first record in global order strictly after `after`,
    /// whatever queue it belongs to. `Ok(None)` means no message past this
    /// cursor right now; it is not an error. Pure read: nothing is locked,
    /// marked, or deleted.
    pub fn dequeue(&self, after: MessageId) -> Result<Option<OutgoingMessage>> {
        match self.table.first_after(after)? {
            Some(entry) => self.materialize(entry).map(Some),
            None => Ok(None),
        }
    }

    /// Queue-scoped variant of [`dequeue`](Self::dequeue): scans forward
    /// from `after` and skips records belonging to other queues.
    pub fn dequeue_from(&self, queue: &str, after: MessageId) -> Result<Option<OutgoingMessage>> {
        if queue.is_empty() {
            return Err(Error::InvalidArgument("queue name cannot be empty"));
        }
        let mut scan = self.table.scan_after(after);
        while let Some(entry) = scan.next()? {
            if entry.queue == queue {
                return self.materialize(entry).map(Some);
            }
        }
        Ok(None)
    }

    /// Prunes every record whose expiry has passed, per the engine's clock.
    /// Expiry is advisory until a collaborator calls this.
    pub fn purge_expired(&self) -> Result<usize> {
        let now_ms = (self.clock.now_ns() / 1_000_000) as i64;
        self.table.purge_expired(now_ms)
    }

    /// Opens (or creates) a named durable consumer cursor stored alongside
    /// the table.
    pub fn cursor(&self, name: &str) -> Result<ConsumerCursor> {
        ConsumerCursor::open(self.table.path(), name)
    }

    pub fn table(&self) -> &MessageTable {
        &self.table
    }

    fn materialize(&self, entry: IndexEntry) -> Result<OutgoingMessage> {
        let data = self.table.read(&entry)?;
        Ok(OutgoingMessage {
            id: entry.id,
            queue: entry.queue,
            data,
        })
    }
}

fn system_time_ms(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_millis()).unwrap_or(i64::MAX),
        Err(err) => -i64::try_from(err.duration().as_millis()).unwrap_or(i64::MAX),
    }
}
