use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::ops::Bound::{Excluded, Unbounded};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::config::TableConfig;
use crate::id::{IdGenerator, MessageId};
use crate::record::{RecordHeader, HEADER_SIZE};
use crate::{Error, Result};

const LOG_FILE: &str = "messages.log";

/// One message as seen by the ordered index: the key fields without the
/// payload. Materializing the payload is a separate step via
/// [`MessageTable::read`].
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: MessageId,
    pub queue: String,
    pub expiry_ms: i64,
    pub(crate) offset: u64,
    pub(crate) payload_len: u32,
    pub(crate) checksum: u32,
}

struct LogFile {
    file: File,
    write_offset: u64,
}

/// Durable store of message records.
///
/// Records live in a single append-only log; an in-memory index ordered by
/// message id is rebuilt from the log on open. Records are never rewritten
/// in place. Pruning appends a tombstone so it replays on recovery.
pub struct MessageTable {
    path: PathBuf,
    config: TableConfig,
    log: Mutex<LogFile>,
    // Separate handle with positional reads, so payload fetches do not
    // contend on the writer lock.
    reader: File,
    index: RwLock<BTreeMap<MessageId, IndexEntry>>,
    last_id: MessageId,
}

impl MessageTable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, TableConfig::default())
    }

    pub fn open_with(path: impl AsRef<Path>, config: TableConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let log_path = path.join(LOG_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)?;

        let (index, write_offset, last_id) = recover(&mut file)?;
        let reader = File::open(&log_path)?;
        log::info!(
            "message table opened at {} with {} live records",
            path.display(),
            index.len()
        );

        Ok(Self {
            path,
            config,
            log: Mutex::new(LogFile { file, write_offset }),
            reader,
            index: RwLock::new(index),
            last_id,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Largest id ever written to the log, tombstones included. Used to
    /// floor the id generator at open.
    pub fn last_id(&self) -> MessageId {
        self.last_id
    }

    pub fn len(&self) -> Result<usize> {
        let index = self
            .index
            .read()
            .map_err(|_| Error::Corrupt("index lock poisoned"))?;
        Ok(index.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Assigns the next identifier, appends the record, and publishes it to
    /// the index, all inside the append critical section so identifier
    /// order, durable order, and scan visibility order agree. On failure the
    /// record is not enqueued and the log tail is rolled back best-effort.
    ///
    /// Lock order is log, then index; every other path takes at most one of
    /// the two.
    pub fn put(
        &self,
        ids: &IdGenerator,
        queue: &str,
        expiry_ms: i64,
        payload: &[u8],
    ) -> Result<MessageId> {
        if queue.is_empty() {
            return Err(Error::InvalidArgument("queue name cannot be empty"));
        }
        if payload.len() > self.config.max_payload_len {
            return Err(Error::PayloadTooLarge);
        }
        let queue_len =
            u16::try_from(queue.len()).map_err(|_| Error::InvalidArgument("queue name too long"))?;
        let payload_len = u32::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge)?;

        let mut body = Vec::with_capacity(queue.len() + payload.len());
        body.extend_from_slice(queue.as_bytes());
        body.extend_from_slice(payload);
        let checksum = RecordHeader::crc32(&body);

        let mut log = self
            .log
            .lock()
            .map_err(|_| Error::Corrupt("log lock poisoned"))?;
        let id = ids.next();
        let header = RecordHeader::new(id, expiry_ms, queue_len, payload_len, checksum);
        let offset = log.write_offset;
        if let Err(err) = append_record(&mut log.file, offset, &header, &body) {
            rollback_append(&log.file, offset);
            return Err(err);
        }
        if self.config.sync_writes {
            if let Err(err) = log.file.sync_data() {
                // Without the rollback the unsynced bytes would replay as a
                // committed record on the next open, even though this call
                // reported failure.
                rollback_append(&log.file, offset);
                return Err(err.into());
            }
        }
        log.write_offset = offset + (HEADER_SIZE + body.len()) as u64;

        let entry = IndexEntry {
            id,
            queue: queue.to_string(),
            expiry_ms,
            offset,
            payload_len,
            checksum,
        };
        let mut index = self
            .index
            .write()
            .map_err(|_| Error::Corrupt("index lock poisoned"))?;
        index.insert(id, entry);
        Ok(id)
    }

    /// First index entry with id strictly greater than `after`, in global
    /// order across all queues.
    pub fn first_after(&self, after: MessageId) -> Result<Option<IndexEntry>> {
        let index = self
            .index
            .read()
            .map_err(|_| Error::Corrupt("index lock poisoned"))?;
        Ok(index
            .range((Excluded(after), Unbounded))
            .next()
            .map(|(_, entry)| entry.clone()))
    }

    /// Lazy forward scan strictly after `after`. Each step re-samples the
    /// live index, so a scan may observe records inserted after it started.
    pub fn scan_after(&self, after: MessageId) -> Scan<'_> {
        Scan {
            table: self,
            cursor: after,
        }
    }

    /// Materializes the payload for an index entry, validating the stored
    /// checksum against what is on disk. Uses a positional read on the
    /// dedicated reader handle, so concurrent dequeues run in parallel with
    /// each other and with appends.
    pub fn read(&self, entry: &IndexEntry) -> Result<Vec<u8>> {
        let mut body = vec![0u8; entry.queue.len() + entry.payload_len as usize];
        read_exact_at(&self.reader, &mut body, entry.offset + HEADER_SIZE as u64)?;
        if RecordHeader::crc32(&body) != entry.checksum {
            return Err(Error::Corrupt("crc mismatch"));
        }
        Ok(body.split_off(entry.queue.len()))
    }

    /// Drops every indexed record whose expiry is at or before `now_ms`,
    /// appending tombstones so the prune survives recovery. Returns the
    /// number of records pruned. Never called implicitly; expiry is advisory
    /// until a collaborator asks for this.
    pub fn purge_expired(&self, now_ms: i64) -> Result<usize> {
        let expired: Vec<MessageId> = {
            let index = self
                .index
                .read()
                .map_err(|_| Error::Corrupt("index lock poisoned"))?;
            index
                .values()
                .filter(|entry| entry.expiry_ms <= now_ms)
                .map(|entry| entry.id)
                .collect()
        };
        if expired.is_empty() {
            return Ok(0);
        }

        {
            let mut log = self
                .log
                .lock()
                .map_err(|_| Error::Corrupt("log lock poisoned"))?;
            // The batch is all-or-nothing: any failure rolls the log back to
            // where it started, so a reported error never leaves a partial
            // prune to replay on recovery.
            let batch_start = log.write_offset;
            for id in &expired {
                let header = RecordHeader::tombstone(*id);
                let offset = log.write_offset;
                if let Err(err) = append_record(&mut log.file, offset, &header, &[]) {
                    rollback_append(&log.file, batch_start);
                    log.write_offset = batch_start;
                    return Err(err);
                }
                log.write_offset = offset + HEADER_SIZE as u64;
            }
            if self.config.sync_writes {
                if let Err(err) = log.file.sync_data() {
                    rollback_append(&log.file, batch_start);
                    log.write_offset = batch_start;
                    return Err(err.into());
                }
            }
        }

        let mut index = self
            .index
            .write()
            .map_err(|_| Error::Corrupt("index lock poisoned"))?;
        for id in &expired {
            index.remove(id);
        }
        Ok(expired.len())
    }
}

/// Forward scan over the ordered index. Stepping re-locks the index, so the
/// scan stays valid across concurrent puts and never holds a lock between
/// steps.
pub struct Scan<'a> {
    table: &'a MessageTable,
    cursor: MessageId,
}

impl Scan<'_> {
    pub fn next(&mut self) -> Result<Option<IndexEntry>> {
        match self.table.first_after(self.cursor)? {
            Some(entry) => {
                self.cursor = entry.id;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

fn append_record(file: &mut File, offset: u64, header: &RecordHeader, body: &[u8]) -> Result<()> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(body);
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&buf)?;
    Ok(())
}

/// Discards everything past `offset` after a failed append or sync, so a
/// put that reported failure cannot replay as a committed record on the
/// next open. Best-effort: the error path has nowhere left to report to.
fn rollback_append(file: &File, offset: u64) {
    let _ = file.set_len(offset);
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)?;
    Ok(())
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(Error::Corrupt("record truncated mid-read")),
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

type Recovered = (BTreeMap<MessageId, IndexEntry>, u64, MessageId);

/// Replays the log, rebuilding the index. Stops at the first malformed
/// record and truncates the log there; anything before it stays intact.
fn recover(file: &mut File) -> Result<Recovered> {
    let file_len = file.metadata()?.len();
    let mut index = BTreeMap::new();
    let mut last_id = MessageId::MIN;
    let mut offset = 0u64;

    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&*file);

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header_buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_buf)?;
        let header = match RecordHeader::from_bytes(&header_buf) {
            Ok(header) => header,
            Err(_) => break,
        };
        let body_end = offset + (HEADER_SIZE + header.body_len()) as u64;
        if body_end > file_len {
            break;
        }
        let mut body = vec![0u8; header.body_len()];
        reader.read_exact(&mut body)?;
        if header.validate_crc(&body).is_err() {
            break;
        }

        if last_id < header.id {
            last_id = header.id;
        }
        if header.is_tombstone() {
            index.remove(&header.id);
        } else {
            let queue = match std::str::from_utf8(&body[..header.queue_len as usize]) {
                Ok(queue) => queue.to_string(),
                Err(_) => break,
            };
            let entry = IndexEntry {
                id: header.id,
                queue,
                expiry_ms: header.expiry_ms,
                offset,
                payload_len: header.payload_len,
                checksum: header.checksum,
            };
            if index.insert(header.id, entry).is_some() {
                return Err(Error::Corrupt("duplicate message id"));
            }
        }
        offset = body_end;
    }

    drop(reader);
    if offset < file_len {
        log::warn!(
            "truncating torn log tail: dropping {} bytes at offset {offset}",
            file_len - offset
        );
        file.set_len(offset)?;
        file.sync_data()?;
    }
    Ok((index, offset, last_id))
}
