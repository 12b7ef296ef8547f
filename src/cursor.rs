use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::id::MessageId;
use crate::{Error, Result};

const CURSORS_DIR: &str = "cursors";

/// A durable consumer cursor: the last message id a consumer has observed
/// for some (consumer, queue) pairing of its own choosing.
///
/// The core never advances a cursor on its own; dequeue is a pure read.
/// Callers `advance` after handling a message and `commit` when they want
/// the position to survive a restart.
#[derive(Debug)]
pub struct ConsumerCursor {
    name: String,
    meta_path: PathBuf,
    last_seen: MessageId,
}

impl ConsumerCursor {
    pub fn open(root: &Path, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("cursor name cannot be empty"));
        }
        let dir = root.join(CURSORS_DIR);
        std::fs::create_dir_all(&dir)?;
        let meta_path = dir.join(format!("{name}.meta"));
        let last_seen = load_cursor(&meta_path)?;
        Ok(Self {
            name: name.to_string(),
            meta_path,
            last_seen,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_seen(&self) -> MessageId {
        self.last_seen
    }

    /// Moves the cursor forward. Ignored if `id` is not past the current
    /// position, so replays cannot rewind a committed consumer.
    pub fn advance(&mut self, id: MessageId) {
        if id > self.last_seen {
            self.last_seen = id;
        }
    }

    /// Persists the current position atomically (write to a temp file, then
    /// rename over the old one).
    pub fn commit(&self) -> Result<()> {
        store_cursor(&self.meta_path, self.last_seen)
    }
}

fn load_cursor(path: &Path) -> Result<MessageId> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(MessageId::MIN),
        Err(err) => return Err(err.into()),
    };
    if file.metadata()?.len() != 16 {
        return Err(Error::Corrupt("cursor metadata has unexpected size"));
    }
    let mut buf = [0u8; 16];
    file.read_exact(&mut buf)?;
    Ok(MessageId::from_bytes(&buf))
}

fn store_cursor(path: &Path, id: MessageId) -> Result<()> {
    let tmp_path = path.with_extension("meta.tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(&id.to_bytes())?;
    file.sync_all()?;
    std::fs::rename(tmp_path, path)?;
    Ok(())
}
