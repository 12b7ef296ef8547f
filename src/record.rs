use crate::id::MessageId;
use crate::{Error, Result};

pub const HEADER_SIZE: usize = 40;

/// Marks a record as a deletion marker for a previously written id.
pub const FLAG_TOMBSTONE: u8 = 1;

/// Fixed-size on-disk record header.
///
/// A record is `header || queue bytes || payload`. The checksum covers the
/// queue bytes and the payload. Serialization uses explicit offsets; the
/// identifier is stored big-endian so on-disk key order equals scan order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub id: MessageId,
    pub expiry_ms: i64,
    pub payload_len: u32,
    pub checksum: u32,
    pub queue_len: u16,
    pub flags: u8,
    pub _reserved: u8,
}

impl RecordHeader {
    pub fn new(
        id: MessageId,
        expiry_ms: i64,
        queue_len: u16,
        payload_len: u32,
        checksum: u32,
    ) -> Self {
        Self {
            id,
            expiry_ms,
            payload_len,
            checksum,
            queue_len,
            flags: 0,
            _reserved: 0,
        }
    }

    /// A body-less record that marks `id` as pruned.
    pub fn tombstone(id: MessageId) -> Self {
        Self {
            id,
            expiry_ms: 0,
            payload_len: 0,
            checksum: Self::crc32(&[]),
            queue_len: 0,
            flags: FLAG_TOMBSTONE,
            _reserved: 0,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }

    /// Bytes following the header: queue name, then payload.
    pub fn body_len(&self) -> usize {
        self.queue_len as usize + self.payload_len as usize
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[4..6].copy_from_slice(&self.queue_len.to_le_bytes());
        buf[6] = self.flags;
        buf[7] = self._reserved;
        buf[8..24].copy_from_slice(&self.id.to_bytes());
        buf[24..32].copy_from_slice(&self.expiry_ms.to_le_bytes());
        buf[32..36].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let payload_len = u32::from_le_bytes(bytes[0..4].try_into().expect("slice length"));
        let queue_len = u16::from_le_bytes(bytes[4..6].try_into().expect("slice length"));
        let flags = bytes[6];
        let _reserved = bytes[7];
        let id = MessageId::from_bytes(bytes[8..24].try_into().expect("slice length"));
        let expiry_ms = i64::from_le_bytes(bytes[24..32].try_into().expect("slice length"));
        let checksum = u32::from_le_bytes(bytes[32..36].try_into().expect("slice length"));
        if flags & !FLAG_TOMBSTONE != 0 {
            return Err(Error::Corrupt("unknown record flags"));
        }
        if flags & FLAG_TOMBSTONE != 0 && (payload_len != 0 || queue_len != 0) {
            return Err(Error::Corrupt("tombstone with a body"));
        }
        Ok(Self {
            id,
            expiry_ms,
            payload_len,
            checksum,
            queue_len,
            flags,
            _reserved,
        })
    }

    pub fn crc32(body: &[u8]) -> u32 {
        use crc32fast::Hasher;
        let mut hasher = Hasher::new();
        hasher.update(body);
        hasher.finalize()
    }

    pub fn validate_crc(&self, body: &[u8]) -> Result<()> {
        let expected = Self::crc32(body);
        if expected == self.checksum {
            Ok(())
        } else {
            Err(Error::Corrupt("crc mismatch"))
        }
    }
}
