/// Configuration for a message table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Fsync the log after every put.
    /// Default: true. Turning this off trades durability for throughput.
    pub sync_writes: bool,

    /// Largest accepted payload, in bytes.
    /// Default: 64 MB
    pub max_payload_len: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            sync_writes: true,
            max_payload_len: 64 * 1024 * 1024,
        }
    }
}
