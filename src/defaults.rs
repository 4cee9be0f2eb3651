//! Default configuration values.

/// Default poll timeout in seconds. Bounds the staleness of the idle debug
/// heartbeat only; nothing is torn down on timeout.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 10;

/// Default read chunk size per pump cycle (8 KiB).
pub const DEFAULT_CHUNK_BYTES: usize = 8192;

/// Default outbound connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default listener backlog.
pub const DEFAULT_LISTEN_BACKLOG: u32 = 5;

/// Capacity of one poll batch.
pub const POLL_EVENT_CAPACITY: usize = 32;
