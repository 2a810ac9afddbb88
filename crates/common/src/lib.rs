#![forbid(unsafe_code)]

mod error;

pub use error::*;

pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_SCAN_COUNT: usize = 128;
pub const DEFAULT_DRAIN_INTERVAL_MS: u64 = 100;
pub const DEFAULT_PENDING_CAPACITY: usize = 128;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 5_000;
pub const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024; // 4 KB
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024; // 64 MB
