#![forbid(unsafe_code)]

//! Estruturas em memória do mirror: a fila LRU com TTL e o supressor de
//! duplicatas. Os timestamps usam `tokio::time::Instant`.

mod cursor;
mod dedup;
mod list;
mod queue;

pub use cursor::CursorMut;
pub use dedup::{Deduper, DeduperConfig, Fingerprint, Seen};
pub use queue::{ExpireConfig, ExpireQueue};
