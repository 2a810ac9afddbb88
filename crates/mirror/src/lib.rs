#![forbid(unsafe_code)]

//! Cache espelho read-through, mantido em dia por notificações de chave do
//! store autoritativo e por MGETs em lote.

mod config;
mod connection;
mod memory;
mod mirror;
mod resp;
mod store;

pub use config::MirrorConfig;
pub use connection::Connection;
pub use memory::MemoryStore;
pub use mirror::{Mirror, MirrorState};
pub use resp::{RespConfig, RespStore};
pub use store::{Feed, RemoteStore};

pub use kvmirror_common::{MirrorError, MirrorResult};
pub use kvmirror_protocol::{KeyEvent, KeyEventKind};
