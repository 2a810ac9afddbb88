#![forbid(unsafe_code)]

//! Pool de lanes de execução com lotes por lane e seleção plugável.

mod selector;
mod team;
mod worker;

pub use selector::{ClockMod, Random, RoundRobin, Selector, SelectorKind};
pub use team::{Team, TeamConfig};
pub use worker::{Job, Worker, WorkerConfig, current_lane};
