use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Escolhe uma lane em `[0, n)`. Quem chama garante `n >= 1`.
pub trait Selector: Send + Sync {
    fn select(&self, n: usize) -> usize;
}

/// Rotação estrita entre chamadores concorrentes.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicU64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RoundRobin {
    fn select(&self, n: usize) -> usize {
        let ticket = self.counter.fetch_add(1, Ordering::Relaxed);
        (ticket % n as u64) as usize
    }
}

/// Índice uniforme, a partir do gerador da thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Random;

impl Selector for Random {
    fn select(&self, n: usize) -> usize {
        rand::rng().random_range(0..n)
    }
}

/// Nanossegundos do relógio módulo `n`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockMod;

impl Selector for ClockMod {
    fn select(&self, n: usize) -> usize {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        (nanos % n as u128) as usize
    }
}

/// Variante de selector escolhida por configuração.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectorKind {
    #[default]
    RoundRobin,
    Random,
    ClockMod,
}

impl SelectorKind {
    pub fn build(self) -> Box<dyn Selector> {
        match self {
            SelectorKind::RoundRobin => Box::new(RoundRobin::new()),
            SelectorKind::Random => Box::new(Random),
            SelectorKind::ClockMod => Box::new(ClockMod),
        }
    }
}

impl std::str::FromStr for SelectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "round-robin" | "roundrobin" | "rr" => Ok(SelectorKind::RoundRobin),
            "random" => Ok(SelectorKind::Random),
            "clock" | "clock-mod" => Ok(SelectorKind::ClockMod),
            other => Err(format!("selector desconhecido: {other}")),
        }
    }
}

impl Selector for Box<dyn Selector> {
    fn select(&self, n: usize) -> usize {
        (**self).select(n)
    }
}
