use std::collections::HashMap;
use std::hash::Hash;

use tokio::time::Instant;

use crate::list::RecencyList;

/// Valores que expõem uma impressão digital comparável.
pub trait Fingerprint {
    type Key: Hash + Eq + Clone;

    fn fingerprint(&self) -> Self::Key;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeduperConfig {
    /// Zero desliga o limite.
    pub max_entries: usize,
}

/// Resultado de [`Deduper::consume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen<T> {
    /// O valor original (o primeiro consumido com essa impressão digital).
    pub value: T,
    pub first_seen: Instant,
    pub is_new: bool,
}

struct Slot<T: Fingerprint> {
    key: T::Key,
    value: T,
    first_seen: Instant,
}

/// Supressor de duplicatas com a mesma disciplina LRU da ExpireQueue.
///
/// Uma duplicata sobe um passo em direção à frente (não vai direto para o
/// topo), então só entradas vistas com frequência resistem ao despejo.
pub struct Deduper<T: Fingerprint> {
    max_entries: usize,
    index: HashMap<T::Key, usize>,
    row: RecencyList<Slot<T>>,
}

impl<T> Deduper<T>
where
    T: Fingerprint + Clone,
{
    pub fn new(config: DeduperConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            index: HashMap::new(),
            row: RecencyList::new(),
        }
    }

    pub fn consume(&mut self, input: T) -> Seen<T> {
        let key = input.fingerprint();

        if let Some(&idx) = self.index.get(&key) {
            self.row.promote(idx);
            if let Some(slot) = self.row.get(idx) {
                return Seen {
                    value: slot.value.clone(),
                    first_seen: slot.first_seen,
                    is_new: false,
                };
            }
        }

        if self.max_entries > 0 && self.index.len() >= self.max_entries {
            self.evict_tail();
        }

        let first_seen = Instant::now();
        let idx = self.row.push_front(Slot {
            key: key.clone(),
            value: input.clone(),
            first_seen,
        });
        self.index.insert(key, idx);

        Seen {
            value: input,
            first_seen,
            is_new: true,
        }
    }

    pub fn contains(&self, input: &T) -> bool {
        self.index.contains_key(&input.fingerprint())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn evict_tail(&mut self) {
        if let Some(slot) = self.row.back().and_then(|tail| self.row.remove(tail)) {
            self.index.remove(&slot.key);
        }
    }
}
