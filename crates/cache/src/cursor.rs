use std::hash::Hash;

use tokio::time::Instant;

use crate::queue::ExpireQueue;

/// Cursor mutável sobre uma entrada da [`ExpireQueue`].
///
/// Segura um empréstimo exclusivo da fila, então só existe um cursor por
/// vez. Um cursor nulo aponta para além das pontas; `delete` consome o
/// cursor e devolve outro na entrada seguinte (em direção ao fundo).
pub struct CursorMut<'a, K, V> {
    queue: &'a mut ExpireQueue<K, V>,
    current: Option<usize>,
}

impl<'a, K, V> CursorMut<'a, K, V>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new(queue: &'a mut ExpireQueue<K, V>, current: Option<usize>) -> Self {
        Self { queue, current }
    }

    pub fn is_null(&self) -> bool {
        self.current.is_none()
    }

    pub fn key(&self) -> Option<&K> {
        self.queue.row.get(self.current?).map(|e| &e.key)
    }

    pub fn value(&self) -> Option<&V> {
        self.queue.row.get(self.current?).map(|e| &e.value)
    }

    pub fn updated_at(&self) -> Option<Instant> {
        self.queue.row.get(self.current?).map(|e| e.updated_at)
    }

    /// A entrada apontada está expirada em `now`? Um cursor nulo nunca está.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.current
            .is_some_and(|idx| self.queue.is_expired_idx(idx, now))
    }

    /// Avança em direção ao fundo (entradas mais antigas).
    pub fn move_next(&mut self) {
        if let Some(idx) = self.current {
            self.current = self.queue.row.next(idx);
        }
    }

    /// Recua em direção à frente (entradas mais novas).
    pub fn move_prev(&mut self) {
        if let Some(idx) = self.current {
            self.current = self.queue.row.prev(idx);
        }
    }

    /// Marca a entrada com `now` e a leva para a frente. O cursor continua
    /// apontando para ela.
    pub fn move_to_front(&mut self, now: Instant) {
        let Some(idx) = self.current else {
            return;
        };
        if let Some(entry) = self.queue.row.get_mut(idx) {
            entry.updated_at = now;
        }
        self.queue.row.move_to_front(idx);
    }

    /// Troca o valor sem alterar timestamp nem posição.
    pub fn set(&mut self, value: V) -> Option<V> {
        let idx = self.current?;
        let entry = self.queue.row.get_mut(idx)?;
        Some(std::mem::replace(&mut entry.value, value))
    }

    /// Remove a entrada e retorna o cursor na seguinte (ou nulo no fim).
    pub fn delete(self) -> Self {
        let Some(idx) = self.current else {
            return self;
        };
        let next = self.queue.row.next(idx);
        self.queue.remove_idx(idx);
        Self {
            queue: self.queue,
            current: next,
        }
    }
}
