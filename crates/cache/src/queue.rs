use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use tokio::time::{Duration, Instant};

use crate::cursor::CursorMut;
use crate::list::RecencyList;

/// Configuração da ExpireQueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpireConfig {
    /// Idade máxima de uma entrada. Zero desliga o TTL.
    pub ttl: Duration,
    /// Limite de entradas. Zero desliga o limite. Fixo após a construção.
    pub max_items: usize,
    /// Quantas entradas do fundo são inspecionadas a cada inserção nova.
    /// Valores abaixo de 1 valem como 1.
    pub back_scan: usize,
}

/// Entrada armazenada: chave, valor e instante do último toque.
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) updated_at: Instant,
}

/// Mapa com ordem de recência (LRU) e expiração por TTL.
///
/// A frente guarda a entrada tocada mais recentemente. Inserções de chaves
/// novas varrem até `back_scan` entradas do fundo, recuperando as expiradas
/// (e a última, se a fila estiver cheia) e reaproveitando o nó da última
/// recuperada.
///
/// Não é sincronizada: quem compartilha a fila entre tasks precisa de um lock
/// externo.
pub struct ExpireQueue<K, V> {
    max_items: usize,
    back_scan: usize,
    ttl: Duration,
    pub(crate) index: HashMap<K, usize>,
    pub(crate) row: RecencyList<Entry<K, V>>,
}

impl<K, V> ExpireQueue<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Fila só com TTL: sem limite de itens e back-scan de 1.
    pub fn new(ttl: Duration) -> Self {
        Self::with_config(ExpireConfig {
            ttl,
            ..ExpireConfig::default()
        })
    }

    pub fn with_config(config: ExpireConfig) -> Self {
        Self {
            max_items: config.max_items,
            back_scan: config.back_scan.max(1),
            ttl: config.ttl,
            index: HashMap::new(),
            row: RecencyList::new(),
        }
    }

    /// Insere ou atualiza `k` com o instante atual.
    pub fn set(&mut self, k: K, v: V) {
        self.push_at(k, v, Instant::now());
    }

    /// Insere ou atualiza `k` com o instante `now`, deixando a entrada na frente.
    pub fn push_at(&mut self, k: K, v: V, now: Instant) {
        if let Some(&idx) = self.index.get(&k) {
            if let Some(entry) = self.row.get_mut(idx) {
                entry.value = v;
                entry.updated_at = now;
            }
            self.row.move_to_front(idx);
            return;
        }

        let entry = Entry {
            key: k.clone(),
            value: v,
            updated_at: now,
        };
        let idx = match self.reclaim_tail(now) {
            Some(idx) => {
                self.row.replace(idx, entry);
                self.row.link_front(idx);
                idx
            }
            None => self.row.push_front(entry),
        };
        self.index.insert(k, idx);
    }

    /// Valor de `k`, sem mexer na posição nem no timestamp.
    /// Uma entrada expirada é removida na hora e tratada como ausente.
    pub fn get<Q>(&mut self, k: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(k)?;
        if self.is_expired_idx(idx, Instant::now()) {
            self.remove_idx(idx);
            return None;
        }
        self.row.get(idx).map(|e| &e.value)
    }

    /// Remove `k` se existir. Idempotente.
    pub fn delete<Q>(&mut self, k: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.index.get(k).copied()?;
        self.remove_idx(idx).map(|(_, v)| v)
    }

    /// Atualiza só o timestamp de `k` e o leva para a frente.
    pub fn revive<Q>(&mut self, k: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut cursor = self.cursor(k);
        if cursor.is_null() {
            return false;
        }
        cursor.move_to_front(Instant::now());
        true
    }

    pub fn contains<Q>(&self, k: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(k)
    }

    /// Remove até `n` entradas expiradas do fundo; para na primeira válida.
    /// Retorna quantas foram removidas.
    pub fn clean_n(&mut self, n: usize) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        while removed < n {
            let cursor = self.back();
            if cursor.is_null() || !cursor.is_expired(now) {
                break;
            }
            cursor.delete();
            removed += 1;
        }
        removed
    }

    /// Número de entradas, incluindo expiradas ainda não recolhidas.
    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// A fila está no limite de itens.
    pub fn is_full(&self) -> bool {
        self.max_items > 0 && self.index.len() >= self.max_items
    }

    /// Novo TTL para as próximas operações. Não varre a fila.
    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.row.clear();
    }

    /// Itera da frente (mais nova) para o fundo: `(chave, valor, updated_at)`.
    /// Inclui entradas expiradas; use [`ExpireQueue::is_expired_at`] para filtrar.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V, Instant)> + '_ {
        self.row.iter().map(|e| (&e.key, &e.value, e.updated_at))
    }

    /// Uma entrada tocada em `updated_at` está expirada em `now`?
    pub fn is_expired_at(&self, updated_at: Instant, now: Instant) -> bool {
        !self.ttl.is_zero() && now.saturating_duration_since(updated_at) > self.ttl
    }

    /// Cursor na entrada de `k` (nulo se ausente).
    pub fn cursor<Q>(&mut self, k: &Q) -> CursorMut<'_, K, V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.index.get(k).copied();
        CursorMut::new(self, idx)
    }

    /// Cursor na entrada mais nova.
    pub fn front(&mut self) -> CursorMut<'_, K, V> {
        let idx = self.row.front();
        CursorMut::new(self, idx)
    }

    /// Cursor na entrada mais antiga.
    pub fn back(&mut self) -> CursorMut<'_, K, V> {
        let idx = self.row.back();
        CursorMut::new(self, idx)
    }

    pub(crate) fn is_expired_idx(&self, idx: usize, now: Instant) -> bool {
        self.row
            .get(idx)
            .is_some_and(|e| self.is_expired_at(e.updated_at, now))
    }

    pub(crate) fn remove_idx(&mut self, idx: usize) -> Option<(K, V)> {
        let entry = self.row.remove(idx)?;
        self.index.remove(&entry.key);
        Some((entry.key, entry.value))
    }

    /// Back-scan: desliga do fundo as entradas expiradas (e a última, se a
    /// fila está cheia). Devolve o slot da última recuperada, ainda ocupado,
    /// para ser reaproveitado; as demais são liberadas.
    fn reclaim_tail(&mut self, now: Instant) -> Option<usize> {
        let mut recycled = None;

        for step in 0..self.back_scan {
            let Some(tail) = self.row.back() else {
                break;
            };
            let overflow = step == 0 && self.is_full();
            if !overflow && !self.is_expired_idx(tail, now) {
                break;
            }

            self.row.unlink(tail);
            if let Some(entry) = self.row.get(tail) {
                self.index.remove(&entry.key);
            }
            if let Some(previous) = recycled.replace(tail) {
                self.row.release(previous);
            }
        }

        recycled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(q: &ExpireQueue<u32, &'static str>) -> Vec<u32> {
        q.iter().map(|(k, _, _)| *k).collect()
    }

    fn assert_coupled(q: &ExpireQueue<u32, &'static str>) {
        assert_eq!(q.index.len(), q.row.len());
        assert_eq!(q.iter().count(), q.len());
        for (k, _, _) in q.iter() {
            assert!(q.contains(k));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn set_then_get() {
        let mut q = ExpireQueue::new(Duration::from_secs(1));
        q.set(1, "a");
        q.set(2, "b");

        assert_eq!(q.get(&1), Some(&"a"));
        assert_eq!(q.get(&2), Some(&"b"));
        assert_eq!(q.get(&3), None);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(q.get(&1), None);
        assert_eq!(q.get(&2), None);
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_oldest() {
        let mut q = ExpireQueue::with_config(ExpireConfig {
            ttl: Duration::from_millis(100),
            max_items: 3,
            back_scan: 1,
        });
        q.set(1, "a");
        q.set(2, "b");
        q.set(3, "c");
        q.set(4, "d");

        assert_eq!(q.len(), 3);
        assert_eq!(q.get(&1), None);
        assert_eq!(q.get(&4), Some(&"d"));
        assert_coupled(&q);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_reaped_on_get() {
        let mut q = ExpireQueue::new(Duration::from_millis(10));
        q.set(1, "a");
        tokio::time::advance(Duration::from_millis(20)).await;

        assert_eq!(q.get(&1), None);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn overwrite_moves_to_front() {
        let mut q = ExpireQueue::new(Duration::ZERO);
        q.set(1, "a");
        q.set(2, "b");
        q.set(1, "a2");

        assert_eq!(keys(&q), vec![1, 2]);
        assert_eq!(q.get(&1), Some(&"a2"));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn get_does_not_touch_recency() {
        let mut q = ExpireQueue::new(Duration::ZERO);
        q.set(1, "a");
        q.set(2, "b");
        q.get(&1);
        assert_eq!(keys(&q), vec![2, 1]);
    }

    #[test]
    fn delete_is_idempotent() {
        let mut q = ExpireQueue::new(Duration::ZERO);
        q.set(1, "a");
        assert_eq!(q.delete(&1), Some("a"));
        assert_eq!(q.delete(&1), None);
        assert_eq!(q.get(&1), None);
        assert_coupled(&q);
    }

    #[tokio::test(start_paused = true)]
    async fn back_scan_reclaims_several_expired() {
        let mut q = ExpireQueue::with_config(ExpireConfig {
            ttl: Duration::from_millis(50),
            max_items: 0,
            back_scan: 3,
        });
        q.set(1, "a");
        q.set(2, "b");
        q.set(3, "c");
        tokio::time::advance(Duration::from_millis(60)).await;
        q.set(4, "d");

        assert_eq!(keys(&q), vec![4]);
        assert_coupled(&q);
    }

    #[tokio::test(start_paused = true)]
    async fn back_scan_stops_at_live_entry() {
        let mut q = ExpireQueue::with_config(ExpireConfig {
            ttl: Duration::from_millis(50),
            max_items: 0,
            back_scan: 8,
        });
        q.set(1, "a");
        tokio::time::advance(Duration::from_millis(40)).await;
        q.set(2, "b");
        tokio::time::advance(Duration::from_millis(20)).await;
        q.set(3, "c");

        assert_eq!(keys(&q), vec![3, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn reused_slot_keeps_slab_small() {
        let mut q = ExpireQueue::with_config(ExpireConfig {
            ttl: Duration::ZERO,
            max_items: 2,
            back_scan: 1,
        });
        for i in 0..100 {
            q.set(i, "x");
        }
        assert_eq!(q.len(), 2);
        assert_eq!(keys(&q), vec![99, 98]);
        assert_coupled(&q);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_n_stops_at_first_live() {
        let mut q = ExpireQueue::new(Duration::from_millis(50));
        q.set(1, "a");
        q.set(2, "b");
        tokio::time::advance(Duration::from_millis(30)).await;
        q.set(3, "c");
        tokio::time::advance(Duration::from_millis(30)).await;

        assert_eq!(q.clean_n(10), 2);
        assert_eq!(keys(&q), vec![3]);
        assert_eq!(q.clean_n(10), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_n_respects_limit() {
        let mut q = ExpireQueue::new(Duration::from_millis(5));
        for i in 0..5 {
            q.set(i, "x");
        }
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(q.clean_n(2), 2);
        assert_eq!(q.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn revive_extends_life() {
        let mut q = ExpireQueue::new(Duration::from_millis(50));
        q.set(1, "a");
        q.set(2, "b");
        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(q.revive(&1));
        tokio::time::advance(Duration::from_millis(20)).await;

        assert_eq!(keys(&q), vec![1, 2]);
        assert_eq!(q.get(&1), Some(&"a"));
        assert_eq!(q.get(&2), None);
        assert!(!q.revive(&7));
    }

    #[tokio::test(start_paused = true)]
    async fn set_ttl_applies_lazily() {
        let mut q = ExpireQueue::new(Duration::ZERO);
        q.set(1, "a");
        tokio::time::advance(Duration::from_millis(30)).await;
        q.set_ttl(Duration::from_millis(10));
        assert_eq!(q.len(), 1);
        assert_eq!(q.get(&1), None);
        assert_eq!(q.ttl(), Duration::from_millis(10));
    }

    #[test]
    fn string_keys_lookup_by_str() {
        let mut q: ExpireQueue<String, u8> = ExpireQueue::new(Duration::ZERO);
        q.set("k".to_string(), 1);
        assert_eq!(q.get("k"), Some(&1));
        assert!(q.contains("k"));
        assert_eq!(q.delete("k"), Some(1));
    }

    #[test]
    fn coupling_holds_over_mixed_ops() {
        let mut q = ExpireQueue::with_config(ExpireConfig {
            ttl: Duration::ZERO,
            max_items: 5,
            back_scan: 2,
        });
        for i in 0..40u32 {
            match i % 4 {
                0 | 1 => q.set(i % 9, "v"),
                2 => {
                    q.delete(&(i % 7));
                }
                _ => {
                    q.get(&(i % 5));
                }
            }
            assert_coupled(&q);
            assert!(q.len() <= 5);
        }
    }
}
