use std::collections::HashSet;
use std::hash::{BuildHasher, RandomState};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kvmirror_cache::ExpireQueue;
use kvmirror_common::{MirrorError, MirrorResult};
use kvmirror_protocol::{KeyEvent, KeyEventKind};
use kvmirror_team::{RoundRobin, Team};

use crate::config::MirrorConfig;
use crate::store::RemoteStore;

/// Estado do ciclo de vida do mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MirrorState {
    Idle = 0,
    Scanning = 1,
    Following = 2,
    Closed = 3,
}

impl MirrorState {
    fn from_u8(v: u8) -> MirrorState {
        match v {
            0 => MirrorState::Idle,
            1 => MirrorState::Scanning,
            2 => MirrorState::Following,
            _ => MirrorState::Closed,
        }
    }
}

impl std::fmt::Display for MirrorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MirrorState::Idle => "idle",
            MirrorState::Scanning => "scanning",
            MirrorState::Following => "following",
            MirrorState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// O que o cache local sabe sobre uma chave.
#[derive(Debug, Clone)]
enum Cached {
    Present(Bytes),
    /// Cache negativo de um GET sem resultado, válido por `ttl`.
    Missing { at: Instant, ttl: Duration },
    /// Removida no store. Vale até ser sobrescrita. `generation` ordena a
    /// remoção contra MGETs que já estavam em voo.
    Deleted { generation: u64 },
}

struct Inner<S> {
    config: MirrorConfig,
    store: S,
    cache: Mutex<ExpireQueue<String, Cached>>,
    token: CancellationToken,
    state: AtomicU8,
    /// Incrementado a cada remoção aplicada ao cache.
    generation: AtomicU64,
    hasher: RandomState,
}

/// Espelho read-through de um store autoritativo.
///
/// Leituras são servidas do cache local; um miss consulta o store e popula
/// o cache. `bootstrap` e `follow` alimentam o canal de chaves pendentes, e
/// uma task de refresh agrupa essas chaves em MGETs executados pelas lanes
/// de um [`Team`]. Clonar o Mirror compartilha a mesma instância.
pub struct Mirror<S> {
    inner: Arc<Inner<S>>,
    pending: mpsc::Sender<String>,
    refresher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<S> Clone for Mirror<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            pending: self.pending.clone(),
            refresher: self.refresher.clone(),
        }
    }
}

impl<S: RemoteStore> Mirror<S> {
    /// Cria o mirror e sobe a task de refresh. Precisa de um runtime tokio.
    pub fn new(store: S, config: MirrorConfig) -> Self {
        let config = config.normalized();
        let (pending, rx) = mpsc::channel(config.pending_capacity);

        let inner = Arc::new(Inner {
            cache: Mutex::new(ExpireQueue::with_config(config.expire_config())),
            config,
            store,
            token: CancellationToken::new(),
            state: AtomicU8::new(MirrorState::Idle as u8),
            generation: AtomicU64::new(0),
            hasher: RandomState::new(),
        });
        let refresher = tokio::spawn(refresh_loop(inner.clone(), rx));

        Self {
            inner,
            pending,
            refresher: Arc::new(Mutex::new(Some(refresher))),
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn state(&self) -> MirrorState {
        MirrorState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Leitura read-through.
    ///
    /// Depois de `close`, só responde o que já está em cache; um miss
    /// retorna [`MirrorError::Closed`] sem consultar o store.
    pub async fn get(&self, key: &str) -> MirrorResult<Bytes> {
        if let Some(hit) = self.lookup(key) {
            return hit;
        }
        self.ensure_open()?;

        let fetched = tokio::select! {
            _ = self.inner.token.cancelled() => return Err(MirrorError::Cancelled),
            fetched = self.inner.store.get(key) => fetched?,
        };

        let mut cache = self.inner.cache.lock();
        match fetched {
            Some(value) => {
                cache.set(key.to_string(), Cached::Present(value.clone()));
                Ok(value)
            }
            None => {
                if let Some(ttl) = self.inner.config.negative_ttl {
                    cache.set(
                        key.to_string(),
                        Cached::Missing {
                            at: Instant::now(),
                            ttl,
                        },
                    );
                }
                Err(MirrorError::NotFound)
            }
        }
    }

    /// Enumera todas as chaves do store e as envia para refresh.
    /// Retorna quantas chaves o scan produziu.
    ///
    /// Durante o scan o estado é `Scanning`; no fim volta ao que era antes
    /// (um `follow` em andamento continua `Following`).
    pub async fn bootstrap(&self) -> MirrorResult<usize> {
        self.ensure_open()?;
        let previous = self.state();
        self.transition(MirrorState::Scanning);
        let result = self.scan_into_pending().await;
        let _ = self.inner.state.compare_exchange(
            MirrorState::Scanning as u8,
            previous as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        result
    }

    /// Consome os eventos de chave até o mirror ser encerrado.
    ///
    /// `Updated` enfileira a chave para refresh; `Deleted` e `Expired`
    /// apagam a cópia local. Quando a inscrição cai, reconecta com backoff
    /// exponencial e refaz o bootstrap antes de voltar aos eventos.
    pub async fn follow(&self) -> MirrorResult<()> {
        self.ensure_open()?;
        self.transition(MirrorState::Following);

        let base = self.inner.config.drain_interval;
        let mut backoff = base;
        let mut reconnecting = false;
        let mut subscribed_before = false;

        loop {
            if reconnecting {
                warn!(backoff_ms = backoff.as_millis() as u64, "reconectando eventos de chave");
                tokio::select! {
                    _ = self.inner.token.cancelled() => return Err(MirrorError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(self.inner.config.max_backoff);
            }
            reconnecting = true;

            let subscribed = tokio::select! {
                _ = self.inner.token.cancelled() => return Err(MirrorError::Cancelled),
                feed = self.inner.store.key_events() => feed,
            };
            let mut feed = match subscribed {
                Ok(feed) => feed,
                Err(e) => {
                    warn!(error = %e, "falha ao inscrever em eventos de chave");
                    continue;
                }
            };

            if subscribed_before {
                // eventos perdidos durante a queda: relê tudo
                match self.scan_into_pending().await {
                    Ok(_) => {}
                    Err(e @ (MirrorError::Cancelled | MirrorError::Closed)) => return Err(e),
                    Err(e) if e.is_transient() => {
                        warn!(error = %e, "bootstrap após reconexão falhou");
                        continue;
                    }
                    // erro não transitório: mantém a inscrição nova
                    Err(e) => warn!(error = %e, "bootstrap após reconexão incompleto"),
                }
            }
            subscribed_before = true;
            backoff = base;

            loop {
                let item = tokio::select! {
                    _ = self.inner.token.cancelled() => return Err(MirrorError::Cancelled),
                    item = feed.next() => item,
                };
                match item {
                    Some(Ok(event)) => self.apply_event(event).await?,
                    Some(Err(e)) => {
                        warn!(error = %e, "inscrição de eventos falhou");
                        break;
                    }
                    None => {
                        warn!("inscrição de eventos encerrada");
                        break;
                    }
                }
            }
        }
    }

    /// `bootstrap` seguido de `follow`.
    pub async fn run(&self) -> MirrorResult<()> {
        self.bootstrap().await?;
        self.follow().await
    }

    /// Cancela todas as tasks, fecha o team e espera o refresh terminar.
    /// Idempotente.
    pub async fn close(&self) {
        let previous = self
            .inner
            .state
            .swap(MirrorState::Closed as u8, Ordering::SeqCst);
        self.inner.token.cancel();

        let refresher = self.refresher.lock().take();
        if let Some(refresher) = refresher {
            if let Err(e) = refresher.await {
                error!(error = %e, "task de refresh terminou com erro");
            }
        }
        if previous != MirrorState::Closed as u8 {
            info!(entries = self.len(), "mirror encerrado");
        }
    }

    /// Visita cada entrada viva, da mais nova para a mais antiga, com o lock
    /// do cache preso. Retorna quantas entradas foram visitadas.
    pub fn snapshot<F>(&self, mut visit: F) -> usize
    where
        F: FnMut(&str, &Bytes),
    {
        let cache = self.inner.cache.lock();
        let now = Instant::now();
        let mut visited = 0;
        for (key, cached, updated_at) in cache.iter() {
            if cache.is_expired_at(updated_at, now) {
                continue;
            }
            if let Cached::Present(value) = cached {
                visit(key, value);
                visited += 1;
            }
        }
        visited
    }

    /// Entradas no cache local, incluindo expiradas e sentinelas negativos.
    pub fn len(&self) -> usize {
        self.inner.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove até `n` entradas expiradas do fundo do cache.
    pub fn clean(&self, n: usize) -> usize {
        self.inner.cache.lock().clean_n(n)
    }

    /// Esquece a cópia local de `key`; o próximo `get` vai ao store.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.cache.lock().delete(key).is_some()
    }

    fn lookup(&self, key: &str) -> Option<MirrorResult<Bytes>> {
        let mut cache = self.inner.cache.lock();
        let outcome = match cache.get(key)? {
            Cached::Present(value) => Some(Ok(value.clone())),
            Cached::Missing { at, ttl } if at.elapsed() > *ttl => None,
            Cached::Missing { .. } | Cached::Deleted { .. } => Some(Err(MirrorError::NotFound)),
        };
        if outcome.is_none() {
            cache.delete(key);
        }
        outcome
    }

    async fn apply_event(&self, event: KeyEvent) -> MirrorResult<()> {
        match event.kind {
            KeyEventKind::Updated => self.enqueue(event.key).await,
            KeyEventKind::Deleted | KeyEventKind::Expired => {
                let mut cache = self.inner.cache.lock();
                // só chaves acompanhadas viram sentinela; as demais somem
                if cache.contains(event.key.as_str()) {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    cache.set(event.key, Cached::Deleted { generation });
                }
                Ok(())
            }
        }
    }

    async fn scan_into_pending(&self) -> MirrorResult<usize> {
        let scanned = tokio::select! {
            _ = self.inner.token.cancelled() => return Err(MirrorError::Cancelled),
            feed = self.inner.store.scan(self.inner.config.scan_count) => feed,
        };
        let mut feed = scanned?;

        let mut count = 0;
        loop {
            let item = tokio::select! {
                _ = self.inner.token.cancelled() => return Err(MirrorError::Cancelled),
                item = feed.next() => item,
            };
            match item {
                Some(Ok(key)) => {
                    self.enqueue(key).await?;
                    count += 1;
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        info!(keys = count, "bootstrap concluído");
        Ok(count)
    }

    async fn enqueue(&self, key: String) -> MirrorResult<()> {
        if self.inner.config.drop_when_full {
            return match self.pending.try_send(key) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(key)) => {
                    debug!(%key, "canal de refresh cheio; chave descartada");
                    Ok(())
                }
                Err(TrySendError::Closed(_)) => Err(MirrorError::Closed),
            };
        }

        tokio::select! {
            _ = self.inner.token.cancelled() => Err(MirrorError::Cancelled),
            sent = self.pending.send(key) => sent.map_err(|_| MirrorError::Closed),
        }
    }

    fn ensure_open(&self) -> MirrorResult<()> {
        if self.state() == MirrorState::Closed {
            return Err(MirrorError::Closed);
        }
        Ok(())
    }

    /// Troca de estado, exceto quando já encerrado.
    fn transition(&self, to: MirrorState) {
        let _ = self
            .inner
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != MirrorState::Closed as u8).then_some(to as u8)
            });
    }
}

impl<S> Inner<S> {
    fn lane_of(&self, key: &str, lanes: usize) -> usize {
        (self.hasher.hash_one(key) % lanes as u64) as usize
    }
}

/// Drena o canal de pendentes em lotes de até `scan_count` chaves.
async fn refresh_loop<S: RemoteStore>(inner: Arc<Inner<S>>, mut rx: mpsc::Receiver<String>) {
    let team = Team::new(inner.config.team_config(), RoundRobin::new());
    let mut batch = Vec::with_capacity(inner.config.scan_count);
    let mut ticker = tokio::time::interval(inner.config.drain_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.token.cancelled() => break,
            key = rx.recv() => match key {
                Some(key) => {
                    batch.push(key);
                    if batch.len() >= inner.config.scan_count {
                        flush(&inner, &team, &mut batch).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(&inner, &team, &mut batch).await;
                }
            }
        }
    }

    // Encerrando: lote e pendentes são descartados.
    let dropped = batch.len();
    batch.clear();
    rx.close();
    let mut drained = 0;
    while rx.try_recv().is_ok() {
        drained += 1;
    }
    debug!(dropped, drained, "refresh encerrado");
    team.close().await;
}

/// Deduplica o lote e distribui as chaves entre as lanes pelo hash, de modo
/// que refreshes da mesma chave fiquem sempre na mesma lane.
async fn flush<S: RemoteStore>(inner: &Arc<Inner<S>>, team: &Team, batch: &mut Vec<String>) {
    let lanes = team.lanes();
    let mut seen = HashSet::with_capacity(batch.len());
    let mut partitions: Vec<Vec<String>> = vec![Vec::new(); lanes];
    for key in batch.drain(..) {
        if seen.insert(key.clone()) {
            partitions[inner.lane_of(&key, lanes)].push(key);
        }
    }
    debug!(keys = seen.len(), "flush de refresh");

    for (lane, keys) in partitions.into_iter().enumerate() {
        if keys.is_empty() {
            continue;
        }
        let inner = inner.clone();
        if team
            .push_with(lane, async move { refresh(inner, keys).await })
            .await
            .is_err()
        {
            warn!(lane, "lane encerrada; lote de refresh descartado");
        }
    }
}

/// Um MGET e a aplicação do resultado no cache.
///
/// Uma remoção aplicada depois do envio do MGET vence o valor lido, que
/// pode ser anterior a ela.
async fn refresh<S: RemoteStore>(inner: Arc<Inner<S>>, keys: Vec<String>) {
    let dispatched = inner.generation.load(Ordering::SeqCst);
    let fetched = tokio::select! {
        _ = inner.token.cancelled() => return,
        fetched = inner.store.mget(&keys) => fetched,
    };

    let values = match fetched {
        Ok(values) if values.len() == keys.len() => values,
        Ok(values) => {
            warn!(
                keys = keys.len(),
                values = values.len(),
                "MGET desalinhado; lote descartado"
            );
            return;
        }
        Err(e) => {
            warn!(error = %e, keys = keys.len(), "MGET falhou; lote descartado");
            return;
        }
    };

    let mut cache = inner.cache.lock();
    for (key, value) in keys.into_iter().zip(values) {
        // None: não está em cache; Some(None): em cache e não removida.
        let tombstone = cache.get(key.as_str()).map(|cached| match cached {
            Cached::Deleted { generation } => Some(*generation),
            _ => None,
        });
        match (value, tombstone) {
            (Some(_), Some(Some(generation))) if generation > dispatched => {
                debug!(%key, "valor lido antes da remoção; descartado");
            }
            (Some(value), _) => cache.set(key, Cached::Present(value)),
            (None, None) | (None, Some(Some(_))) => {}
            (None, Some(None)) => {
                let generation = inner.generation.load(Ordering::SeqCst);
                cache.set(key, Cached::Deleted { generation });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use crate::store::Feed;
    use kvmirror_common::ProtocolError;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::Notify;

    const DRAIN: Duration = Duration::from_millis(20);

    fn config() -> MirrorConfig {
        MirrorConfig::default().with_drain_interval(DRAIN)
    }

    async fn wait_for_subscriptions(store: &MemoryStore, n: usize) {
        while store.subscriptions() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn spawn_follow<S: RemoteStore>(mirror: &Mirror<S>) -> JoinHandle<MirrorResult<()>> {
        let mirror = mirror.clone();
        tokio::spawn(async move { mirror.follow().await })
    }

    /// MemoryStore com MGET que pode ficar preso depois da leitura e com
    /// erros de protocolo programados no scan e nos eventos.
    #[derive(Clone, Default)]
    struct ScriptedStore {
        store: MemoryStore,
        hold_mget: Arc<AtomicBool>,
        mget_entered: Arc<Notify>,
        mget_release: Arc<Notify>,
        bad_scans: Arc<AtomicUsize>,
        bad_feeds: Arc<AtomicUsize>,
    }

    fn undecodable_key() -> MirrorError {
        MirrorError::Protocol(ProtocolError::InvalidEncoding("chave binária".into()))
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait::async_trait]
    impl RemoteStore for ScriptedStore {
        async fn get(&self, key: &str) -> MirrorResult<Option<Bytes>> {
            self.store.get(key).await
        }

        async fn mget(&self, keys: &[String]) -> MirrorResult<Vec<Option<Bytes>>> {
            let values = self.store.mget(keys).await?;
            if self.hold_mget.load(Ordering::SeqCst) {
                self.mget_entered.notify_one();
                self.mget_release.notified().await;
            }
            Ok(values)
        }

        async fn scan(&self, page_size: usize) -> MirrorResult<Feed<String>> {
            if take_one(&self.bad_scans) {
                return Ok(Feed::from_items(vec![Err(undecodable_key())]));
            }
            self.store.scan(page_size).await
        }

        async fn key_events(&self) -> MirrorResult<Feed<KeyEvent>> {
            let feed = self.store.key_events().await?;
            if take_one(&self.bad_feeds) {
                drop(feed);
                return Ok(Feed::from_items(vec![Err(undecodable_key())]));
            }
            Ok(feed)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn updated_event_refreshes_and_deleted_hides() {
        let store = MemoryStore::new();
        store.insert_silently("k1", "v1");
        let mirror = Mirror::new(store.clone(), config());

        assert_eq!(mirror.get("k1").await.unwrap(), "v1");
        assert_eq!(mirror.get("k1").await.unwrap(), "v1");
        assert_eq!(store.get_calls(), 1);

        let follower = spawn_follow(&mirror);
        wait_for_subscriptions(&store, 1).await;
        assert_eq!(mirror.state(), MirrorState::Following);

        store.set("k1", "v2");
        tokio::time::sleep(DRAIN * 2).await;
        assert_eq!(mirror.get("k1").await.unwrap(), "v2");
        assert_eq!(store.get_calls(), 1);
        assert_eq!(store.mget_calls(), 1);

        store.delete("k1");
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(matches!(mirror.get("k1").await, Err(MirrorError::NotFound)));
        assert_eq!(store.get_calls(), 1);

        mirror.close().await;
        assert!(matches!(follower.await.unwrap(), Err(MirrorError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_fills_cache() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.insert_silently(format!("k{i}"), format!("v{i}"));
        }
        let mirror = Mirror::new(store.clone(), config().with_scan_count(4));

        assert_eq!(mirror.bootstrap().await.unwrap(), 10);
        assert_eq!(mirror.state(), MirrorState::Idle);
        tokio::time::sleep(DRAIN * 2).await;

        assert_eq!(mirror.len(), 10);
        for i in 0..10 {
            assert_eq!(mirror.get(&format!("k{i}")).await.unwrap(), format!("v{i}"));
        }
        assert_eq!(store.get_calls(), 0);
        mirror.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_is_newest_first() {
        let store = MemoryStore::new();
        store.insert_silently("a", "1");
        store.insert_silently("b", "2");
        let mirror = Mirror::new(store.clone(), config());

        mirror.get("a").await.unwrap();
        mirror.get("b").await.unwrap();
        assert!(mirror.get("missing").await.is_err());

        let mut seen = Vec::new();
        let visited = mirror.snapshot(|k, v| seen.push((k.to_string(), v.clone())));
        assert_eq!(visited, 2);
        assert_eq!(
            seen,
            vec![
                ("b".to_string(), Bytes::from("2")),
                ("a".to_string(), Bytes::from("1")),
            ]
        );
        mirror.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_leaves_cache_untouched() {
        let store = MemoryStore::new();
        store.insert_silently("k", "v");
        store.set_unreachable(true);
        let mirror = Mirror::new(store.clone(), config());

        let err = mirror.get("k").await.unwrap_err();
        assert!(err.is_transient());
        assert!(mirror.is_empty());

        store.set_unreachable(false);
        assert_eq!(mirror.get("k").await.unwrap(), "v");
        mirror.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn negative_cache_absorbs_misses() {
        let store = MemoryStore::new();
        let mirror = Mirror::new(
            store.clone(),
            config().with_negative_ttl(Some(Duration::from_millis(50))),
        );

        assert!(matches!(mirror.get("nope").await, Err(MirrorError::NotFound)));
        assert!(matches!(mirror.get("nope").await, Err(MirrorError::NotFound)));
        assert_eq!(store.get_calls(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        store.insert_silently("nope", "now");
        assert_eq!(mirror.get("nope").await.unwrap(), "now");
        assert_eq!(store.get_calls(), 2);
        mirror.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn without_negative_ttl_every_miss_hits_store() {
        let store = MemoryStore::new();
        let mirror = Mirror::new(store.clone(), config());
        for _ in 0..3 {
            assert!(mirror.get("nope").await.is_err());
        }
        assert_eq!(store.get_calls(), 3);
        mirror.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cache_respects_max_items() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.insert_silently(format!("k{i}"), "v");
        }
        let mirror = Mirror::new(store.clone(), config().with_max_items(3));
        for i in 0..5 {
            mirror.get(&format!("k{i}")).await.unwrap();
        }
        assert_eq!(mirror.len(), 3);

        mirror.get("k0").await.unwrap();
        assert_eq!(store.get_calls(), 6);
        mirror.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_mget_drops_batch() {
        let store = MemoryStore::new();
        store.insert_silently("k", "old");
        let mirror = Mirror::new(store.clone(), config());
        mirror.get("k").await.unwrap();

        let follower = spawn_follow(&mirror);
        wait_for_subscriptions(&store, 1).await;

        store.set_unreachable(true);
        store.set("k", "new");
        tokio::time::sleep(DRAIN * 2).await;
        assert_eq!(store.mget_calls(), 1);

        // sem nova notificação a chave não é relida
        store.set_unreachable(false);
        tokio::time::sleep(DRAIN * 4).await;
        assert_eq!(mirror.get("k").await.unwrap(), "old");
        assert_eq!(store.mget_calls(), 1);

        mirror.close().await;
        let _ = follower.await;
    }

    #[tokio::test(start_paused = true)]
    async fn follow_reconnects_and_rescans() {
        let store = MemoryStore::new();
        store.insert_silently("k", "v1");
        let mirror = Mirror::new(store.clone(), config());
        mirror.get("k").await.unwrap();

        let follower = spawn_follow(&mirror);
        wait_for_subscriptions(&store, 1).await;

        store.drop_events();
        // mudança feita durante a queda, sem evento para ninguém
        store.insert_silently("k", "v2");
        wait_for_subscriptions(&store, 2).await;
        tokio::time::sleep(DRAIN * 2).await;

        assert_eq!(mirror.get("k").await.unwrap(), "v2");
        assert_eq!(mirror.state(), MirrorState::Following);

        mirror.close().await;
        let _ = follower.await;
    }

    #[tokio::test(start_paused = true)]
    async fn expired_event_hides_tracked_key() {
        let store = MemoryStore::new();
        store.insert_silently("s", "x");
        let mirror = Mirror::new(store.clone(), config());
        mirror.get("s").await.unwrap();

        let follower = spawn_follow(&mirror);
        wait_for_subscriptions(&store, 1).await;
        store.expire("s");
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(matches!(mirror.get("s").await, Err(MirrorError::NotFound)));
        assert_eq!(mirror.snapshot(|_, _| {}), 0);
        assert_eq!(store.get_calls(), 1);

        mirror.close().await;
        let _ = follower.await;
    }

    #[tokio::test(start_paused = true)]
    async fn closed_mirror_is_read_only() {
        let store = MemoryStore::new();
        store.insert_silently("k", "v");
        let mirror = Mirror::new(store.clone(), config());
        mirror.get("k").await.unwrap();

        mirror.close().await;
        mirror.close().await;
        assert_eq!(mirror.state(), MirrorState::Closed);

        assert_eq!(mirror.get("k").await.unwrap(), "v");
        assert!(matches!(mirror.get("other").await, Err(MirrorError::Closed)));
        assert!(matches!(mirror.bootstrap().await, Err(MirrorError::Closed)));
        assert!(matches!(mirror.follow().await, Err(MirrorError::Closed)));
        assert_eq!(store.get_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_local_copy() {
        let store = MemoryStore::new();
        store.insert_silently("k", "v");
        let mirror = Mirror::new(store.clone(), config().with_ttl(Duration::from_millis(30)));

        mirror.get("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(mirror.clean(10), 1);
        assert!(mirror.is_empty());

        mirror.get("k").await.unwrap();
        assert_eq!(store.get_calls(), 2);
        assert!(mirror.invalidate("k"));
        assert!(!mirror.invalidate("k"));
        mirror.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drop_when_full_never_blocks_bootstrap() {
        let store = MemoryStore::new();
        for i in 0..50 {
            store.insert_silently(format!("k{i}"), "v");
        }
        let mirror = Mirror::new(
            store.clone(),
            config().with_pending_capacity(1).with_drop_when_full(true),
        );

        // nada drena o canal enquanto o bootstrap roda sem suspender
        assert_eq!(mirror.bootstrap().await.unwrap(), 50);
        mirror.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn delete_during_inflight_mget_wins() {
        let scripted = ScriptedStore::default();
        scripted.store.insert_silently("k", "v1");
        let mirror = Mirror::new(scripted.clone(), config());
        assert_eq!(mirror.get("k").await.unwrap(), "v1");

        let follower = spawn_follow(&mirror);
        wait_for_subscriptions(&scripted.store, 1).await;

        // o MGET lê v2 e fica preso; a remoção chega antes da resposta
        scripted.hold_mget.store(true, Ordering::SeqCst);
        scripted.store.set("k", "v2");
        scripted.mget_entered.notified().await;
        scripted.store.delete("k");
        tokio::time::sleep(Duration::from_millis(1)).await;
        scripted.hold_mget.store(false, Ordering::SeqCst);
        scripted.mget_release.notify_one();
        tokio::time::sleep(DRAIN * 2).await;

        assert!(matches!(mirror.get("k").await, Err(MirrorError::NotFound)));
        assert_eq!(scripted.store.get_calls(), 1);
        assert_eq!(scripted.store.mget_calls(), 1);

        // uma atualização posterior volta a valer
        scripted.store.set("k", "v3");
        tokio::time::sleep(DRAIN * 2).await;
        assert_eq!(mirror.get("k").await.unwrap(), "v3");

        mirror.close().await;
        let _ = follower.await;
    }

    #[tokio::test(start_paused = true)]
    async fn set_then_delete_keeps_tombstone() {
        let store = MemoryStore::new();
        store.insert_silently("k1", "v1");
        let mirror = Mirror::new(store.clone(), config());
        mirror.get("k1").await.unwrap();

        let follower = spawn_follow(&mirror);
        wait_for_subscriptions(&store, 1).await;

        store.set("k1", "v2");
        store.delete("k1");
        tokio::time::sleep(DRAIN * 3).await;
        assert_eq!(store.mget_calls(), 1);

        assert!(matches!(mirror.get("k1").await, Err(MirrorError::NotFound)));
        assert_eq!(store.get_calls(), 1);

        mirror.close().await;
        let _ = follower.await;
    }

    #[tokio::test(start_paused = true)]
    async fn mget_not_found_turns_cached_key_into_tombstone() {
        let store = MemoryStore::new();
        store.insert_silently("k", "v");
        let mirror = Mirror::new(store.clone(), config());
        mirror.get("k").await.unwrap();

        let follower = spawn_follow(&mirror);
        wait_for_subscriptions(&store, 1).await;

        // remoção sem notificação de delete; só o updated chega
        store.delete_silently("k");
        store.publish(KeyEvent::new(KeyEventKind::Updated, "k"));
        tokio::time::sleep(DRAIN * 2).await;

        assert!(matches!(mirror.get("k").await, Err(MirrorError::NotFound)));
        assert_eq!(store.get_calls(), 1);

        mirror.close().await;
        let _ = follower.await;
    }

    #[tokio::test(start_paused = true)]
    async fn protocol_errors_do_not_stall_follow() {
        let scripted = ScriptedStore::default();
        scripted.store.insert_silently("k", "v1");
        scripted.bad_feeds.store(1, Ordering::SeqCst);
        scripted.bad_scans.store(1, Ordering::SeqCst);
        let mirror = Mirror::new(scripted.clone(), config());
        assert_eq!(mirror.get("k").await.unwrap(), "v1");

        // primeira inscrição aborta com erro de protocolo; a reconexão
        // faz um rescan que também falha, e a inscrição nova é mantida
        let follower = spawn_follow(&mirror);
        wait_for_subscriptions(&scripted.store, 2).await;
        tokio::time::sleep(DRAIN).await;

        scripted.store.set("k", "v2");
        tokio::time::sleep(DRAIN * 2).await;

        assert_eq!(mirror.get("k").await.unwrap(), "v2");
        assert_eq!(scripted.store.subscriptions(), 2);
        assert_eq!(mirror.state(), MirrorState::Following);

        mirror.close().await;
        assert!(matches!(follower.await.unwrap(), Err(MirrorError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn drop_when_full_never_blocks_follow() {
        let store = MemoryStore::new();
        let mirror = Mirror::new(
            store.clone(),
            config().with_pending_capacity(1).with_drop_when_full(true),
        );
        let follower = spawn_follow(&mirror);
        wait_for_subscriptions(&store, 1).await;

        for i in 0..50 {
            store.set(format!("k{i}"), "v");
        }
        tokio::time::sleep(DRAIN * 2).await;
        assert!(!follower.is_finished());
        assert!(mirror.len() >= 1);

        store.set("last", "x");
        tokio::time::sleep(DRAIN * 2).await;
        assert_eq!(mirror.get("last").await.unwrap(), "x");
        assert_eq!(store.get_calls(), 0);

        mirror.close().await;
        let _ = follower.await;
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_during_follow_stays_following() {
        let store = MemoryStore::new();
        store.insert_silently("k", "v");
        let mirror = Mirror::new(store.clone(), config());

        let follower = spawn_follow(&mirror);
        wait_for_subscriptions(&store, 1).await;
        assert_eq!(mirror.state(), MirrorState::Following);

        assert_eq!(mirror.bootstrap().await.unwrap(), 1);
        assert_eq!(mirror.state(), MirrorState::Following);

        mirror.close().await;
        let _ = follower.await;
    }
}
