use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use kvmirror_common::{MirrorError, MirrorResult};
use kvmirror_protocol::{KeyEvent, KeyEventKind};

use crate::store::{Feed, RemoteStore};

const EVENT_CAPACITY: usize = 1024;

struct Shared {
    data: DashMap<String, Bytes>,
    events: Mutex<broadcast::Sender<KeyEvent>>,
    unreachable: AtomicBool,
    get_calls: AtomicUsize,
    mget_calls: AtomicUsize,
    subscriptions: AtomicUsize,
}

/// Store autoritativo em memória, para testes e demonstrações.
///
/// Cada mutação publica o evento correspondente para os inscritos. Permite
/// simular queda de transporte e contar as chamadas que o mirror fez.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                data: DashMap::new(),
                events: Mutex::new(events),
                unreachable: AtomicBool::new(false),
                get_calls: AtomicUsize::new(0),
                mget_calls: AtomicUsize::new(0),
                subscriptions: AtomicUsize::new(0),
            }),
        }
    }

    /// Grava o valor e publica `Updated`.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Bytes>) {
        let key = key.into();
        self.shared.data.insert(key.clone(), value.into());
        self.publish(KeyEvent::new(KeyEventKind::Updated, key));
    }

    /// Grava o valor sem publicar evento.
    pub fn insert_silently(&self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.shared.data.insert(key.into(), value.into());
    }

    /// Remove a chave sem publicar evento.
    pub fn delete_silently(&self, key: &str) -> bool {
        self.shared.data.remove(key).is_some()
    }

    /// Remove a chave e publica `Deleted`.
    pub fn delete(&self, key: &str) -> bool {
        let existed = self.shared.data.remove(key).is_some();
        self.publish(KeyEvent::new(KeyEventKind::Deleted, key));
        existed
    }

    /// Remove a chave e publica `Expired`.
    pub fn expire(&self, key: &str) -> bool {
        let existed = self.shared.data.remove(key).is_some();
        self.publish(KeyEvent::new(KeyEventKind::Expired, key));
        existed
    }

    /// Publica um evento arbitrário sem tocar nos dados.
    pub fn publish(&self, event: KeyEvent) {
        // sem inscritos o envio falha; o evento simplesmente se perde
        let _ = self.shared.events.lock().send(event);
    }

    /// Liga/desliga a falha de transporte em todas as operações.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.shared.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Corta todas as inscrições atuais; os feeds terminam.
    pub fn drop_events(&self) {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        *self.shared.events.lock() = events;
    }

    pub fn len(&self) -> usize {
        self.shared.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.data.is_empty()
    }

    pub fn get_calls(&self) -> usize {
        self.shared.get_calls.load(Ordering::SeqCst)
    }

    pub fn mget_calls(&self) -> usize {
        self.shared.mget_calls.load(Ordering::SeqCst)
    }

    /// Total de inscrições em eventos já abertas.
    pub fn subscriptions(&self) -> usize {
        self.shared.subscriptions.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> MirrorResult<()> {
        if self.shared.unreachable.load(Ordering::SeqCst) {
            return Err(MirrorError::transport(
                ErrorKind::ConnectionRefused,
                "store inacessível",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> MirrorResult<Option<Bytes>> {
        self.shared.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(self.shared.data.get(key).map(|v| v.value().clone()))
    }

    async fn mget(&self, keys: &[String]) -> MirrorResult<Vec<Option<Bytes>>> {
        self.shared.mget_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(keys
            .iter()
            .map(|k| self.shared.data.get(k).map(|v| v.value().clone()))
            .collect())
    }

    async fn scan(&self, _page_size: usize) -> MirrorResult<Feed<String>> {
        self.check_reachable()?;
        let keys: Vec<_> = self
            .shared
            .data
            .iter()
            .map(|entry| Ok(entry.key().clone()))
            .collect();
        Ok(Feed::from_items(keys))
    }

    async fn key_events(&self) -> MirrorResult<Feed<KeyEvent>> {
        self.check_reachable()?;
        let rx = self.shared.events.lock().subscribe();
        self.shared.subscriptions.fetch_add(1, Ordering::SeqCst);

        // Lagged significa notificações perdidas, o que o contrato permite.
        let stream = BroadcastStream::new(rx).filter_map(|item| item.ok().map(Ok));
        Ok(Feed::new(stream))
    }
}
