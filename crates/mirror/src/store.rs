use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use kvmirror_common::MirrorResult;
use kvmirror_protocol::KeyEvent;

/// O store autoritativo, visto pelo mirror.
///
/// A interface é estreita para que o mirror possa ser testado contra
/// dublês em memória ([`crate::MemoryStore`]) e ligado a um servidor RESP
/// de verdade ([`crate::RespStore`]).
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Valor de `key`; `None` se a chave não existe.
    async fn get(&self, key: &str) -> MirrorResult<Option<Bytes>>;

    /// Valores alinhados com `keys`, ou um erro para o lote inteiro.
    async fn mget(&self, keys: &[String]) -> MirrorResult<Vec<Option<Bytes>>>;

    /// Enumeração completa e finita das chaves, em páginas de `page_size`.
    async fn scan(&self, page_size: usize) -> MirrorResult<Feed<String>>;

    /// Notificações de mudança, potencialmente infinitas.
    async fn key_events(&self) -> MirrorResult<Feed<KeyEvent>>;
}

/// Sequência preguiçosa e fechável de itens vindos do store.
///
/// Um erro terminal chega como último item `Err`. Se existir uma task
/// produtora, ela é abortada em `close` ou quando o Feed é descartado.
pub struct Feed<T> {
    inner: Pin<Box<dyn Stream<Item = MirrorResult<T>> + Send>>,
    producer: Option<JoinHandle<()>>,
    closed: bool,
}

impl<T: Send + 'static> Feed<T> {
    pub fn new<St>(stream: St) -> Self
    where
        St: Stream<Item = MirrorResult<T>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
            producer: None,
            closed: false,
        }
    }

    /// Feed alimentado por uma task produtora através de um canal.
    pub fn from_channel(rx: mpsc::Receiver<MirrorResult<T>>, producer: JoinHandle<()>) -> Self {
        Self {
            inner: Box::pin(ReceiverStream::new(rx)),
            producer: Some(producer),
            closed: false,
        }
    }

    /// Feed finito sobre itens já conhecidos.
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = MirrorResult<T>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(tokio_stream::iter(items))
    }

    pub async fn next(&mut self) -> Option<MirrorResult<T>> {
        if self.closed {
            return None;
        }
        StreamExt::next(&mut self.inner).await
    }

    /// Encerra o feed. Chamadas seguintes a `next` retornam `None`.
    pub fn close(&mut self) {
        self.closed = true;
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<T> Stream for Feed<T> {
    type Item = MirrorResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        this.inner.as_mut().poll_next(cx)
    }
}

impl<T> Drop for Feed<T> {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

impl<T> std::fmt::Debug for Feed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("closed", &self.closed)
            .field("has_producer", &self.producer.is_some())
            .finish()
    }
}
