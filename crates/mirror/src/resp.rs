use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

use kvmirror_common::{
    DEFAULT_HOST, DEFAULT_POOL_SIZE, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_MS, MirrorError,
    MirrorResult, ProtocolError,
};
use kvmirror_protocol::{Frame, KeyEvent, Request, ScanPage, keyevent_pattern};

use crate::connection::Connection;
use crate::store::{Feed, RemoteStore};

/// Endereço e limites do adaptador RESP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespConfig {
    pub host: String,
    pub port: u16,
    /// Banco selecionado com SELECT em cada conexão nova.
    pub db: u32,
    /// Máximo de conexões simultâneas (mínimo 1).
    pub pool_size: usize,
    pub request_timeout: Duration,
}

impl Default for RespConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db: 0,
            pool_size: DEFAULT_POOL_SIZE,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl RespConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Pool {
    config: RespConfig,
    permits: Semaphore,
    idle: Mutex<Vec<Connection>>,
}

/// [`RemoteStore`] sobre um servidor RESP2 (Redis e compatíveis).
///
/// Mantém até `pool_size` conexões em uso; as ociosas ficam numa pilha e
/// são reaproveitadas. Uma conexão que falhou (transporte, timeout ou
/// resposta ilegível) é descartada. Eventos usam uma conexão dedicada por
/// inscrição, fora do pool.
#[derive(Clone)]
pub struct RespStore {
    pool: Arc<Pool>,
}

impl RespStore {
    pub fn new(config: RespConfig) -> Self {
        let permits = Semaphore::new(config.pool_size.max(1));
        Self {
            pool: Arc::new(Pool {
                config,
                permits,
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &RespConfig {
        &self.pool.config
    }

    /// Conexões ociosas guardadas no pool.
    pub fn idle_connections(&self) -> usize {
        self.pool.idle.lock().len()
    }

    /// Envia um PING; útil para validar o endereço na partida.
    pub async fn ping(&self) -> MirrorResult<()> {
        match self.call(Request::Ping).await?.into_result()? {
            Frame::Simple(s) if s.eq_ignore_ascii_case("PONG") => Ok(()),
            other => Err(unexpected("PONG", &other)),
        }
    }

    /// Executa um request numa conexão do pool.
    async fn call(&self, request: Request) -> MirrorResult<Frame> {
        let _permit = self
            .pool
            .permits
            .acquire()
            .await
            .map_err(|_| MirrorError::Closed)?;

        let cached = self.pool.idle.lock().pop();
        let mut conn = match cached {
            Some(conn) => conn,
            None => self.open().await?,
        };

        let frame = self
            .with_timeout(async {
                conn.write_frame(&request.to_frame()).await?;
                conn.read_reply().await
            })
            .await?;

        // A conexão só volta ao pool depois de uma resposta completa.
        self.pool.idle.lock().push(conn);
        Ok(frame)
    }

    /// Abre uma conexão nova, já no banco configurado.
    async fn open(&self) -> MirrorResult<Connection> {
        let config = &self.pool.config;
        let addr = config.addr();
        let mut conn = self.with_timeout(Connection::connect(&addr)).await?;
        debug!(%addr, db = config.db, "nova conexão com o store");

        if config.db != 0 {
            let reply = self
                .with_timeout(async {
                    conn.write_frame(&Request::Select(config.db).to_frame())
                        .await?;
                    conn.read_reply().await
                })
                .await?;
            match reply.into_result()? {
                Frame::Simple(s) if s.eq_ignore_ascii_case("OK") => {}
                other => return Err(unexpected("OK", &other)),
            }
        }
        Ok(conn)
    }

    async fn with_timeout<T, F>(&self, fut: F) -> MirrorResult<T>
    where
        F: Future<Output = MirrorResult<T>>,
    {
        tokio::time::timeout(self.pool.config.request_timeout, fut)
            .await
            .map_err(|_| MirrorError::transport(ErrorKind::TimedOut, "timeout na requisição"))?
    }
}

#[async_trait]
impl RemoteStore for RespStore {
    async fn get(&self, key: &str) -> MirrorResult<Option<Bytes>> {
        let reply = self.call(Request::Get(key.to_string())).await?;
        Ok(reply.into_optional_bulk()?)
    }

    async fn mget(&self, keys: &[String]) -> MirrorResult<Vec<Option<Bytes>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let items = self
            .call(Request::MGet(keys.to_vec()))
            .await?
            .into_array()?;
        if items.len() != keys.len() {
            return Err(ProtocolError::UnexpectedReply(format!(
                "MGET retornou {} valores para {} chaves",
                items.len(),
                keys.len()
            ))
            .into());
        }

        items
            .into_iter()
            .map(|item| item.into_optional_bulk().map_err(MirrorError::from))
            .collect()
    }

    async fn scan(&self, page_size: usize) -> MirrorResult<Feed<String>> {
        let count = page_size.max(1);
        let (tx, rx) = mpsc::channel(count);
        let store = self.clone();

        let producer = tokio::spawn(async move {
            let mut cursor = 0;
            loop {
                let page = match store.call(Request::Scan { cursor, count }).await {
                    Ok(frame) => ScanPage::from_frame(frame).map_err(MirrorError::from),
                    Err(e) => Err(e),
                };
                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                for key in page.keys {
                    if tx.send(Ok(key)).await.is_err() {
                        return;
                    }
                }
                if page.cursor == 0 {
                    return;
                }
                cursor = page.cursor;
            }
        });

        Ok(Feed::from_channel(rx, producer))
    }

    async fn key_events(&self) -> MirrorResult<Feed<KeyEvent>> {
        let mut conn = self.open().await?;
        let pattern = keyevent_pattern(self.pool.config.db);

        let confirmation = self
            .with_timeout(async {
                conn.write_frame(&Request::PSubscribe(pattern.clone()).to_frame())
                    .await?;
                conn.read_reply().await
            })
            .await?;
        if KeyEvent::from_pmessage(confirmation.clone())?.is_some() {
            return Err(unexpected("confirmação de psubscribe", &confirmation));
        }
        debug!(%pattern, "inscrito em eventos de chave");

        let (tx, rx) = mpsc::channel(256);
        let producer = tokio::spawn(async move {
            loop {
                let item = match conn.read_frame().await {
                    Ok(Some(frame)) => match KeyEvent::from_pmessage(frame) {
                        Ok(Some(event)) => Ok(event),
                        Ok(None) => continue,
                        Err(e) => Err(MirrorError::from(e)),
                    },
                    Ok(None) => Err(MirrorError::transport(
                        ErrorKind::ConnectionReset,
                        "inscrição encerrada pelo servidor",
                    )),
                    Err(e) => Err(e),
                };

                let failed = item.is_err();
                if let Err(e) = &item {
                    warn!(error = %e, "leitura de eventos interrompida");
                }
                if tx.send(item).await.is_err() || failed {
                    return;
                }
            }
        });

        Ok(Feed::from_channel(rx, producer))
    }
}

fn unexpected(expected: &str, got: &Frame) -> MirrorError {
    ProtocolError::UnexpectedReply(format!("esperado {expected}, recebido {got:?}")).into()
}
