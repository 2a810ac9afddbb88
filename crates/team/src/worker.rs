use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kvmirror_common::ClosedError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Unidade de trabalho opaca executada por uma lane.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

tokio::task_local! {
    static LANE: usize;
}

/// Lane que está executando a task atual, se ela for um job de um Worker.
pub fn current_lane() -> Option<usize> {
    LANE.try_with(|lane| *lane).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Jobs acumulados antes de enviar um lote para execução (mínimo 1).
    pub backlog_size: usize,
    /// Lotes em espera no canal de execução (mínimo 1).
    pub channel_buffer: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            backlog_size: 64,
            channel_buffer: 16,
        }
    }
}

struct Backlog {
    buffer: Vec<Job>,
    tx: Option<mpsc::Sender<Vec<Job>>>,
}

/// Vetores de lote reaproveitados entre o produtor e a lane.
struct BatchPool {
    spare: parking_lot::Mutex<Vec<Vec<Job>>>,
    limit: usize,
    batch_capacity: usize,
}

impl BatchPool {
    fn take(&self) -> Vec<Job> {
        self.spare
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.batch_capacity))
    }

    fn give_back(&self, batch: Vec<Job>) {
        debug_assert!(batch.is_empty());
        let mut spare = self.spare.lock();
        if spare.len() < self.limit {
            spare.push(batch);
        }
    }
}

/// Uma lane de execução serial.
///
/// `push` acumula jobs num lote privado; quando o lote enche ele é enviado
/// inteiro para a task da lane. Jobs de um mesmo worker rodam em ordem de
/// inserção, um de cada vez. `close` é obrigatório para executar o lote
/// parcial: um Worker descartado sem `close` perde o que estiver acumulado.
pub struct Worker {
    lane: usize,
    backlog_size: usize,
    backlog: Mutex<Backlog>,
    pool: Arc<BatchPool>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Cria a lane e sobe sua task. Precisa de um runtime tokio ativo.
    pub fn new(lane: usize, config: WorkerConfig) -> Self {
        let backlog_size = config.backlog_size.max(1);
        let channel_buffer = config.channel_buffer.max(1);

        let (tx, rx) = mpsc::channel(channel_buffer);
        let pool = Arc::new(BatchPool {
            spare: parking_lot::Mutex::new(Vec::new()),
            limit: channel_buffer + 1,
            batch_capacity: backlog_size,
        });
        let handle = tokio::spawn(LANE.scope(lane, run(rx, pool.clone())));

        Self {
            lane,
            backlog_size,
            backlog: Mutex::new(Backlog {
                buffer: Vec::with_capacity(backlog_size),
                tx: Some(tx),
            }),
            pool,
            handle: parking_lot::Mutex::new(Some(handle)),
        }
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Enfileira um job. Só suspende quando o canal de lotes está cheio.
    pub async fn push<F>(&self, job: F) -> Result<(), ClosedError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut backlog = self.backlog.lock().await;
        let Some(tx) = backlog.tx.clone() else {
            return Err(ClosedError);
        };
        if tx.is_closed() {
            // a task da lane morreu (pânico em um job)
            backlog.tx = None;
            return Err(ClosedError);
        }

        backlog.buffer.push(Box::pin(job));
        if backlog.buffer.len() < self.backlog_size {
            return Ok(());
        }

        let batch = std::mem::replace(&mut backlog.buffer, self.pool.take());
        // O lock segue preso durante o envio para manter a ordem dos lotes.
        if tx.send(batch).await.is_err() {
            backlog.tx = None;
            return Err(ClosedError);
        }
        Ok(())
    }

    /// Envia o lote parcial, fecha o canal e espera a lane esvaziar.
    /// Chamadas repetidas só esperam o que ainda estiver pendente.
    pub async fn close(&self) {
        {
            let mut backlog = self.backlog.lock().await;
            if let Some(tx) = backlog.tx.take() {
                if !backlog.buffer.is_empty() {
                    let batch = std::mem::take(&mut backlog.buffer);
                    let _ = tx.send(batch).await;
                }
            }
        }

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(()) => debug!(lane = self.lane, "lane encerrada"),
                Err(e) if e.is_panic() => {
                    error!(lane = self.lane, "lane terminou por pânico em um job")
                }
                Err(e) => error!(lane = self.lane, error = %e, "lane abortada"),
            }
        }
    }
}

async fn run(mut rx: mpsc::Receiver<Vec<Job>>, pool: Arc<BatchPool>) {
    while let Some(mut batch) = rx.recv().await {
        for job in batch.drain(..) {
            job.await;
        }
        pool.give_back(batch);
    }
}
