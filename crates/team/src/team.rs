use std::future::Future;

use kvmirror_common::ClosedError;
use tracing::debug;

use crate::selector::{RoundRobin, Selector};
use crate::worker::{Worker, WorkerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamConfig {
    /// Número de lanes. Zero vira uma lane.
    pub lanes: usize,
    pub worker: WorkerConfig,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            lanes: 4,
            worker: WorkerConfig::default(),
        }
    }
}

/// `N` workers e um selector que distribui os jobs entre eles.
pub struct Team<S = RoundRobin> {
    workers: Vec<Worker>,
    selector: S,
}

impl<S: Selector> Team<S> {
    /// Sobe as lanes. Precisa de um runtime tokio ativo.
    pub fn new(config: TeamConfig, selector: S) -> Self {
        let lanes = config.lanes.max(1);
        let workers = (0..lanes)
            .map(|lane| Worker::new(lane, config.worker))
            .collect();
        debug!(lanes, "team iniciado");
        Self { workers, selector }
    }

    pub fn lanes(&self) -> usize {
        self.workers.len()
    }

    /// Envia o job para a lane escolhida pelo selector; retorna a lane.
    pub async fn push<F>(&self, job: F) -> Result<usize, ClosedError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let lane = self.selector.select(self.workers.len());
        self.push_with(lane, job).await
    }

    /// Envia o job para a lane `i mod N`; retorna a lane.
    pub async fn push_with<F>(&self, i: usize, job: F) -> Result<usize, ClosedError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let lane = i % self.workers.len();
        self.workers[lane].push(job).await?;
        Ok(lane)
    }

    /// Fecha todas as lanes, esperando cada uma esvaziar.
    pub async fn close(&self) {
        for worker in &self.workers {
            worker.close().await;
        }
    }
}
