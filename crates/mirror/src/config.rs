use std::time::Duration;

use kvmirror_cache::ExpireConfig;
use kvmirror_common::{
    DEFAULT_DRAIN_INTERVAL_MS, DEFAULT_MAX_BACKOFF_MS, DEFAULT_PENDING_CAPACITY,
    DEFAULT_POOL_SIZE, DEFAULT_SCAN_COUNT,
};
use kvmirror_team::{TeamConfig, WorkerConfig};

use crate::resp::RespConfig;

/// Configuração do [`crate::Mirror`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    /// TTL das entradas locais. Zero desliga.
    pub ttl: Duration,
    /// Limite de entradas locais. Zero desliga.
    pub max_items: usize,
    /// Entradas do fundo inspecionadas a cada inserção (mínimo 1).
    pub back_scan: usize,
    /// Tamanho do lote de MGET e da página de SCAN.
    pub scan_count: usize,
    /// Espera máxima antes de enviar um lote não vazio.
    pub drain_interval: Duration,
    /// Capacidade do canal entre as fontes de eventos e o refresh.
    pub pending_capacity: usize,
    /// Conexões simultâneas no adaptador RESP (ver [`MirrorConfig::resp_config`]).
    pub pool_size: usize,
    /// Lanes do team que executa os MGET.
    pub refresh_lanes: usize,
    /// Lotes em espera por lane.
    pub lane_channel_buffer: usize,
    /// TTL do sentinela negativo. `None` desliga o cache negativo.
    pub negative_ttl: Option<Duration>,
    /// Com o canal cheio, descarta a chave em vez de esperar.
    pub drop_when_full: bool,
    /// Teto do backoff de reconexão dos eventos.
    pub max_backoff: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::ZERO,
            max_items: 0,
            back_scan: 1,
            scan_count: DEFAULT_SCAN_COUNT,
            drain_interval: Duration::from_millis(DEFAULT_DRAIN_INTERVAL_MS),
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            pool_size: DEFAULT_POOL_SIZE,
            refresh_lanes: 4,
            lane_channel_buffer: 16,
            negative_ttl: None,
            drop_when_full: false,
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl MirrorConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_back_scan(mut self, back_scan: usize) -> Self {
        self.back_scan = back_scan.max(1);
        self
    }

    pub fn with_scan_count(mut self, scan_count: usize) -> Self {
        self.scan_count = scan_count;
        self
    }

    pub fn with_drain_interval(mut self, drain_interval: Duration) -> Self {
        self.drain_interval = drain_interval;
        self
    }

    pub fn with_pending_capacity(mut self, pending_capacity: usize) -> Self {
        self.pending_capacity = pending_capacity;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_refresh_lanes(mut self, refresh_lanes: usize) -> Self {
        self.refresh_lanes = refresh_lanes;
        self
    }

    pub fn with_lane_channel_buffer(mut self, lane_channel_buffer: usize) -> Self {
        self.lane_channel_buffer = lane_channel_buffer;
        self
    }

    pub fn with_negative_ttl(mut self, negative_ttl: Option<Duration>) -> Self {
        self.negative_ttl = negative_ttl;
        self
    }

    pub fn with_drop_when_full(mut self, drop_when_full: bool) -> Self {
        self.drop_when_full = drop_when_full;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Config do adaptador RESP para `host:port`/`db`, com o `pool_size`
    /// deste mirror e o timeout padrão.
    pub fn resp_config(&self, host: impl Into<String>, port: u16, db: u32) -> RespConfig {
        RespConfig {
            host: host.into(),
            port,
            db,
            pool_size: self.pool_size.max(1),
            ..RespConfig::default()
        }
    }

    pub(crate) fn expire_config(&self) -> ExpireConfig {
        ExpireConfig {
            ttl: self.ttl,
            max_items: self.max_items,
            back_scan: self.back_scan,
        }
    }

    /// Um job por lane a cada flush, então o backlog de cada worker é 1.
    pub(crate) fn team_config(&self) -> TeamConfig {
        TeamConfig {
            lanes: self.refresh_lanes,
            worker: WorkerConfig {
                backlog_size: 1,
                channel_buffer: self.lane_channel_buffer,
            },
        }
    }

    /// Lote e canal nunca podem ser zero; o intervalo também não (o timer
    /// do tokio rejeita período zero).
    pub(crate) fn normalized(mut self) -> Self {
        self.back_scan = self.back_scan.max(1);
        self.scan_count = self.scan_count.max(1);
        self.pending_capacity = self.pending_capacity.max(1);
        self.refresh_lanes = self.refresh_lanes.max(1);
        if self.drain_interval.is_zero() {
            self.drain_interval = Duration::from_millis(1);
        }
        if self.max_backoff < self.drain_interval {
            self.max_backoff = self.drain_interval;
        }
        self
    }
}
