use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use kvmirror_common::{
    DEFAULT_DRAIN_INTERVAL_MS, DEFAULT_HOST, DEFAULT_PENDING_CAPACITY, DEFAULT_POOL_SIZE,
    DEFAULT_PORT, DEFAULT_SCAN_COUNT,
};
use kvmirror_core::{Mirror, MirrorConfig, MirrorError, RemoteStore, RespConfig, RespStore};
use kvmirror_protocol::Frame;

#[derive(Parser, Debug)]
#[command(name = "kvmirror", about = "Espelho local de um servidor RESP")]
struct Args {
    #[arg(long, env = "KVMIRROR_HOST", default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, short, env = "KVMIRROR_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, env = "KVMIRROR_DB", default_value_t = 0)]
    db: u32,
    /// TTL das entradas locais em ms (0 desliga)
    #[arg(long, env = "KVMIRROR_TTL_MS", default_value_t = 0)]
    ttl_ms: u64,
    /// Limite de entradas locais (0 desliga)
    #[arg(long, env = "KVMIRROR_MAX_ITEMS", default_value_t = 0)]
    max_items: usize,
    #[arg(long, env = "KVMIRROR_BACK_SCAN", default_value_t = 1)]
    back_scan: usize,
    #[arg(long, env = "KVMIRROR_SCAN_COUNT", default_value_t = DEFAULT_SCAN_COUNT)]
    scan_count: usize,
    #[arg(long, env = "KVMIRROR_DRAIN_MS", default_value_t = DEFAULT_DRAIN_INTERVAL_MS)]
    drain_ms: u64,
    #[arg(long, env = "KVMIRROR_PENDING", default_value_t = DEFAULT_PENDING_CAPACITY)]
    pending: usize,
    #[arg(long, env = "KVMIRROR_POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,
    #[arg(long, env = "KVMIRROR_LANES", default_value_t = 4)]
    lanes: usize,
    /// Liga o cache negativo com este TTL em ms
    #[arg(long, env = "KVMIRROR_NEGATIVE_TTL_MS")]
    negative_ttl_ms: Option<u64>,
    /// Descarta chaves quando o canal de refresh está cheio
    #[arg(long, env = "KVMIRROR_DROP_WHEN_FULL")]
    drop_when_full: bool,

    /// Comando para executar depois do bootstrap (modo não interativo)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

impl Args {
    fn resp_config(&self) -> RespConfig {
        self.mirror_config().resp_config(self.host.clone(), self.port, self.db)
    }

    fn mirror_config(&self) -> MirrorConfig {
        MirrorConfig::default()
            .with_ttl(Duration::from_millis(self.ttl_ms))
            .with_max_items(self.max_items)
            .with_back_scan(self.back_scan)
            .with_scan_count(self.scan_count)
            .with_drain_interval(Duration::from_millis(self.drain_ms))
            .with_pending_capacity(self.pending)
            .with_pool_size(self.pool_size)
            .with_refresh_lanes(self.lanes)
            .with_negative_ttl(self.negative_ttl_ms.map(Duration::from_millis))
            .with_drop_when_full(self.drop_when_full)
    }
}

/// Comandos aceitos no prompt.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Get(String),
    Snapshot(Option<usize>),
    Count,
    State,
    Quit,
}

impl Command {
    fn parse(tokens: &[String]) -> Result<Command, String> {
        let Some((name, args)) = tokens.split_first() else {
            return Err("comando vazio".into());
        };

        match (name.to_ascii_uppercase().as_str(), args) {
            ("GET", [key]) => Ok(Command::Get(key.clone())),
            ("SNAPSHOT", []) => Ok(Command::Snapshot(None)),
            ("SNAPSHOT", [limit]) => limit
                .parse()
                .map(|n| Command::Snapshot(Some(n)))
                .map_err(|_| format!("limite inválido: '{limit}'")),
            ("COUNT", []) => Ok(Command::Count),
            ("STATE", []) => Ok(Command::State),
            ("QUIT" | "EXIT", []) => Ok(Command::Quit),
            ("GET" | "SNAPSHOT" | "COUNT" | "STATE" | "QUIT" | "EXIT", _) => {
                Err(format!("número errado de argumentos para '{name}'"))
            }
            _ => Err(format!("comando desconhecido: '{name}'")),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kvmirror_cli=info,kvmirror_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let resp = args.resp_config();
    let store = RespStore::new(resp.clone());
    store
        .ping()
        .await
        .with_context(|| format!("store inacessível em {}", resp.addr()))?;

    let mirror = Mirror::new(store, args.mirror_config());
    info!(addr = %resp.addr(), db = resp.db, "espelhando store");

    // Modo comando único: bootstrap, espera um ciclo de refresh e responde.
    if !args.command.is_empty() {
        mirror.bootstrap().await?;
        tokio::time::sleep(mirror.config().drain_interval * 2).await;
        let reply = match Command::parse(&args.command) {
            Ok(command) => execute(&mirror, command).await,
            Err(e) => Some(Frame::Error(e)),
        };
        if let Some(reply) = reply {
            println!("{}", format_frame(&reply, 0));
        }
        mirror.close().await;
        return Ok(());
    }

    let runner = {
        let mirror = mirror.clone();
        tokio::spawn(async move {
            match mirror.run().await {
                Ok(()) | Err(MirrorError::Cancelled) | Err(MirrorError::Closed) => {}
                Err(e) => error!("mirror parou: {e}"),
            }
        })
    };

    repl(&mirror).await?;

    mirror.close().await;
    let _ = runner.await;
    Ok(())
}

async fn repl<S: RemoteStore>(mirror: &Mirror<S>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("kvmirror> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal recebido");
                break;
            }
        };
        let Some(line) = line else {
            break; // EOF
        };

        let tokens = tokenize(line.trim());
        if tokens.is_empty() {
            continue;
        }

        let reply = match Command::parse(&tokens) {
            Ok(command) => execute(mirror, command).await,
            Err(e) => Some(Frame::Error(e)),
        };
        match reply {
            Some(reply) => println!("{}", format_frame(&reply, 0)),
            None => break,
        }
    }

    Ok(())
}

/// Executa um comando; `None` encerra o prompt.
async fn execute<S: RemoteStore>(mirror: &Mirror<S>, command: Command) -> Option<Frame> {
    let reply = match command {
        Command::Get(key) => match mirror.get(&key).await {
            Ok(value) => Frame::Bulk(value),
            Err(MirrorError::NotFound) => Frame::Null,
            Err(e) => Frame::Error(e.to_string()),
        },
        Command::Snapshot(limit) => {
            let limit = limit.unwrap_or(usize::MAX);
            let mut entries = Vec::new();
            mirror.snapshot(|key, value| {
                if entries.len() < limit {
                    entries.push(entry_frame(key, value));
                }
            });
            Frame::Array(entries)
        }
        Command::Count => Frame::Integer(mirror.len() as i64),
        Command::State => Frame::Simple(mirror.state().to_string()),
        Command::Quit => return None,
    };
    Some(reply)
}

fn entry_frame(key: &str, value: &Bytes) -> Frame {
    Frame::Array(vec![Frame::bulk(key), Frame::Bulk(value.clone())])
}

/// Tokeniza a linha de input com suporte a strings quoted.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) if c == '\\' => match chars.next() {
                Some('n') => current.push('\n'),
                Some('t') => current.push('\t'),
                Some(other) => current.push(other),
                None => current.push('\\'),
            },
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Formata uma resposta para exibição humana.
fn format_frame(frame: &Frame, indent: usize) -> String {
    let pad = " ".repeat(indent);
    match frame {
        Frame::Simple(s) => format!("{pad}{s}"),
        Frame::Error(s) => format!("{pad}(error) {s}"),
        Frame::Integer(n) => format!("{pad}(integer) {n}"),
        Frame::Bulk(data) => match std::str::from_utf8(data) {
            Ok(s) => format!("{pad}\"{s}\""),
            Err(_) => format!("{pad}(binary) {} bytes", data.len()),
        },
        Frame::Null => format!("{pad}(nil)"),
        Frame::Array(frames) if frames.is_empty() => format!("{pad}(empty)"),
        Frame::Array(frames) => frames
            .iter()
            .enumerate()
            .map(|(i, f)| match f {
                Frame::Array(pair) if pair.len() == 2 => format!(
                    "{pad}{}) {} => {}",
                    i + 1,
                    format_frame(&pair[0], 0),
                    format_frame(&pair[1], 0)
                ),
                other => format!("{pad}{}) {}", i + 1, format_frame(other, 0)),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
