use kvmirror_common::ProtocolError;
use tracing::warn;

use crate::Frame;
use crate::Parse;
use crate::request::{bytes_to_key, reply_error};

/// Tipo de notificação de keyspace que o mirror distingue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEventKind {
    /// O valor mudou; precisa ser relido.
    Updated,
    /// A chave expirou (ou foi despejada) no store.
    Expired,
    /// A chave foi removida explicitamente.
    Deleted,
}

impl KeyEventKind {
    /// Mapeia o nome do evento (sufixo do canal `__keyevent@N__:<evento>`).
    pub fn from_event_name(name: &str) -> KeyEventKind {
        match name {
            "expired" | "evicted" => KeyEventKind::Expired,
            "del" | "unlink" => KeyEventKind::Deleted,
            _ => KeyEventKind::Updated,
        }
    }
}

/// Notificação `(kind, key)` vinda do store autoritativo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub kind: KeyEventKind,
    pub key: String,
}

impl KeyEvent {
    pub fn new(kind: KeyEventKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    /// Decodifica `[pmessage, pattern, channel, key]`.
    /// Confirmações de inscrição e outras mensagens retornam `Ok(None)`, assim
    /// como eventos de chaves que não são UTF-8 (nunca estão no cache).
    pub fn from_pmessage(frame: Frame) -> Result<Option<KeyEvent>, ProtocolError> {
        let mut parse = Parse::new(frame.into_result()?).map_err(reply_error)?;
        let kind = parse.next_string().map_err(reply_error)?;
        if !kind.eq_ignore_ascii_case("pmessage") {
            return Ok(None);
        }

        let _pattern = parse.next_bytes().map_err(reply_error)?;
        let channel = parse.next_string().map_err(reply_error)?;
        let key = parse.next_bytes().map_err(reply_error)?;
        parse.finish().map_err(reply_error)?;

        let event = event_name(&channel).ok_or_else(|| {
            ProtocolError::UnexpectedReply(format!("canal sem evento: {channel}"))
        })?;
        let key = match bytes_to_key(key) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, event, "evento de chave ignorado");
                return Ok(None);
            }
        };
        Ok(Some(KeyEvent::new(KeyEventKind::from_event_name(event), key)))
    }

    /// Encoda como uma pmessage de keyevent do banco `db`.
    pub fn to_pmessage(&self, db: u32, event: &str) -> Frame {
        Frame::Array(vec![
            Frame::bulk("pmessage"),
            Frame::bulk(&keyevent_pattern(db)),
            Frame::bulk(&format!("__keyevent@{db}__:{event}")),
            Frame::bulk(&self.key),
        ])
    }
}

/// Padrão PSUBSCRIBE para todos os eventos do banco `db`.
pub fn keyevent_pattern(db: u32) -> String {
    format!("__keyevent@{db}__:*")
}

fn event_name(channel: &str) -> Option<&str> {
    channel.split_once(':').map(|(_, event)| event)
}
