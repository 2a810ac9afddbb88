use bytes::Bytes;
use kvmirror_common::{CommandError, ProtocolError};
use tracing::warn;

use crate::{Frame, Parse};

/// Comandos que o mirror envia ao store autoritativo.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    Select(u32),
    Get(String),
    MGet(Vec<String>),
    Scan { cursor: u64, count: usize },
    PSubscribe(String),
}

impl Request {
    /// Encoda o comando como Frame para envio via RESP.
    pub fn to_frame(&self) -> Frame {
        match self {
            Request::Ping => Frame::array_from_strs(&["PING"]),
            Request::Select(db) => Frame::array_from_strs(&["SELECT", &db.to_string()]),
            Request::Get(key) => Frame::array_from_strs(&["GET", key]),
            Request::MGet(keys) => {
                let mut parts = Vec::with_capacity(keys.len() + 1);
                parts.push(Frame::bulk("MGET"));
                parts.extend(keys.iter().map(|k| Frame::bulk(k)));
                Frame::Array(parts)
            }
            Request::Scan { cursor, count } => Frame::array_from_strs(&[
                "SCAN",
                &cursor.to_string(),
                "COUNT",
                &count.to_string(),
            ]),
            Request::PSubscribe(pattern) => Frame::array_from_strs(&["PSUBSCRIBE", pattern]),
        }
    }

    /// Faz o parse de um Frame em um Request (lado servidor, usado em testes
    /// e em stores de teste que falam RESP).
    pub fn from_frame(frame: Frame) -> Result<Request, CommandError> {
        let mut parse = Parse::new(frame)?;
        let name = parse.next_string()?.to_uppercase();

        let request = match name.as_str() {
            "PING" => Request::Ping,
            "SELECT" => {
                let db = parse.next_int()?;
                let db = u32::try_from(db)
                    .map_err(|_| CommandError::InvalidArgument(format!("db inválido: {db}")))?;
                Request::Select(db)
            }
            "GET" => Request::Get(parse.next_string()?),
            "MGET" => {
                if !parse.has_remaining() {
                    return Err(CommandError::WrongArity("MGET".into()));
                }
                let mut keys = Vec::with_capacity(parse.remaining());
                while parse.has_remaining() {
                    keys.push(parse.next_string()?);
                }
                Request::MGet(keys)
            }
            "SCAN" => {
                let cursor = parse.next_int()?;
                let mut count = 10;
                if parse.has_remaining() {
                    let opt = parse.next_string()?.to_uppercase();
                    if opt != "COUNT" {
                        return Err(CommandError::InvalidArgument(opt));
                    }
                    count = parse.next_int()?.max(1) as usize;
                }
                Request::Scan {
                    cursor: cursor.max(0) as u64,
                    count,
                }
            }
            "PSUBSCRIBE" => Request::PSubscribe(parse.next_string()?),
            _ => return Err(CommandError::Unknown(name)),
        };

        parse.finish()?;
        Ok(request)
    }
}

/// Página de uma resposta SCAN: próximo cursor e as chaves retornadas.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

impl ScanPage {
    /// Interpreta `[cursor, [key, ...]]`.
    ///
    /// Chaves que não são UTF-8 não cabem no cache e são puladas com um
    /// aviso; o resto da página continua valendo.
    pub fn from_frame(frame: Frame) -> Result<ScanPage, ProtocolError> {
        let mut parse = Parse::new(frame.into_result()?).map_err(reply_error)?;
        let cursor = parse.next_int().map_err(reply_error)?;
        let mut keys = Vec::new();
        for f in parse.next_array().map_err(reply_error)? {
            match f {
                Frame::Bulk(data) => match bytes_to_key(data) {
                    Ok(key) => keys.push(key),
                    Err(e) => warn!(error = %e, "chave ignorada no SCAN"),
                },
                Frame::Simple(s) => keys.push(s),
                other => return Err(crate::frame::unexpected("chave", &other)),
            }
        }
        parse.finish().map_err(reply_error)?;

        Ok(ScanPage {
            cursor: u64::try_from(cursor)
                .map_err(|_| ProtocolError::InvalidInteger(cursor.to_string()))?,
            keys,
        })
    }

    pub fn to_frame(&self) -> Frame {
        Frame::Array(vec![
            Frame::bulk(&self.cursor.to_string()),
            Frame::Array(self.keys.iter().map(|k| Frame::bulk(k)).collect()),
        ])
    }
}

pub(crate) fn bytes_to_key(data: Bytes) -> Result<String, ProtocolError> {
    String::from_utf8(data.to_vec()).map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))
}

pub(crate) fn reply_error(e: CommandError) -> ProtocolError {
    ProtocolError::UnexpectedReply(e.to_string())
}
