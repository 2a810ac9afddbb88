use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use kvmirror_common::{MAX_FRAME_SIZE, ProtocolError};

/// Representação de um frame RESP2.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// Verifica se um frame completo está disponível no buffer sem alocar.
    /// Retorna Ok(()) se completo, Err(Incomplete) se precisa mais dados.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), ProtocolError> {
        match get_u8(src)? {
            b'+' | b'-' | b':' => get_line(src).map(|_| ()),
            b'$' => match get_length(src)? {
                None => Ok(()),
                Some(len) => skip(src, len + 2), // data + \r\n
            },
            b'*' => {
                let Some(count) = get_length(src)? else {
                    return Ok(());
                };
                for _ in 0..count {
                    Frame::check(src)?;
                }
                Ok(())
            }
            byte => Err(ProtocolError::InvalidFrameType(byte)),
        }
    }

    /// Faz o parse de um frame completo a partir do cursor.
    /// Deve ser chamado apenas após `check()` retornar Ok.
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, ProtocolError> {
        match get_u8(src)? {
            b'+' => Ok(Frame::Simple(get_utf8_line(src)?)),
            b'-' => Ok(Frame::Error(get_utf8_line(src)?)),
            b':' => Ok(Frame::Integer(get_decimal(src)?)),
            b'$' => {
                let Some(len) = get_length(src)? else {
                    return Ok(Frame::Null);
                };
                if src.remaining() < len + 2 {
                    return Err(ProtocolError::Incomplete);
                }
                let start = src.position() as usize;
                let data = Bytes::copy_from_slice(&src.get_ref()[start..start + len]);
                src.advance(len + 2);
                Ok(Frame::Bulk(data))
            }
            b'*' => {
                let Some(count) = get_length(src)? else {
                    return Ok(Frame::Null);
                };
                let mut frames = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    frames.push(Frame::parse(src)?);
                }
                Ok(Frame::Array(frames))
            }
            byte => Err(ProtocolError::InvalidFrameType(byte)),
        }
    }

    /// Tenta extrair um frame do início do buffer, consumindo os bytes usados.
    /// Retorna Ok(None) se o buffer ainda não contém um frame completo.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let mut cursor = Cursor::new(&buf[..]);
        match Frame::check(&mut cursor) {
            Ok(()) => {
                let len = cursor.position() as usize;
                cursor.set_position(0);
                let frame = Frame::parse(&mut cursor)?;
                buf.advance(len);
                Ok(Some(frame))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Encoda o frame no buffer de saída em formato RESP2.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => put_line(dst, b'+', s.as_bytes()),
            Frame::Error(s) => put_line(dst, b'-', s.as_bytes()),
            Frame::Integer(n) => put_line(dst, b':', n.to_string().as_bytes()),
            Frame::Bulk(data) => {
                put_line(dst, b'$', data.len().to_string().as_bytes());
                dst.put(data.as_ref());
                dst.put(&b"\r\n"[..]);
            }
            Frame::Null => dst.put(&b"$-1\r\n"[..]),
            Frame::Array(frames) => {
                put_line(dst, b'*', frames.len().to_string().as_bytes());
                for frame in frames {
                    frame.encode(dst);
                }
            }
        }
    }

    /// Converte uma resposta `-ERR ...` em `ProtocolError::ServerError`.
    pub fn into_result(self) -> Result<Frame, ProtocolError> {
        match self {
            Frame::Error(msg) => Err(ProtocolError::ServerError(msg)),
            other => Ok(other),
        }
    }

    /// Valor de uma resposta GET: bulk vira `Some`, nil vira `None`.
    pub fn into_optional_bulk(self) -> Result<Option<Bytes>, ProtocolError> {
        match self.into_result()? {
            Frame::Bulk(data) => Ok(Some(data)),
            Frame::Simple(s) => Ok(Some(Bytes::from(s))),
            Frame::Null => Ok(None),
            other => Err(unexpected("bulk", &other)),
        }
    }

    /// Elementos de uma resposta array.
    pub fn into_array(self) -> Result<Vec<Frame>, ProtocolError> {
        match self.into_result()? {
            Frame::Array(frames) => Ok(frames),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Helper: cria um Frame::Bulk a partir de &str.
    pub fn bulk(s: &str) -> Frame {
        Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Helper: cria um Array de Bulk strings a partir de &[&str].
    pub fn array_from_strs(strs: &[&str]) -> Frame {
        Frame::Array(strs.iter().map(|s| Frame::bulk(s)).collect())
    }
}

pub(crate) fn unexpected(expected: &str, got: &Frame) -> ProtocolError {
    ProtocolError::UnexpectedReply(format!("esperado {expected}, recebido {got:?}"))
}

fn put_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.put_u8(prefix);
    dst.put(body);
    dst.put(&b"\r\n"[..]);
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    if !src.has_remaining() {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_u8())
}

fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let start = src.position() as usize;
    let data: &'a [u8] = *src.get_ref();

    match data[start..].windows(2).position(|w| w == b"\r\n") {
        Some(offset) => {
            src.set_position((start + offset + 2) as u64);
            Ok(&data[start..start + offset])
        }
        None => Err(ProtocolError::Incomplete),
    }
}

fn get_utf8_line(src: &mut Cursor<&[u8]>) -> Result<String, ProtocolError> {
    let line = get_line(src)?;
    String::from_utf8(line.to_vec()).map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))
}

fn get_decimal(src: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    let line = get_line(src)?;
    let s = std::str::from_utf8(line).map_err(|e| ProtocolError::InvalidInteger(e.to_string()))?;
    s.parse::<i64>()
        .map_err(|e| ProtocolError::InvalidInteger(e.to_string()))
}

/// Lê o comprimento de um bulk/array. `-1` significa nil.
fn get_length(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, ProtocolError> {
    match get_decimal(src)? {
        -1 => Ok(None),
        n if n < 0 => Err(ProtocolError::InvalidBulkLength(n)),
        n if n as usize > MAX_FRAME_SIZE => Err(ProtocolError::FrameTooLarge(n as usize)),
        n => Ok(Some(n as usize)),
    }
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::Incomplete);
    }
    src.advance(n);
    Ok(())
}
