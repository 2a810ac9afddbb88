use bytes::Bytes;
use kvmirror_common::CommandError;

use crate::Frame;

/// Cursor sobre um Frame::Array para extrair elementos sequencialmente.
/// Serve tanto para argumentos de comandos quanto para respostas compostas
/// (SCAN, pmessage).
pub struct Parse {
    parts: std::vec::IntoIter<Frame>,
}

impl Parse {
    /// Cria um Parse a partir de um Frame. O frame deve ser Array.
    pub fn new(frame: Frame) -> Result<Parse, CommandError> {
        match frame {
            Frame::Array(parts) => Ok(Parse {
                parts: parts.into_iter(),
            }),
            _ => Err(CommandError::InvalidArgument("esperado array".into())),
        }
    }

    /// Retorna o próximo elemento como String (de Bulk ou Simple).
    pub fn next_string(&mut self) -> Result<String, CommandError> {
        match self.next()? {
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(data) => String::from_utf8(data.to_vec())
                .map_err(|_| CommandError::InvalidArgument("string UTF-8 inválida".into())),
            _ => Err(CommandError::InvalidArgument(
                "esperado string ou bulk".into(),
            )),
        }
    }

    /// Retorna o próximo elemento como Bytes (de Bulk).
    pub fn next_bytes(&mut self) -> Result<Bytes, CommandError> {
        match self.next()? {
            Frame::Bulk(data) => Ok(data),
            Frame::Simple(s) => Ok(Bytes::from(s)),
            _ => Err(CommandError::InvalidArgument("esperado bulk".into())),
        }
    }

    /// Retorna o próximo elemento como i64.
    pub fn next_int(&mut self) -> Result<i64, CommandError> {
        let text = match self.next()? {
            Frame::Integer(n) => return Ok(n),
            Frame::Bulk(data) => String::from_utf8(data.to_vec())
                .map_err(|_| CommandError::InvalidArgument("inteiro inválido".into()))?,
            Frame::Simple(s) => s,
            _ => return Err(CommandError::InvalidArgument("esperado inteiro".into())),
        };
        text.parse::<i64>()
            .map_err(|_| CommandError::InvalidArgument(format!("'{text}' não é um inteiro")))
    }

    /// Retorna o próximo elemento como lista de frames (array aninhado).
    pub fn next_array(&mut self) -> Result<Vec<Frame>, CommandError> {
        match self.next()? {
            Frame::Array(frames) => Ok(frames),
            _ => Err(CommandError::InvalidArgument("esperado array".into())),
        }
    }

    /// Verifica se todos os elementos foram consumidos.
    pub fn finish(&self) -> Result<(), CommandError> {
        if self.has_remaining() {
            Err(CommandError::InvalidArgument(
                "argumentos extras não esperados".into(),
            ))
        } else {
            Ok(())
        }
    }

    pub fn has_remaining(&self) -> bool {
        self.parts.len() > 0
    }

    pub fn remaining(&self) -> usize {
        self.parts.len()
    }

    fn next(&mut self) -> Result<Frame, CommandError> {
        self.parts
            .next()
            .ok_or_else(|| CommandError::InvalidArgument("argumentos insuficientes".into()))
    }
}
