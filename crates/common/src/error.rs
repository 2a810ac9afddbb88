/// Erros de parsing do protocolo RESP.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame incompleto")]
    Incomplete,
    #[error("byte de tipo inválido: {0:#x}")]
    InvalidFrameType(u8),
    #[error("inteiro inválido: {0}")]
    InvalidInteger(String),
    #[error("comprimento de bulk inválido: {0}")]
    InvalidBulkLength(i64),
    #[error("frame excede tamanho máximo ({0} bytes)")]
    FrameTooLarge(usize),
    #[error("encoding inválido: {0}")]
    InvalidEncoding(String),
    #[error("resposta inesperada: {0}")]
    UnexpectedReply(String),
    #[error("erro do servidor: {0}")]
    ServerError(String),
}

/// Erros de parsing/validação de comandos.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("comando desconhecido: {0}")]
    Unknown(String),
    #[error("número errado de argumentos para '{0}'")]
    WrongArity(String),
    #[error("argumento inválido: {0}")]
    InvalidArgument(String),
}

/// Operação em uma lane, worker ou team já encerrado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("lane encerrada")]
pub struct ClosedError;

/// Erro top-level do mirror, visível para quem chama.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("chave não encontrada")]
    NotFound,
    #[error("transporte: {0}")]
    Transport(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("operação cancelada")]
    Cancelled,
    #[error("mirror encerrado")]
    Closed,
}

impl MirrorError {
    /// Falhas de transporte são transitórias; as demais não adianta repetir.
    pub fn is_transient(&self) -> bool {
        matches!(self, MirrorError::Transport(_))
    }

    /// Atalho para erros de transporte sem `io::Error` de origem.
    pub fn transport(kind: std::io::ErrorKind, msg: impl Into<String>) -> Self {
        MirrorError::Transport(std::io::Error::new(kind, msg.into()))
    }
}

impl From<ClosedError> for MirrorError {
    fn from(_: ClosedError) -> Self {
        MirrorError::Closed
    }
}

/// Result type alias.
pub type MirrorResult<T> = Result<T, MirrorError>;
