use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use kvmirror_common::{INITIAL_BUFFER_CAPACITY, MirrorError, MirrorResult};
use kvmirror_protocol::Frame;

/// Wrapper sobre TcpStream com buffer para leitura/escrita de frames RESP.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    pub async fn connect(addr: &str) -> MirrorResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Lê um frame completo do stream. Retorna None no EOF.
    pub async fn read_frame(&mut self) -> MirrorResult<Option<Frame>> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(MirrorError::transport(
                    std::io::ErrorKind::ConnectionReset,
                    "conexão encerrada no meio de um frame",
                ));
            }
        }
    }

    /// Como `read_frame`, mas EOF vira erro de transporte.
    pub async fn read_reply(&mut self) -> MirrorResult<Frame> {
        self.read_frame().await?.ok_or_else(|| {
            MirrorError::transport(
                std::io::ErrorKind::UnexpectedEof,
                "servidor fechou a conexão",
            )
        })
    }

    /// Escreve um frame no stream.
    pub async fn write_frame(&mut self, frame: &Frame) -> MirrorResult<()> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
