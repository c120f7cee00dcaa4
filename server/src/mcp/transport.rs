//! MCP Transport Layer
//!
//! Newline-delimited JSON-RPC 2.0 over any async reader/writer pair; stdio
//! in production, in-memory buffers in tests.

use super::protocol::{JsonRpcRequest, JsonRpcResponse};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};

/// One line read from the client
#[derive(Debug)]
pub enum Incoming {
    Request(JsonRpcRequest),
    /// A non-empty line that is not a JSON-RPC request
    Malformed(String),
    /// Blank line
    Empty,
    Eof,
}

pub struct Transport<R, W> {
    reader: R,
    writer: W,
}

impl Transport<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> Transport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub async fn read(&mut self) -> io::Result<Incoming> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(Incoming::Eof);
        }

        let line = line.trim();
        if line.is_empty() {
            return Ok(Incoming::Empty);
        }

        match serde_json::from_str(line) {
            Ok(request) => Ok(Incoming::Request(request)),
            Err(e) => {
                tracing::warn!("Failed to parse JSON-RPC request: {}", e);
                Ok(Incoming::Malformed(e.to_string()))
            }
        }
    }

    pub async fn write(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        let json = serde_json::to_string(response)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}
