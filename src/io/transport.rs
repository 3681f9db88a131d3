//! Byte-stream transports
//!
//! A [`Transport`] moves opaque text chunks in both directions and knows
//! nothing about message boundaries; framing lives in `rpc::framing`. The
//! stream variant is used for the host's own stdio, for the daemon's pipes
//! and for in-memory duplex pairs in tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{trace, warn};

const CHUNK_SIZE: usize = 8192;

#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error>;

    /// Next chunk of text. Chunks carry no message boundaries.
    async fn receive(&mut self) -> Result<String, Self::Error>;

    async fn close(&mut self) -> Result<(), Self::Error>;

    fn is_connected(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum StreamTransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Writer task has stopped")]
    WriterGone,
}

/// Holds back an incomplete trailing UTF-8 sequence until its remaining
/// bytes arrive. Bytes that can never start valid UTF-8 are dropped.
#[derive(Debug, Default)]
struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            let error = match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(error) => error,
            };
            let valid = error.valid_up_to();
            if let Ok(prefix) = std::str::from_utf8(&self.pending[..valid]) {
                text.push_str(prefix);
            }
            match error.error_len() {
                // Truncated sequence at the end: wait for more bytes
                None => {
                    self.pending.drain(..valid);
                    break;
                }
                Some(invalid) => {
                    warn!(bytes = invalid, "Dropping invalid UTF-8 from stream");
                    self.pending.drain(..valid + invalid);
                }
            }
        }
        (!text.is_empty()).then_some(text)
    }

    fn leftover(&self) -> usize {
        self.pending.len()
    }
}

async fn pump_writes<W>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = outgoing.recv().await {
        trace!(len = chunk.len(), "transport write");
        let written = async {
            writer.write_all(chunk.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!("Transport write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn pump_reads<R>(mut reader: R, incoming: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Utf8Accumulator::default();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Transport read failed: {}", e);
                break;
            }
        };
        if let Some(text) = decoder.push(&buffer[..n])
            && incoming.send(text).is_err()
        {
            return;
        }
    }
    if decoder.leftover() > 0 {
        warn!(bytes = decoder.leftover(), "Stream ended inside a UTF-8 sequence");
    }
    trace!("transport reader reached EOF");
}

/// Transport over any async reader/writer pair
///
/// Reads and writes run on their own tasks, which keeps `receive`
/// cancel-safe inside `select!`.
#[derive(Debug)]
pub struct StreamTransport {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: Option<mpsc::UnboundedReceiver<String>>,
    connected: bool,
}

impl StreamTransport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, to_write) = mpsc::unbounded_channel();
        let (from_read, incoming) = mpsc::unbounded_channel();
        tokio::spawn(pump_writes(writer, to_write));
        tokio::spawn(pump_reads(reader, from_read));
        Self {
            outgoing: Some(outgoing),
            incoming: Some(incoming),
            connected: true,
        }
    }

    /// This process's stdin and stdout
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl Transport for StreamTransport {
    type Error = StreamTransportError;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        let outgoing = self
            .outgoing
            .as_ref()
            .filter(|_| self.connected)
            .ok_or(StreamTransportError::Disconnected)?;
        outgoing
            .send(message.to_owned())
            .map_err(|_| StreamTransportError::WriterGone)
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        if !self.connected {
            return Err(StreamTransportError::Disconnected);
        }
        let incoming = self
            .incoming
            .as_mut()
            .ok_or(StreamTransportError::Disconnected)?;
        let chunk = incoming.recv().await;
        chunk.ok_or_else(|| {
            self.connected = false;
            StreamTransportError::Disconnected
        })
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.outgoing = None;
        self.incoming = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("Transport is disconnected")]
    Disconnected,
    #[error("No more responses available")]
    NoMoreResponses,
}

/// Scripted transport: replays queued chunks and records what was sent
#[derive(Clone, Default)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<String>>>,
    script: Arc<Mutex<VecDeque<String>>>,
    closed: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<String>) -> Self {
        let transport = Self::new();
        for response in responses {
            transport.add_response(response);
        }
        transport
    }

    pub fn add_response(&self, response: String) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn has_responses(&self) -> bool {
        self.script.lock().is_ok_and(|script| !script.is_empty())
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        if self.closed {
            return Err(MockTransportError::Disconnected);
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.to_owned());
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        if self.closed {
            return Err(MockTransportError::Disconnected);
        }
        let next = self.script.lock().ok().and_then(|mut script| script.pop_front());
        next.ok_or(MockTransportError::NoMoreResponses)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.closed = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_transport_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let mut left = StreamTransport::new(client_read, client_write);
        let mut right = StreamTransport::new(server_read, server_write);

        left.send("hello world").await.unwrap();
        let received = right.receive().await.unwrap();
        assert_eq!(received, "hello world");

        assert!(left.is_connected());
        left.close().await.unwrap();
        assert!(!left.is_connected());
        assert!(left.send("late").await.is_err());
    }

    #[tokio::test]
    async fn test_stream_transport_reports_disconnect_on_eof() {
        let (client, server) = tokio::io::duplex(64);
        let (server_read, server_write) = tokio::io::split(server);
        let mut transport = StreamTransport::new(server_read, server_write);

        drop(client);

        let result = transport.receive().await;
        assert!(matches!(result, Err(StreamTransportError::Disconnected)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_mock_transport_send_receive() {
        let mut transport =
            MockTransport::with_responses(vec!["response1".to_string(), "response2".to_string()]);

        transport.send("message1").await.unwrap();
        transport.send("message2").await.unwrap();

        assert_eq!(transport.receive().await.unwrap(), "response1");
        assert_eq!(transport.receive().await.unwrap(), "response2");

        assert_eq!(transport.sent_messages(), vec!["message1", "message2"]);
        assert!(transport.receive().await.is_err());
    }

    #[tokio::test]
    async fn test_mock_transport_disconnect() {
        let mut transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.close().await.unwrap();

        assert!(!transport.is_connected());
        assert!(transport.send("test").await.is_err());
        assert!(transport.receive().await.is_err());
    }

    #[test]
    fn test_accumulator_holds_partial_sequences() {
        let mut decoder = Utf8Accumulator::default();

        assert_eq!(decoder.push("Hello ".as_bytes()).unwrap(), "Hello ");

        // First two bytes of "世"
        assert!(decoder.push(&[0xE4, 0xB8]).is_none());

        // Rest of "世" plus the first two bytes of "界"
        assert_eq!(decoder.push(&[0x96, 0xE7, 0x95]).unwrap(), "世");
        assert_eq!(decoder.leftover(), 2);

        assert_eq!(decoder.push(&[0x8C]).unwrap(), "界");
        assert_eq!(decoder.leftover(), 0);
    }

    #[test]
    fn test_accumulator_drops_invalid_bytes() {
        let mut decoder = Utf8Accumulator::default();

        assert_eq!(decoder.push(b"ok").unwrap(), "ok");
        assert!(decoder.push(&[0xFF]).is_none());
        assert_eq!(decoder.leftover(), 0);
        assert_eq!(
            decoder.push(b"Content-Length: 2\r\n\r\n{}").unwrap(),
            "Content-Length: 2\r\n\r\n{}"
        );

        // Invalid byte in the middle, then a truncated "世" at the end
        assert_eq!(decoder.push(&[b'a', 0xC0, b'b', 0xE4]).unwrap(), "ab");
        assert_eq!(decoder.leftover(), 1);
        assert_eq!(decoder.push(&[0xB8, 0x96]).unwrap(), "世");
    }

    #[tokio::test]
    async fn test_stream_transport_survives_invalid_bytes() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let mut transport = StreamTransport::new(server_read, server_write);
        let (_client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(&[0xFF]).await.unwrap();
        client_write.write_all(b"hello").await.unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_millis(500), async {
            let mut text = String::new();
            while text.len() < 5 {
                text.push_str(&transport.receive().await.unwrap());
            }
            text
        })
        .await
        .unwrap();
        assert_eq!(received, "hello");
    }

    #[tokio::test]
    async fn test_mock_transport_queue_is_shared_between_clones() {
        let transport = MockTransport::new();
        let mut reader = transport.clone();
        assert!(!transport.has_responses());

        transport.add_response("later".to_string());
        assert!(transport.has_responses());
        assert_eq!(reader.receive().await.unwrap(), "later");
        assert!(!transport.has_responses());
    }
}
