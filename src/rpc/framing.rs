//! Content-Length framing
//!
//! Each payload on the wire is preceded by a header block:
//!
//! Content-Length: <bytes>\r\n\r\n<payload>
//!
//! [`MessageFraming`] wraps a chunk-oriented [`Transport`] so that one
//! `send` or `receive` moves exactly one payload.

use crate::io::transport::Transport;
use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum FramingError<T: std::error::Error + Send + Sync + 'static> {
    #[error("Transport error: {0}")]
    Transport(T),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Transport disconnected")]
    Disconnected,
}

/// Upper bound on a single payload
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const HEADER_END: &str = "\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// Incremental splitter of a text stream into framed payloads
#[derive(Debug, Default)]
struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    fn extend(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Pop the next complete payload, if one is fully buffered
    fn next_frame<E>(&mut self) -> Result<Option<String>, FramingError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(header_len) = self.buffer.find(HEADER_END) else {
            return Ok(None);
        };
        let length = content_length(&self.buffer[..header_len])?;
        let body_start = header_len + HEADER_END.len();
        let body_end = body_start + length;
        if self.buffer.len() < body_end {
            trace!(missing = body_end - self.buffer.len(), "partial frame buffered");
            return Ok(None);
        }
        if !self.buffer.is_char_boundary(body_end) {
            return Err(FramingError::InvalidFormat(
                "Content-Length splits a UTF-8 character".to_string(),
            ));
        }

        let rest = self.buffer.split_off(body_end);
        let mut frame = std::mem::replace(&mut self.buffer, rest);
        frame.replace_range(..body_start, "");
        Ok(Some(frame))
    }
}

fn content_length<E>(header: &str) -> Result<usize, FramingError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let value = header
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(CONTENT_LENGTH))
        .map(|(_, value)| value.trim())
        .ok_or_else(|| FramingError::InvalidFormat("Missing Content-Length header".to_string()))?;

    let size: usize = value
        .parse()
        .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?;
    if size > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(size)
}

/// One payload per `send`/`receive` over any chunk transport
pub struct MessageFraming<T: Transport> {
    transport: T,
    decoder: FrameDecoder,
    ready: VecDeque<String>,
}

impl<T: Transport> MessageFraming<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            decoder: FrameDecoder::default(),
            ready: VecDeque::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn frame(message: &str) -> String {
        format!("Content-Length: {}{HEADER_END}{message}", message.len())
    }
}

#[async_trait]
impl<T: Transport> Transport for MessageFraming<T> {
    type Error = FramingError<T::Error>;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        trace!(len = message.len(), "sending frame");
        self.transport
            .send(&Self::frame(message))
            .await
            .map_err(FramingError::Transport)
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        while self.ready.is_empty() {
            if !self.transport.is_connected() {
                return Err(FramingError::Disconnected);
            }
            let chunk = self
                .transport
                .receive()
                .await
                .map_err(FramingError::Transport)?;
            self.decoder.extend(&chunk);
            while let Some(frame) = self.decoder.next_frame()? {
                self.ready.push_back(frame);
            }
        }
        self.ready.pop_front().ok_or(FramingError::Disconnected)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.transport
            .close()
            .await
            .map_err(FramingError::Transport)
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::{MockTransport, MockTransportError};

    #[tokio::test]
    async fn test_framing_send() {
        let mock = MockTransport::new();
        let mut framing = MessageFraming::new(mock);

        let message = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        framing.send(message).await.unwrap();

        let sent = framing.transport().sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            format!("Content-Length: {}\r\n\r\n{}", message.len(), message)
        );
    }

    #[tokio::test]
    async fn test_framing_partial_message() {
        let message = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        let header = format!("Content-Length: {}\r\n\r\n", message.len());

        let mock = MockTransport::with_responses(vec![
            format!("{}{}", header, &message[..10]),
            message[10..].to_string(),
        ]);
        let mut framing = MessageFraming::new(mock);

        assert_eq!(framing.receive().await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_framing_multiple_messages_in_one_chunk() {
        let first = r#"{"jsonrpc":"2.0","id":1,"method":"a"}"#;
        let second = r#"{"jsonrpc":"2.0","id":2,"method":"b"}"#;
        let combined = format!(
            "{}{}",
            MessageFraming::<MockTransport>::frame(first),
            MessageFraming::<MockTransport>::frame(second)
        );

        let mut framing = MessageFraming::new(MockTransport::with_responses(vec![combined]));

        assert_eq!(framing.receive().await.unwrap(), first);
        assert_eq!(framing.receive().await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_framing_multibyte_content() {
        let message = r#"{"jsonrpc":"2.0","method":"m","params":["héllo 世界"]}"#;
        let mut framing = MessageFraming::new(MockTransport::with_responses(vec![
            MessageFraming::<MockTransport>::frame(message),
        ]));

        assert_eq!(framing.receive().await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_framing_invalid_content_length() {
        let mut framing = MessageFraming::new(MockTransport::with_responses(vec![
            "Content-Length: invalid\r\n\r\n{}".to_string(),
        ]));

        match framing.receive().await {
            Err(FramingError::InvalidContentLength(value)) => assert_eq!(value, "invalid"),
            other => panic!("Expected InvalidContentLength error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_framing_message_too_large() {
        let large_size = MAX_MESSAGE_SIZE + 1;
        let mut framing = MessageFraming::new(MockTransport::with_responses(vec![format!(
            "Content-Length: {large_size}\r\n\r\n"
        )]));

        match framing.receive().await {
            Err(FramingError::MessageTooLarge { size, max }) => {
                assert_eq!(size, large_size);
                assert_eq!(max, MAX_MESSAGE_SIZE);
            }
            other => panic!("Expected MessageTooLarge error, got: {other:?}"),
        }
    }

    #[test]
    fn test_decoder_header_is_case_insensitive_and_ignores_others() {
        let mut decoder = FrameDecoder::default();
        decoder.extend("Content-Type: application/json\r\ncontent-length: 2\r\n\r\n{}");
        decoder.extend("Content-Length: 1\r\n");

        let frame = decoder.next_frame::<MockTransportError>().unwrap();
        assert_eq!(frame.as_deref(), Some("{}"));
        assert!(decoder.next_frame::<MockTransportError>().unwrap().is_none());
    }

    #[test]
    fn test_decoder_requires_content_length() {
        let mut decoder = FrameDecoder::default();
        decoder.extend("Content-Type: text/plain\r\n\r\n{}");
        assert!(matches!(
            decoder.next_frame::<MockTransportError>(),
            Err(FramingError::InvalidFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_framing_surfaces_transport_exhaustion() {
        let mut framing = MessageFraming::new(MockTransport::new());
        assert!(matches!(
            framing.receive().await,
            Err(FramingError::Transport(MockTransportError::NoMoreResponses))
        ));
    }
}
