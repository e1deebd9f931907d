//! Transport seam: how a connection's bidirectional message stream is opened.
//!
//! The manager only sees [`Frame`]s moving through a boxed sink/stream pair,
//! which keeps the WebSocket client swappable for in-memory transports.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use crate::error::TransportError;

/// Normal-closure close code.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported for a close frame that carries no status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// One application-level message on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
}

impl Frame {
    pub fn normal_close(reason: impl Into<String>) -> Self {
        Frame::Close {
            code: NORMAL_CLOSURE,
            reason: reason.into(),
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// A live, opened session.
pub struct TransportSession {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<TransportSession, TransportError>;
}

/// WebSocket client built on `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, url: &Url) -> Result<TransportSession, TransportError> {
        let (socket, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        tracing::debug!(
            event = "ws_handshake_complete",
            url = %url,
            status = response.status().as_u16(),
            "WebSocket handshake complete"
        );

        let (write, read) = socket.split();
        let sink = write
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| async move { Ok::<_, TransportError>(frame_to_message(frame)) });
        let stream = read.filter_map(|message| async move {
            match message {
                Ok(message) => message_to_frame(message).map(Ok),
                Err(err) => Some(Err(TransportError::from(err))),
            }
        });

        Ok(TransportSession {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}

/// Control frames (ping/pong) are answered by tungstenite itself and never
/// reach the manager.
fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        Message::Close(Some(frame)) => Some(Frame::Close {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_owned(),
        }),
        Message::Close(None) => Some(Frame::Close {
            code: NO_STATUS_RECEIVED,
            reason: String::new(),
        }),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}
