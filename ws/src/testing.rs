//! In-memory transport for exercising the manager without sockets.
//!
//! Every `open` call is surfaced to the test as an [`OpenRequest`], which the
//! test accepts (getting a [`MockPeer`] for the remote end) or rejects.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{sink, stream};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::error::TransportError;
use crate::transport::{Connector, Frame, TransportSession};

pub fn mock_transport() -> (Arc<MockConnector>, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(MockConnector { requests: tx }), MockServer { requests: rx })
}

#[derive(Debug)]
pub struct MockConnector {
    requests: mpsc::UnboundedSender<OpenRequest>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &Url) -> Result<TransportSession, TransportError> {
        let (decision_tx, decision_rx) = oneshot::channel();
        self.requests
            .send(OpenRequest {
                url: url.clone(),
                decision: decision_tx,
            })
            .map_err(|_| TransportError::Other("mock server is gone".to_string()))?;
        decision_rx
            .await
            .map_err(|_| TransportError::Other("open request dropped".to_string()))?
    }
}

#[derive(Debug)]
pub struct MockServer {
    requests: mpsc::UnboundedReceiver<OpenRequest>,
}

impl MockServer {
    pub async fn next_request(&mut self) -> OpenRequest {
        match self.requests.recv().await {
            Some(request) => request,
            None => panic!("mock connector dropped"),
        }
    }

    pub fn try_next_request(&mut self) -> Option<OpenRequest> {
        self.requests.try_recv().ok()
    }
}

#[derive(Debug)]
pub struct OpenRequest {
    pub url: Url,
    decision: oneshot::Sender<Result<TransportSession, TransportError>>,
}

impl OpenRequest {
    pub fn accept(self) -> MockPeer {
        let (to_client, client_inbound) = mpsc::unbounded_channel::<Result<Frame, TransportError>>();
        let (client_outbound, from_client) = mpsc::unbounded_channel::<Frame>();

        let sink = sink::unfold(client_outbound, |tx, frame: Frame| async move {
            tx.send(frame).map_err(|_| TransportError::Closed)?;
            Ok::<_, TransportError>(tx)
        });
        let stream = stream::unfold(client_inbound, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        let _ = self.decision.send(Ok(TransportSession {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }));

        MockPeer {
            to_client: Some(to_client),
            from_client,
        }
    }

    pub fn reject(self, message: &str) {
        let _ = self
            .decision
            .send(Err(TransportError::Other(message.to_string())));
    }
}

/// Remote end of an accepted mock session.
#[derive(Debug)]
pub struct MockPeer {
    to_client: Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MockPeer {
    fn push(&self, item: Result<Frame, TransportError>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(item);
        }
    }

    pub fn send_text(&self, text: &str) {
        self.push(Ok(Frame::Text(text.to_string())));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        self.push(Ok(Frame::Binary(bytes)));
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.push(Ok(Frame::Close {
            code,
            reason: reason.to_string(),
        }));
    }

    pub fn fail(&self, message: &str) {
        self.push(Err(TransportError::Other(message.to_string())));
    }

    /// End the inbound stream without a close frame.
    pub fn drop_stream(&mut self) {
        self.to_client = None;
    }

    /// Refuse further writes from the client.
    pub fn stop_reading(&mut self) {
        self.from_client.close();
    }

    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    pub fn try_next_frame(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }
}
