//! The connection manager: one task owning the registry and the message log.
//!
//! Handles talk to the task over a command channel. Session readers/writers,
//! probe tickers and reconnect timers run as separate tasks and report back
//! through a signal channel. Only the manager task mutates state, so every
//! command and signal is handled to completion before the next one.
//!
//! Signals carry the connection's `epoch`, which is bumped on every open
//! attempt and every teardown. A signal from an earlier epoch is stale and
//! ignored, so an aborted timer or a late frame can never touch a newer session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use persona_core::connections::{
    Connection, ConnectionId, ConnectionState, Direction, LogEntry, SendOutcome,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ManagerConfig;
use crate::error::{TransportError, WsError};
use crate::log::{MessageLog, entry_for_frame};
use crate::prober::PendingProbe;
use crate::registry::{ConnectionPatch, ConnectionRegistry, validate_address};
use crate::transport::{ABNORMAL_CLOSURE, Connector, Frame, NORMAL_CLOSURE, TransportSession};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const CLIENT_DISCONNECT_REASON: &str = "Client disconnect";

/// State changes published to subscribers.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    ConnectionChanged(Connection),
    ConnectionRemoved(ConnectionId),
    MessageLogged(LogEntry),
    MessagesCleared(Option<ConnectionId>),
    ReconnectScheduled {
        id: ConnectionId,
        attempt: u32,
        delay: Duration,
    },
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Register {
        name: String,
        url: String,
        reply: Reply<Result<Connection, WsError>>,
    },
    Deregister {
        id: ConnectionId,
        reply: Reply<bool>,
    },
    Update {
        id: ConnectionId,
        patch: ConnectionPatch,
        reply: Reply<Result<Connection, WsError>>,
    },
    Connect {
        id: ConnectionId,
        reply: Reply<Result<Connection, WsError>>,
    },
    Disconnect {
        id: ConnectionId,
        reply: Reply<Result<Connection, WsError>>,
    },
    Send {
        id: ConnectionId,
        text: String,
        reply: Reply<Result<SendOutcome, WsError>>,
    },
    Clear {
        id: Option<ConnectionId>,
        reply: Reply<Result<usize, WsError>>,
    },
    List {
        reply: Reply<Vec<Connection>>,
    },
    Get {
        id: ConnectionId,
        reply: Reply<Option<Connection>>,
    },
    FindByName {
        name: String,
        reply: Reply<Option<Connection>>,
    },
    Messages {
        id: Option<ConnectionId>,
        reply: Reply<Vec<LogEntry>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

enum Signal {
    Opened {
        id: ConnectionId,
        epoch: u64,
        session: TransportSession,
    },
    OpenFailed {
        id: ConnectionId,
        epoch: u64,
        error: TransportError,
    },
    Inbound {
        id: ConnectionId,
        epoch: u64,
        frame: Frame,
    },
    StreamError {
        id: ConnectionId,
        epoch: u64,
        error: TransportError,
    },
    StreamEnded {
        id: ConnectionId,
        epoch: u64,
    },
    Written {
        id: ConnectionId,
        frame: Frame,
        reply: Reply<Result<SendOutcome, WsError>>,
    },
    WriteFailed {
        id: ConnectionId,
        epoch: u64,
        error: TransportError,
        reply: Option<Reply<Result<SendOutcome, WsError>>>,
    },
    ProbeTick {
        id: ConnectionId,
        epoch: u64,
    },
    ProbeTimeout {
        id: ConnectionId,
        epoch: u64,
        nonce: String,
    },
    ReconnectDue {
        id: ConnectionId,
        token: u64,
    },
}

enum Outbound {
    Message {
        text: String,
        reply: Reply<Result<SendOutcome, WsError>>,
    },
    Probe(String),
    Close(String),
}

/// Clonable handle to a running connection manager.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ManagerEvent>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("running", &!self.commands.is_closed())
            .finish()
    }
}

impl ConnectionManager {
    /// Start the manager task on the current Tokio runtime.
    pub fn spawn(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let worker = ManagerLoop {
            log: MessageLog::new(config.log_capacity),
            config,
            connector,
            registry: ConnectionRegistry::new(),
            links: HashMap::new(),
            commands: commands_rx,
            signals_tx,
            signals: signals_rx,
            events: events.clone(),
            next_token: 0,
        };
        tokio::spawn(worker.run());

        Self {
            commands: commands_tx,
            events,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, WsError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| WsError::ManagerStopped)?;
        rx.await.map_err(|_| WsError::ManagerStopped)
    }

    /// Create a connection in `disconnected` state.
    pub async fn register(&self, name: &str, url: &str) -> Result<Connection, WsError> {
        let (name, url) = (name.to_string(), url.to_string());
        self.request(|reply| Command::Register { name, url, reply })
            .await?
    }

    /// Tear down and remove a connection with its log entries.
    /// Returns `false` when the id was not registered.
    pub async fn deregister(&self, id: ConnectionId) -> Result<bool, WsError> {
        self.request(|reply| Command::Deregister { id, reply }).await
    }

    /// Rename, re-address or flag a connection. A `disconnected` state closes
    /// any live session; lifecycle states are rejected with `InvalidState`.
    pub async fn update_state(
        &self,
        id: ConnectionId,
        patch: ConnectionPatch,
    ) -> Result<Connection, WsError> {
        self.request(|reply| Command::Update { id, patch, reply })
            .await?
    }

    /// Open the connection's session. Resolves once the attempt has either
    /// opened or failed; inspect the returned `state`.
    pub async fn connect(&self, id: ConnectionId) -> Result<Connection, WsError> {
        self.request(|reply| Command::Connect { id, reply }).await?
    }

    pub async fn disconnect(&self, id: ConnectionId) -> Result<Connection, WsError> {
        self.request(|reply| Command::Disconnect { id, reply })
            .await?
    }

    pub async fn send_message(
        &self,
        id: ConnectionId,
        text: impl Into<String>,
    ) -> Result<SendOutcome, WsError> {
        let text = text.into();
        self.request(|reply| Command::Send { id, text, reply })
            .await?
    }

    /// Clear one connection's log entries and counters, or everything.
    pub async fn clear_messages(&self, id: Option<ConnectionId>) -> Result<usize, WsError> {
        self.request(|reply| Command::Clear { id, reply }).await?
    }

    pub async fn connections(&self) -> Result<Vec<Connection>, WsError> {
        self.request(|reply| Command::List { reply }).await
    }

    pub async fn connection(&self, id: ConnectionId) -> Result<Connection, WsError> {
        self.request(|reply| Command::Get { id, reply })
            .await?
            .ok_or(WsError::UnknownConnection(id))
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Connection>, WsError> {
        let name = name.to_string();
        self.request(|reply| Command::FindByName { name, reply })
            .await
    }

    pub async fn messages(&self, id: Option<ConnectionId>) -> Result<Vec<LogEntry>, WsError> {
        self.request(|reply| Command::Messages { id, reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Disconnect everything and stop the manager task.
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
    }
}

struct Opening {
    task: AbortHandle,
    waiters: Vec<Reply<Result<Connection, WsError>>>,
}

struct LiveSession {
    writer: mpsc::UnboundedSender<Outbound>,
    reader: AbortHandle,
    ticker: AbortHandle,
}

impl LiveSession {
    /// Stop reading and probing. With a `close_reason` a normal-closure frame
    /// is queued before the writer is released.
    fn shutdown(self, close_reason: Option<&str>) {
        if let Some(reason) = close_reason {
            let _ = self.writer.send(Outbound::Close(reason.to_string()));
        }
        self.reader.abort();
        self.ticker.abort();
    }
}

#[derive(Default)]
struct Link {
    epoch: u64,
    opening: Option<Opening>,
    session: Option<LiveSession>,
    reconnect: Option<(u64, AbortHandle)>,
    probe: Option<(PendingProbe, AbortHandle)>,
}

impl Link {
    fn cancel_reconnect(&mut self) {
        if let Some((_, handle)) = self.reconnect.take() {
            handle.abort();
        }
    }

    fn cancel_probe(&mut self) {
        if let Some((_, handle)) = self.probe.take() {
            handle.abort();
        }
    }

    fn cancel_opening(&mut self) -> Vec<Reply<Result<Connection, WsError>>> {
        match self.opening.take() {
            Some(opening) => {
                opening.task.abort();
                opening.waiters
            }
            None => Vec::new(),
        }
    }

    /// Drop the live session (if any) and invalidate in-flight signals.
    fn teardown_session(&mut self, close_reason: Option<&str>) -> bool {
        self.cancel_probe();
        self.epoch += 1;
        match self.session.take() {
            Some(session) => {
                session.shutdown(close_reason);
                true
            }
            None => false,
        }
    }
}

struct ManagerLoop {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    registry: ConnectionRegistry,
    log: MessageLog,
    links: HashMap<ConnectionId, Link>,
    commands: mpsc::UnboundedReceiver<Command>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals: mpsc::UnboundedReceiver<Signal>,
    events: broadcast::Sender<ManagerEvent>,
    next_token: u64,
}

impl ManagerLoop {
    async fn run(mut self) {
        tracing::debug!(event = "ws_manager_started", "Connection manager started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown_all();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown_all();
                        break;
                    }
                },
                Some(signal) = self.signals.recv() => self.handle_signal(signal),
            }
        }
        tracing::debug!(event = "ws_manager_stopped", "Connection manager stopped");
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    fn emit_connection(&self, id: ConnectionId) {
        if let Some(conn) = self.registry.get(id) {
            self.emit(ManagerEvent::ConnectionChanged(conn.clone()));
        }
    }

    fn snapshot(&self, id: ConnectionId) -> Result<Connection, WsError> {
        self.registry
            .get(id)
            .cloned()
            .ok_or(WsError::UnknownConnection(id))
    }

    fn apply(&mut self, id: ConnectionId, patch: ConnectionPatch) {
        if self.registry.update(id, patch).is_ok() {
            self.emit_connection(id);
        }
    }

    fn state_of(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.registry.get(id).map(|conn| conn.state)
    }

    fn is_current(&self, id: ConnectionId, epoch: u64) -> bool {
        self.links.get(&id).is_some_and(|link| link.epoch == epoch)
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Register { name, url, reply } => {
                let result = self.registry.register(&name, &url);
                if let Ok(conn) = &result {
                    self.links.insert(conn.id, Link::default());
                    tracing::info!(
                        event = "ws_connection_registered",
                        connection_id = %conn.id,
                        name = %conn.name,
                        url = %conn.url,
                        "Connection registered"
                    );
                    self.emit(ManagerEvent::ConnectionChanged(conn.clone()));
                }
                let _ = reply.send(result);
            }
            Command::Deregister { id, reply } => {
                let _ = reply.send(self.deregister(id));
            }
            Command::Update { id, patch, reply } => {
                let _ = reply.send(self.update(id, patch));
            }
            Command::Connect { id, reply } => {
                if !self.registry.contains(id) {
                    let _ = reply.send(Err(WsError::UnknownConnection(id)));
                    return;
                }
                self.begin_open(id, ConnectionState::Connecting, Some(reply));
            }
            Command::Disconnect { id, reply } => {
                let _ = reply.send(self.disconnect(id));
            }
            Command::Send { id, text, reply } => self.send(id, text, reply),
            Command::Clear { id, reply } => {
                let _ = reply.send(self.clear(id));
            }
            Command::List { reply } => {
                let _ = reply.send(self.registry.list());
            }
            Command::Get { id, reply } => {
                let _ = reply.send(self.registry.get(id).cloned());
            }
            Command::FindByName { name, reply } => {
                let _ = reply.send(self.registry.find_by_name(&name).cloned());
            }
            Command::Messages { id, reply } => {
                let _ = reply.send(self.log.entries(id));
            }
            Command::Shutdown { reply } => {
                self.teardown_all();
                let _ = reply.send(());
            }
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Opened { id, epoch, session } => self.on_opened(id, epoch, session),
            Signal::OpenFailed { id, epoch, error } => self.on_open_failed(id, epoch, error),
            Signal::Inbound { id, epoch, frame } => {
                if self.is_current(id, epoch) {
                    self.on_inbound(id, frame);
                }
            }
            Signal::StreamError { id, epoch, error } => {
                if self.is_current(id, epoch) {
                    tracing::warn!(
                        event = "ws_transport_error",
                        connection_id = %id,
                        error = %error,
                        "WebSocket transport error"
                    );
                    self.apply(id, ConnectionPatch::error(format!("WebSocket error: {error}")));
                }
            }
            Signal::StreamEnded { id, epoch } => {
                if self.is_current(id, epoch) {
                    self.on_closed(id, ABNORMAL_CLOSURE, "Connection lost".to_string());
                }
            }
            Signal::Written { id, frame, reply } => {
                let outcome = match entry_for_frame(id, Direction::Sent, &frame) {
                    Some(entry) if self.registry.contains(id) => {
                        self.record(entry.clone());
                        Ok(SendOutcome::Sent { entry })
                    }
                    _ => Err(WsError::UnknownConnection(id)),
                };
                let _ = reply.send(outcome);
            }
            Signal::WriteFailed {
                id,
                epoch,
                error,
                reply,
            } => {
                let message = format!("Failed to send message: {error}");
                tracing::warn!(
                    event = "ws_send_failed",
                    connection_id = %id,
                    error = %error,
                    "WebSocket write failed"
                );
                if self.is_current(id, epoch) {
                    self.apply(id, ConnectionPatch::error(message.clone()));
                }
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(SendOutcome::Failed { message }));
                }
            }
            Signal::ProbeTick { id, epoch } => {
                if self.is_current(id, epoch) {
                    self.on_probe_tick(id, epoch);
                }
            }
            Signal::ProbeTimeout { id, epoch, nonce } => {
                if !self.is_current(id, epoch) {
                    return;
                }
                let Some(link) = self.links.get_mut(&id) else {
                    return;
                };
                if link.probe.as_ref().is_some_and(|(probe, _)| probe.nonce == nonce) {
                    link.probe = None;
                    tracing::debug!(
                        event = "ws_probe_timeout",
                        connection_id = %id,
                        "Liveness probe timed out; round trip not measured"
                    );
                }
            }
            Signal::ReconnectDue { id, token } => self.on_reconnect_due(id, token),
        }
    }

    fn record(&mut self, entry: LogEntry) {
        let id = entry.connection_id;
        self.registry.record(&entry);
        self.log.append(entry.clone());
        self.emit(ManagerEvent::MessageLogged(entry));
        self.emit_connection(id);
    }

    fn begin_open(
        &mut self,
        id: ConnectionId,
        state: ConnectionState,
        reply: Option<Reply<Result<Connection, WsError>>>,
    ) {
        let current = self.state_of(id);
        let Some(link) = self.links.get_mut(&id) else {
            if let Some(reply) = reply {
                let _ = reply.send(Err(WsError::UnknownConnection(id)));
            }
            return;
        };

        link.cancel_reconnect();

        if let Some(opening) = link.opening.as_mut() {
            // An attempt is already in flight; wait for it instead of restarting.
            if let Some(reply) = reply {
                opening.waiters.push(reply);
            }
            return;
        }

        if link.session.is_some() {
            if current == Some(ConnectionState::Connected) {
                if let Some(reply) = reply {
                    let _ = reply.send(self.snapshot(id));
                }
                return;
            }
            // A session left attached in error state is replaced.
            link.teardown_session(Some(CLIENT_DISCONNECT_REASON));
        }

        link.cancel_probe();
        link.epoch += 1;
        let epoch = link.epoch;

        let url = match self.registry.get(id).map(|conn| validate_address(&conn.url)) {
            Some(Ok(url)) => url,
            Some(Err(err)) => {
                self.apply(id, ConnectionPatch::error(err.to_string()));
                if let Some(reply) = reply {
                    let _ = reply.send(self.snapshot(id));
                }
                return;
            }
            None => return,
        };

        let connector = Arc::clone(&self.connector);
        let signals = self.signals_tx.clone();
        let task = tokio::spawn(async move {
            let signal = match connector.open(&url).await {
                Ok(session) => Signal::Opened { id, epoch, session },
                Err(error) => Signal::OpenFailed { id, epoch, error },
            };
            let _ = signals.send(signal);
        });

        if let Some(link) = self.links.get_mut(&id) {
            link.opening = Some(Opening {
                task: task.abort_handle(),
                waiters: reply.into_iter().collect(),
            });
        }

        tracing::info!(
            event = "ws_connect_started",
            connection_id = %id,
            state = %state,
            "Opening WebSocket session"
        );
        self.apply(id, ConnectionPatch::state(state));
    }

    fn on_opened(&mut self, id: ConnectionId, epoch: u64, session: TransportSession) {
        let waiters = match self.links.get_mut(&id) {
            Some(link) if link.epoch == epoch && link.opening.is_some() => {
                link.cancel_opening()
            }
            _ => {
                discard_session(session);
                return;
            }
        };

        let live = self.attach_session(id, epoch, session);
        if let Some(link) = self.links.get_mut(&id) {
            link.session = Some(live);
        }

        if let Some(conn) = self.registry.mark_connected(id) {
            tracing::info!(
                event = "ws_connected",
                connection_id = %id,
                name = %conn.name,
                "WebSocket session open"
            );
            self.emit(ManagerEvent::ConnectionChanged(conn));
        }

        for waiter in waiters {
            let _ = waiter.send(self.snapshot(id));
        }
    }

    fn on_open_failed(&mut self, id: ConnectionId, epoch: u64, error: TransportError) {
        let waiters = match self.links.get_mut(&id) {
            Some(link) if link.epoch == epoch && link.opening.is_some() => {
                link.cancel_opening()
            }
            _ => return,
        };

        tracing::warn!(
            event = "ws_connect_failed",
            connection_id = %id,
            error = %error,
            "WebSocket session failed to open"
        );
        self.apply(id, ConnectionPatch::error(format!("Failed to connect: {error}")));
        if self.config.reconnect.retry_on_open_failure {
            self.schedule_reconnect(id);
        }

        for waiter in waiters {
            let _ = waiter.send(self.snapshot(id));
        }
    }

    /// Spawn the reader, writer and probe ticker for a freshly opened session.
    fn attach_session(
        &self,
        id: ConnectionId,
        epoch: u64,
        session: TransportSession,
    ) -> LiveSession {
        let TransportSession { mut sink, mut stream } = session;

        let signals = self.signals_tx.clone();
        let reader = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let signal = match item {
                    Ok(frame) => {
                        let is_close = matches!(frame, Frame::Close { .. });
                        let sent = signals.send(Signal::Inbound { id, epoch, frame });
                        if is_close || sent.is_err() {
                            return;
                        }
                        continue;
                    }
                    Err(error) => Signal::StreamError { id, epoch, error },
                };
                if signals.send(signal).is_err() {
                    return;
                }
            }
            let _ = signals.send(Signal::StreamEnded { id, epoch });
        });

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Outbound>();
        let signals = self.signals_tx.clone();
        tokio::spawn(async move {
            while let Some(outbound) = writer_rx.recv().await {
                match outbound {
                    Outbound::Message { text, reply } => {
                        let frame = Frame::Text(text);
                        let signal = match sink.send(frame.clone()).await {
                            Ok(()) => Signal::Written { id, frame, reply },
                            Err(error) => Signal::WriteFailed {
                                id,
                                epoch,
                                error,
                                reply: Some(reply),
                            },
                        };
                        let _ = signals.send(signal);
                    }
                    Outbound::Probe(payload) => {
                        if let Err(error) = sink.send(Frame::Text(payload)).await {
                            let _ = signals.send(Signal::WriteFailed {
                                id,
                                epoch,
                                error,
                                reply: None,
                            });
                        }
                    }
                    Outbound::Close(reason) => {
                        let _ = sink.send(Frame::normal_close(reason)).await;
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        });

        let signals = self.signals_tx.clone();
        let period = self.config.probe.interval;
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if signals.send(Signal::ProbeTick { id, epoch }).is_err() {
                    return;
                }
            }
        });

        LiveSession {
            writer: writer_tx,
            reader: reader.abort_handle(),
            ticker: ticker.abort_handle(),
        }
    }

    fn on_inbound(&mut self, id: ConnectionId, frame: Frame) {
        if let Frame::Close { code, reason } = frame {
            self.on_closed(id, code, reason);
            return;
        }

        if let Some((probe, timeout)) = self.take_matching_probe(id, &frame) {
            timeout.abort();
            let elapsed = probe.elapsed_ms();
            if let Some(conn) = self.registry.get_mut(id) {
                conn.ping = Some(elapsed);
            }
            tracing::debug!(
                event = "ws_probe_measured",
                connection_id = %id,
                ping_ms = elapsed,
                "Liveness probe round trip measured"
            );
            self.emit_connection(id);
            return;
        }

        if let Some(entry) = entry_for_frame(id, Direction::Received, &frame) {
            self.record(entry);
        }
    }

    /// Take the pending probe if `frame` is its echo.
    fn take_matching_probe(
        &mut self,
        id: ConnectionId,
        frame: &Frame,
    ) -> Option<(PendingProbe, AbortHandle)> {
        let Frame::Text(text) = frame else {
            return None;
        };
        let link = self.links.get_mut(&id)?;
        if link.probe.as_ref()?.0.matches(text) {
            link.probe.take()
        } else {
            None
        }
    }

    fn on_closed(&mut self, id: ConnectionId, code: u16, reason: String) {
        if let Some(link) = self.links.get_mut(&id) {
            link.teardown_session(None);
        }

        if code == NORMAL_CLOSURE {
            tracing::info!(
                event = "ws_closed",
                connection_id = %id,
                code,
                reason = %reason,
                "WebSocket closed normally"
            );
            self.apply(id, ConnectionPatch::state(ConnectionState::Disconnected));
            return;
        }

        let message = if reason.trim().is_empty() {
            format!("Connection closed abnormally (code {code})")
        } else {
            reason
        };
        tracing::warn!(
            event = "ws_closed_abnormally",
            connection_id = %id,
            code,
            reason = %message,
            "WebSocket closed abnormally"
        );
        self.apply(id, ConnectionPatch::error(message));
        self.schedule_reconnect(id);
    }

    fn schedule_reconnect(&mut self, id: ConnectionId) {
        let Some(attempts) = self.registry.get(id).map(|conn| conn.reconnect_attempts) else {
            return;
        };
        let attempt = attempts + 1;
        let policy = &self.config.reconnect;

        if !policy.allows_attempt(attempt) {
            tracing::warn!(
                event = "ws_reconnect_exhausted",
                connection_id = %id,
                attempts,
                "Giving up on automatic reconnection"
            );
            self.apply(
                id,
                ConnectionPatch::error(format!(
                    "Reconnection abandoned after {attempts} attempts"
                )),
            );
            return;
        }

        let delay = policy.delay_with_jitter(attempt, rand::random::<f64>());
        self.next_token += 1;
        let token = self.next_token;

        let signals = self.signals_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(Signal::ReconnectDue { id, token });
        });

        if let Some(link) = self.links.get_mut(&id) {
            link.cancel_reconnect();
            link.reconnect = Some((token, timer.abort_handle()));
        }

        tracing::info!(
            event = "ws_reconnect_scheduled",
            connection_id = %id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnection scheduled"
        );
        self.emit(ManagerEvent::ReconnectScheduled { id, attempt, delay });
    }

    fn on_reconnect_due(&mut self, id: ConnectionId, token: u64) {
        let Some(link) = self.links.get_mut(&id) else {
            return;
        };
        if !link.reconnect.as_ref().is_some_and(|(armed, _)| *armed == token) {
            return;
        }
        link.reconnect = None;

        // Anything other than `error` means a manual action intervened.
        if self.state_of(id) != Some(ConnectionState::Error) {
            return;
        }
        if let Some(conn) = self.registry.get_mut(id) {
            conn.reconnect_attempts += 1;
        }
        self.begin_open(id, ConnectionState::Reconnecting, None);
    }

    fn on_probe_tick(&mut self, id: ConnectionId, epoch: u64) {
        if self.state_of(id) != Some(ConnectionState::Connected) {
            return;
        }
        let timeout = self.config.probe.timeout;
        let signals = self.signals_tx.clone();
        let Some(link) = self.links.get_mut(&id) else {
            return;
        };
        if link.probe.is_some() {
            return;
        }
        let Some(session) = link.session.as_ref() else {
            return;
        };

        let probe = PendingProbe::start();
        if session
            .writer
            .send(Outbound::Probe(probe.ping_payload()))
            .is_err()
        {
            return;
        }

        let nonce = probe.nonce.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = signals.send(Signal::ProbeTimeout { id, epoch, nonce });
        });
        link.probe = Some((probe, timer.abort_handle()));
    }

    fn send(&mut self, id: ConnectionId, text: String, reply: Reply<Result<SendOutcome, WsError>>) {
        let Some(state) = self.state_of(id) else {
            let _ = reply.send(Err(WsError::UnknownConnection(id)));
            return;
        };

        let writer = self
            .links
            .get(&id)
            .and_then(|link| link.session.as_ref())
            .map(|session| session.writer.clone());

        match writer {
            Some(writer) if state == ConnectionState::Connected => {
                if let Err(mpsc::error::SendError(Outbound::Message { reply, .. })) =
                    writer.send(Outbound::Message { text, reply })
                {
                    let message = "Failed to send message: session writer stopped".to_string();
                    self.apply(id, ConnectionPatch::error(message.clone()));
                    let _ = reply.send(Ok(SendOutcome::Failed { message }));
                }
            }
            _ => {
                tracing::warn!(
                    event = "ws_send_skipped",
                    connection_id = %id,
                    state = %state,
                    "Cannot send message: connection is not connected"
                );
                let _ = reply.send(Ok(SendOutcome::Skipped { state }));
            }
        }
    }

    /// Lifecycle states belong to the link; a patch may only park the
    /// connection (`disconnected`) or flag it (`error`).
    fn update(&mut self, id: ConnectionId, mut patch: ConnectionPatch) -> Result<Connection, WsError> {
        if !self.registry.contains(id) {
            return Err(WsError::UnknownConnection(id));
        }
        match patch.state {
            Some(
                state @ (ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting),
            ) => Err(WsError::InvalidState(state)),
            Some(ConnectionState::Disconnected) => {
                patch.state = None;
                patch.error = None;
                self.registry.update(id, patch)?;
                self.disconnect(id)
            }
            _ => {
                let conn = self.registry.update(id, patch)?;
                self.emit_connection(id);
                Ok(conn)
            }
        }
    }

    fn disconnect(&mut self, id: ConnectionId) -> Result<Connection, WsError> {
        if !self.registry.contains(id) {
            return Err(WsError::UnknownConnection(id));
        }

        let (had_session, waiters) = match self.links.get_mut(&id) {
            Some(link) => {
                link.cancel_reconnect();
                let waiters = link.cancel_opening();
                let had_session = link.teardown_session(Some(CLIENT_DISCONNECT_REASON));
                (had_session, waiters)
            }
            None => (false, Vec::new()),
        };

        if let Some(conn) = self.registry.get_mut(id) {
            conn.reconnect_attempts = 0;
        }
        self.apply(id, ConnectionPatch::state(ConnectionState::Disconnected));
        if had_session {
            tracing::info!(
                event = "ws_disconnected",
                connection_id = %id,
                "WebSocket session closed by client"
            );
        }

        let snapshot = self.snapshot(id);
        for waiter in waiters {
            let _ = waiter.send(self.snapshot(id));
        }
        snapshot
    }

    fn deregister(&mut self, id: ConnectionId) -> bool {
        if !self.registry.contains(id) {
            return false;
        }
        let _ = self.disconnect(id);
        self.links.remove(&id);
        self.registry.remove(id);
        let purged = self.log.clear(Some(id));
        tracing::info!(
            event = "ws_connection_removed",
            connection_id = %id,
            purged_entries = purged,
            "Connection removed"
        );
        self.emit(ManagerEvent::ConnectionRemoved(id));
        true
    }

    fn clear(&mut self, id: Option<ConnectionId>) -> Result<usize, WsError> {
        if let Some(id) = id {
            if !self.registry.contains(id) {
                return Err(WsError::UnknownConnection(id));
            }
        }
        let cleared = self.log.clear(id);
        self.registry.reset_counters(id);
        self.emit(ManagerEvent::MessagesCleared(id));
        match id {
            Some(id) => self.emit_connection(id),
            None => {
                for conn in self.registry.list() {
                    self.emit(ManagerEvent::ConnectionChanged(conn));
                }
            }
        }
        Ok(cleared)
    }

    fn teardown_all(&mut self) {
        let ids: Vec<ConnectionId> = self.links.keys().copied().collect();
        for id in ids {
            let _ = self.disconnect(id);
        }
    }
}

/// Close a session that opened after its attempt was cancelled.
fn discard_session(session: TransportSession) {
    let TransportSession { mut sink, .. } = session;
    tokio::spawn(async move {
        let _ = sink.send(Frame::normal_close(CLIENT_DISCONNECT_REASON)).await;
        let _ = sink.close().await;
    });
}
