//! Push connection lifecycle.
//!
//! One manager owns the websocket: it obtains a token, connects, replays
//! the handshake, keeps the heartbeat going, and reconnects on a fixed
//! backoff schedule. Decoded frames and state transitions are emitted to
//! the pipeline channel; the manager never interprets payloads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::model::ConnectionState;
use crate::protocol::{PushFrame, PushProtocol};
use crate::token::TokenGuard;

/// Delay before each automatic reconnect attempt, indexed by attempt
/// number. Attempts past the end of the table reuse the last entry.
pub const RECONNECT_SCHEDULE_MS: &[u64] = &[0, 2000, 5000, 10000, 30000];

/// Delay for the given reconnect attempt.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(RECONNECT_SCHEDULE_MS.len() - 1);
    Duration::from_millis(RECONNECT_SCHEDULE_MS[idx])
}

/// Events flowing from the transport into the processing pipeline.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded server event frame.
    Frame(PushFrame),
    /// The connection state changed.
    State(ConnectionState),
}

/// Limits and options for the managed connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Give up after this many consecutive failed attempts. `None` retries
    /// forever at the tail of the schedule.
    pub max_reconnect_attempts: Option<u32>,
    /// Logical group joined after every successful connect, when set.
    pub group: Option<String>,
}

/// Owns the push connection and its management task.
pub struct ConnectionManager<P: PushProtocol> {
    protocol: Arc<P>,
    token_guard: Arc<TokenGuard>,
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    is_connecting: Arc<AtomicBool>,
    reconnect_count: Arc<AtomicU32>,
    events_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: PushProtocol> ConnectionManager<P> {
    pub fn new(
        protocol: P,
        token_guard: Arc<TokenGuard>,
        config: ConnectionConfig,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            protocol: Arc::new(protocol),
            token_guard,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            is_connecting: Arc::new(AtomicBool::new(false)),
            reconnect_count: Arc::new(AtomicU32::new(0)),
            events_tx,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Reconnect attempts since the last successful connect.
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::SeqCst)
    }

    /// Open the push connection and keep it alive.
    ///
    /// Refused while a connection is active or an attempt is in flight; a
    /// refused call is a no-op, not an error. A credential failure aborts
    /// the attempt without retries, the caller may connect again later.
    pub async fn connect(&self) -> Result<()> {
        if self.state().is_active() {
            debug!("Connect refused, connection already active");
            return Ok(());
        }
        if self
            .is_connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Connect refused, attempt already in flight");
            return Ok(());
        }

        set_state(&self.state, &self.events_tx, ConnectionState::Connecting).await;

        let protocol = self.protocol.clone();
        let token_guard = self.token_guard.clone();
        let config = self.config.clone();
        let state = self.state.clone();
        let is_connecting = self.is_connecting.clone();
        let reconnect_count = self.reconnect_count.clone();
        let events_tx = self.events_tx.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            run_connection(
                protocol,
                token_guard,
                config,
                &state,
                &reconnect_count,
                &events_tx,
                cancel,
            )
            .await;

            is_connecting.store(false, Ordering::SeqCst);
            set_state(&state, &events_tx, ConnectionState::Disconnected).await;
            debug!("Push connection task stopped");
        });
        *self.task.lock() = Some(handle);

        Ok(())
    }

    /// Stop the transport and the management task.
    ///
    /// Safe to call when never connected or already stopped.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Update the shared state and emit a transition event when it changed.
async fn set_state(
    state: &RwLock<ConnectionState>,
    events_tx: &mpsc::Sender<TransportEvent>,
    next: ConnectionState,
) {
    {
        let mut guard = state.write();
        if *guard == next {
            return;
        }
        *guard = next;
    }
    let _ = events_tx.send(TransportEvent::State(next)).await;
}

async fn run_connection<P: PushProtocol>(
    protocol: Arc<P>,
    token_guard: Arc<TokenGuard>,
    config: ConnectionConfig,
    state: &RwLock<ConnectionState>,
    reconnect_count: &AtomicU32,
    events_tx: &mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        // Tokens are re-validated on every attempt; the session may have
        // refreshed while we were backing off.
        let token = tokio::select! {
            result = token_guard.valid_token() => match result {
                Ok(token) => token,
                Err(e) => {
                    warn!("Aborting push connection, no usable credential: {e}");
                    return;
                }
            },
            _ = cancel.cancelled() => return,
        };

        let url = match protocol.endpoint_url(&token) {
            Ok(url) => url,
            Err(e) => {
                error!("Failed to build hub URL: {e}");
                return;
            }
        };

        let mut current_stream = None;
        let connect_result = tokio::select! {
            result = connect_async(&url) => result,
            _ = cancel.cancelled() => return,
        };
        match connect_result {
            Ok((mut ws_stream, _)) => {
                let mut handshake_ok = true;
                for msg in protocol.handshake_messages() {
                    if let Err(e) = ws_stream.send(msg).await {
                        error!("Handshake failed: {e}");
                        handshake_ok = false;
                        break;
                    }
                }

                if handshake_ok {
                    if let Some(group) = config.group.as_deref()
                        && let Some(join) = protocol.join_group_message(group)
                        && let Err(e) = ws_stream.send(join).await
                    {
                        // Best effort, the stream error will surface below.
                        warn!("Group join failed: {e}");
                    }

                    attempt = 0;
                    reconnect_count.store(0, Ordering::SeqCst);
                    set_state(state, events_tx, ConnectionState::Connected).await;
                    info!("Connected to notification hub");
                    current_stream = Some(ws_stream);
                }
            }
            Err(e) => {
                warn!("Push connection failed: {e}");
            }
        }

        // Read/heartbeat loop, held until the connection breaks.
        if let Some(mut stream) = current_stream.take() {
            let heartbeat_enabled = protocol.heartbeat_message().is_some();
            let mut heartbeat_timer = tokio::time::interval(protocol.heartbeat_interval());
            heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = heartbeat_timer.tick(), if heartbeat_enabled => {
                        if let Some(msg) = protocol.heartbeat_message() {
                            if let Err(e) = stream.send(msg).await {
                                error!("Failed to send heartbeat: {e}");
                                break;
                            }
                            trace!("Sent heartbeat");
                        }
                    }

                    msg_opt = stream.next() => {
                        match msg_opt {
                            Some(Ok(msg)) => {
                                match protocol.decode_frame(&msg) {
                                    Ok(frames) => {
                                        for frame in frames {
                                            if events_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                                                // Pipeline gone, stop the transport.
                                                let _ = stream.close(None).await;
                                                return;
                                            }
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Failed to decode frame: {e}");
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error: {e}");
                                break;
                            }
                            None => {
                                warn!("WebSocket stream closed");
                                break;
                            }
                        }
                    }

                    _ = cancel.cancelled() => {
                        let _ = stream.close(None).await;
                        return;
                    }
                }
            }

            warn!("Notification hub connection lost");
        }

        if let Some(max) = config.max_reconnect_attempts
            && attempt >= max
        {
            error!("Max reconnect attempts reached");
            return;
        }
        let delay = reconnect_delay(attempt);
        attempt += 1;
        reconnect_count.store(attempt, Ordering::SeqCst);
        set_state(state, events_tx, ConnectionState::Reconnecting).await;
        debug!("Reconnecting to notification hub (attempt {attempt}, delay {delay:?})");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = cancel.cancelled() => return,
        }
    }
}
