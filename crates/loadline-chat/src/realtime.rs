//! Realtime bridge: turns the backend's raw `messages` insert channel into a
//! filtered stream of decoded [`Message`]s, reconnecting when the channel
//! drops.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use loadline_backend::Backend;
use loadline_types::api::MessageFilter;
use loadline_types::events::{ChangeKind, MESSAGES_TABLE, RealtimeEvent};
use loadline_types::models::Message;

use crate::config::ReconnectPolicy;

const BRIDGE_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// The backend channel is open. `resumed` is set after a reconnect,
    /// when inserts may have been missed in between.
    Connected { resumed: bool },
    Message(Message),
    /// The backend channel dropped; a reconnect is pending.
    Disconnected,
    /// Reconnecting gave up. No further events follow.
    Stalled,
}

#[derive(Clone)]
pub struct RealtimeBridge {
    backend: Arc<dyn Backend>,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
}

impl RealtimeBridge {
    pub fn new(backend: Arc<dyn Backend>, policy: ReconnectPolicy, shutdown: CancellationToken) -> Self {
        Self {
            backend,
            policy,
            shutdown,
        }
    }

    /// Start forwarding inserts that match `filter`.
    pub fn subscribe(&self, filter: MessageFilter) -> RealtimeSubscription {
        let token = self.shutdown.child_token();
        let (tx, rx) = mpsc::channel(BRIDGE_BUFFER);
        let task = tokio::spawn(run_bridge(
            self.backend.clone(),
            self.policy.clone(),
            filter,
            token.clone(),
            tx,
        ));
        info!(?filter, "Realtime subscription opened");
        RealtimeSubscription {
            rx,
            token,
            task: Some(task),
        }
    }
}

/// A live subscription. Dropping it releases the backend channel.
pub struct RealtimeSubscription {
    rx: mpsc::Receiver<BridgeEvent>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RealtimeSubscription {
    /// Next event, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        self.rx.recv().await
    }

    pub fn cancel(self) {
        self.token.cancel();
    }

    /// Cancel and wait for the forwarding task to finish.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!("Realtime task ended abnormally: {}", e);
        }
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_bridge(
    backend: Arc<dyn Backend>,
    policy: ReconnectPolicy,
    filter: MessageFilter,
    token: CancellationToken,
    tx: mpsc::Sender<BridgeEvent>,
) {
    let mut attempt = 0u32;
    let mut resumed = false;

    loop {
        let opened = tokio::select! {
            _ = token.cancelled() => return,
            opened = backend.subscribe(MESSAGES_TABLE) => opened,
        };

        match opened {
            Ok(mut events) => {
                attempt = 0;
                if tx.send(BridgeEvent::Connected { resumed }).await.is_err() {
                    return;
                }
                resumed = true;

                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tx.closed() => return,
                        event = events.recv() => match event {
                            Some(event) => {
                                let Some(message) = decode(event, &filter) else {
                                    continue;
                                };
                                debug!(msg_id = %message.id, "Realtime insert");
                                if tx.send(BridgeEvent::Message(message)).await.is_err() {
                                    return;
                                }
                            }
                            None => break,
                        },
                    }
                }

                warn!("Realtime channel dropped");
                if tx.send(BridgeEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(e) if !e.is_transient() => {
                warn!("Realtime subscribe rejected: {}", e);
                let _ = tx.send(BridgeEvent::Stalled).await;
                return;
            }
            Err(e) => {
                warn!("Realtime subscribe failed: {}", e);
            }
        }

        attempt += 1;
        if attempt > policy.max_attempts {
            warn!(attempts = policy.max_attempts, "Realtime reconnect gave up");
            let _ = tx.send(BridgeEvent::Stalled).await;
            return;
        }

        let delay = policy.delay_for(attempt);
        debug!(attempt, ?delay, "Realtime reconnect scheduled");
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Decode an insert into a [`Message`]; `None` when it is for another table,
/// malformed, or not relevant to `filter`.
fn decode(event: RealtimeEvent, filter: &MessageFilter) -> Option<Message> {
    if event.table != MESSAGES_TABLE || event.kind != ChangeKind::Insert {
        return None;
    }
    let message: Message = match serde_json::from_value(event.record) {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping malformed realtime record: {}", e);
            return None;
        }
    };
    filter.matches(&message).then_some(message)
}
