use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use loadline_types::events::RealtimeEvent;

const BROADCAST_CAPACITY: usize = 1024;
const SUBSCRIBER_BUFFER: usize = 256;

/// Fans row-change events out to every subscriber in the process.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every subscriber receives every row change
    broadcast_tx: broadcast::Sender<RealtimeEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to row changes. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all subscribers.
    pub fn broadcast(&self, event: RealtimeEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }

    /// Open a subscription to one table's events.
    ///
    /// A task relays matching events into the returned channel until
    /// `connection` is cancelled or the receiver is dropped. Either way the
    /// receiver then yields `None`.
    pub fn open_channel(
        &self,
        table: &str,
        connection: CancellationToken,
    ) -> mpsc::Receiver<RealtimeEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut broadcast_rx = self.subscribe();
        let table = table.to_string();

        tokio::spawn(async move {
            debug!(table = %table, "Realtime channel opened");
            loop {
                tokio::select! {
                    _ = connection.cancelled() => break,
                    _ = tx.closed() => break,
                    result = broadcast_rx.recv() => {
                        let event = match result {
                            Ok(event) => event,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(table = %table, "Realtime subscriber lagged by {} events", n);
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };

                        if event.table != table {
                            continue;
                        }

                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(table = %table, "Realtime channel closed");
        });

        rx
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
