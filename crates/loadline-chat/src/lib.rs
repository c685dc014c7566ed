//! Support-chat client for the load board: carriers write to the
//! administrator, the administrator answers each of them from a roster.

pub mod config;
pub mod error;
pub mod profile;
pub mod realtime;
pub mod session;
pub mod store;
pub mod timeline;
pub mod view;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use loadline_backend::Backend;

pub use config::{ChatConfig, ReconnectPolicy};
pub use error::{ChatError, Result};
pub use profile::ProfileService;
pub use realtime::{BridgeEvent, RealtimeBridge, RealtimeSubscription};
pub use session::{IdentityChange, IdentityWatcher, SessionProvider};
pub use store::MessageStore;
pub use timeline::Timeline;
pub use view::{Command, ConversationHandle, ViewSnapshot, ViewState};

/// Wires the chat components to one backend handle.
///
/// Every view and subscription created here stops on [`ChatClient::shutdown`].
pub struct ChatClient {
    backend: Arc<dyn Backend>,
    config: ChatConfig,
    shutdown: CancellationToken,
}

impl ChatClient {
    pub fn new(backend: Arc<dyn Backend>, config: ChatConfig) -> Self {
        Self {
            backend,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn session(&self) -> SessionProvider {
        SessionProvider::new(self.backend.clone())
    }

    pub fn store(&self) -> MessageStore {
        MessageStore::new(self.backend.clone(), self.config.fetch_limit)
    }

    pub fn profiles(&self) -> ProfileService {
        ProfileService::new(self.backend.clone())
    }

    pub fn realtime(&self) -> RealtimeBridge {
        RealtimeBridge::new(
            self.backend.clone(),
            self.config.reconnect.clone(),
            self.shutdown.clone(),
        )
    }

    /// Start a conversation view. It follows the signed-in identity until
    /// the handle is dropped or the client shuts down.
    pub fn open_view(&self) -> ConversationHandle {
        view::spawn_view(
            self.session(),
            self.store(),
            self.realtime(),
            self.shutdown.child_token(),
        )
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every view and subscription, then close the backend handle.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.backend.close().await;
        info!("Chat client shut down");
    }
}
