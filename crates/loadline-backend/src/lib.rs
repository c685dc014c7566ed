//! Backend data service seam.
//!
//! Everything the app persists or is notified about goes through the
//! [`Backend`] trait: authentication, the `profiles` and `messages` tables,
//! and realtime row-insert events. [`LocalBackend`] is the in-process
//! implementation over SQLite.

pub mod auth;
pub mod config;
pub mod error;
pub mod local;
pub mod realtime;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use loadline_types::api::{Credentials, MessageFilter, NewMessage, ProfileUpdate, SignUp};
use loadline_types::events::{AuthEvent, RealtimeEvent};
use loadline_types::models::{AuthUser, ChatMessage, Message, Profile, Session};

pub use config::BackendConfig;
pub use error::{BackendError, Result};
pub use local::{BackendServer, LocalBackend};

/// A client handle to the backend data service.
///
/// One handle holds at most one session. Calls other than sign-up and
/// sign-in require that session and fail with
/// [`BackendError::Unauthenticated`] without it.
#[async_trait]
pub trait Backend: Send + Sync {
    // -- Auth --

    /// Create an account and its profile (never an administrator).
    /// Does not sign in.
    async fn sign_up(&self, request: &SignUp) -> Result<AuthUser>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session>;

    async fn sign_out(&self) -> Result<()>;

    /// The current session, or `None` when signed out or expired.
    async fn session(&self) -> Result<Option<Session>>;

    /// Sign-in and sign-out notifications for this handle.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    // -- Profiles --

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>>;

    /// Profiles for the given ids; ids without a profile are skipped.
    async fn profiles(&self, ids: &[Uuid]) -> Result<Vec<Profile>>;

    async fn admin_profiles(&self) -> Result<Vec<Profile>>;

    /// Update the session user's own profile.
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Profile>;

    // -- Messages --

    /// Insert a message as the session user. `created_at` is assigned here.
    async fn insert_message(&self, message: &NewMessage) -> Result<Message>;

    /// The newest `limit` matching messages, ascending by `created_at`,
    /// joined with sender and receiver names.
    async fn select_messages(&self, filter: MessageFilter, limit: u32) -> Result<Vec<ChatMessage>>;

    /// Distinct senders of matching messages, most recent first.
    async fn distinct_senders(&self, filter: MessageFilter) -> Result<Vec<Uuid>>;

    // -- Realtime --

    /// Subscribe to insert events on `table`. The receiver yields `None`
    /// once the backend drops the subscription.
    async fn subscribe(&self, table: &str) -> Result<mpsc::Receiver<RealtimeEvent>>;

    /// Shut the handle down: drop realtime subscriptions and reject
    /// further calls with [`BackendError::Closed`].
    async fn close(&self);
}
