//! Session provider: the only component that talks to the backend's auth
//! calls. Every other component asks it who is signed in.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use loadline_backend::{Backend, BackendError};
use loadline_types::api::{Credentials, SignUp};
use loadline_types::events::AuthEvent;
use loadline_types::models::{AuthUser, Identity, Session};

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityChange {
    SignedIn(Session),
    SignedOut,
}

/// Registration for sign-in/sign-out notifications.
///
/// Dropping the watcher (or calling [`IdentityWatcher::cancel`]) releases it.
pub struct IdentityWatcher {
    rx: broadcast::Receiver<AuthEvent>,
}

impl IdentityWatcher {
    /// Next identity change, or `None` once the backend handle is gone.
    pub async fn recv(&mut self) -> Option<IdentityChange> {
        loop {
            match self.rx.recv().await {
                Ok(AuthEvent::SignedIn(session)) => return Some(IdentityChange::SignedIn(session)),
                Ok(AuthEvent::SignedOut) => return Some(IdentityChange::SignedOut),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Identity watcher lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn cancel(self) {}
}

#[derive(Clone)]
pub struct SessionProvider {
    backend: Arc<dyn Backend>,
}

impl SessionProvider {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn current_session(&self) -> Option<Session> {
        match self.backend.session().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Session lookup failed: {}", e);
                None
            }
        }
    }

    /// The signed-in identity. Any failure, including a missing profile,
    /// reads as "nobody signed in".
    pub async fn current_identity(&self) -> Option<Identity> {
        let session = self.current_session().await?;
        match self.identity_for(session.user).await {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!("Identity lookup failed: {}", e);
                None
            }
        }
    }

    pub fn on_identity_change(&self) -> IdentityWatcher {
        IdentityWatcher {
            rx: self.backend.auth_events(),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let session = self
            .backend
            .sign_in(&Credentials {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;
        let identity = self.identity_for(session.user).await?;
        info!(user_id = %identity.id, admin = identity.is_admin, "Identity established");
        Ok(identity)
    }

    /// Register an account. The new user still has to sign in.
    pub async fn sign_up(&self, request: &SignUp) -> Result<Identity> {
        let user = self.backend.sign_up(request).await?;
        debug!(user_id = %user.id, "Registered");
        Ok(Identity {
            id: user.id,
            email: user.email,
            name: request.name.trim().to_string(),
            is_admin: false,
        })
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.backend.sign_out().await?;
        Ok(())
    }

    async fn identity_for(&self, user: AuthUser) -> Result<Identity> {
        let profile = self
            .backend
            .profile(user.id)
            .await?
            .ok_or_else(|| ChatError::Backend(BackendError::NotFound(format!("profile {}", user.id))))?;
        Ok(Identity::from_parts(user, profile))
    }
}
