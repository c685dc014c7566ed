use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use loadline_db::Database;
use loadline_db::models::{MessageRow, ProfileRow};
use loadline_types::api::{Claims, Credentials, MessageFilter, NewMessage, ProfileUpdate, SignUp};
use loadline_types::events::{AuthEvent, ChangeKind, MESSAGES_TABLE, RealtimeEvent};
use loadline_types::models::{AuthUser, ChatMessage, Message, Profile, Session};

use crate::auth;
use crate::config::BackendConfig;
use crate::error::{BackendError, Result};
use crate::realtime::Dispatcher;
use crate::Backend;

const AUTH_EVENT_CAPACITY: usize = 16;

/// State shared by every client handle: storage, the realtime dispatcher,
/// and the token secret.
pub struct BackendServer {
    db: Database,
    dispatcher: Dispatcher,
    config: BackendConfig,
}

impl BackendServer {
    pub fn new(db: Database, config: BackendConfig) -> Arc<Self> {
        if config.uses_dev_secret() {
            warn!("Backend is signing sessions with the development secret");
        }
        Arc::new(Self {
            db,
            dispatcher: Dispatcher::new(),
            config,
        })
    }

    pub fn open(path: &Path, config: BackendConfig) -> anyhow::Result<Arc<Self>> {
        Ok(Self::new(Database::open(path)?, config))
    }

    pub fn open_in_memory(config: BackendConfig) -> anyhow::Result<Arc<Self>> {
        Ok(Self::new(Database::open_in_memory()?, config))
    }

    /// Create a client handle with its own session slot.
    pub fn connect(self: &Arc<Self>) -> LocalBackend {
        let (auth_tx, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        let closed = CancellationToken::new();
        LocalBackend {
            server: self.clone(),
            session: RwLock::new(None),
            auth_tx,
            connection: Mutex::new(closed.child_token()),
            closed,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Create the administrator account if it does not exist yet.
    /// Returns its user id. Administrators cannot be created any other way.
    pub async fn provision_admin(
        self: &Arc<Self>,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Uuid> {
        let email = auth::normalize_email(email)?;
        auth::check_password(password)?;
        let password = password.to_string();
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(BackendError::Invalid("administrator name is empty".into()));
        }

        let id = self
            .blocking(move |db| {
                if let Some(user) = db.get_user_by_email(&email)? {
                    let profile = db.get_profile(&user.id)?;
                    return match profile {
                        Some(p) if p.is_admin => parse_uuid(&user.id, "user id"),
                        _ => Err(BackendError::Conflict(format!(
                            "{} exists and is not an administrator",
                            email
                        ))),
                    };
                }

                let id = Uuid::new_v4();
                let hash = auth::hash_password(&password)?;
                let created = db.create_account(
                    &email,
                    &hash,
                    &ProfileRow {
                        id: id.to_string(),
                        name,
                        phone_number: None,
                        address: None,
                        is_admin: true,
                    },
                )?;
                if !created {
                    return Err(BackendError::Conflict(format!("{} registered concurrently", email)));
                }
                info!(user_id = %id, "Administrator provisioned");
                Ok(id)
            })
            .await?;

        Ok(id)
    }

    /// Run blocking DB work off the async runtime.
    async fn blocking<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let server = self.clone();
        tokio::task::spawn_blocking(move || f(&server.db)).await?
    }
}

/// In-process client handle to a [`BackendServer`].
pub struct LocalBackend {
    server: Arc<BackendServer>,
    session: RwLock<Option<Session>>,
    auth_tx: broadcast::Sender<AuthEvent>,
    /// Cancelled to drop every realtime subscription of this handle.
    connection: Mutex<CancellationToken>,
    closed: CancellationToken,
}

impl LocalBackend {
    pub fn server(&self) -> &Arc<BackendServer> {
        &self.server
    }

    /// Drop this handle's realtime subscriptions, as a lost connection would.
    /// New subscriptions can be opened right away.
    pub fn interrupt_realtime(&self) {
        if let Ok(mut connection) = self.connection.lock() {
            connection.cancel();
            *connection = self.closed.child_token();
        }
        debug!("Realtime connection interrupted");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    fn current_session(&self) -> Result<Option<Session>> {
        let guard = self
            .session
            .read()
            .map_err(|e| anyhow::anyhow!("Session lock poisoned: {}", e))?;
        Ok(guard.clone())
    }

    fn replace_session(&self, session: Option<Session>) -> Result<Option<Session>> {
        let mut guard = self
            .session
            .write()
            .map_err(|e| anyhow::anyhow!("Session lock poisoned: {}", e))?;
        Ok(std::mem::replace(&mut *guard, session))
    }

    /// Validate the session token and return its claims.
    fn authorize(&self) -> Result<Claims> {
        self.ensure_open()?;
        let session = self.current_session()?.ok_or(BackendError::Unauthenticated)?;
        auth::validate_token(&self.server.config.jwt_secret, &session.access_token)
    }

    fn connection_token(&self) -> Result<CancellationToken> {
        let connection = self
            .connection
            .lock()
            .map_err(|e| anyhow::anyhow!("Connection lock poisoned: {}", e))?;
        Ok(connection.clone())
    }

    fn emit(&self, event: AuthEvent) {
        // No listeners is fine
        let _ = self.auth_tx.send(event);
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn sign_up(&self, request: &SignUp) -> Result<AuthUser> {
        self.ensure_open()?;
        let email = auth::normalize_email(&request.email)?;
        auth::check_password(&request.password)?;
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(BackendError::Invalid("name is empty".into()));
        }

        let id = Uuid::new_v4();
        let profile = ProfileRow {
            id: id.to_string(),
            name,
            phone_number: non_empty(request.phone_number.as_deref()),
            address: non_empty(request.address.as_deref()),
            is_admin: false,
        };
        let password = request.password.clone();
        let account_email = email.clone();

        self.server
            .blocking(move |db| {
                if db.get_user_by_email(&account_email)?.is_some() {
                    return Err(BackendError::Conflict(format!(
                        "{} is already registered",
                        account_email
                    )));
                }
                let hash = auth::hash_password(&password)?;
                if !db.create_account(&account_email, &hash, &profile)? {
                    return Err(BackendError::Conflict(format!(
                        "{} is already registered",
                        account_email
                    )));
                }
                Ok(())
            })
            .await?;

        info!(user_id = %id, "Account registered");
        Ok(AuthUser { id, email })
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        self.ensure_open()?;
        let email =
            auth::normalize_email(&credentials.email).map_err(|_| BackendError::InvalidCredentials)?;
        let password = credentials.password.clone();

        let user = self
            .server
            .blocking(move |db| {
                let user = db
                    .get_user_by_email(&email)?
                    .ok_or(BackendError::InvalidCredentials)?;
                auth::verify_password(&password, &user.password)?;
                Ok(AuthUser {
                    id: parse_uuid(&user.id, "user id")?,
                    email: user.email,
                })
            })
            .await?;

        let config = &self.server.config;
        let (access_token, expires_at) =
            auth::create_token(&config.jwt_secret, user.id, &user.email, config.session_ttl)?;
        let session = Session {
            access_token,
            user,
            expires_at,
        };

        self.replace_session(Some(session.clone()))?;
        info!(user_id = %session.user.id, "Signed in");
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let previous = self.replace_session(None)?;
        self.interrupt_realtime();
        if let Some(session) = previous {
            info!(user_id = %session.user.id, "Signed out");
            self.emit(AuthEvent::SignedOut);
        }
        Ok(())
    }

    async fn session(&self) -> Result<Option<Session>> {
        self.ensure_open()?;
        let Some(session) = self.current_session()? else {
            return Ok(None);
        };

        match auth::validate_token(&self.server.config.jwt_secret, &session.access_token) {
            Ok(_) => Ok(Some(session)),
            Err(_) => {
                info!(user_id = %session.user.id, "Session expired");
                self.replace_session(None)?;
                self.emit(AuthEvent::SignedOut);
                Ok(None)
            }
        }
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.authorize()?;
        self.server
            .blocking(move |db| db.get_profile(&id.to_string())?.map(profile_from_row).transpose())
            .await
    }

    async fn profiles(&self, ids: &[Uuid]) -> Result<Vec<Profile>> {
        self.authorize()?;
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        self.server
            .blocking(move |db| db.get_profiles(&ids)?.into_iter().map(profile_from_row).collect())
            .await
    }

    async fn admin_profiles(&self) -> Result<Vec<Profile>> {
        self.authorize()?;
        self.server
            .blocking(|db| db.get_admin_profiles()?.into_iter().map(profile_from_row).collect())
            .await
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Profile> {
        let claims = self.authorize()?;
        if claims.sub != id {
            return Err(BackendError::Forbidden("profiles can only be edited by their owner".into()));
        }

        let name = match update.name.as_deref().map(str::trim) {
            Some("") => return Err(BackendError::Invalid("name is empty".into())),
            other => other.map(str::to_string),
        };
        let phone_number = update.phone_number.clone();
        let address = update.address.clone();

        self.server
            .blocking(move |db| {
                let key = id.to_string();
                if !db.update_profile(&key, name.as_deref(), phone_number.as_deref(), address.as_deref())? {
                    return Err(BackendError::NotFound(format!("profile {}", id)));
                }
                let row = db
                    .get_profile(&key)?
                    .ok_or_else(|| BackendError::NotFound(format!("profile {}", id)))?;
                profile_from_row(row)
            })
            .await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        let claims = self.authorize()?;
        if claims.sub != message.sender_id {
            return Err(BackendError::Forbidden("messages must be sent as the session user".into()));
        }
        if message.receiver_id == Some(message.sender_id) {
            return Err(BackendError::Invalid("cannot message yourself".into()));
        }
        let content = message.content.trim().to_string();
        if content.is_empty() {
            return Err(BackendError::Invalid("message is empty".into()));
        }

        let id = Uuid::new_v4();
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let sender_id = message.sender_id.to_string();
        let receiver_id = message.receiver_id.map(|r| r.to_string());

        let row = self
            .server
            .blocking(move |db| {
                Ok(db.insert_message(
                    &id.to_string(),
                    &content,
                    &sender_id,
                    receiver_id.as_deref(),
                    &created_at,
                )?)
            })
            .await?;

        let inserted = message_from_row(row)?;
        self.server.dispatcher.broadcast(RealtimeEvent {
            table: MESSAGES_TABLE.to_string(),
            kind: ChangeKind::Insert,
            record: serde_json::to_value(&inserted)?,
            commit_timestamp: Utc::now(),
        });

        debug!(msg_id = %inserted.id, sender = %inserted.sender_id, "Message inserted");
        Ok(inserted)
    }

    async fn select_messages(&self, filter: MessageFilter, limit: u32) -> Result<Vec<ChatMessage>> {
        let claims = self.authorize()?;
        self.server
            .blocking(move |db| {
                check_read_access(db, &claims, &filter)?;
                db.get_messages(&filter, limit)?
                    .into_iter()
                    .map(chat_message_from_row)
                    .collect()
            })
            .await
    }

    async fn distinct_senders(&self, filter: MessageFilter) -> Result<Vec<Uuid>> {
        let claims = self.authorize()?;
        self.server
            .blocking(move |db| {
                check_read_access(db, &claims, &filter)?;
                db.get_distinct_senders(&filter)?
                    .iter()
                    .map(|id| parse_uuid(id, "sender id"))
                    .collect()
            })
            .await
    }

    async fn subscribe(&self, table: &str) -> Result<mpsc::Receiver<RealtimeEvent>> {
        let claims = self.authorize()?;
        let connection = self.connection_token()?;
        info!(user_id = %claims.sub, table, "Realtime subscription opened");
        Ok(self.server.dispatcher.open_channel(table, connection))
    }

    async fn close(&self) {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            info!("Backend client closed");
        }
    }
}

/// Row-level read rule: users read their own thread, the administrator
/// reads everything.
fn check_read_access(db: &Database, claims: &Claims, filter: &MessageFilter) -> Result<()> {
    let subject = match *filter {
        MessageFilter::Participant(id) => id,
        MessageFilter::AddressedTo { receiver, .. } => receiver,
    };
    if subject == claims.sub {
        return Ok(());
    }

    let is_admin = db
        .get_profile(&claims.sub.to_string())?
        .is_some_and(|p| p.is_admin);
    if is_admin {
        Ok(())
    } else {
        Err(BackendError::Forbidden("cannot read another user's messages".into()))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    value
        .parse()
        .map_err(|e| BackendError::Corrupt(format!("{} '{}': {}", what, value, e)))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| BackendError::Corrupt(format!("timestamp '{}': {}", value, e)))
}

fn profile_from_row(row: ProfileRow) -> Result<Profile> {
    Ok(Profile {
        id: parse_uuid(&row.id, "profile id")?,
        name: row.name,
        phone_number: row.phone_number,
        address: row.address,
        is_admin: row.is_admin,
    })
}

fn chat_message_from_row(row: MessageRow) -> Result<ChatMessage> {
    Ok(ChatMessage {
        id: parse_uuid(&row.id, "message id")?,
        content: row.content,
        sender_id: parse_uuid(&row.sender_id, "sender id")?,
        sender_name: row.sender_name,
        receiver_id: row
            .receiver_id
            .as_deref()
            .map(|r| parse_uuid(r, "receiver id"))
            .transpose()?,
        receiver_name: row.receiver_name,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn message_from_row(row: MessageRow) -> Result<Message> {
    let chat = chat_message_from_row(row)?;
    Ok(Message {
        id: chat.id,
        content: chat.content,
        sender_id: chat.sender_id,
        receiver_id: chat.receiver_id,
        created_at: chat.created_at,
    })
}
