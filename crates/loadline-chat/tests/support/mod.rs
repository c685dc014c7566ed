#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, broadcast, mpsc};
use uuid::Uuid;

use loadline_backend::{Backend, BackendConfig, BackendError, BackendServer, LocalBackend, Result};
use loadline_chat::{ChatClient, ChatConfig, ReconnectPolicy};
use loadline_types::api::{Credentials, MessageFilter, NewMessage, ProfileUpdate, SignUp};
use loadline_types::events::{AuthEvent, RealtimeEvent};
use loadline_types::models::{AuthUser, ChatMessage, Message, Profile, Session};

pub const PASSWORD: &str = "correct-horse";
pub const ADMIN_EMAIL: &str = "dispatch@loadline.test";

/// [`LocalBackend`] wrapper that counts calls, injects failures and delays,
/// and can hold conversation fetches open until released.
pub struct CountingBackend {
    inner: LocalBackend,
    inserts: AtomicUsize,
    selects_done: AtomicUsize,
    selects_by_participant: Mutex<HashMap<Uuid, usize>>,
    fail_inserts: AtomicBool,
    fail_selects: AtomicBool,
    subscribe_delay_ms: AtomicU64,
    held: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
}

impl CountingBackend {
    pub fn new(inner: LocalBackend) -> Self {
        Self {
            inner,
            inserts: AtomicUsize::new(0),
            selects_done: AtomicUsize::new(0),
            selects_by_participant: Mutex::new(HashMap::new()),
            fail_inserts: AtomicBool::new(false),
            fail_selects: AtomicBool::new(false),
            subscribe_delay_ms: AtomicU64::new(0),
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &LocalBackend {
        &self.inner
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn selects_done(&self) -> usize {
        self.selects_done.load(Ordering::SeqCst)
    }

    /// Conversation fetches for `participant` that have returned.
    pub fn selects_for(&self, participant: Uuid) -> usize {
        self.selects_by_participant
            .lock()
            .unwrap()
            .get(&participant)
            .copied()
            .unwrap_or(0)
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Fail conversation and roster reads.
    pub fn fail_selects(&self, fail: bool) {
        self.fail_selects.store(fail, Ordering::SeqCst);
    }

    /// Delay every realtime subscribe by `delay`.
    pub fn delay_subscribe(&self, delay: Duration) {
        self.subscribe_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Hold every conversation fetch for `participant` until [`release`].
    ///
    /// [`release`]: CountingBackend::release
    pub fn hold(&self, participant: Uuid) {
        self.held
            .lock()
            .unwrap()
            .insert(participant, Arc::new(Semaphore::new(0)));
    }

    /// Let every held fetch for `participant` finish.
    pub fn release(&self, participant: Uuid) {
        if let Some(gate) = self.held.lock().unwrap().remove(&participant) {
            gate.close();
        }
    }

    fn check_selects(&self) -> Result<()> {
        if self.fail_selects.load(Ordering::SeqCst) {
            return Err(BackendError::Invalid("read rejected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for CountingBackend {
    async fn sign_up(&self, request: &SignUp) -> Result<AuthUser> {
        self.inner.sign_up(request).await
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        self.inner.sign_in(credentials).await
    }

    async fn sign_out(&self) -> Result<()> {
        self.inner.sign_out().await
    }

    async fn session(&self) -> Result<Option<Session>> {
        self.inner.session().await
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.auth_events()
    }

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.inner.profile(id).await
    }

    async fn profiles(&self, ids: &[Uuid]) -> Result<Vec<Profile>> {
        self.inner.profiles(ids).await
    }

    async fn admin_profiles(&self) -> Result<Vec<Profile>> {
        self.inner.admin_profiles().await
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<Profile> {
        self.inner.update_profile(id, update).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Message> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(BackendError::Invalid("insert rejected".into()));
        }
        self.inner.insert_message(message).await
    }

    async fn select_messages(&self, filter: MessageFilter, limit: u32) -> Result<Vec<ChatMessage>> {
        let participant = match filter {
            MessageFilter::Participant(id) => Some(id),
            MessageFilter::AddressedTo { .. } => None,
        };
        let gate = participant.and_then(|id| self.held.lock().unwrap().get(&id).cloned());
        let result = match self.check_selects() {
            Ok(()) => self.inner.select_messages(filter, limit).await,
            Err(e) => Err(e),
        };
        if let Some(gate) = gate {
            // closed on release
            let _ = gate.acquire().await;
        }
        if let Some(id) = participant {
            *self.selects_by_participant.lock().unwrap().entry(id).or_default() += 1;
        }
        self.selects_done.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn distinct_senders(&self, filter: MessageFilter) -> Result<Vec<Uuid>> {
        self.check_selects()?;
        self.inner.distinct_senders(filter).await
    }

    async fn subscribe(&self, table: &str) -> Result<mpsc::Receiver<RealtimeEvent>> {
        let delay = self.subscribe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.subscribe(table).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

pub fn server() -> Arc<BackendServer> {
    BackendServer::open_in_memory(BackendConfig::default()).unwrap()
}

pub fn fast_config() -> ChatConfig {
    ChatConfig {
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            max_attempts: 3,
        },
        ..ChatConfig::default()
    }
}

pub async fn register(server: &Arc<BackendServer>, email: &str, name: &str) -> Uuid {
    let user = server
        .connect()
        .sign_up(&SignUp {
            email: email.to_string(),
            password: PASSWORD.to_string(),
            name: name.to_string(),
            phone_number: None,
            address: None,
        })
        .await
        .unwrap();
    user.id
}

pub async fn provision_admin(server: &Arc<BackendServer>) -> Uuid {
    server
        .provision_admin(ADMIN_EMAIL, PASSWORD, "Dispatch")
        .await
        .unwrap()
}

/// A [`CountingBackend`] handle signed in as `email`.
pub async fn counting_backend_for(server: &Arc<BackendServer>, email: &str) -> Arc<CountingBackend> {
    let counted = Arc::new(CountingBackend::new(server.connect()));
    counted
        .sign_in(&Credentials {
            email: email.to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();
    counted
}

pub async fn client_for(server: &Arc<BackendServer>, email: &str) -> (ChatClient, Arc<CountingBackend>) {
    let counted = counting_backend_for(server, email).await;
    let client = ChatClient::new(counted.clone(), fast_config());
    (client, counted)
}

/// Insert a message directly, outside any view.
pub async fn send_as(
    server: &Arc<BackendServer>,
    email: &str,
    receiver: Option<Uuid>,
    content: &str,
) -> Message {
    let backend = server.connect();
    let session = backend
        .sign_in(&Credentials {
            email: email.to_string(),
            password: PASSWORD.to_string(),
        })
        .await
        .unwrap();
    backend
        .insert_message(&NewMessage {
            sender_id: session.user.id,
            receiver_id: receiver,
            content: content.to_string(),
        })
        .await
        .unwrap()
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Bound a wait so a broken test fails instead of hanging.
pub async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}
