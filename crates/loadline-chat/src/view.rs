//! Conversation view: the roster/conversation state machine.
//!
//! The view runs as a single task that owns every piece of mutable state.
//! Commands from the [`ConversationHandle`], results of spawned backend
//! calls, identity changes and realtime events are all funnelled into that
//! task, and each step ends by publishing a [`ViewSnapshot`] on a watch
//! channel.

use std::collections::VecDeque;
use std::future::Future;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use loadline_types::api::MessageFilter;
use loadline_types::models::{ChatMessage, Counterpart, Identity, Message};

use crate::error::{ChatError, Result};
use crate::realtime::{BridgeEvent, RealtimeBridge, RealtimeSubscription};
use crate::session::{IdentityChange, IdentityWatcher, SessionProvider};
use crate::store::{MessageStore, UNKNOWN_NAME, addressed_to};
use crate::timeline::Timeline;

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ViewState {
    #[default]
    NoIdentity,
    /// Administrator only: everyone who has written in, most recent first.
    Roster {
        me: Identity,
        counterparts: Vec<Counterpart>,
        loading: bool,
    },
    /// One thread. For a user the counterpart is the administrator, once
    /// known; for the administrator it is the user being answered.
    Conversation {
        me: Identity,
        counterpart: Option<Counterpart>,
        messages: Vec<ChatMessage>,
        loading: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub state: ViewState,
    /// Compose input. Cleared only by a successful send.
    pub draft: String,
    pub last_error: Option<String>,
    /// Whether the realtime subscription is currently connected.
    pub live: bool,
}

impl ViewSnapshot {
    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            ViewState::NoIdentity => None,
            ViewState::Roster { me, .. } | ViewState::Conversation { me, .. } => Some(me),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        match &self.state {
            ViewState::Conversation { messages, .. } => messages,
            _ => &[],
        }
    }

    pub fn counterparts(&self) -> &[Counterpart] {
        match &self.state {
            ViewState::Roster { counterparts, .. } => counterparts,
            _ => &[],
        }
    }

    pub fn counterpart(&self) -> Option<&Counterpart> {
        match &self.state {
            ViewState::Conversation { counterpart, .. } => counterpart.as_ref(),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        match &self.state {
            ViewState::NoIdentity => false,
            ViewState::Roster { loading, .. } | ViewState::Conversation { loading, .. } => *loading,
        }
    }
}

#[derive(Debug)]
pub enum Command {
    /// Administrator: open the thread of a roster entry.
    Open(Uuid),
    /// Administrator: go back to the roster.
    ShowRoster,
    Compose(String),
    Send,
    Refresh,
}

/// Front-end handle to a running view. Dropping it stops the view.
pub struct ConversationHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ViewSnapshot>,
    token: CancellationToken,
}

impl ConversationHandle {
    pub fn snapshot(&self) -> ViewSnapshot {
        self.state.borrow().clone()
    }

    /// A receiver that is notified whenever the snapshot changes.
    pub fn watch(&self) -> watch::Receiver<ViewSnapshot> {
        self.state.clone()
    }

    /// Wait until the snapshot satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&ViewSnapshot) -> bool) -> Result<ViewSnapshot> {
        let mut rx = self.state.clone();
        let snapshot = rx.wait_for(predicate).await.map_err(|_| ChatError::ViewClosed)?.clone();
        Ok(snapshot)
    }

    pub async fn open(&self, counterpart: Uuid) -> Result<()> {
        self.command(Command::Open(counterpart)).await
    }

    pub async fn show_roster(&self) -> Result<()> {
        self.command(Command::ShowRoster).await
    }

    pub async fn compose(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::Compose(text.into())).await
    }

    pub async fn send(&self) -> Result<()> {
        self.command(Command::Send).await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.command(Command::Refresh).await
    }

    pub fn close(self) {}

    async fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ChatError::ViewClosed)
    }
}

impl Drop for ConversationHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub(crate) fn spawn_view(
    session: SessionProvider,
    store: MessageStore,
    bridge: RealtimeBridge,
    token: CancellationToken,
) -> ConversationHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (state_tx, state_rx) = watch::channel(ViewSnapshot::default());
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let watcher = session.on_identity_change();

    let actor = ViewActor {
        session,
        store,
        bridge,
        state_tx,
        outcomes: outcome_tx,
        token: token.clone(),
        me: None,
        screen: Screen::Roster,
        counterparts: Vec::new(),
        timeline: Timeline::new(),
        admin: None,
        fetching: 0,
        draft: String::new(),
        last_error: None,
        live: false,
        sending: false,
        outbox: VecDeque::new(),
        send_failed: false,
        generation: 0,
        subscription: None,
    };
    tokio::spawn(actor.run(cmd_rx, outcome_rx, watcher));

    ConversationHandle {
        commands: cmd_tx,
        state: state_rx,
        token,
    }
}

enum Screen {
    Roster,
    /// `None` is the user's own thread with the administrator.
    Conversation(Option<Counterpart>),
}

/// A send waiting for the one in flight to finish.
struct Outgoing {
    generation: u64,
    sender: Uuid,
    receiver: Option<Uuid>,
    content: String,
}

/// Result of a spawned backend call, tagged with the generation it was
/// issued under. A generation ends whenever the screen or identity changes.
enum Outcome {
    Identity {
        generation: u64,
        identity: Option<Identity>,
    },
    Roster {
        generation: u64,
        result: Result<Vec<Counterpart>>,
    },
    Conversation {
        generation: u64,
        result: Result<Vec<ChatMessage>>,
    },
    Administrator {
        generation: u64,
        result: Result<Option<Counterpart>>,
    },
    NewSender {
        generation: u64,
        counterpart: Counterpart,
    },
    Sent {
        generation: u64,
        content: String,
        result: Result<Option<Message>>,
    },
}

enum Step {
    Command(Command),
    Outcome(Outcome),
    Identity(Option<IdentityChange>),
    Bridge(Option<BridgeEvent>),
    Stop,
}

struct ViewActor {
    session: SessionProvider,
    store: MessageStore,
    bridge: RealtimeBridge,
    state_tx: watch::Sender<ViewSnapshot>,
    outcomes: mpsc::UnboundedSender<Outcome>,
    token: CancellationToken,

    me: Option<Identity>,
    screen: Screen,
    counterparts: Vec<Counterpart>,
    timeline: Timeline,
    /// The administrator as seen from the user side.
    admin: Option<Counterpart>,
    /// Fetches in flight for the current generation.
    fetching: u32,
    draft: String,
    last_error: Option<String>,
    live: bool,
    sending: bool,
    /// Sends issued while another was in flight, oldest first.
    outbox: VecDeque<Outgoing>,
    /// A send in the current batch failed; later successes keep the error.
    send_failed: bool,
    generation: u64,
    subscription: Option<RealtimeSubscription>,
}

impl ViewActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<Outcome>,
        watcher: IdentityWatcher,
    ) {
        let token = self.token.clone();
        let mut watcher = Some(watcher);

        self.lookup_identity();
        self.publish();

        loop {
            let step = tokio::select! {
                _ = token.cancelled() => Step::Stop,
                command = commands.recv() => command.map_or(Step::Stop, Step::Command),
                Some(outcome) = outcomes.recv() => Step::Outcome(outcome),
                change = next_identity_change(&mut watcher) => Step::Identity(change),
                event = next_bridge_event(&mut self.subscription) => Step::Bridge(event),
            };

            match step {
                Step::Command(command) => self.handle_command(command),
                Step::Outcome(outcome) => self.handle_outcome(outcome),
                Step::Identity(Some(change)) => self.handle_identity(change),
                Step::Identity(None) => {
                    debug!("Identity notifications ended");
                    watcher = None;
                }
                Step::Bridge(event) => self.handle_bridge(event),
                Step::Stop => break,
            }
            self.publish();
        }

        self.subscription = None;
        info!("Conversation view stopped");
    }

    // -- Commands --

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open(id) => self.open(id),
            Command::ShowRoster => self.show_roster(),
            Command::Compose(text) => self.draft = text,
            Command::Send => self.send(),
            Command::Refresh => {
                if self.me.is_some() {
                    self.fetch_current();
                } else {
                    self.lookup_identity();
                }
            }
        }
    }

    fn open(&mut self, id: Uuid) {
        if !self.is_admin() {
            debug!("Only the administrator picks a conversation");
            return;
        }
        let Some(counterpart) = self.counterparts.iter().find(|c| c.id == id).cloned() else {
            self.last_error = Some(format!("No conversation with {}", id));
            return;
        };

        debug!(counterpart = %counterpart.id, "Opening conversation");
        self.next_generation();
        self.timeline.clear();
        self.draft.clear();
        self.last_error = None;
        self.resubscribe(MessageFilter::Participant(counterpart.id));
        self.screen = Screen::Conversation(Some(counterpart));
        self.fetch_current();
    }

    fn show_roster(&mut self) {
        let Some(me) = self.me.as_ref().filter(|me| me.is_admin) else {
            debug!("Only the administrator has a roster");
            return;
        };
        let filter = addressed_to(me.id);

        self.next_generation();
        self.screen = Screen::Roster;
        self.timeline.clear();
        self.draft.clear();
        self.last_error = None;
        self.resubscribe(filter);
        self.fetch_current();
    }

    fn send(&mut self) {
        let Some(me) = &self.me else {
            return;
        };
        if self.draft.trim().is_empty() {
            return;
        }
        let receiver = match &self.screen {
            Screen::Conversation(counterpart) => counterpart.as_ref().map(|c| c.id),
            Screen::Roster => {
                debug!("Send ignored: no conversation open");
                return;
            }
        };

        let outgoing = Outgoing {
            generation: self.generation,
            sender: me.id,
            receiver,
            content: self.draft.clone(),
        };
        if self.sending {
            debug!(queued = self.outbox.len() + 1, "Send queued behind the one in flight");
            self.outbox.push_back(outgoing);
            return;
        }
        self.send_failed = false;
        self.dispatch(outgoing);
    }

    fn dispatch(&mut self, outgoing: Outgoing) {
        self.sending = true;
        let store = self.store.clone();
        self.spawn(async move {
            let Outgoing {
                generation,
                sender,
                receiver,
                content,
            } = outgoing;
            let result = store.send_message(Some(sender), receiver, &content).await;
            Outcome::Sent {
                generation,
                content,
                result,
            }
        });
    }

    // -- Identity --

    fn handle_identity(&mut self, change: IdentityChange) {
        match change {
            IdentityChange::SignedIn(session) => {
                debug!(user_id = %session.user.id, "Identity change: signed in");
                self.reset();
                self.lookup_identity();
            }
            IdentityChange::SignedOut => {
                info!("Identity change: signed out");
                self.reset();
            }
        }
    }

    fn lookup_identity(&mut self) {
        let session = self.session.clone();
        let generation = self.generation;
        self.spawn(async move {
            Outcome::Identity {
                generation,
                identity: session.current_identity().await,
            }
        });
    }

    fn enter(&mut self, me: Identity) {
        info!(user_id = %me.id, admin = me.is_admin, "View entered");
        let is_admin = me.is_admin;
        let id = me.id;
        self.me = Some(me);

        if is_admin {
            self.show_roster();
            return;
        }

        self.next_generation();
        self.screen = Screen::Conversation(None);
        self.timeline.clear();
        self.resubscribe(MessageFilter::Participant(id));
        self.fetch_current();

        let store = self.store.clone();
        let generation = self.generation;
        self.spawn(async move {
            Outcome::Administrator {
                generation,
                result: store.fetch_administrator().await,
            }
        });
    }

    /// Back to `NoIdentity`; the subscription is released and every result
    /// still in flight becomes stale. A send already in flight still gates
    /// the next one.
    fn reset(&mut self) {
        self.next_generation();
        self.me = None;
        self.screen = Screen::Roster;
        self.counterparts.clear();
        self.timeline.clear();
        self.admin = None;
        self.draft.clear();
        self.last_error = None;
        self.live = false;
        self.send_failed = false;
        if !self.outbox.is_empty() {
            warn!(dropped = self.outbox.len(), "Queued sends dropped on sign-out");
            self.outbox.clear();
        }
        self.subscription = None;
    }

    // -- Backend results --

    fn handle_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Sent {
                generation,
                content,
                result,
            } => {
                self.sending = false;
                let current = generation == self.generation;
                match result {
                    Ok(sent) => {
                        if let Some(message) = sent {
                            debug!(msg_id = %message.id, "Send confirmed");
                        }
                        if current && self.draft == content {
                            self.draft.clear();
                        }
                        if current && !self.send_failed {
                            self.last_error = None;
                        }
                        if current && !self.live {
                            self.fetch_current();
                        }
                    }
                    Err(e) => {
                        warn!("Send failed: {}", e);
                        self.send_failed = true;
                        if current {
                            self.last_error = Some(e.to_string());
                        }
                    }
                }
                if let Some(next) = self.outbox.pop_front() {
                    self.dispatch(next);
                }
            }
            outcome if outcome.generation() != self.generation => {
                debug!("Discarding stale result");
            }
            Outcome::Identity { identity, .. } => match identity {
                Some(identity) => self.enter(identity),
                None => debug!("No identity; staying signed out"),
            },
            Outcome::Roster { result, .. } => {
                self.fetching = self.fetching.saturating_sub(1);
                match result {
                    Ok(counterparts) => {
                        self.counterparts = counterparts;
                        self.last_error = None;
                    }
                    Err(e) => {
                        warn!("Roster fetch failed: {}", e);
                        self.last_error = Some(e.to_string());
                    }
                }
            }
            Outcome::Conversation { result, .. } => {
                self.fetching = self.fetching.saturating_sub(1);
                match result {
                    Ok(messages) => {
                        let added = self.timeline.merge_all(messages);
                        debug!(added, total = self.timeline.len(), "Conversation loaded");
                        self.last_error = None;
                    }
                    Err(e) => {
                        warn!("Conversation fetch failed: {}", e);
                        self.last_error = Some(e.to_string());
                    }
                }
            }
            Outcome::Administrator { result, .. } => match result {
                Ok(Some(admin)) => self.admin = Some(admin),
                Ok(None) => warn!("No administrator profile found"),
                Err(e) => warn!("Administrator lookup failed: {}", e),
            },
            Outcome::NewSender { counterpart, .. } => {
                self.counterparts.retain(|c| c.id != counterpart.id);
                self.counterparts.insert(0, counterpart);
            }
        }
    }

    // -- Realtime --

    fn handle_bridge(&mut self, event: Option<BridgeEvent>) {
        match event {
            // Inserts committed before the channel opened were not pushed, so
            // every connect, first one included, is followed by a refetch.
            Some(BridgeEvent::Connected { resumed }) => {
                self.live = true;
                if resumed {
                    info!("Realtime resumed; refetching");
                } else {
                    debug!("Realtime connected; refetching");
                }
                self.fetch_current();
            }
            Some(BridgeEvent::Message(message)) => match self.screen {
                Screen::Roster => self.note_sender(message.sender_id),
                Screen::Conversation(_) => {
                    let message = self.to_chat(message);
                    if !self.timeline.merge(message) {
                        debug!("Duplicate realtime insert ignored");
                    }
                }
            },
            Some(BridgeEvent::Disconnected) => self.live = false,
            Some(BridgeEvent::Stalled) => {
                warn!("Realtime updates stopped; use refresh to reload");
                self.live = false;
                self.subscription = None;
            }
            None => {
                self.live = false;
                self.subscription = None;
            }
        }
    }

    /// Move a roster entry to the top, resolving its name first if the
    /// sender is new.
    fn note_sender(&mut self, sender: Uuid) {
        if let Some(pos) = self.counterparts.iter().position(|c| c.id == sender) {
            let entry = self.counterparts.remove(pos);
            self.counterparts.insert(0, entry);
            return;
        }

        let store = self.store.clone();
        let generation = self.generation;
        self.spawn(async move {
            let name = match store.resolve_name(sender).await {
                Ok(Some(name)) => name,
                Ok(None) => UNKNOWN_NAME.to_string(),
                Err(e) => {
                    warn!("Name lookup failed: {}", e);
                    UNKNOWN_NAME.to_string()
                }
            };
            Outcome::NewSender {
                generation,
                counterpart: Counterpart { id: sender, name },
            }
        });
    }

    fn to_chat(&self, message: Message) -> ChatMessage {
        let sender_name = self.name_of(message.sender_id);
        let receiver_name = message.receiver_id.and_then(|id| self.name_of(id));
        ChatMessage::from_message(message, sender_name, receiver_name)
    }

    fn name_of(&self, id: Uuid) -> Option<String> {
        if let Some(me) = &self.me
            && me.id == id
        {
            return Some(me.name.clone());
        }
        if let Screen::Conversation(Some(counterpart)) = &self.screen
            && counterpart.id == id
        {
            return Some(counterpart.name.clone());
        }
        self.admin
            .as_ref()
            .filter(|admin| admin.id == id)
            .map(|admin| admin.name.clone())
    }

    // -- Plumbing --

    fn is_admin(&self) -> bool {
        self.me.as_ref().is_some_and(|me| me.is_admin)
    }

    /// Start a new generation: results still in flight become stale.
    fn next_generation(&mut self) {
        self.generation += 1;
        self.fetching = 0;
    }

    fn resubscribe(&mut self, filter: MessageFilter) {
        self.live = false;
        self.subscription = Some(self.bridge.subscribe(filter));
    }

    /// Refetch whatever the current screen shows.
    fn fetch_current(&mut self) {
        let Some(me) = &self.me else {
            return;
        };
        let self_id = me.id;
        let store = self.store.clone();
        let generation = self.generation;
        self.fetching += 1;

        match &self.screen {
            Screen::Roster => self.spawn(async move {
                Outcome::Roster {
                    generation,
                    result: store.try_fetch_counterparts(self_id).await,
                }
            }),
            Screen::Conversation(counterpart) => {
                let counterpart = counterpart.as_ref().map(|c| c.id);
                self.spawn(async move {
                    Outcome::Conversation {
                        generation,
                        result: store.fetch_conversation(self_id, counterpart).await,
                    }
                })
            }
        }
    }

    /// Run a backend call off the actor; its outcome comes back through the
    /// outcome channel unless the view stops first.
    fn spawn<F>(&self, call: F)
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let tx = self.outcomes.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                outcome = call => {
                    let _ = tx.send(outcome);
                }
            }
        });
    }

    fn snapshot(&self) -> ViewSnapshot {
        let state = match (&self.me, &self.screen) {
            (None, _) => ViewState::NoIdentity,
            (Some(me), Screen::Roster) => ViewState::Roster {
                me: me.clone(),
                counterparts: self.counterparts.clone(),
                loading: self.fetching > 0,
            },
            (Some(me), Screen::Conversation(counterpart)) => ViewState::Conversation {
                me: me.clone(),
                counterpart: counterpart.clone().or_else(|| self.admin.clone()),
                messages: self.timeline.as_slice().to_vec(),
                loading: self.fetching > 0,
            },
        };
        ViewSnapshot {
            state,
            draft: self.draft.clone(),
            last_error: self.last_error.clone(),
            live: self.live,
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.state_tx.send_if_modified(move |current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

impl Outcome {
    fn generation(&self) -> u64 {
        match self {
            Self::Identity { generation, .. }
            | Self::Roster { generation, .. }
            | Self::Conversation { generation, .. }
            | Self::Administrator { generation, .. }
            | Self::NewSender { generation, .. }
            | Self::Sent { generation, .. } => *generation,
        }
    }
}

async fn next_identity_change(watcher: &mut Option<IdentityWatcher>) -> Option<IdentityChange> {
    match watcher {
        Some(watcher) => watcher.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_bridge_event(subscription: &mut Option<RealtimeSubscription>) -> Option<BridgeEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
