use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::{MessageDto, ParticipantId, UserDetail};

use crate::api::{ChatApi, Transport};
use crate::composer::OutboundComposer;
use crate::error::{FetchError, SendError, TransportError};
use crate::ingest::{Source, normalize, normalize_batch};
use crate::key::ConversationKey;
use crate::message::Delivery;
use crate::projector::{ActiveConversationProjector, ActiveConversationView, ConversationListItem};
use crate::session::Session;
use crate::store::{ConversationStore, HistoryTicket};
use crate::user_cache::{DisplayProfile, UserDetailCache};

const EVENT_CAPACITY: usize = 256;

// -- Events --

/// What the renderer is told.
#[derive(Debug, Clone)]
pub enum ViewEvent {
    List(Vec<ConversationListItem>),
    Active(Option<ActiveConversationView>),
    Directory(Vec<DisplayProfile>),
    Notice(Notice),
    /// The session ended; no more events follow
    Closed,
}

/// Non-fatal problems and connectivity changes worth showing the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SummaryFetchFailed { reason: String },
    /// Re-select the conversation to retry
    HistoryFetchFailed { key: ConversationKey, reason: String },
    /// Re-open the directory to retry
    DirectoryFetchFailed { reason: String },
    PublishFailed { key: ConversationKey, local_ref: Uuid, reason: String },
    TransportDisconnected,
    TransportConnected,
}

// -- Actions --

enum Action {
    Reload,
    SummariesLoaded(Result<Vec<MessageDto>, FetchError>),
    Select(ConversationKey),
    HistoryLoaded {
        ticket: HistoryTicket,
        result: Result<Vec<MessageDto>, FetchError>,
    },
    Push(MessageDto),
    DisplayNameResolved {
        key: ConversationKey,
        profile: DisplayProfile,
    },
    OpenDirectory,
    DirectoryLoaded(Result<Vec<UserDetail>, FetchError>),
    StartConversation(ParticipantId),
    Send {
        text: String,
        reply: oneshot::Sender<Result<Uuid, SendError>>,
    },
    Published {
        key: ConversationKey,
        local_ref: Uuid,
        result: Result<(), TransportError>,
    },
    ConnectionChanged(bool),
    Logout(oneshot::Sender<()>),
}

/// Cloneable entry point into a running [`SyncEngine`]. Every call is
/// queued and applied in order on the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Action>,
}

/// Receiving side of an [`EngineHandle`], consumed by [`SyncEngine::new`].
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Action>,
}

pub fn channel() -> (EngineHandle, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EngineHandle { tx }, Inbox { rx })
}

impl EngineHandle {
    fn post(&self, action: Action) {
        if self.tx.send(action).is_err() {
            debug!("Engine stopped, action dropped");
        }
    }

    /// Re-run the summary fetch.
    pub fn reload(&self) {
        self.post(Action::Reload);
    }

    pub fn select(&self, key: ConversationKey) {
        self.post(Action::Select(key));
    }

    /// Hand a decoded push frame body to the engine.
    pub fn push(&self, frame: MessageDto) {
        self.post(Action::Push(frame));
    }

    pub fn connection_changed(&self, connected: bool) {
        self.post(Action::ConnectionChanged(connected));
    }

    pub fn open_directory(&self) {
        self.post(Action::OpenDirectory);
    }

    pub fn start_conversation(&self, other: ParticipantId) {
        self.post(Action::StartConversation(other));
    }

    /// Send `text` to the open conversation. Resolves once the message is
    /// in the store (not once it is published) with its correlation id.
    pub async fn send(&self, text: impl Into<String>) -> Result<Uuid, SendError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Action::Send {
                text: text.into(),
                reply,
            })
            .map_err(|_| SendError::EngineStopped)?;
        rx.await.map_err(|_| SendError::EngineStopped)?
    }

    /// Clear all session state, close the transport and stop the engine.
    pub async fn logout(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Action::Logout(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

// -- Engine --

/// Owns the store, the selection and the detail cache. Runs as one task;
/// I/O is spawned and its completion comes back through the inbox, so
/// every state change is applied whole and in completion order.
pub struct SyncEngine {
    session: Session,
    store: ConversationStore,
    projector: ActiveConversationProjector,
    composer: OutboundComposer,
    cache: UserDetailCache,
    api: Arc<dyn ChatApi>,
    transport: Arc<dyn Transport>,
    handle: EngineHandle,
    inbox: Inbox,
    events: broadcast::Sender<ViewEvent>,
    directory: Option<Vec<DisplayProfile>>,
    directory_pending: bool,
    connected: Option<bool>,
}

impl SyncEngine {
    pub fn new<A>(
        session: Session,
        api: Arc<A>,
        transport: Arc<dyn Transport>,
        handle: EngineHandle,
        inbox: Inbox,
    ) -> Self
    where
        A: ChatApi + 'static,
    {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: ConversationStore::new(session.self_id),
            session,
            projector: ActiveConversationProjector::new(),
            composer: OutboundComposer::new(),
            cache: UserDetailCache::new(api.clone()),
            api,
            transport,
            handle,
            inbox,
            events,
            directory: None,
            directory_pending: false,
            connected: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<ViewEvent> {
        self.events.clone()
    }

    /// Fetch summaries, then apply actions until logout.
    pub async fn run(mut self) {
        info!("Sync engine started for user {}", self.session.self_id);
        self.spawn_summaries();

        while let Some(action) = self.inbox.rx.recv().await {
            if !self.step(action).await {
                break;
            }
        }
        info!("Sync engine stopped for user {}", self.session.self_id);
    }

    /// Apply one action. Returns `false` when the engine should stop.
    async fn step(&mut self, action: Action) -> bool {
        match action {
            Action::Reload => self.spawn_summaries(),
            Action::SummariesLoaded(result) => self.on_summaries(result),
            Action::Select(key) => self.on_select(key),
            Action::HistoryLoaded { ticket, result } => self.on_history(ticket, result),
            Action::Push(frame) => self.on_push(frame),
            Action::DisplayNameResolved { key, profile } => {
                if self.store.apply_display_name(&key, &profile) {
                    self.refresh(&[key]);
                }
            }
            Action::OpenDirectory => self.on_open_directory(),
            Action::DirectoryLoaded(result) => self.on_directory(result),
            Action::StartConversation(other) => self.on_start_conversation(other),
            Action::Send { text, reply } => {
                let result = self.on_send(&text);
                let _ = reply.send(result);
            }
            Action::Published {
                key,
                local_ref,
                result,
            } => self.on_published(key, local_ref, result),
            Action::ConnectionChanged(up) => self.on_connection(up),
            Action::Logout(done) => {
                self.on_logout().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    // -- Handlers --

    fn on_summaries(&mut self, result: Result<Vec<MessageDto>, FetchError>) {
        let raws = match result {
            Ok(raws) => raws,
            Err(e) => {
                warn!("Summary fetch failed: {}", e);
                self.notice(Notice::SummaryFetchFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        let batch = normalize_batch(raws, Source::Summary);
        let changed = self.store.ingest_summary_batch(batch);
        debug!("Summary fetch touched {} conversations", changed.len());
        for key in &changed {
            self.resolve_display_name(key);
        }
        // always publish once so an empty account still renders a list
        self.emit_list();
        if self.projector.affected(&changed).active {
            self.emit_active();
        }
    }

    fn on_select(&mut self, key: ConversationKey) {
        if self.store.get(&key).is_none() {
            warn!("Ignoring selection of unknown conversation {}", key);
            return;
        }
        if let Some(ticket) = self.projector.select(&mut self.store, &key) {
            self.spawn_history(ticket);
        }
        self.emit_list();
        self.emit_active();
    }

    fn on_history(&mut self, ticket: HistoryTicket, result: Result<Vec<MessageDto>, FetchError>) {
        match result {
            Ok(raws) => {
                let records = normalize_batch(raws, Source::History)
                    .into_iter()
                    .map(|i| i.message)
                    .collect();
                if self.store.complete_history(&ticket, records) {
                    info!("Loaded history for {}", ticket.key);
                    self.refresh(&[ticket.key]);
                }
            }
            Err(e) => {
                warn!("History fetch for {} failed: {}", ticket.key, e);
                if self.store.history_failed(&ticket) {
                    self.notice(Notice::HistoryFetchFailed {
                        key: ticket.key.clone(),
                        reason: e.to_string(),
                    });
                    self.refresh(&[ticket.key]);
                }
            }
        }
    }

    fn on_push(&mut self, frame: MessageDto) {
        let ingested = match normalize(frame, Source::Push) {
            Ok(ingested) => ingested,
            Err(e) => {
                warn!("Dropping push frame: {}", e);
                return;
            }
        };

        let self_id = self.session.self_id;
        let message = &ingested.message;
        if message.sender_id == self_id {
            debug!("Dropping echo of own message in {}", ingested.key);
            return;
        }
        if message.receiver_id != self_id {
            debug!("Dropping push frame for {} addressed to someone else", ingested.key);
            return;
        }

        let key = ingested.key;
        let Some(outcome) = self.store.append_incoming(&key, ingested.message) else {
            return;
        };
        if outcome.created {
            self.resolve_display_name(&key);
        }
        if let Some(ticket) = outcome.history_request {
            self.spawn_history(ticket);
        }
        self.refresh(&[key]);
    }

    fn on_open_directory(&mut self) {
        if let Some(directory) = &self.directory {
            let _ = self.events.send(ViewEvent::Directory(directory.clone()));
            return;
        }
        if self.directory_pending {
            return;
        }
        self.directory_pending = true;

        let api = self.api.clone();
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let result = api.list_users().await;
            handle.post(Action::DirectoryLoaded(result));
        });
    }

    fn on_directory(&mut self, result: Result<Vec<UserDetail>, FetchError>) {
        self.directory_pending = false;
        let users = match result {
            Ok(users) => users,
            Err(e) => {
                warn!("Directory fetch failed: {}", e);
                self.notice(Notice::DirectoryFetchFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        let self_id = self.session.self_id;
        let directory: Vec<DisplayProfile> = users
            .into_iter()
            .filter(|u| u.id != self_id)
            .map(DisplayProfile::from)
            .collect();
        for profile in &directory {
            self.cache.insert(profile.clone());
        }
        debug!("Directory lists {} users", directory.len());
        let _ = self.events.send(ViewEvent::Directory(directory.clone()));
        self.directory = Some(directory);
    }

    fn on_start_conversation(&mut self, other: ParticipantId) {
        let profile = self.cache.get(other);
        let Some((key, created)) = self.store.start_conversation(other, profile.as_ref()) else {
            warn!("Cannot start a conversation with yourself");
            return;
        };
        if created {
            info!("Started conversation {}", key);
        }
        self.resolve_display_name(&key);
        self.on_select(key);
    }

    fn on_send(&mut self, text: &str) -> Result<Uuid, SendError> {
        let outbound = self.composer.send(
            &mut self.store,
            self.projector.selection(),
            text,
            self.transport.is_connected(),
        )?;

        let transport = self.transport.clone();
        let api = self.api.clone();
        let handle = self.handle.clone();
        let self_id = self.session.self_id;
        let publish = outbound.publish;
        let history = outbound.history_request;
        let (key, local_ref) = (outbound.key.clone(), outbound.local_ref);
        tokio::spawn(async move {
            let result = transport.publish(publish).await;
            handle.post(Action::Published {
                key,
                local_ref,
                result,
            });
            // history goes out after the publish so the stored copy is in it
            if let Some(ticket) = history {
                load_history(api.as_ref(), self_id, ticket, &handle).await;
            }
        });

        self.refresh(&[outbound.key]);
        Ok(outbound.local_ref)
    }

    fn on_published(&mut self, key: ConversationKey, local_ref: Uuid, result: Result<(), TransportError>) {
        let delivery = match result {
            Ok(()) => Delivery::Published,
            Err(e) => {
                warn!("Publishing {} failed: {}", local_ref, e);
                self.notice(Notice::PublishFailed {
                    key: key.clone(),
                    local_ref,
                    reason: e.to_string(),
                });
                Delivery::Failed
            }
        };
        if self.store.mark_delivery(&key, local_ref, delivery) {
            self.refresh(&[key]);
        }
    }

    fn on_connection(&mut self, up: bool) {
        if self.connected == Some(up) {
            return;
        }
        self.connected = Some(up);
        if up {
            info!("Push transport connected");
            self.notice(Notice::TransportConnected);
        } else {
            warn!("Push transport disconnected");
            self.notice(Notice::TransportDisconnected);
        }
    }

    async fn on_logout(&mut self) {
        info!("Logging out user {}", self.session.self_id);
        self.store.clear();
        self.cache.clear();
        self.projector.clear();
        self.directory = None;
        self.transport.close().await;
        let _ = self.events.send(ViewEvent::Closed);
    }

    // -- Helpers --

    fn spawn_summaries(&self) {
        let api = self.api.clone();
        let handle = self.handle.clone();
        let self_id = self.session.self_id;
        tokio::spawn(async move {
            let result = api.fetch_summaries(self_id).await;
            handle.post(Action::SummariesLoaded(result));
        });
    }

    fn spawn_history(&self, ticket: HistoryTicket) {
        debug!("Fetching history for {} (generation {})", ticket.key, ticket.generation);
        let api = self.api.clone();
        let handle = self.handle.clone();
        let self_id = self.session.self_id;
        tokio::spawn(async move {
            load_history(api.as_ref(), self_id, ticket, &handle).await;
        });
    }

    /// Start the one display-name lookup for `key`, if it is still due.
    fn resolve_display_name(&mut self, key: &ConversationKey) {
        let Some(other) = self.store.claim_display_name(key) else {
            return;
        };
        if let Some(profile) = self.cache.get(other) {
            self.store.apply_display_name(key, &profile);
            return;
        }

        let cache = self.cache.clone();
        let handle = self.handle.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let profile = cache.resolve(other).await;
            handle.post(Action::DisplayNameResolved { key, profile });
        });
    }

    fn refresh(&self, changed: &[ConversationKey]) {
        let refresh = self.projector.affected(changed);
        if refresh.list {
            self.emit_list();
        }
        if refresh.active {
            self.emit_active();
        }
    }

    fn emit_list(&self) {
        let _ = self.events.send(ViewEvent::List(self.projector.list_view(&self.store)));
    }

    fn emit_active(&self) {
        let _ = self
            .events
            .send(ViewEvent::Active(self.projector.active_view(&self.store)));
    }

    fn notice(&self, notice: Notice) {
        let _ = self.events.send(ViewEvent::Notice(notice));
    }
}

async fn load_history(api: &dyn ChatApi, self_id: ParticipantId, ticket: HistoryTicket, handle: &EngineHandle) {
    let result = api.fetch_history(self_id, ticket.other).await;
    handle.post(Action::HistoryLoaded { ticket, result });
}
