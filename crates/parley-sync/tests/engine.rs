//! Integration test: run a whole session against in-memory fakes of the
//! REST API and the push transport, observing only the view events.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, broadcast};
use tokio::time::timeout;

use parley_sync::{
    ChatApi, ConversationKey, Delivery, FetchError, Notice, SendError, Session, SessionLifecycle,
    Transport, TransportError, UserDirectory, ViewEvent,
};
use parley_types::{MessageDto, ParticipantId, UserDetail};

const ME: i64 = 1;

// -- Fakes --

struct FakeApi {
    summaries: Mutex<Result<Vec<MessageDto>, FetchError>>,
    histories: Mutex<HashMap<i64, Result<Vec<MessageDto>, FetchError>>>,
    history_calls: AtomicUsize,
    history_gate: Semaphore,
    detail_calls: AtomicUsize,
    failing_details: HashSet<i64>,
    users: Vec<UserDetail>,
    user_calls: AtomicUsize,
}

impl FakeApi {
    fn new() -> Self {
        Self {
            summaries: Mutex::new(Ok(Vec::new())),
            histories: Mutex::new(HashMap::new()),
            history_calls: AtomicUsize::new(0),
            history_gate: Semaphore::new(Semaphore::MAX_PERMITS),
            detail_calls: AtomicUsize::new(0),
            failing_details: HashSet::new(),
            users: Vec::new(),
            user_calls: AtomicUsize::new(0),
        }
    }

    fn gated() -> Self {
        Self {
            history_gate: Semaphore::new(0),
            ..Self::new()
        }
    }

    fn with_summaries(self, rows: Vec<MessageDto>) -> Self {
        *self.summaries.lock().unwrap() = Ok(rows);
        self
    }

    fn with_history(self, other: i64, result: Result<Vec<MessageDto>, FetchError>) -> Self {
        self.histories.lock().unwrap().insert(other, result);
        self
    }
}

#[async_trait]
impl UserDirectory for FakeApi {
    async fn fetch_detail(&self, id: ParticipantId) -> Result<UserDetail, FetchError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_details.contains(&id.0) {
            return Err(FetchError::Status {
                status: 404,
                body: "User not found".into(),
            });
        }
        Ok(UserDetail {
            id,
            name: format!("Name{}", id),
            email: String::new(),
        })
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn fetch_summaries(&self, _self_id: ParticipantId) -> Result<Vec<MessageDto>, FetchError> {
        self.summaries.lock().unwrap().clone()
    }

    async fn fetch_history(
        &self,
        _self_id: ParticipantId,
        other: ParticipantId,
    ) -> Result<Vec<MessageDto>, FetchError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .history_gate
            .acquire()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        self.histories
            .lock()
            .unwrap()
            .get(&other.0)
            .cloned()
            .unwrap_or(Ok(Vec::new()))
    }

    async fn list_users(&self) -> Result<Vec<UserDetail>, FetchError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.clone())
    }
}

#[derive(Default)]
struct FakeTransport {
    connected: AtomicBool,
    fail: AtomicBool,
    closed: AtomicBool,
    published: Mutex<Vec<MessageDto>>,
    publish_gate: Option<Semaphore>,
}

impl FakeTransport {
    fn connected() -> Arc<Self> {
        let t = Self::default();
        t.connected.store(true, Ordering::SeqCst);
        Arc::new(t)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, message: MessageDto) -> Result<(), TransportError> {
        if let Some(gate) = &self.publish_gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| TransportError::Publish(e.to_string()))?;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Publish("broker rejected frame".into()));
        }
        self.published.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

// -- Helpers --

fn frame(id: i64, from: i64, to: i64, text: &str, minute: u32) -> MessageDto {
    MessageDto {
        id: Some(id),
        sender_id: Some(ParticipantId(from)),
        receiver_id: Some(ParticipantId(to)),
        message_text: Some(text.to_string()),
        sent_at: Some(format!("2024-05-01T10:{:02}:00", minute)),
        ..Default::default()
    }
}

fn key(a: i64, b: i64) -> ConversationKey {
    ConversationKey::new(ParticipantId(a), ParticipantId(b))
}

fn start(
    api: Arc<FakeApi>,
    transport: Arc<FakeTransport>,
) -> (SessionLifecycle, broadcast::Receiver<ViewEvent>) {
    SessionLifecycle::start(Session::new(ParticipantId(ME), "token"), api, move |_| {
        transport as Arc<dyn Transport>
    })
}

/// Wait (up to a second) for the first event matching `pred`.
async fn wait_for(
    rx: &mut broadcast::Receiver<ViewEvent>,
    mut pred: impl FnMut(&ViewEvent) -> bool,
) -> ViewEvent {
    let found = timeout(Duration::from_secs(1), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for view event")
}

/// Collect everything emitted until the engine goes quiet.
async fn drain(rx: &mut broadcast::Receiver<ViewEvent>) -> Vec<ViewEvent> {
    let mut events = Vec::new();
    while let Ok(Ok(event)) = timeout(Duration::from_millis(50), rx.recv()).await {
        events.push(event);
    }
    events
}

fn is_list(event: &ViewEvent) -> bool {
    matches!(event, ViewEvent::List(_))
}

// -- Scenarios --

#[tokio::test]
async fn summaries_populate_list_newest_first_with_names() {
    let api = Arc::new(FakeApi {
        failing_details: [3].into_iter().collect(),
        ..FakeApi::new()
    }
    .with_summaries(vec![frame(1, 2, ME, "hi", 1), frame(2, ME, 3, "yo", 2)]));
    let (session, mut rx) = start(api.clone(), FakeTransport::connected());

    let event = wait_for(&mut rx, |e| match e {
        ViewEvent::List(items) => {
            items.iter().any(|i| i.display_name == "Name2") && items.iter().any(|i| i.display_name == "User 3")
        }
        _ => false,
    })
    .await;

    let ViewEvent::List(items) = event else { unreachable!() };
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].key, key(1, 3));
    assert_eq!(items[0].last_message, "yo");
    assert_eq!(items[1].key, key(1, 2));
    assert!(items.iter().all(|i| !i.is_active));
    drain(&mut rx).await;
    assert_eq!(api.detail_calls.load(Ordering::SeqCst), 2);

    session.logout().await;
}

#[tokio::test]
async fn selecting_twice_before_completion_fetches_history_once() {
    let api = Arc::new(
        FakeApi::gated()
            .with_summaries(vec![frame(2, 2, ME, "second", 2)])
            .with_history(2, Ok(vec![frame(2, 2, ME, "second", 2), frame(1, ME, 2, "first", 1)])),
    );
    let (session, mut rx) = start(api.clone(), FakeTransport::connected());
    wait_for(&mut rx, is_list).await;

    session.handle().select(key(1, 2));
    session.handle().select(key(1, 2));

    let event = wait_for(&mut rx, |e| matches!(e, ViewEvent::Active(Some(_)))).await;
    let ViewEvent::Active(Some(view)) = event else { unreachable!() };
    assert!(view.history_pending);
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].text, "second");

    drain(&mut rx).await;
    assert_eq!(api.history_calls.load(Ordering::SeqCst), 1);

    api.history_gate.add_permits(1);
    let event = wait_for(&mut rx, |e| matches!(e, ViewEvent::Active(Some(v)) if v.history_loaded)).await;
    let ViewEvent::Active(Some(view)) = event else { unreachable!() };
    let texts: Vec<_> = view.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["first", "second"]);
    assert_eq!(view.messages.iter().map(|m| m.mine).collect::<Vec<_>>(), [true, false]);
    assert_eq!(api.history_calls.load(Ordering::SeqCst), 1);

    session.logout().await;
}

#[tokio::test]
async fn send_preconditions_are_checked_in_order() {
    let api = Arc::new(FakeApi::new().with_summaries(vec![frame(1, 2, ME, "hi", 1)]));
    let transport = Arc::new(FakeTransport::default());
    let (session, mut rx) = start(api, transport.clone());
    wait_for(&mut rx, is_list).await;
    let handle = session.handle().clone();

    assert_eq!(handle.send("   ").await, Err(SendError::EmptyMessage));
    assert_eq!(handle.send("hi").await, Err(SendError::NoActiveConversation));

    handle.select(key(1, 2));
    wait_for(&mut rx, |e| matches!(e, ViewEvent::Active(Some(v)) if v.history_loaded)).await;
    drain(&mut rx).await;

    assert_eq!(handle.send("hi").await, Err(SendError::TransportDisconnected));
    assert!(drain(&mut rx).await.is_empty());
    assert!(transport.published.lock().unwrap().is_empty());

    session.logout().await;
}

#[tokio::test]
async fn send_appends_optimistically_then_marks_published() {
    let api = Arc::new(FakeApi::new());
    let transport = FakeTransport::connected();
    let (session, mut rx) = start(api, transport.clone());
    wait_for(&mut rx, is_list).await;
    let handle = session.handle().clone();

    handle.start_conversation(ParticipantId(5));
    wait_for(&mut rx, |e| matches!(e, ViewEvent::Active(Some(v)) if v.history_loaded)).await;

    let local_ref = handle.send("  hello ").await.unwrap();
    let event = wait_for(&mut rx, |e| {
        matches!(e, ViewEvent::Active(Some(v))
            if v.messages.iter().any(|m| m.local_ref == Some(local_ref) && m.delivery == Delivery::Published))
    })
    .await;
    let ViewEvent::Active(Some(view)) = event else { unreachable!() };
    assert_eq!(view.messages.len(), 1);
    assert!(view.messages[0].mine);
    assert_eq!(view.messages[0].text, "hello");

    let published = transport.published.lock().unwrap().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].receiver_id, Some(ParticipantId(5)));
    assert_eq!(published[0].message_text.as_deref(), Some("hello"));

    session.logout().await;
}

#[tokio::test]
async fn publish_failure_keeps_message_and_marks_it_failed() {
    let api = Arc::new(FakeApi::new());
    let transport = FakeTransport::connected();
    transport.fail.store(true, Ordering::SeqCst);
    let (session, mut rx) = start(api, transport);
    wait_for(&mut rx, is_list).await;
    let handle = session.handle().clone();

    handle.start_conversation(ParticipantId(5));
    wait_for(&mut rx, |e| matches!(e, ViewEvent::Active(Some(v)) if v.history_loaded)).await;
    let local_ref = handle.send("lost").await.unwrap();

    let event = wait_for(&mut rx, |e| matches!(e, ViewEvent::Notice(Notice::PublishFailed { .. }))).await;
    assert!(matches!(event, ViewEvent::Notice(Notice::PublishFailed { local_ref: r, .. }) if r == local_ref));

    let event = wait_for(&mut rx, |e| matches!(e, ViewEvent::Active(Some(_)))).await;
    let ViewEvent::Active(Some(view)) = event else { unreachable!() };
    assert_eq!(view.messages[0].delivery, Delivery::Failed);

    session.logout().await;
}

#[tokio::test]
async fn history_requested_by_a_send_waits_for_the_publish() {
    let api = Arc::new(
        FakeApi::new()
            .with_summaries(vec![frame(1, 2, ME, "hi", 1)])
            .with_history(2, Err(FetchError::Request("connection refused".into()))),
    );
    let transport = Arc::new(FakeTransport {
        publish_gate: Some(Semaphore::new(0)),
        ..Default::default()
    });
    transport.connected.store(true, Ordering::SeqCst);
    let (session, mut rx) = start(api.clone(), transport.clone());
    wait_for(&mut rx, is_list).await;
    let handle = session.handle().clone();

    handle.select(key(1, 2));
    wait_for(&mut rx, |e| matches!(e, ViewEvent::Notice(Notice::HistoryFetchFailed { .. }))).await;
    api.histories
        .lock()
        .unwrap()
        .insert(2, Ok(vec![frame(1, 2, ME, "hi", 1), frame(2, ME, 2, "hello", 2)]));

    handle.send("hello").await.unwrap();
    drain(&mut rx).await;
    assert_eq!(api.history_calls.load(Ordering::SeqCst), 1);

    if let Some(gate) = &transport.publish_gate {
        gate.add_permits(1);
    }
    let event = wait_for(&mut rx, |e| matches!(e, ViewEvent::Active(Some(v)) if v.history_loaded)).await;
    let ViewEvent::Active(Some(view)) = event else { unreachable!() };
    let texts: Vec<_> = view.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["hi", "hello"]);
    assert_eq!(api.history_calls.load(Ordering::SeqCst), 2);
    assert_eq!(transport.published.lock().unwrap().len(), 1);

    session.logout().await;
}

#[tokio::test]
async fn push_from_self_or_between_others_is_discarded() {
    let api = Arc::new(FakeApi::new());
    let (session, mut rx) = start(api, FakeTransport::connected());
    wait_for(&mut rx, is_list).await;
    let handle = session.handle().clone();

    handle.push(frame(1, ME, 2, "my own echo", 1));
    handle.push(frame(2, 5, 6, "not for me", 1));
    assert!(drain(&mut rx).await.is_empty());

    handle.push(frame(3, 2, ME, "for me", 2));
    let event = wait_for(&mut rx, is_list).await;
    let ViewEvent::List(items) = event else { unreachable!() };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].last_message, "for me");

    session.logout().await;
}

#[tokio::test]
async fn pushes_into_unloaded_conversation_fetch_history_once() {
    let api = Arc::new(FakeApi::new().with_history(4, Ok(vec![frame(1, 4, ME, "old", 0)])));
    let (session, mut rx) = start(api.clone(), FakeTransport::connected());
    wait_for(&mut rx, is_list).await;
    let handle = session.handle().clone();

    handle.push(frame(2, 4, ME, "one", 1));
    handle.push(frame(3, 4, ME, "two", 2));
    drain(&mut rx).await;
    assert_eq!(api.history_calls.load(Ordering::SeqCst), 1);

    handle.select(key(1, 4));
    let event = wait_for(&mut rx, |e| matches!(e, ViewEvent::Active(Some(_)))).await;
    let ViewEvent::Active(Some(view)) = event else { unreachable!() };
    assert!(view.history_loaded);
    let texts: Vec<_> = view.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, ["old", "one", "two"]);
    assert_eq!(api.history_calls.load(Ordering::SeqCst), 1);

    session.logout().await;
}

#[tokio::test]
async fn failed_detail_lookup_is_cached_as_fallback() {
    let api = Arc::new(
        FakeApi {
            failing_details: [42].into_iter().collect(),
            ..FakeApi::new()
        }
        .with_summaries(vec![frame(1, 42, ME, "hey", 1)]),
    );
    let (session, mut rx) = start(api.clone(), FakeTransport::connected());
    wait_for(&mut rx, |e| {
        matches!(e, ViewEvent::List(items) if items.iter().any(|i| i.display_name == "User 42"))
    })
    .await;

    session.handle().start_conversation(ParticipantId(42));
    let event = wait_for(&mut rx, |e| matches!(e, ViewEvent::Active(Some(_)))).await;
    let ViewEvent::Active(Some(view)) = event else { unreachable!() };
    assert_eq!(view.display_name, "User 42");
    drain(&mut rx).await;
    assert_eq!(api.detail_calls.load(Ordering::SeqCst), 1);

    session.logout().await;
}

#[tokio::test]
async fn history_failure_notifies_and_reselect_retries() {
    let api = Arc::new(
        FakeApi::new()
            .with_summaries(vec![frame(1, 2, ME, "hi", 1)])
            .with_history(2, Err(FetchError::Request("connection refused".into()))),
    );
    let (session, mut rx) = start(api.clone(), FakeTransport::connected());
    wait_for(&mut rx, is_list).await;

    session.handle().select(key(1, 2));
    let event = wait_for(&mut rx, |e| matches!(e, ViewEvent::Notice(_))).await;
    assert!(matches!(event, ViewEvent::Notice(Notice::HistoryFetchFailed { key: k, .. }) if k == key(1, 2)));
    let event = wait_for(&mut rx, |e| matches!(e, ViewEvent::Active(Some(_)))).await;
    let ViewEvent::Active(Some(view)) = event else { unreachable!() };
    assert!(!view.history_loaded);
    assert!(!view.history_pending);

    session.handle().select(key(1, 2));
    wait_for(&mut rx, |e| matches!(e, ViewEvent::Notice(Notice::HistoryFetchFailed { .. }))).await;
    assert_eq!(api.history_calls.load(Ordering::SeqCst), 2);

    session.logout().await;
}

#[tokio::test]
async fn directory_excludes_self_and_names_new_conversations() {
    let api = Arc::new(FakeApi {
        users: vec![
            UserDetail { id: ParticipantId(ME), name: "Me".into(), email: "me@x".into() },
            UserDetail { id: ParticipantId(5), name: "Eve".into(), email: "eve@x".into() },
        ],
        ..FakeApi::new()
    });
    let (session, mut rx) = start(api.clone(), FakeTransport::connected());
    wait_for(&mut rx, is_list).await;
    let handle = session.handle().clone();

    handle.open_directory();
    let event = wait_for(&mut rx, |e| matches!(e, ViewEvent::Directory(_))).await;
    let ViewEvent::Directory(users) = event else { unreachable!() };
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "Eve");

    handle.start_conversation(ParticipantId(5));
    let event = wait_for(&mut rx, |e| matches!(e, ViewEvent::Active(Some(_)))).await;
    let ViewEvent::Active(Some(view)) = event else { unreachable!() };
    assert_eq!(view.display_name, "Eve");
    assert_eq!(api.detail_calls.load(Ordering::SeqCst), 0);

    handle.open_directory();
    wait_for(&mut rx, |e| matches!(e, ViewEvent::Directory(_))).await;
    assert_eq!(api.user_calls.load(Ordering::SeqCst), 1);

    session.logout().await;
}

#[tokio::test]
async fn connectivity_changes_are_reported_once() {
    let (session, mut rx) = start(Arc::new(FakeApi::new()), FakeTransport::connected());
    wait_for(&mut rx, is_list).await;

    session.handle().connection_changed(false);
    session.handle().connection_changed(false);
    session.handle().connection_changed(true);

    let notices: Vec<_> = drain(&mut rx)
        .await
        .into_iter()
        .filter_map(|e| match e {
            ViewEvent::Notice(n) => Some(n),
            _ => None,
        })
        .collect();
    assert_eq!(notices, [Notice::TransportDisconnected, Notice::TransportConnected]);

    session.logout().await;
}

#[tokio::test]
async fn logout_closes_transport_and_stops_engine() {
    let transport = FakeTransport::connected();
    let (session, mut rx) = start(
        Arc::new(FakeApi::new().with_summaries(vec![frame(1, 2, ME, "hi", 1)])),
        transport.clone(),
    );
    wait_for(&mut rx, is_list).await;
    let handle = session.handle().clone();

    session.logout().await;
    assert!(transport.closed.load(Ordering::SeqCst));
    wait_for(&mut rx, |e| matches!(e, ViewEvent::Closed)).await;
    assert_eq!(handle.send("anyone there?").await, Err(SendError::EngineStopped));
}
