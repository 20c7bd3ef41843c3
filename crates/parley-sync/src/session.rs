use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use parley_types::ParticipantId;

use crate::api::{ChatApi, Transport};
use crate::engine::{self, EngineHandle, SyncEngine, ViewEvent};

/// The authenticated user for the lifetime of one login.
#[derive(Clone)]
pub struct Session {
    pub self_id: ParticipantId,
    token: String,
}

impl Session {
    pub fn new(self_id: ParticipantId, token: impl Into<String>) -> Self {
        Self {
            self_id,
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("self_id", &self.self_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Construction and teardown point of everything session-scoped: the
/// store, the detail cache, the push transport and the engine task.
pub struct SessionLifecycle {
    handle: EngineHandle,
    events: broadcast::Sender<ViewEvent>,
    task: JoinHandle<()>,
}

impl SessionLifecycle {
    /// Start the engine for `session`. `connect` is given the engine handle
    /// so the transport can route push frames and connectivity changes to
    /// it. The returned receiver sees every event from the first one on.
    pub fn start<A, F>(session: Session, api: Arc<A>, connect: F) -> (Self, broadcast::Receiver<ViewEvent>)
    where
        A: ChatApi + 'static,
        F: FnOnce(EngineHandle) -> Arc<dyn Transport>,
    {
        let (handle, inbox) = engine::channel();
        let transport = connect(handle.clone());
        let engine = SyncEngine::new(session, api, transport, handle.clone(), inbox);
        let events = engine.event_sender();
        let first = engine.subscribe();
        let task = tokio::spawn(engine.run());

        (Self { handle, events, task }, first)
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    /// Tear the session down and wait for the engine to finish.
    pub async fn logout(self) {
        self.handle.logout().await;
        if let Err(e) = self.task.await {
            warn!("Engine task ended abnormally: {}", e);
        }
    }
}
