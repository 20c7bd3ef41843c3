//! Conversation synchronization core.
//!
//! Reconciles three independent message sources (the summary fetch, per
//! conversation history fetches and push frames) into one ordered,
//! deduplicated set of two-party conversations, and projects the open
//! conversation for a renderer. All mutable state is owned by a single
//! [`SyncEngine`] task; I/O runs in spawned tasks that post their results
//! back as actions.

pub mod api;
pub mod composer;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod key;
pub mod message;
pub mod projector;
pub mod session;
pub mod store;
pub mod user_cache;

pub use api::{ChatApi, Transport};
pub use composer::{Outbound, OutboundComposer};
pub use engine::{EngineHandle, Inbox, Notice, SyncEngine, ViewEvent};
pub use error::{FetchError, IngestError, SendError, TransportError};
pub use ingest::{Ingested, Source, normalize, normalize_batch};
pub use key::ConversationKey;
pub use message::{Delivery, MessageRecord};
pub use projector::{ActiveConversationProjector, ActiveConversationView, ConversationListItem, MessageView, Refresh};
pub use session::{Session, SessionLifecycle};
pub use store::{AppendOutcome, ConversationPhase, ConversationState, ConversationStore, HistoryTicket, Participants};
pub use user_cache::{DisplayProfile, UserDetailCache, UserDirectory};
