use thiserror::Error;

/// A raw record the core cannot use. The record is skipped, never the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("malformed message record: {0}")]
    Malformed(&'static str),
}

/// Failure of a REST fetch (summaries, history, detail lookup, directory).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Why a send was refused. Every variant is reported before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("select a conversation first")]
    NoActiveConversation,

    #[error("connection lost; wait for it to come back and try again")]
    TransportDisconnected,

    #[error("the session has ended")]
    EngineStopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is disconnected")]
    Disconnected,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("publish failed: {0}")]
    Publish(String),
}
