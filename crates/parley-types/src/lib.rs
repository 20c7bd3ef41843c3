//! Wire shapes shared by the sync core and the network adapters.
//!
//! Field names follow the chat server's JSON (camelCase); nothing in here
//! knows about conversations or ordering.

pub mod api;
pub mod models;
pub mod time;

pub use api::{Claims, LoginRequest, LoginResponse, MessageDto, SelfProfile, UserDetail, UserRef};
pub use models::{MessageStatus, ParticipantId, Role};
