//! The only state that survives a restart: the token and a minimal self
//! profile.

use std::path::Path;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use parley_types::{Claims, SelfProfile};

#[derive(Debug, Error)]
pub enum SessionFileError {
    #[error("session file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("session file is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stored session has expired")]
    Expired,

    #[error("stored token is unreadable: {0}")]
    InvalidToken(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token: String,
    pub user: SelfProfile,
}

/// Read the saved session. A missing file is `Ok(None)`; an expired token
/// is an error so the caller logs in again.
pub fn load(path: &Path) -> Result<Option<StoredSession>, SessionFileError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let stored: StoredSession = serde_json::from_str(&raw)?;
    check_token(&stored.token)?;
    debug!("Loaded session for user {} from {}", stored.user.id, path.display());
    Ok(Some(stored))
}

pub fn save(path: &Path, session: &StoredSession) -> Result<(), SessionFileError> {
    let json = serde_json::to_string_pretty(session)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn clear(path: &Path) -> Result<(), SessionFileError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Read the token's claims and reject it if `exp` has passed. The signature
/// is not checked; the server does that on every request.
pub fn check_token(token: &str) -> Result<Claims, SessionFileError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_aud = false;

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => SessionFileError::Expired,
            _ => SessionFileError::InvalidToken(e.to_string()),
        })
}
