use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use parley_types::{ParticipantId, UserDetail};

use crate::error::FetchError;

/// What the list and the message header show for a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayProfile {
    pub id: ParticipantId,
    pub name: String,
    pub email: Option<String>,
}

impl DisplayProfile {
    /// Degraded profile used when a lookup fails.
    pub fn fallback(id: ParticipantId) -> Self {
        Self {
            id,
            name: format!("User {}", id),
            email: None,
        }
    }
}

impl From<UserDetail> for DisplayProfile {
    fn from(detail: UserDetail) -> Self {
        let name = detail.name.trim();
        Self {
            id: detail.id,
            name: if name.is_empty() {
                format!("User {}", detail.id)
            } else {
                name.to_string()
            },
            email: (!detail.email.is_empty()).then_some(detail.email),
        }
    }
}

/// Per-participant detail lookup.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn fetch_detail(&self, id: ParticipantId) -> Result<UserDetail, FetchError>;
}

/// Session-scoped memo of participant profiles. Cheap to clone; clones
/// share the same map.
///
/// A failed lookup is cached as the fallback profile and never retried
/// within the session. Concurrent resolutions of one id may both hit the
/// directory; the last one to finish wins.
#[derive(Clone)]
pub struct UserDetailCache {
    inner: Arc<Inner>,
}

struct Inner {
    directory: Arc<dyn UserDirectory>,
    profiles: RwLock<HashMap<ParticipantId, DisplayProfile>>,
}

impl UserDetailCache {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                directory,
                profiles: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub async fn resolve(&self, id: ParticipantId) -> DisplayProfile {
        if let Some(profile) = self.get(id) {
            return profile;
        }

        let profile = match self.inner.directory.fetch_detail(id).await {
            Ok(detail) => {
                debug!("Resolved user {} as {}", id, detail.name);
                DisplayProfile::from(detail)
            }
            Err(e) => {
                warn!("Detail lookup for user {} failed, using fallback: {}", id, e);
                DisplayProfile::fallback(id)
            }
        };

        self.insert(profile.clone());
        profile
    }

    pub fn get(&self, id: ParticipantId) -> Option<DisplayProfile> {
        self.inner
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Last writer wins.
    pub fn insert(&self, profile: DisplayProfile) {
        self.inner
            .profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(profile.id, profile);
    }

    pub fn clear(&self) {
        self.inner
            .profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
