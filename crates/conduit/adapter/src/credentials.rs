//! Upstream credential lookup.
//!
//! Provider access tokens (obtained through an OAuth2 exchange elsewhere)
//! are looked up per principal through an injected [`CredentialStore`]
//! instead of living inside the adapter.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_types::PrincipalId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Provider credential handed to the upstream operation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamCredential {
    pub access_token: String,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl UpstreamCredential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

impl fmt::Debug for UpstreamCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamCredential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of upstream credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credential_for(&self, principal: &PrincipalId) -> Option<UpstreamCredential>;
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: DashMap<PrincipalId, UpstreamCredential>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, principal: PrincipalId, credential: UpstreamCredential) {
        self.credentials.insert(principal, credential);
    }

    pub fn remove(&self, principal: &PrincipalId) -> Option<UpstreamCredential> {
        self.credentials.remove(principal).map(|(_, credential)| credential)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn credential_for(&self, principal: &PrincipalId) -> Option<UpstreamCredential> {
        self.credentials.get(principal).map(|entry| entry.clone())
    }
}
