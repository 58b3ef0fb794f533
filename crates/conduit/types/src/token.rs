//! Capability tokens.
//!
//! A token is an immutable, already-signed grant: *principal P may perform
//! operations needing these scopes, against these resources, on service
//! `audience`, until `issued_at + ttl`*. Issuing and signature checking
//! happen upstream; adapters only evaluate the grant.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthorizationFailure, TokenError};
use crate::ids::{PrincipalId, TokenId};
use crate::scope::Scope;

/// Scoped, time-limited authorization grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TokenFields", into = "TokenFields")]
pub struct CapabilityToken {
    token_id: TokenId,
    principal_id: PrincipalId,
    scope: BTreeSet<Scope>,
    resource_ids: BTreeSet<String>,
    ttl_seconds: u64,
    audience: String,
    issued_at: DateTime<Utc>,
    signature: String,
    expires_at: DateTime<Utc>,
}

impl CapabilityToken {
    pub fn builder() -> CapabilityTokenBuilder {
        CapabilityTokenBuilder::default()
    }

    pub fn token_id(&self) -> &TokenId {
        &self.token_id
    }

    pub fn principal_id(&self) -> &PrincipalId {
        &self.principal_id
    }

    pub fn scope(&self) -> &BTreeSet<Scope> {
        &self.scope
    }

    pub fn resource_ids(&self) -> &BTreeSet<String> {
        &self.resource_ids
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Instant from which the token is no longer valid.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True iff `now` is strictly before expiry.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn has_scope(&self, required: &Scope) -> bool {
        self.scope.contains(required)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// An empty resource set leaves the token unrestricted.
    pub fn covers_resource(&self, resource_id: &str) -> bool {
        self.resource_ids.is_empty() || self.resource_ids.contains(resource_id)
    }

    /// Check the token against one operation, reporting the first reason it
    /// is unusable.
    pub fn authorize(
        &self,
        now: DateTime<Utc>,
        required: &Scope,
        audience: &str,
    ) -> Result<(), AuthorizationFailure> {
        if !self.is_valid(now) {
            return Err(AuthorizationFailure::Expired);
        }
        if self.audience != audience {
            return Err(AuthorizationFailure::AudienceMismatch {
                expected: audience.to_string(),
                actual: self.audience.clone(),
            });
        }
        if !self.has_scope(required) {
            return Err(AuthorizationFailure::MissingScope(required.clone()));
        }
        Ok(())
    }

    /// Boolean form of [`authorize`](Self::authorize).
    pub fn validate_for_operation(
        &self,
        now: DateTime<Utc>,
        required: &Scope,
        audience: &str,
    ) -> bool {
        self.authorize(now, required, audience).is_ok()
    }
}

/// Builder for [`CapabilityToken`].
#[derive(Debug, Default)]
pub struct CapabilityTokenBuilder {
    token_id: Option<TokenId>,
    principal_id: Option<PrincipalId>,
    scope: BTreeSet<Scope>,
    resource_ids: BTreeSet<String>,
    ttl_seconds: Option<u64>,
    audience: Option<String>,
    issued_at: Option<DateTime<Utc>>,
    signature: String,
}

impl CapabilityTokenBuilder {
    pub fn token_id(mut self, id: impl Into<TokenId>) -> Self {
        self.token_id = Some(id.into());
        self
    }

    pub fn principal(mut self, principal: impl Into<PrincipalId>) -> Self {
        self.principal_id = Some(principal.into());
        self
    }

    pub fn scope(mut self, scope: impl Into<Scope>) -> Self {
        self.scope.insert(scope.into());
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scope>,
    {
        self.scope.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_ids.insert(resource_id.into());
        self
    }

    pub fn ttl_seconds(mut self, ttl: u64) -> Self {
        self.ttl_seconds = Some(ttl);
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.issued_at = Some(at);
        self
    }

    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Build the token. `token_id` defaults to a fresh UUID and `issued_at`
    /// to the current wall time.
    pub fn build(self) -> Result<CapabilityToken, TokenError> {
        TokenFields {
            token_id: self.token_id.unwrap_or_else(TokenId::generate),
            principal_id: self
                .principal_id
                .ok_or(TokenError::MissingField("principal_id"))?,
            scope: self.scope,
            resource_ids: self.resource_ids,
            ttl_seconds: self.ttl_seconds.ok_or(TokenError::MissingField("ttl_seconds"))?,
            audience: self.audience.ok_or(TokenError::MissingField("audience"))?,
            issued_at: self.issued_at.unwrap_or_else(Utc::now),
            signature: self.signature,
        }
        .try_into()
    }
}

/// Wire form of a token; validated on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenFields {
    token_id: TokenId,
    principal_id: PrincipalId,
    #[serde(default)]
    scope: BTreeSet<Scope>,
    #[serde(default)]
    resource_ids: BTreeSet<String>,
    ttl_seconds: u64,
    audience: String,
    issued_at: DateTime<Utc>,
    #[serde(default)]
    signature: String,
}

impl TryFrom<TokenFields> for CapabilityToken {
    type Error = TokenError;

    fn try_from(fields: TokenFields) -> Result<Self, Self::Error> {
        if fields.token_id.as_str().is_empty() {
            return Err(TokenError::MissingField("token_id"));
        }
        if fields.principal_id.as_str().is_empty() {
            return Err(TokenError::MissingField("principal_id"));
        }
        if fields.audience.is_empty() {
            return Err(TokenError::MissingField("audience"));
        }
        if fields.ttl_seconds == 0 {
            return Err(TokenError::ZeroTtl);
        }

        let expires_at = i64::try_from(fields.ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| fields.issued_at.checked_add_signed(ttl))
            .ok_or(TokenError::TtlOutOfRange(fields.ttl_seconds))?;

        Ok(Self {
            token_id: fields.token_id,
            principal_id: fields.principal_id,
            scope: fields.scope,
            resource_ids: fields.resource_ids,
            ttl_seconds: fields.ttl_seconds,
            audience: fields.audience,
            issued_at: fields.issued_at,
            signature: fields.signature,
            expires_at,
        })
    }
}

impl From<CapabilityToken> for TokenFields {
    fn from(token: CapabilityToken) -> Self {
        Self {
            token_id: token.token_id,
            principal_id: token.principal_id,
            scope: token.scope,
            resource_ids: token.resource_ids,
            ttl_seconds: token.ttl_seconds,
            audience: token.audience,
            issued_at: token.issued_at,
            signature: token.signature,
        }
    }
}
