//! Consent gating.
//!
//! The consent ledger and policy engine live outside the adapter; the
//! adapter only asks "may this principal do this action now?" before any
//! privileged call.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use conduit_types::PrincipalId;
use thiserror::Error;

/// Errors a consent gate can report instead of a decision.
///
/// Adapters treat any error exactly like a denial.
#[derive(Debug, Clone, Error)]
pub enum ConsentError {
    #[error("consent service unavailable: {0}")]
    Unavailable(String),

    #[error("policy evaluation failed: {0}")]
    Policy(String),
}

/// Policy decision point consulted before every privileged operation.
#[async_trait]
pub trait ConsentGate: Send + Sync {
    /// Check if `principal` may perform `action`.
    async fn check(
        &self,
        principal: &PrincipalId,
        action: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<bool, ConsentError>;
}

/// Gate that allows everything.
pub struct AllowAllConsentGate;

#[async_trait]
impl ConsentGate for AllowAllConsentGate {
    async fn check(
        &self,
        _principal: &PrincipalId,
        _action: &str,
        _context: &HashMap<String, serde_json::Value>,
    ) -> Result<bool, ConsentError> {
        Ok(true)
    }
}

/// Gate that denies everything.
pub struct DenyAllConsentGate;

#[async_trait]
impl ConsentGate for DenyAllConsentGate {
    async fn check(
        &self,
        _principal: &PrincipalId,
        _action: &str,
        _context: &HashMap<String, serde_json::Value>,
    ) -> Result<bool, ConsentError> {
        Ok(false)
    }
}

/// Gate backed by a fixed allow list of `(principal, action)` pairs.
///
/// An action of `"*"` grants every action to that principal.
#[derive(Debug, Default)]
pub struct StaticConsentGate {
    grants: HashSet<(PrincipalId, String)>,
}

impl StaticConsentGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, principal: impl Into<PrincipalId>, action: impl Into<String>) -> Self {
        self.grants.insert((principal.into(), action.into()));
        self
    }

    pub fn is_allowed(&self, principal: &PrincipalId, action: &str) -> bool {
        self.grants.contains(&(principal.clone(), action.to_string()))
            || self.grants.contains(&(principal.clone(), "*".to_string()))
    }
}

#[async_trait]
impl ConsentGate for StaticConsentGate {
    async fn check(
        &self,
        principal: &PrincipalId,
        action: &str,
        _context: &HashMap<String, serde_json::Value>,
    ) -> Result<bool, ConsentError> {
        Ok(self.is_allowed(principal, action))
    }
}
