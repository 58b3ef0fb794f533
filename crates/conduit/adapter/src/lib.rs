//! # Conduit Adapter - Resilient calls to third-party OAuth2 APIs
//!
//! A [`ServiceAdapter`] fronts one upstream service (mail, file storage,
//! ...) and runs every call through the same pipeline:
//!
//! 1. validate the caller's [`CapabilityToken`](conduit_types::CapabilityToken)
//! 2. ask the [`ConsentGate`] whether the principal may perform the action
//! 3. execute the operation with retries under the adapter's circuit breaker
//! 4. record the outcome in telemetry
//!
//! Authorization and consent failures never touch the circuit breaker;
//! only upstream faults do.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conduit_adapter::{AllowAllConsentGate, InvocationRequest, ServiceAdapter};
//! use conduit_resilience::OperationError;
//! use conduit_types::{CapabilityToken, PrincipalId, ServiceProfile};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = ServiceAdapter::builder(ServiceProfile::gmail())
//!     .consent_gate(Arc::new(AllowAllConsentGate))
//!     .build()?;
//!
//! let token = CapabilityToken::builder()
//!     .principal("alice")
//!     .audience("gmail")
//!     .scope("list")
//!     .ttl_seconds(3600)
//!     .build()?;
//!
//! let request = InvocationRequest::new(PrincipalId::new("alice"), "list_messages");
//! let messages = adapter
//!     .invoke(request, &token, |_ctx| async { Ok::<_, OperationError>(vec!["m1"]) })
//!     .await?;
//!
//! println!("{messages:?} {:?}", adapter.health_status());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod adapter;
pub mod config;
pub mod consent;
pub mod credentials;
pub mod error;

pub use adapter::{
    AdapterHealthSnapshot, InvocationRequest, OperationContext, ServiceAdapter,
    ServiceAdapterBuilder,
};
pub use config::AdapterConfig;
pub use consent::{
    AllowAllConsentGate, ConsentError, ConsentGate, DenyAllConsentGate, StaticConsentGate,
};
pub use credentials::{CredentialStore, MemoryCredentialStore, UpstreamCredential};
pub use error::{AdapterError, AdapterResult, ConfigError};
