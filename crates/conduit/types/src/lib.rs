//! Conduit Types - Core types for resilient external-service adapters
//!
//! Conduit wraps calls to third-party OAuth2 APIs (mail, file storage, ...)
//! behind a uniform adapter that checks authorization and consent before
//! touching the network, isolates faults with a circuit breaker and records
//! every attempt for audit.
//!
//! ## Key Concepts
//!
//! - **CapabilityToken**: Scoped, time-limited grant presented on every call
//! - **Scope**: A single permission (`read`, `write`, `list`, ...)
//! - **Clock**: Injectable time source so expiry and recovery are testable
//! - **ErrorKind**: Stable tag for each failure class, used in telemetry
//! - **ServiceProfile**: Audience name and per-action scopes of an upstream

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod clock;
pub mod error;
pub mod ids;
pub mod profile;
pub mod scope;
pub mod token;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{AuthorizationFailure, ErrorKind, TokenError};
pub use ids::{InvocationId, PrincipalId, TokenId};
pub use profile::ServiceProfile;
pub use scope::Scope;
pub use token::{CapabilityToken, CapabilityTokenBuilder};
