//! Permission scopes carried by capability tokens.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single permission a token may grant.
///
/// Well-known permissions get their own variant; anything else an issuer
/// mints is kept verbatim in [`Scope::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Scope {
    Read,
    Write,
    List,
    Delete,
    Custom(String),
}

impl Scope {
    pub fn as_str(&self) -> &str {
        match self {
            Scope::Read => "read",
            Scope::Write => "write",
            Scope::List => "list",
            Scope::Delete => "delete",
            Scope::Custom(name) => name,
        }
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        match value {
            "read" => Scope::Read,
            "write" => Scope::Write,
            "list" => Scope::List,
            "delete" => Scope::Delete,
            other => Scope::Custom(other.to_string()),
        }
    }
}

impl From<String> for Scope {
    fn from(value: String) -> Self {
        Scope::from(value.as_str())
    }
}

impl From<Scope> for String {
    fn from(value: Scope) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
