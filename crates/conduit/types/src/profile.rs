//! Service profiles.
//!
//! A profile names an upstream service (the audience tokens must be minted
//! for) and the scope each of its actions requires.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scope::Scope;

/// Description of one upstream service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProfile {
    /// Audience string capability tokens must carry.
    pub name: String,

    /// Scope required per action name.
    #[serde(default)]
    pub actions: BTreeMap<String, Scope>,
}

impl ServiceProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: BTreeMap::new(),
        }
    }

    /// Register an action and the scope it needs.
    pub fn with_action(mut self, action: impl Into<String>, scope: impl Into<Scope>) -> Self {
        self.actions.insert(action.into(), scope.into());
        self
    }

    pub fn required_scope(&self, action: &str) -> Option<&Scope> {
        self.actions.get(action)
    }

    /// Mail: messages and labels.
    pub fn gmail() -> Self {
        Self::new("gmail")
            .with_action("list_messages", Scope::List)
            .with_action("read_message", Scope::Read)
            .with_action("send_message", Scope::Write)
            .with_action("modify_labels", Scope::Write)
            .with_action("trash_message", Scope::Delete)
    }

    /// File storage with folder hierarchy.
    pub fn google_drive() -> Self {
        Self::new("google_drive")
            .with_action("list_files", Scope::List)
            .with_action("download_file", Scope::Read)
            .with_action("upload_file", Scope::Write)
            .with_action("share_file", Scope::Write)
            .with_action("delete_file", Scope::Delete)
    }

    /// Path-addressed file storage.
    pub fn dropbox() -> Self {
        Self::new("dropbox")
            .with_action("list_folder", Scope::List)
            .with_action("download", Scope::Read)
            .with_action("upload", Scope::Write)
            .with_action("move", Scope::Write)
            .with_action("delete", Scope::Delete)
    }

    /// Look up one of the built-in profiles by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "gmail" => Some(Self::gmail()),
            "google_drive" | "drive" => Some(Self::google_drive()),
            "dropbox" => Some(Self::dropbox()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles() {
        let gmail = ServiceProfile::builtin("gmail").unwrap();
        assert_eq!(gmail.name, "gmail");
        assert_eq!(gmail.required_scope("send_message"), Some(&Scope::Write));
        assert_eq!(gmail.required_scope("list_messages"), Some(&Scope::List));
        assert!(gmail.required_scope("upload").is_none());

        assert_eq!(ServiceProfile::builtin("drive").unwrap().name, "google_drive");
        assert!(ServiceProfile::builtin("calendar").is_none());
    }

    #[test]
    fn test_custom_profile() {
        let profile = ServiceProfile::new("crm").with_action("export", "crm.export");
        assert_eq!(
            profile.required_scope("export"),
            Some(&Scope::Custom("crm.export".into()))
        );
    }
}
