//! Configuration for a service adapter

use std::collections::BTreeMap;

use conduit_resilience::ResilienceConfig;
use conduit_telemetry::TelemetryConfig;
use conduit_types::{Scope, ServiceProfile};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Upstream service name; also the audience tokens must carry.
    pub service: String,

    /// Extra or overriding action scopes on top of the built-in profile.
    pub actions: BTreeMap<String, Scope>,

    /// Circuit breaker and retry configuration
    pub resilience: ResilienceConfig,

    /// Telemetry configuration
    pub telemetry: TelemetryConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            service: "gmail".to_string(),
            actions: BTreeMap::new(),
            resilience: ResilienceConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AdapterConfig {
    /// Create a config for a service with all other values defaulted.
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    /// Load configuration: defaults, then the optional file, then
    /// `CONDUIT__`-prefixed environment variables
    /// (e.g. `CONDUIT__RESILIENCE__RETRY__MAX_RETRIES=5`).
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&AdapterConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONDUIT")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: Self = builder.build()?.try_deserialize()?;
        // Aliases resolve to the canonical name, which is also the audience
        // tokens must carry.
        if let Some(profile) = ServiceProfile::builtin(&loaded.service) {
            loaded.service = profile.name;
        }
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::Invalid("service must not be empty".into()));
        }
        if self.telemetry.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "telemetry.buffer_capacity must be positive".into(),
            ));
        }
        self.resilience.validate()?;
        Ok(())
    }

    /// Service profile: the built-in one for known services, extended with
    /// configured actions.
    pub fn profile(&self) -> ServiceProfile {
        let mut profile =
            ServiceProfile::builtin(&self.service).unwrap_or_else(|| ServiceProfile::new(&self.service));
        for (action, scope) in &self.actions {
            profile = profile.with_action(action.clone(), scope.clone());
        }
        profile
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = AdapterConfig::default();
        assert_eq!(config.service, "gmail");
        assert_eq!(config.telemetry.buffer_capacity, 1000);
        assert_eq!(config.resilience.retry.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = AdapterConfig::for_service("dropbox");
        config.telemetry.buffer_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AdapterConfig::for_service("dropbox");
        config.resilience.circuit_breaker.recovery_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(AdapterConfig::for_service(" ").validate().is_err());
    }

    #[test]
    fn test_profile_merges_configured_actions() {
        let mut config = AdapterConfig::for_service("crm");
        config.actions.insert("export".into(), Scope::Read);
        let profile = config.profile();
        assert_eq!(profile.name, "crm");
        assert_eq!(profile.required_scope("export"), Some(&Scope::Read));

        let gmail = AdapterConfig::default().profile();
        assert_eq!(gmail.required_scope("send_message"), Some(&Scope::Write));
    }

    #[test]
    fn test_load_layers_file_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conduit.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
service = "dropbox"

[resilience.circuit_breaker]
failure_threshold = 7

[telemetry]
buffer_capacity = 50
"#
        )
        .unwrap();

        std::env::set_var("CONDUIT__RESILIENCE__RETRY__MAX_RETRIES", "5");
        let loaded = AdapterConfig::load(path.to_str());
        std::env::remove_var("CONDUIT__RESILIENCE__RETRY__MAX_RETRIES");
        let config = loaded.unwrap();

        assert_eq!(config.service, "dropbox");
        assert_eq!(config.resilience.circuit_breaker.failure_threshold, 7);
        assert_eq!(config.resilience.circuit_breaker.recovery_timeout_secs, 60);
        assert_eq!(config.resilience.retry.max_retries, 5);
        assert_eq!(config.telemetry.buffer_capacity, 50);
    }

    #[test]
    fn test_load_resolves_service_alias() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drive.toml");
        std::fs::write(&path, "service = \"drive\"\n").unwrap();

        let config = AdapterConfig::load(path.to_str()).unwrap();

        assert_eq!(config.service, "google_drive");
        assert_eq!(config.profile().name, "google_drive");
    }
}
