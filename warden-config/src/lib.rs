//! # Warden Configuration System
//!
//! Hierarchical configuration for the Warden jails, the simulator and
//! telemetry.
//!
//! ## Features
//! - **Layered sources**: defaults, YAML files and `WARDEN_*` environment variables
//! - **Validation**: backend specifications, durations and formulas are checked at load time
//! - **Environment Awareness**: `WARDEN_ENV` selects an override file

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod jail;
mod simulator;
mod telemetry;
pub mod validation;

pub use error::ConfigError;
pub use jail::{BanTimeExtraConfig, DurationSetting, JailConfig};
pub use simulator::SimulatorConfig;
pub use telemetry::TelemetryConfig;

/// Top-level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq)]
pub struct WardenConfig {
    /// Logging and metrics.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Monitored targets, one jail each.
    #[validate(nested)]
    #[serde(default)]
    pub jails: Vec<JailConfig>,

    /// Simulated watcher, actuator and ban store.
    #[validate(nested)]
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl WardenConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/warden.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<environment>.yaml` - Environment-specific overrides.
    /// 4. `WARDEN_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(WardenConfig::default()));

        if Path::new("config/warden.yaml").exists() {
            figment = figment.merge(Yaml::file("config/warden.yaml"));
        } else {
            println!("config/warden.yaml not found, using default configuration");
        }

        let env = std::env::var("WARDEN_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment.merge(Env::prefixed("WARDEN_").split("__")))
    }

    /// Load configuration from a specific path for testing/validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(
                path.to_string_lossy().to_string(),
            )));
        }

        Self::extract(
            Figment::from(Serialized::defaults(WardenConfig::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed("WARDEN_").split("__")),
        )
    }

    /// Parse a YAML document on top of the defaults, ignoring the environment.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::from(Serialized::defaults(WardenConfig::default())).merge(Yaml::string(yaml)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                config.check_unique_names()?;
                Ok(config)
            })
    }

    fn check_unique_names(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for jail in &self.jails {
            if !seen.insert(jail.name.as_str()) {
                return Err(ConfigError::DuplicateJail(jail.name.clone()));
            }
        }
        Ok(())
    }

    /// Jails that should be started.
    pub fn enabled_jails(&self) -> impl Iterator<Item = &JailConfig> {
        self.jails.iter().filter(|jail| jail.enabled)
    }

    pub fn jail(&self, name: &str) -> Option<&JailConfig> {
        self.jails.iter().find(|jail| jail.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE: &str = r#"
telemetry:
  log_level: debug
jails:
  - name: sshd
    backend: "polling[interval=100]"
    bantime: 1h
    ignore_ip: ["10.0.0.0/8"]
    bantime_extra:
      increment: true
      multipliers: [1, 2, 4, 8]
      maxtime: 1w
      rndtime: 60
  - name: nginx
    enabled: false
    bantime: 600
simulator:
  seed: 7
  sources: ["192.0.2.1"]
"#;

    #[test]
    fn full_config_validation() {
        let config = WardenConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn parses_sample() {
        let config = WardenConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.jails.len(), 2);

        let sshd = config.jail("sshd").unwrap();
        assert_eq!(sshd.ban_time(), Duration::from_secs(3600));
        assert_eq!(sshd.max_matches, 10);
        assert_eq!(sshd.bantime_extra.multipliers, Some(vec![1, 2, 4, 8]));
        assert_eq!(
            sshd.bantime_extra.rndtime,
            Some(DurationSetting::Seconds(60))
        );

        let nginx = config.jail("nginx").unwrap();
        assert_eq!(nginx.backend, "auto");
        assert_eq!(nginx.ban_time(), Duration::from_secs(600));
        assert_eq!(config.enabled_jails().count(), 1);

        assert_eq!(config.simulator.seed, 7);
        assert_eq!(config.simulator.interval_ms, 250);
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = WardenConfig::from_yaml_str("jails:\n  - name: sshd\n    backend: gamin\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("jails[0].backend"));
    }

    #[test]
    fn rejects_bad_duration_and_formula() {
        let yaml = r#"
jails:
  - name: sshd
    bantime: "forever"
    bantime_extra:
      formula: "ban.Time * ("
"#;
        let err = WardenConfig::from_yaml_str(yaml).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bantime"));
        assert!(message.contains("formula"));
    }

    #[test]
    fn rejects_duplicate_names() {
        let yaml = "jails:\n  - name: sshd\n  - name: sshd\n";
        assert!(matches!(
            WardenConfig::from_yaml_str(yaml),
            Err(ConfigError::DuplicateJail(name)) if name == "sshd"
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(matches!(
            WardenConfig::load_from_path("does/not/exist.yaml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn environment_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("warden.yaml", "simulator:\n  seed: 1\n")?;
            jail.set_env("WARDEN_SIMULATOR__SEED", "99");
            jail.set_env("WARDEN_TELEMETRY__LOG_LEVEL", "warn");

            let config = WardenConfig::load_from_path("warden.yaml").unwrap();
            assert_eq!(config.simulator.seed, 99);
            assert_eq!(config.telemetry.log_level, "warn");
            Ok(())
        });
    }
}
