//! Per-jail configuration.

use std::fmt;
use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use validator::{self, Validate};
use warden_core::bantime::BanTimeOption;
use warden_core::time::{parse_duration, DurationParseError};

use crate::validation;

/// A duration written either as plain seconds or as a duration string
/// such as `1h 30m`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationSetting {
    Seconds(u64),
    Text(String),
}

impl DurationSetting {
    pub fn to_duration(&self) -> Result<Duration, DurationParseError> {
        match self {
            DurationSetting::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationSetting::Text(text) => parse_duration(text),
        }
    }
}

impl fmt::Display for DurationSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DurationSetting::Seconds(secs) => write!(f, "{secs}"),
            DurationSetting::Text(text) => f.write_str(text),
        }
    }
}

/// `bantime.*` escalation options. Unset fields are left unconfigured.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BanTimeExtraConfig {
    /// Escalate repeat offenders. Needs a ban database.
    pub increment: Option<bool>,

    #[validate(range(min = 0.0))]
    pub factor: Option<f64>,

    #[validate(custom(function = validation::validate_formula))]
    pub formula: Option<String>,

    /// Takes precedence over `formula` when set.
    #[validate(custom(function = validation::validate_multipliers))]
    pub multipliers: Option<Vec<u64>>,

    #[validate(custom(function = validation::validate_duration))]
    pub maxtime: Option<DurationSetting>,

    #[validate(custom(function = validation::validate_duration))]
    pub rndtime: Option<DurationSetting>,

    pub overalljails: Option<bool>,
}

impl BanTimeExtraConfig {
    /// Configured options as `(name, value)` pairs in the form the jail's
    /// `set_ban_time_extra` accepts.
    pub fn options(&self) -> Vec<(BanTimeOption, String)> {
        let mut options = Vec::new();
        if let Some(increment) = self.increment {
            options.push((BanTimeOption::Increment, increment.to_string()));
        }
        if let Some(factor) = self.factor {
            options.push((BanTimeOption::Factor, factor.to_string()));
        }
        if let Some(formula) = &self.formula {
            options.push((BanTimeOption::Formula, formula.clone()));
        }
        if let Some(multipliers) = &self.multipliers {
            let table = multipliers
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            options.push((BanTimeOption::Multipliers, table));
        }
        if let Some(maxtime) = &self.maxtime {
            options.push((BanTimeOption::MaxTime, maxtime.to_string()));
        }
        if let Some(rndtime) = &self.rndtime {
            options.push((BanTimeOption::RndTime, rndtime.to_string()));
        }
        if let Some(overall) = self.overalljails {
            options.push((BanTimeOption::OverallJails, overall.to_string()));
        }
        options
    }
}

/// One monitored target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct JailConfig {
    #[validate(length(min = 1, max = 64), custom(function = validation::validate_jail_name))]
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// `auto`, or a backend name with optional `[key=value, ...]` parameters.
    #[validate(custom(function = validation::validate_backend))]
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Flat ban time.
    #[validate(custom(function = validation::validate_duration))]
    #[serde(default = "default_bantime")]
    pub bantime: DurationSetting,

    /// Matched log lines kept per ticket.
    #[validate(range(min = 1, max = 1000))]
    #[serde(default = "default_max_matches")]
    pub max_matches: usize,

    /// Sources never banned.
    #[validate(custom(function = validation::validate_cidr_list))]
    #[serde(default)]
    pub ignore_ip: Vec<IpNetwork>,

    #[validate(nested)]
    #[serde(default)]
    pub bantime_extra: BanTimeExtraConfig,
}

fn default_enabled() -> bool {
    true
}
fn default_backend() -> String {
    "auto".into()
}
fn default_bantime() -> DurationSetting {
    DurationSetting::Text("10m".into())
}
fn default_max_matches() -> usize {
    10
}

impl JailConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: default_enabled(),
            backend: default_backend(),
            bantime: default_bantime(),
            max_matches: default_max_matches(),
            ignore_ip: Vec::new(),
            bantime_extra: BanTimeExtraConfig::default(),
        }
    }

    /// Flat ban time. Falls back to the default when the configured value
    /// does not parse, which validation rules out for loaded configs.
    pub fn ban_time(&self) -> Duration {
        self.bantime
            .to_duration()
            .unwrap_or(Duration::from_secs(600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_field_order() {
        let extra = BanTimeExtraConfig {
            increment: Some(true),
            multipliers: Some(vec![1, 2, 4]),
            maxtime: Some(DurationSetting::Text("1w".into())),
            rndtime: Some(DurationSetting::Seconds(30)),
            ..BanTimeExtraConfig::default()
        };
        assert_eq!(
            extra.options(),
            vec![
                (BanTimeOption::Increment, "true".to_string()),
                (BanTimeOption::Multipliers, "1 2 4".to_string()),
                (BanTimeOption::MaxTime, "1w".to_string()),
                (BanTimeOption::RndTime, "30".to_string()),
            ]
        );
    }

    #[test]
    fn defaults_validate() {
        let jail = JailConfig::new("sshd");
        jail.validate().expect("default jail should validate");
        assert_eq!(jail.ban_time(), Duration::from_secs(600));
    }

    #[test]
    fn rejects_bad_extra_options() {
        let mut jail = JailConfig::new("sshd");
        jail.bantime_extra.formula = Some("ban.Time * (".into());
        jail.bantime_extra.factor = Some(-1.0);
        assert!(jail.validate().is_err());
    }
}
