//! Custom validation functions for configuration.

use std::borrow::Cow;

use ipnetwork::IpNetwork;
use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;
use warden_core::backend::{BackendKind, BackendSpec};
use warden_core::bantime::expr;

use crate::jail::DurationSetting;

lazy_static! {
    static ref JAIL_NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap();
}

fn invalid(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

/// Ignoring a catch-all range would disable the jail.
pub fn validate_cidr_list(cidrs: &[IpNetwork]) -> Result<(), ValidationError> {
    if cidrs.iter().any(|net| net.prefix() == 0) {
        return Err(ValidationError::new("catch_all_cidr"));
    }
    Ok(())
}

pub fn validate_jail_name(name: &str) -> Result<(), ValidationError> {
    if JAIL_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_jail_name"))
    }
}

pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid = ["trace", "debug", "info", "warn", "error"]
        .contains(&level.to_lowercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}

pub fn validate_backend(backend: &str) -> Result<(), ValidationError> {
    backend
        .parse::<BackendSpec>()
        .map(|_| ())
        .map_err(|err| invalid("invalid_backend", err.to_string()))
}

/// Plain backend names, no `auto` and no parameters.
pub fn validate_backend_names(names: &[String]) -> Result<(), ValidationError> {
    names.iter().try_for_each(|name| {
        name.parse::<BackendKind>()
            .map(|_| ())
            .map_err(|err| invalid("invalid_backend", err.to_string()))
    })
}

pub fn validate_duration(value: &DurationSetting) -> Result<(), ValidationError> {
    value
        .to_duration()
        .map(|_| ())
        .map_err(|err| invalid("invalid_duration", err.to_string()))
}

pub fn validate_formula(formula: &str) -> Result<(), ValidationError> {
    expr::parse(formula)
        .map(|_| ())
        .map_err(|err| invalid("invalid_formula", err.to_string()))
}

pub fn validate_multipliers(multipliers: &[u64]) -> Result<(), ValidationError> {
    if multipliers.is_empty() {
        Err(ValidationError::new("empty_multipliers"))
    } else {
        Ok(())
    }
}
