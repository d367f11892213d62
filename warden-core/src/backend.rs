//! ## warden-core::backend
//! **Watcher backend selection with ordered fallback**
//!
//! A jail asks for `auto` or a specific backend, optionally with inline
//! parameters (`polling[interval=250, seed="7"]`). Selection walks
//! [`BackendKind::PREFERENCE`] starting at the requested entry and keeps the
//! first watcher whose constructor succeeds.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::context::JailContext;
use crate::error::{ConfigurationError, JailError};
use crate::worker::{Actuator, Watcher};

lazy_static! {
    static ref SPEC_RE: Regex = Regex::new(r"^\s*([A-Za-z0-9_-]+)\s*(?:\[(.*)\])?\s*$").unwrap();
    static ref OPTION_RE: Regex =
        Regex::new(r#"\s*([\w.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^,]*))\s*(?:,|$)"#).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    Inotify,
    Polling,
    Systemd,
}

impl BackendKind {
    /// Search order for `auto`, and the fallback tail for explicit requests.
    pub const PREFERENCE: [BackendKind; 3] = [
        BackendKind::Inotify,
        BackendKind::Polling,
        BackendKind::Systemd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Inotify => "inotify",
            BackendKind::Polling => "polling",
            BackendKind::Systemd => "systemd",
        }
    }

    fn known() -> String {
        Self::PREFERENCE
            .iter()
            .map(BackendKind::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigurationError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let lowered = name.trim().to_ascii_lowercase();
        Self::PREFERENCE
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or_else(|| ConfigurationError::UnknownBackend {
                name: name.to_string(),
                known: Self::known(),
            })
    }
}

/// Inline `key=value` parameters of a backend specification.
pub type BackendArgs = BTreeMap<String, String>;

/// A parsed backend specification string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendSpec {
    requested: Option<BackendKind>,
    args: BackendArgs,
}

impl BackendSpec {
    pub fn auto() -> Self {
        Self::default()
    }

    pub fn named(kind: BackendKind) -> Self {
        Self {
            requested: Some(kind),
            args: BackendArgs::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// `None` for `auto`.
    pub fn requested(&self) -> Option<BackendKind> {
        self.requested
    }

    pub fn is_auto(&self) -> bool {
        self.requested.is_none()
    }

    pub fn args(&self) -> &BackendArgs {
        &self.args
    }

    /// Backends to try, in order.
    pub fn candidates(&self) -> &'static [BackendKind] {
        match self.requested {
            None => &BackendKind::PREFERENCE,
            Some(kind) => {
                let start = BackendKind::PREFERENCE
                    .iter()
                    .position(|candidate| *candidate == kind)
                    .unwrap_or(0);
                &BackendKind::PREFERENCE[start..]
            }
        }
    }
}

impl fmt::Display for BackendSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.requested {
            None => f.write_str("auto")?,
            Some(kind) => f.write_str(kind.as_str())?,
        }
        if !self.args.is_empty() {
            let args = self
                .args
                .iter()
                .map(|(key, value)| format!("{key}={value:?}"))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "[{args}]")?;
        }
        Ok(())
    }
}

impl FromStr for BackendSpec {
    type Err = ConfigurationError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigurationError::MalformedBackend(spec.to_string());
        let captures = SPEC_RE.captures(spec).ok_or_else(malformed)?;
        let name = &captures[1];

        let requested = if name.eq_ignore_ascii_case("auto") {
            None
        } else {
            Some(name.parse::<BackendKind>()?)
        };

        let mut args = BackendArgs::new();
        if let Some(options) = captures.get(2) {
            let options = options.as_str();
            let mut consumed = 0;
            for option in OPTION_RE.captures_iter(options) {
                let (Some(whole), Some(key)) = (option.get(0), option.get(1)) else {
                    return Err(malformed());
                };
                // Every byte must belong to some `key=value` pair.
                if whole.start() != consumed {
                    return Err(malformed());
                }
                consumed = whole.end();
                let value = option
                    .get(2)
                    .or_else(|| option.get(3))
                    .map(|value| value.as_str())
                    .or_else(|| option.get(4).map(|value| value.as_str().trim()))
                    .unwrap_or_default();
                args.insert(key.as_str().to_string(), value.to_string());
            }
            if !options[consumed..].trim().is_empty() {
                return Err(malformed());
            }
        }

        Ok(Self { requested, args })
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// An optional capability is missing; selection moves on.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

pub type WatcherConstructor = Box<
    dyn Fn(&BackendArgs, &Arc<JailContext>) -> Result<Box<dyn Watcher>, BackendError>
        + Send
        + Sync,
>;

pub type ActuatorConstructor =
    Box<dyn Fn(&Arc<JailContext>) -> Result<Box<dyn Actuator>, BackendError> + Send + Sync>;

/// Workers produced by a successful selection.
pub struct Selection {
    /// Backend actually in use, may differ from the request.
    pub kind: BackendKind,
    pub watcher: Box<dyn Watcher>,
    pub actuator: Box<dyn Actuator>,
}

/// Constructors for every watcher backend this process can run, plus the
/// actuator paired with whichever watcher wins.
pub struct BackendRegistry {
    watchers: HashMap<BackendKind, WatcherConstructor>,
    actuator: ActuatorConstructor,
}

impl BackendRegistry {
    pub fn new<F>(actuator: F) -> Self
    where
        F: Fn(&Arc<JailContext>) -> Result<Box<dyn Actuator>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            watchers: HashMap::new(),
            actuator: Box::new(actuator),
        }
    }

    pub fn with_watcher<F>(mut self, kind: BackendKind, constructor: F) -> Self
    where
        F: Fn(&BackendArgs, &Arc<JailContext>) -> Result<Box<dyn Watcher>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.register_watcher(kind, constructor);
        self
    }

    pub fn register_watcher<F>(&mut self, kind: BackendKind, constructor: F)
    where
        F: Fn(&BackendArgs, &Arc<JailContext>) -> Result<Box<dyn Watcher>, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.watchers.insert(kind, Box::new(constructor));
    }

    pub fn select(
        &self,
        spec: &BackendSpec,
        ctx: &Arc<JailContext>,
    ) -> Result<Selection, JailError> {
        let _enter = ctx.span().enter();

        for &kind in spec.candidates() {
            let attempt = match self.watchers.get(&kind) {
                Some(constructor) => constructor(spec.args(), ctx),
                None => Err(BackendError::Unavailable(format!(
                    "no {kind} watcher compiled in"
                ))),
            };

            match attempt {
                Ok(watcher) => {
                    match spec.requested() {
                        Some(requested) if requested != kind => warn!(
                            requested = %requested,
                            backend = %kind,
                            "Requested backend could not be initialized, falling back"
                        ),
                        _ => info!(backend = %kind, "Initiated backend"),
                    }

                    let actuator = (self.actuator)(ctx).map_err(|source| JailError::Actuator {
                        jail: ctx.name().to_string(),
                        source,
                    })?;

                    return Ok(Selection {
                        kind,
                        watcher,
                        actuator,
                    });
                }
                Err(BackendError::Unavailable(reason)) => {
                    if spec.is_auto() {
                        debug!(backend = %kind, %reason, "Backend unavailable, trying next");
                    } else {
                        error!(backend = %kind, %reason, "Backend unavailable, trying next");
                    }
                }
                Err(source) => {
                    return Err(JailError::Backend {
                        jail: ctx.name().to_string(),
                        backend: kind,
                        source,
                    })
                }
            }
        }

        error!(requested = %spec, "Failed to initialize any backend");
        Err(JailError::BackendInitialization {
            jail: ctx.name().to_string(),
        })
    }
}
