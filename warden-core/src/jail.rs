//! ## warden-core::jail
//! **One watcher, one actuator and the ban-time policy binding them**
//!
//! ### Lifecycle:
//! `Constructed -> Running -> Stopping -> Stopped`. A stopped jail is not
//! restarted in place; build a new one from the same registry instead.
//!
//! ### Failure isolation:
//! - Backend and ban-time misconfiguration propagates to whoever builds the jail
//! - Restoration and stop failures are logged and never abort `start`/`stop`

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use warden_telemetry::{EventLogger, MetricsRecorder};

use crate::backend::{BackendKind, BackendRegistry, BackendSpec, Selection};
use crate::bantime::{BanTimeExtra, BanTimeOption};
use crate::context::JailContext;
use crate::error::{ConfigurationError, JailError};
use crate::restore::{BanRestorer, RestoreSummary};
use crate::store::BanStore;
use crate::ticket::{BanTime, Ticket};
use crate::time::{Clock, SystemClock};
use crate::worker::{Actuator, StatusFlavor, StatusSection, Watcher, Worker, WorkerError};

/// Firewall chain names and similar identifiers are derived from the jail
/// name and get truncated past this length.
const NAME_WARN_LEN: usize = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Constructed,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Constructed => "constructed",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JailStatus {
    Basic {
        filter: StatusSection,
        actions: StatusSection,
    },
    Stats {
        backend: String,
        filter: StatusSection,
        actions: StatusSection,
    },
}

impl JailStatus {
    /// The watcher and actuator sections, in that order.
    pub fn sections(&self) -> [(&'static str, &StatusSection); 2] {
        match self {
            JailStatus::Basic { filter, actions } | JailStatus::Stats { filter, actions, .. } => {
                [("Filter", filter), ("Actions", actions)]
            }
        }
    }
}

impl fmt::Display for JailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let JailStatus::Stats { backend, .. } = self {
            writeln!(f, "Backend: {backend}")?;
        }
        for (title, section) in self.sections() {
            writeln!(f, "{title}")?;
            for (label, value) in section {
                writeln!(f, "  |- {label}: {value}")?;
            }
        }
        Ok(())
    }
}

pub struct JailBuilder {
    name: String,
    backend: BackendSpec,
    database: Option<Arc<dyn BanStore>>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl JailBuilder {
    pub fn backend(mut self, backend: BackendSpec) -> Self {
        self.backend = backend;
        self
    }

    pub fn database(mut self, database: Arc<dyn BanStore>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Selects the watcher backend, which also constructs the actuator.
    pub fn build(self, registry: &BackendRegistry) -> Result<Jail, JailError> {
        let metrics = self.metrics.unwrap_or_default();
        let context = Arc::new(JailContext::new(self.name, metrics));
        let enter = context.span().enter();

        if context.name().len() >= NAME_WARN_LEN {
            warn!(
                length = context.name().len(),
                "Jail name is long, identifiers derived from it may be truncated"
            );
        }

        let Selection {
            kind,
            watcher,
            actuator,
        } = registry.select(&self.backend, &context)?;
        debug!(backend = %kind, "Created jail");

        drop(enter);
        Ok(Jail {
            context,
            backend: self.backend,
            real_backend: kind,
            watcher,
            actuator,
            database: self.database,
            clock: self.clock,
            state: LifecycleState::Constructed,
        })
    }
}

pub struct Jail {
    context: Arc<JailContext>,
    backend: BackendSpec,
    real_backend: BackendKind,
    watcher: Box<dyn Watcher>,
    actuator: Box<dyn Actuator>,
    database: Option<Arc<dyn BanStore>>,
    clock: Arc<dyn Clock>,
    state: LifecycleState,
}

impl Jail {
    pub fn builder(name: impl Into<String>) -> JailBuilder {
        JailBuilder {
            name: name.into(),
            backend: BackendSpec::auto(),
            database: None,
            clock: Arc::new(SystemClock),
            metrics: None,
        }
    }

    pub fn name(&self) -> &str {
        self.context.name()
    }

    pub fn context(&self) -> &Arc<JailContext> {
        &self.context
    }

    pub fn database(&self) -> Option<&Arc<dyn BanStore>> {
        self.database.as_ref()
    }

    pub fn set_database(&mut self, database: Option<Arc<dyn BanStore>>) {
        self.database = database;
    }

    /// Backend as requested.
    pub fn backend(&self) -> &BackendSpec {
        &self.backend
    }

    /// Backend actually in use.
    pub fn real_backend(&self) -> BackendKind {
        self.real_backend
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn watcher(&self) -> &dyn Watcher {
        self.watcher.as_ref()
    }

    pub fn actuator(&self) -> &dyn Actuator {
        self.actuator.as_ref()
    }

    pub fn put_fail_ticket(&self, ticket: Ticket) {
        self.context.put_fail_ticket(ticket);
    }

    pub fn get_fail_ticket(&self) -> Option<Ticket> {
        self.context.get_fail_ticket()
    }

    pub fn has_fail_tickets(&self) -> bool {
        self.context.has_fail_tickets()
    }

    /// Sets `bantime.<option>`; an empty value clears it.
    pub fn set_ban_time_extra(
        &self,
        option: &str,
        value: &str,
    ) -> Result<Arc<BanTimeExtra>, ConfigurationError> {
        let _enter = self.context.span().enter();
        let extra = self
            .context
            .ban_time_policy()
            .set_option(option, Some(value))?;
        info!("Set banTime.{} = {:?}", option, value);

        let increment_requested = option
            .parse::<BanTimeOption>()
            .is_ok_and(|option| option == BanTimeOption::Increment);
        if increment_requested && extra.increment() && self.database.is_none() {
            warn!("ban time increment is not available as long as no database is configured");
        }
        Ok(extra)
    }

    pub fn ban_time_extra(&self, option: &str) -> Result<Option<String>, ConfigurationError> {
        let option: BanTimeOption = option.parse()?;
        Ok(self.context.ban_time_policy().get(option))
    }

    /// Longest ban currently possible, see [`BanTimeExtra::max_possible_ban_time`].
    pub fn max_ban_time(&self) -> BanTime {
        self.context
            .ban_time_policy()
            .snapshot()
            .max_possible_ban_time(self.actuator.ban_time())
    }

    /// Re-injects still-active bans from the database, if there is one.
    pub fn restore_current_bans(&self) -> RestoreSummary {
        let Some(database) = self.database.as_deref() else {
            return RestoreSummary::default();
        };
        BanRestorer::new(
            &self.context,
            self.watcher.as_ref(),
            self.actuator.ban_time(),
            self.clock.as_ref(),
        )
        .restore(database)
    }

    pub fn start(&mut self) -> Result<RestoreSummary, JailError> {
        let span = self.context.span().clone();
        let _enter = span.enter();

        if self.state != LifecycleState::Constructed {
            return Err(self.invalid_state("start"));
        }

        if let Err(source) = self.watcher.start() {
            self.stop(true, true);
            return Err(self.start_error("filter", source));
        }
        if let Err(source) = self.actuator.start() {
            self.stop(true, true);
            return Err(self.start_error("actions", source));
        }

        debug!(state = %self.state, "Restoring current bans");
        let summary = self.restore_current_bans();
        self.state = LifecycleState::Running;

        EventLogger::log_event(
            "jail_started",
            vec![
                KeyValue::new("jail", self.name().to_string()),
                KeyValue::new("backend", self.real_backend.as_str()),
            ],
        );
        info!("Jail started");
        Ok(summary)
    }

    /// Signals (`signal`) and waits for (`join`) the watcher, then the
    /// actuator. A failure on one never skips the other.
    pub fn stop(&mut self, signal: bool, join: bool) {
        let span = self.context.span().clone();
        let _enter = span.enter();

        if self.state == LifecycleState::Stopped {
            debug!("Jail already stopped");
            return;
        }
        self.state = LifecycleState::Stopping;

        stop_worker("filter", self.watcher.as_mut(), signal, join);
        stop_worker("actions", self.actuator.as_mut(), signal, join);

        if join {
            self.state = LifecycleState::Stopped;
            EventLogger::log_event(
                "jail_stopped",
                vec![KeyValue::new("jail", self.name().to_string())],
            );
            info!("Jail stopped");
        }
    }

    pub fn is_alive(&self) -> bool {
        self.watcher.is_alive() || self.actuator.is_alive()
    }

    pub fn idle(&self) -> bool {
        self.watcher.idle() || self.actuator.idle()
    }

    pub fn set_idle(&self, idle: bool) {
        self.watcher.set_idle(idle);
        self.actuator.set_idle(idle);
    }

    pub fn status(&self, flavor: StatusFlavor) -> JailStatus {
        let filter = self.watcher.status(flavor);
        let actions = self.actuator.status(flavor);
        match flavor {
            StatusFlavor::Basic => JailStatus::Basic { filter, actions },
            StatusFlavor::Stats => JailStatus::Stats {
                backend: self.real_backend.to_string(),
                filter,
                actions,
            },
        }
    }

    /// Tickets waiting for the actuator.
    pub fn pending_tickets(&self) -> usize {
        self.context.pending_tickets()
    }

    pub fn ban_time(&self) -> Duration {
        self.actuator.ban_time()
    }

    fn invalid_state(&self, action: &'static str) -> JailError {
        JailError::InvalidState {
            jail: self.name().to_string(),
            action,
            state: self.state,
        }
    }

    fn start_error(&self, component: &'static str, source: WorkerError) -> JailError {
        JailError::Start {
            jail: self.name().to_string(),
            component,
            source,
        }
    }
}

impl Drop for Jail {
    fn drop(&mut self) {
        if matches!(
            self.state,
            LifecycleState::Running | LifecycleState::Stopping
        ) {
            self.stop(true, true);
        }
    }
}

fn stop_worker<W: Worker + ?Sized>(
    component: &'static str,
    worker: &mut W,
    signal: bool,
    join: bool,
) {
    if signal {
        if worker.is_alive() {
            if let Err(err) = worker.stop() {
                error!(component, %err, "Failed to stop");
            }
        }
        if let Err(err) = worker.done() {
            error!(component, %err, "Failed to tear down");
        }
    }
    if join {
        if let Err(err) = worker.join() {
            error!(component, %err, "Failed to join");
        }
    }
}
