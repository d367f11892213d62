//! Actuator that keeps an in-memory table of banned sources.
//!
//! Bans are lifted once their ban time elapses on the injected clock, and
//! all remaining bans are lifted when the actuator is torn down. Fresh bans
//! are written to the ban store; restored ones already are in it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use warden_core::context::JailContext;
use warden_core::store::BanStore;
use warden_core::ticket::{BanTime, Ticket};
use warden_core::time::Clock;
use warden_core::worker::{Actuator, StatusFlavor, StatusSection, Worker, WorkerError};
use warden_telemetry::EventLogger;

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveBan {
    pub ticket: Ticket,
    /// `None` for permanent bans.
    pub until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Shared {
    running: AtomicBool,
    idle: AtomicBool,
    bans: Mutex<BTreeMap<String, ActiveBan>>,
    total_banned: AtomicU64,
}

/// Everything the actuator thread needs, cloned out of the actuator.
#[derive(Clone)]
struct BanDesk {
    context: Arc<JailContext>,
    ban_time: Duration,
    store: Option<Arc<dyn BanStore>>,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
}

impl BanDesk {
    fn process_pending(&self) {
        while let Some(ticket) = self.context.get_fail_ticket() {
            self.ban(ticket);
        }
        self.expire();
    }

    fn ban(&self, mut ticket: Ticket) {
        if self.shared.bans.lock().contains_key(ticket.id()) {
            debug!(ip = ticket.id(), "Already banned");
            return;
        }

        // Restored tickets carry their remaining time already.
        let ban_time = if ticket.is_restored() {
            ticket.ban_time_or(BanTime::Finite(self.ban_time))
        } else {
            self.context
                .ban_time_policy()
                .snapshot()
                .ban_time_for(&ticket, self.ban_time)
        };
        ticket.set_ban_time(Some(ban_time));

        let now = self.clock.now();
        let until = ban_time
            .as_duration()
            .and_then(|duration| TimeDelta::from_std(duration).ok())
            .and_then(|delta| now.checked_add_signed(delta));

        let jail = self.context.name();
        EventLogger::log_event(
            "ban_issued",
            vec![
                KeyValue::new("jail", jail.to_string()),
                KeyValue::new("ip", ticket.id().to_string()),
                KeyValue::new("ban_time", ban_time.to_string()),
                KeyValue::new("ban_count", i64::from(ticket.ban_count())),
                KeyValue::new("restored", ticket.is_restored()),
            ],
        );
        self.context
            .metrics()
            .record_ban(jail, ban_time.as_duration().map(|d| d.as_secs_f64()));

        if !ticket.is_restored() {
            if let Some(store) = &self.store {
                if let Err(err) = store.add_ban(jail, &ticket) {
                    warn!(ip = ticket.id(), %err, "Failed to persist ban");
                }
            }
        }

        self.shared.total_banned.fetch_add(1, Ordering::Relaxed);
        self.shared
            .bans
            .lock()
            .insert(ticket.id().to_string(), ActiveBan { ticket, until });
    }

    /// Thread body. Bans issued while `done` ran are lifted on exit.
    fn run(&self, poll: Duration) {
        let _enter = self.context.span().enter();
        debug!("Actuator started");
        while self.shared.running.load(Ordering::Acquire) {
            if !self.shared.idle.load(Ordering::Acquire) {
                self.process_pending();
            }
            thread::park_timeout(poll);
        }
        self.lift_all();
        debug!("Actuator finished");
    }

    fn lift_all(&self) {
        let lifted = {
            let mut bans = self.shared.bans.lock();
            let lifted = bans.len();
            bans.clear();
            lifted
        };
        if lifted > 0 {
            info!(lifted, "Unbanned all");
        }
    }

    fn expire(&self) {
        let now = self.clock.now();
        self.shared.bans.lock().retain(|ip, ban| match ban.until {
            Some(until) if until <= now => {
                info!(ip = %ip, "Unban");
                false
            }
            _ => true,
        });
    }
}

pub struct SimulatedActuator {
    desk: BanDesk,
    poll: Duration,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedActuator {
    pub fn new(
        context: Arc<JailContext>,
        ban_time: Duration,
        store: Option<Arc<dyn BanStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            desk: BanDesk {
                context,
                ban_time,
                store,
                clock,
                shared: Arc::new(Shared::default()),
            },
            poll: Duration::from_millis(20),
            handle: None,
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn active_bans(&self) -> Vec<ActiveBan> {
        self.desk.shared.bans.lock().values().cloned().collect()
    }
}

impl Worker for SimulatedActuator {
    fn start(&mut self) -> Result<(), WorkerError> {
        if self.handle.is_some() {
            return Err(WorkerError::AlreadyRunning("actions"));
        }
        self.desk.shared.running.store(true, Ordering::Release);

        let desk = self.desk.clone();
        let poll = self.poll;
        let handle = thread::Builder::new()
            .name(format!("{}-actions", desk.context.name()))
            .spawn(move || desk.run(poll))
            .map_err(|source| WorkerError::Spawn {
                component: "actions",
                source,
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), WorkerError> {
        self.desk.shared.running.store(false, Ordering::Release);
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Lifts every ban still in place.
    fn done(&mut self) -> Result<(), WorkerError> {
        let _enter = self.desk.context.span().enter();
        self.desk.lift_all();
        Ok(())
    }

    fn join(&mut self) -> Result<(), WorkerError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| WorkerError::Panicked("actions")),
            None => Ok(()),
        }
    }

    fn idle(&self) -> bool {
        self.desk.shared.idle.load(Ordering::Acquire)
    }

    fn set_idle(&self, idle: bool) {
        self.desk.shared.idle.store(idle, Ordering::Release);
    }

    fn status(&self, flavor: StatusFlavor) -> StatusSection {
        let bans = self.desk.shared.bans.lock();
        let mut section = vec![
            ("Currently banned".to_string(), bans.len().to_string()),
            (
                "Total banned".to_string(),
                self.desk
                    .shared
                    .total_banned
                    .load(Ordering::Relaxed)
                    .to_string(),
            ),
        ];
        match flavor {
            StatusFlavor::Basic => section.push((
                "Banned IP list".to_string(),
                bans.keys().cloned().collect::<Vec<_>>().join(" "),
            )),
            StatusFlavor::Stats => section.push((
                "Ban time".to_string(),
                BanTime::Finite(self.desk.ban_time).to_string(),
            )),
        }
        section
    }
}

impl Actuator for SimulatedActuator {
    fn ban_time(&self) -> Duration {
        self.desk.ban_time
    }
}
