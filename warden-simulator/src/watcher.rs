//! Seeded watcher that reports offenders drawn from a fixed address pool.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ipnetwork::IpNetwork;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};
use warden_core::backend::{BackendArgs, BackendError, BackendKind};
use warden_core::context::JailContext;
use warden_core::ticket::Ticket;
use warden_core::time::Clock;
use warden_core::worker::{StatusFlavor, StatusSection, Watcher, Worker, WorkerError};

use crate::store::MemoryBanStore;

/// Watcher parameters. `interval` and `seed` may be overridden through
/// inline backend arguments.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub interval: Duration,
    pub seed: u64,
    pub sources: Arc<Vec<String>>,
    pub ignore: Arc<Vec<IpNetwork>>,
    pub max_matches: usize,
}

impl WatcherSettings {
    pub fn with_args(mut self, args: &BackendArgs) -> Result<Self, BackendError> {
        for (key, value) in args {
            match key.as_str() {
                "interval" => {
                    let ms: u64 = value.parse().map_err(|_| {
                        BackendError::Failed(format!("interval must be milliseconds, got {value:?}"))
                    })?;
                    self.interval = Duration::from_millis(ms.max(1));
                }
                "seed" => {
                    self.seed = value.parse().map_err(|_| {
                        BackendError::Failed(format!("seed must be an integer, got {value:?}"))
                    })?;
                }
                other => debug!(option = other, "Ignoring unknown backend option"),
            }
        }
        Ok(self)
    }
}

/// Earlier bans of `ip` in this jail, or in every jail with
/// `bantime.overalljails`.
fn prior_bans(context: &JailContext, store: Option<&MemoryBanStore>, ip: &str) -> u32 {
    let Some(store) = store else {
        return 0;
    };
    let overall = context.ban_time_policy().snapshot().overall_jails();
    store.ban_count((!overall).then(|| context.name()), ip)
}

#[derive(Default)]
struct Shared {
    running: AtomicBool,
    idle: AtomicBool,
    found: AtomicU64,
    ignored: AtomicU64,
}

pub struct SimulatedWatcher {
    kind: BackendKind,
    context: Arc<JailContext>,
    settings: WatcherSettings,
    store: Option<Arc<MemoryBanStore>>,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedWatcher {
    pub fn new(
        kind: BackendKind,
        context: Arc<JailContext>,
        settings: WatcherSettings,
        store: Option<Arc<MemoryBanStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kind,
            context,
            settings,
            store,
            clock,
            shared: Arc::new(Shared::default()),
            handle: None,
        }
    }

    fn ignored(ignore: &[IpNetwork], ticket: &Ticket) -> Result<bool, WorkerError> {
        let ip: IpAddr = ticket.id().parse().map_err(|_| WorkerError::IgnoreLookup {
            id: ticket.id().to_string(),
            reason: "not an IP address".into(),
        })?;
        Ok(ignore.iter().any(|net| net.contains(ip)))
    }
}

impl Worker for SimulatedWatcher {
    fn start(&mut self) -> Result<(), WorkerError> {
        if self.handle.is_some() {
            return Err(WorkerError::AlreadyRunning("filter"));
        }
        self.shared.running.store(true, Ordering::Release);

        let context = self.context.clone();
        let settings = self.settings.clone();
        let store = self.store.clone();
        let clock = self.clock.clone();
        let shared = self.shared.clone();

        let handle = thread::Builder::new()
            .name(format!("{}-filter", context.name()))
            .spawn(move || {
                let _enter = context.span().enter();
                let mut rng = SmallRng::seed_from_u64(settings.seed);
                debug!(interval = ?settings.interval, "Watcher started");

                while shared.running.load(Ordering::Acquire) {
                    thread::park_timeout(settings.interval);
                    if !shared.running.load(Ordering::Acquire) {
                        break;
                    }
                    if shared.idle.load(Ordering::Acquire) || settings.sources.is_empty() {
                        continue;
                    }

                    let ip = &settings.sources[rng.random_range(0..settings.sources.len())];
                    let now = clock.now();
                    let ban_count = prior_bans(&context, store.as_deref(), ip);
                    let mut ticket = Ticket::new(ip.as_str(), now)
                        .with_ban_count(ban_count)
                        .with_matches(vec![format!(
                            "{} Failed password for invalid user from {ip}",
                            now.to_rfc3339()
                        )]);
                    ticket.truncate_matches(settings.max_matches);

                    match Self::ignored(&settings.ignore, &ticket) {
                        Ok(true) => {
                            shared.ignored.fetch_add(1, Ordering::Relaxed);
                            trace!(ip = %ip, "Ignoring offender");
                        }
                        Ok(false) | Err(_) => {
                            shared.found.fetch_add(1, Ordering::Relaxed);
                            debug!(ip = %ip, ban_count, "Found offender");
                            context.put_fail_ticket(ticket);
                        }
                    }
                }
                debug!("Watcher finished");
            })
            .map_err(|source| WorkerError::Spawn {
                component: "filter",
                source,
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), WorkerError> {
        self.shared.running.store(false, Ordering::Release);
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

    fn join(&mut self) -> Result<(), WorkerError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| WorkerError::Panicked("filter")),
            None => Ok(()),
        }
    }

    fn idle(&self) -> bool {
        self.shared.idle.load(Ordering::Acquire)
    }

    fn set_idle(&self, idle: bool) {
        self.shared.idle.store(idle, Ordering::Release);
    }

    fn status(&self, flavor: StatusFlavor) -> StatusSection {
        let mut section = vec![
            (
                "Currently failed".to_string(),
                self.context.pending_tickets().to_string(),
            ),
            (
                "Total failed".to_string(),
                self.shared.found.load(Ordering::Relaxed).to_string(),
            ),
            (
                "Total ignored".to_string(),
                self.shared.ignored.load(Ordering::Relaxed).to_string(),
            ),
        ];
        if flavor == StatusFlavor::Stats {
            section.push((
                "Sources".to_string(),
                self.settings.sources.len().to_string(),
            ));
        }
        section
    }
}

impl Watcher for SimulatedWatcher {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn max_matches(&self) -> usize {
        self.settings.max_matches
    }

    fn is_ignored(&self, ticket: &Ticket) -> Result<bool, WorkerError> {
        Self::ignored(&self.settings.ignore, ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use warden_core::store::BanStore;
    use warden_core::time::SystemClock;
    use warden_telemetry::MetricsRecorder;

    fn settings(sources: &[&str], ignore: &[&str]) -> WatcherSettings {
        WatcherSettings {
            interval: Duration::from_millis(5),
            seed: 1,
            sources: Arc::new(sources.iter().map(|s| s.to_string()).collect()),
            ignore: Arc::new(ignore.iter().map(|net| net.parse().unwrap()).collect()),
            max_matches: 3,
        }
    }

    fn watcher(settings: WatcherSettings) -> (Arc<JailContext>, SimulatedWatcher) {
        let context = Arc::new(JailContext::new("sshd", Arc::new(MetricsRecorder::new())));
        let watcher = SimulatedWatcher::new(
            BackendKind::Polling,
            context.clone(),
            settings,
            None,
            Arc::new(SystemClock),
        );
        (context, watcher)
    }

    #[test]
    fn backend_args_override_settings() {
        let mut args = BackendArgs::new();
        args.insert("interval".into(), "40".into());
        args.insert("seed".into(), "9".into());
        args.insert("journalmatch".into(), "_SYSTEMD_UNIT=sshd.service".into());
        let tuned = settings(&["192.0.2.1"], &[]).with_args(&args).unwrap();
        assert_eq!(tuned.interval, Duration::from_millis(40));
        assert_eq!(tuned.seed, 9);

        args.insert("interval".into(), "soon".into());
        assert!(matches!(
            settings(&[], &[]).with_args(&args),
            Err(BackendError::Failed(_))
        ));
    }

    #[test]
    fn ignore_list_is_checked() {
        let (_, watcher) = watcher(settings(&[], &["10.0.0.0/8", "2001:db8::/32"]));
        let now = chrono::Utc::now();
        assert!(watcher.is_ignored(&Ticket::new("10.9.8.7", now)).unwrap());
        assert!(watcher.is_ignored(&Ticket::new("2001:db8::1", now)).unwrap());
        assert!(!watcher.is_ignored(&Ticket::new("192.0.2.1", now)).unwrap());
        assert!(matches!(
            watcher.is_ignored(&Ticket::new("not-an-ip", now)),
            Err(WorkerError::IgnoreLookup { .. })
        ));
    }

    #[test]
    fn overalljails_counts_bans_from_every_jail() {
        let now = chrono::Utc::now();
        let store = Arc::new(MemoryBanStore::new(Arc::new(SystemClock)));
        store.add_ban("a", &Ticket::new("192.0.2.1", now)).unwrap();
        store.add_ban("b", &Ticket::new("192.0.2.7", now)).unwrap();

        let context = Arc::new(JailContext::new("b", Arc::new(MetricsRecorder::new())));
        let mut watcher = SimulatedWatcher::new(
            BackendKind::Polling,
            context.clone(),
            settings(&["192.0.2.1"], &[]),
            Some(store.clone()),
            Arc::new(SystemClock),
        );
        assert_eq!(prior_bans(&context, Some(&*store), "192.0.2.1"), 0);
        assert_eq!(prior_bans(&context, Some(&*store), "192.0.2.7"), 1);

        context
            .ban_time_policy()
            .set_option("overalljails", Some("true"))
            .unwrap();
        assert_eq!(prior_bans(&context, Some(&*store), "192.0.2.7"), 1);

        watcher.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !context.has_fail_tickets() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        watcher.stop().unwrap();
        watcher.join().unwrap();

        let ticket = context.get_fail_ticket().unwrap();
        assert_eq!(ticket.id(), "192.0.2.1");
        assert_eq!(ticket.ban_count(), 1);
    }

    #[test]
    fn produces_tickets_until_stopped() {
        let (context, mut watcher) = watcher(settings(&["192.0.2.1", "10.0.0.1"], &["10.0.0.0/8"]));
        watcher.start().unwrap();
        assert!(matches!(
            watcher.start(),
            Err(WorkerError::AlreadyRunning(_))
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !context.has_fail_tickets() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        watcher.stop().unwrap();
        watcher.join().unwrap();
        assert!(!watcher.is_alive());

        let tickets: Vec<Ticket> = std::iter::from_fn(|| context.get_fail_ticket()).collect();
        assert!(!tickets.is_empty());
        assert!(tickets.iter().all(|ticket| ticket.id() == "192.0.2.1"));
        assert!(tickets.iter().all(|ticket| ticket.matches().len() == 1));
    }
}
