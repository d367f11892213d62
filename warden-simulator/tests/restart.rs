use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use warden_config::{BanTimeExtraConfig, JailConfig, SimulatorConfig, WardenConfig};
use warden_core::ticket::Ticket;
use warden_core::time::{Clock, ManualClock};
use warden_core::worker::StatusFlavor;
use warden_core::Jail;
use warden_simulator::{MemoryBanStore, Simulation};

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn config(state_file: std::path::PathBuf, extra: BanTimeExtraConfig) -> WardenConfig {
    let mut jail = JailConfig::new("sshd");
    jail.backend = "polling".into();
    jail.bantime_extra = extra;
    WardenConfig {
        jails: vec![jail],
        simulator: SimulatorConfig {
            // Long enough that the watcher stays quiet during a test.
            interval_ms: 60_000,
            state_file,
            ..SimulatorConfig::default()
        },
        ..WardenConfig::default()
    }
}

fn currently_banned(jail: &Jail) -> usize {
    let status = jail.status(StatusFlavor::Basic);
    status.sections()[1]
        .1
        .iter()
        .find(|(label, _)| label == "Currently banned")
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0)
}

fn wait_for_bans(jail: &Jail, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while currently_banned(jail) != expected && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(currently_banned(jail), expected);
}

#[test]
fn bans_survive_a_restart_with_corrected_time() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(epoch());
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let config = config(dir.path().join("bans.yaml"), BanTimeExtraConfig::default());

    let mut first = Simulation::new(&config, shared_clock.clone()).unwrap();
    let summaries = first.start().unwrap();
    assert_eq!(summaries[0].1.restored, 0);

    let jail = first.jail("sshd").unwrap();
    jail.put_fail_ticket(Ticket::new("192.0.2.1", clock.now()));
    jail.put_fail_ticket(Ticket::new("198.51.100.7", clock.now()));
    wait_for_bans(jail, 2);
    first.stop();
    first.save().unwrap();
    assert_eq!(first.store().len(), 2);
    assert!(!first.jail("sshd").unwrap().is_alive());

    clock.advance(Duration::from_secs(500));
    let mut second = Simulation::new(&config, shared_clock.clone()).unwrap();
    let summaries = second.start().unwrap();
    assert_eq!(summaries[0].1.restored, 2);
    wait_for_bans(second.jail("sshd").unwrap(), 2);
    second.stop();
    second.save().unwrap();
    // Restored bans are not written back.
    assert_eq!(second.store().len(), 2);

    clock.advance(Duration::from_secs(200));
    let mut third = Simulation::new(&config, shared_clock).unwrap();
    let summaries = third.start().unwrap();
    assert_eq!(summaries[0].1.restored, 0);
    third.stop();
}

#[test]
fn escalated_bans_are_restored_with_remaining_time() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(epoch());
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let extra = BanTimeExtraConfig {
        increment: Some(true),
        multipliers: Some(vec![1, 4]),
        ..BanTimeExtraConfig::default()
    };
    let config = config(dir.path().join("bans.yaml"), extra);

    let mut first = Simulation::new(&config, shared_clock.clone()).unwrap();
    first.start().unwrap();
    let jail = first.jail("sshd").unwrap();
    assert_eq!(jail.ban_time_extra("multipliers").unwrap().as_deref(), Some("1 4"));
    jail.put_fail_ticket(Ticket::new("192.0.2.1", clock.now()).with_ban_count(3));
    wait_for_bans(jail, 1);
    first.stop();
    first.save().unwrap();

    let records = first.store().records();
    assert_eq!(
        records[0].ticket.ban_time(),
        Some(warden_core::ticket::BanTime::from_secs(2_400))
    );

    clock.advance(Duration::from_secs(1_000));
    let mut second = Simulation::new(&config, shared_clock).unwrap();
    let summaries = second.start().unwrap();
    assert_eq!(summaries[0].1.restored, 1);
    wait_for_bans(second.jail("sshd").unwrap(), 1);

    let metrics = second.metrics().gather_metrics().unwrap();
    assert!(metrics.contains("warden_tickets_restored_total{jail=\"sshd\"} 1"));
    second.stop();
}

#[test]
fn unreadable_store_does_not_block_start() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(epoch()));
    let store = Arc::new(MemoryBanStore::new(clock.clone()));
    store.set_available(false);
    let config = config(std::env::temp_dir().join("unused.yaml"), BanTimeExtraConfig::default());

    let mut simulation = Simulation::with_store(&config, store, clock).unwrap();
    let summaries = simulation.start().unwrap();
    assert_eq!(summaries[0].1.failed, 1);
    assert!(simulation.jail("sshd").unwrap().is_alive());
    simulation.stop();
}
