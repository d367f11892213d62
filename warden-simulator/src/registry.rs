//! Backend registry wired to the simulated workers.

use std::sync::Arc;
use std::time::Duration;

use warden_config::{JailConfig, SimulatorConfig};
use warden_core::backend::{BackendError, BackendKind, BackendRegistry};
use warden_core::store::BanStore;
use warden_core::time::Clock;
use warden_core::worker::{Actuator, Watcher};

use crate::actuator::SimulatedActuator;
use crate::store::MemoryBanStore;
use crate::watcher::{SimulatedWatcher, WatcherSettings};

/// Registers a simulated watcher under every backend name except those
/// listed in `unavailable_backends`, which report themselves unavailable.
pub fn simulated_registry(
    jail: &JailConfig,
    simulator: &SimulatorConfig,
    store: Option<Arc<MemoryBanStore>>,
    clock: Arc<dyn Clock>,
) -> BackendRegistry {
    let settings = WatcherSettings {
        interval: Duration::from_millis(simulator.interval_ms.max(1)),
        seed: simulator.seed,
        sources: Arc::new(simulator.sources.clone()),
        ignore: Arc::new(jail.ignore_ip.clone()),
        max_matches: jail.max_matches,
    };
    let unavailable: Vec<BackendKind> = simulator
        .unavailable_backends
        .iter()
        .filter_map(|name| name.parse().ok())
        .collect();

    let ban_time = jail.ban_time();
    let poll = settings.interval.min(Duration::from_millis(20));
    let actuator_store: Option<Arc<dyn BanStore>> = store
        .clone()
        .map(|store| store as Arc<dyn BanStore>);
    let actuator_clock = clock.clone();
    let mut registry = BackendRegistry::new(move |context| {
        let actuator = SimulatedActuator::new(
            context.clone(),
            ban_time,
            actuator_store.clone(),
            actuator_clock.clone(),
        )
        .with_poll_interval(poll);
        Ok(Box::new(actuator) as Box<dyn Actuator>)
    });

    for kind in BackendKind::PREFERENCE {
        let missing = unavailable.contains(&kind);
        let settings = settings.clone();
        let store = store.clone();
        let clock = clock.clone();
        registry.register_watcher(kind, move |args, context| {
            if missing {
                return Err(BackendError::Unavailable(format!(
                    "{kind} disabled in simulator configuration"
                )));
            }
            let settings = settings.clone().with_args(args)?;
            let watcher =
                SimulatedWatcher::new(kind, context.clone(), settings, store.clone(), clock.clone());
            Ok(Box::new(watcher) as Box<dyn Watcher>)
        });
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::backend::BackendSpec;
    use warden_core::time::SystemClock;
    use warden_core::Jail;

    #[test]
    fn unavailable_backends_fall_through() {
        let jail = JailConfig::new("sshd");
        let simulator = SimulatorConfig {
            unavailable_backends: vec!["inotify".into(), "polling".into()],
            ..SimulatorConfig::default()
        };
        let registry = simulated_registry(&jail, &simulator, None, Arc::new(SystemClock));

        let jail = Jail::builder("sshd")
            .backend(BackendSpec::named(BackendKind::Inotify))
            .build(&registry)
            .unwrap();
        assert_eq!(jail.real_backend(), BackendKind::Systemd);
        assert_eq!(jail.watcher().kind(), BackendKind::Systemd);
        assert_eq!(jail.watcher().max_matches(), 10);
        assert_eq!(jail.ban_time(), Duration::from_secs(600));
    }

    #[test]
    fn bad_backend_arguments_are_fatal() {
        let jail = JailConfig::new("sshd");
        let registry =
            simulated_registry(&jail, &SimulatorConfig::default(), None, Arc::new(SystemClock));
        let spec: BackendSpec = "polling[interval=never]".parse().unwrap();
        assert!(Jail::builder("sshd").backend(spec).build(&registry).is_err());
    }
}
