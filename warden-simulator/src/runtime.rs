//! Runs every enabled jail of a configuration against the simulated
//! backends and a shared ban store.

use std::sync::Arc;

use tracing::info;
use warden_config::WardenConfig;
use warden_core::backend::BackendSpec;
use warden_core::jail::{Jail, JailStatus};
use warden_core::restore::RestoreSummary;
use warden_core::time::Clock;
use warden_core::worker::StatusFlavor;
use warden_telemetry::MetricsRecorder;

use crate::error::SimulatorError;
use crate::registry::simulated_registry;
use crate::store::MemoryBanStore;

pub struct Simulation {
    jails: Vec<Jail>,
    store: Arc<MemoryBanStore>,
    metrics: Arc<MetricsRecorder>,
}

impl Simulation {
    /// Builds the jails, loading the ban store from `simulator.state_file`.
    pub fn new(config: &WardenConfig, clock: Arc<dyn Clock>) -> Result<Self, SimulatorError> {
        let store = MemoryBanStore::load(&config.simulator.state_file, clock.clone())?;
        Self::with_store(config, Arc::new(store), clock)
    }

    pub fn with_store(
        config: &WardenConfig,
        store: Arc<MemoryBanStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SimulatorError> {
        let metrics = Arc::new(MetricsRecorder::new());
        let mut jails = Vec::new();

        for jail_config in config.enabled_jails() {
            let registry = simulated_registry(
                jail_config,
                &config.simulator,
                Some(store.clone()),
                clock.clone(),
            );
            let backend: BackendSpec = jail_config.backend.parse()?;
            let jail = Jail::builder(jail_config.name.as_str())
                .backend(backend)
                .database(store.clone())
                .clock(clock.clone())
                .metrics(metrics.clone())
                .build(&registry)?;

            for (option, value) in jail_config.bantime_extra.options() {
                jail.set_ban_time_extra(option.as_str(), &value)?;
            }
            jails.push(jail);
        }

        Ok(Self {
            jails,
            store,
            metrics,
        })
    }

    /// Starts every jail. Stops the ones already running if one fails.
    pub fn start(&mut self) -> Result<Vec<(String, RestoreSummary)>, SimulatorError> {
        let mut summaries = Vec::with_capacity(self.jails.len());
        for index in 0..self.jails.len() {
            match self.jails[index].start() {
                Ok(summary) => summaries.push((self.jails[index].name().to_string(), summary)),
                Err(err) => {
                    self.stop();
                    return Err(err.into());
                }
            }
        }
        info!(jails = self.jails.len(), "Simulation started");
        Ok(summaries)
    }

    pub fn stop(&mut self) {
        for jail in &mut self.jails {
            jail.stop(true, true);
        }
    }

    pub fn save(&self) -> Result<(), SimulatorError> {
        self.store.save()?;
        Ok(())
    }

    pub fn statuses(&self, flavor: StatusFlavor) -> Vec<(String, JailStatus)> {
        self.jails
            .iter()
            .map(|jail| (jail.name().to_string(), jail.status(flavor)))
            .collect()
    }

    pub fn jails(&self) -> &[Jail] {
        &self.jails
    }

    pub fn jail(&self, name: &str) -> Option<&Jail> {
        self.jails.iter().find(|jail| jail.name() == name)
    }

    pub fn store(&self) -> &Arc<MemoryBanStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }
}
