/*!
# Warden Simulator

In-process stand-ins for the collaborators a jail drives, so jails can be
exercised end to end without log files, firewalls or a database.

## Key Components:
- **Watcher:** Seeded offender generator honouring the jail's ignore list.
- **Actuator:** Active-ban table with expiry on an injectable clock.
- **Ban Store:** In-memory ban history persisted as YAML between runs.
- **Simulation:** Builds and drives every enabled jail of a configuration.
*/

pub mod actuator;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod watcher;

pub use actuator::{ActiveBan, SimulatedActuator};
pub use error::SimulatorError;
pub use registry::simulated_registry;
pub use runtime::Simulation;
pub use store::{BanRecord, MemoryBanStore};
pub use watcher::{SimulatedWatcher, WatcherSettings};
