//! # warden-core
//!
//! Per-jail coordination for the Warden intrusion-prevention service.
//! A jail binds one watcher (finds offenders in a log stream) to one
//! actuator (bans them), decides how long each ban lasts, and restores
//! active bans after a restart.
//!
//! ### Expectations:
//! - Watcher and actuator run on their own threads and only share the ticket queue
//! - Ban-time configuration is validated when set, never at ban time
//! - A failing store or worker never keeps a jail from starting or stopping
//!
//! ### Key Submodules:
//! - `backend`: watcher backend selection with ordered fallback
//! - `bantime`: escalation policy and its formula language
//! - `jail`: lifecycle and accessors
//! - `restore`: re-injection of still-active bans at startup

pub mod backend;
pub mod bantime;
pub mod context;
pub mod error;
pub mod jail;
pub mod queue;
pub mod restore;
pub mod store;
pub mod ticket;
pub mod time;
pub mod worker;

pub mod prelude {
    pub use crate::backend::{
        BackendArgs, BackendError, BackendKind, BackendRegistry, BackendSpec,
    };
    pub use crate::bantime::{BanTimeExtra, BanTimeOption, BanTimePolicy};
    pub use crate::context::JailContext;
    pub use crate::error::*;
    pub use crate::jail::{Jail, JailStatus, LifecycleState};
    pub use crate::restore::RestoreSummary;
    pub use crate::store::{BanQuery, BanStore, StoreError};
    pub use crate::ticket::{BanTime, Ticket};
    pub use crate::time::{Clock, ManualClock, SystemClock};
    pub use crate::worker::{
        Actuator, StatusFlavor, StatusSection, Watcher, Worker, WorkerError,
    };
}

pub use error::{ConfigurationError, JailError};
pub use jail::Jail;
