//! ## warden-core::bantime
//! **Escalating ban durations**
//!
//! ### Components:
//! - `expr`: formula grammar for count-based escalation
//! - `policy`: option snapshot + compiled evaluator with atomic swap

pub mod expr;
mod policy;

pub use policy::{BanTimeExtra, BanTimeOption, BanTimePolicy, DEFAULT_FORMULA};
