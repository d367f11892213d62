//! Durable ban storage as seen from a jail.

use std::time::Duration;

use thiserror::Error;

use crate::ticket::{BanTime, Ticket};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ban store unavailable: {0}")]
    Unavailable(String),

    #[error("ban store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ban store data error: {0}")]
    Data(String),
}

/// Parameters of a "currently active bans" lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BanQuery<'a> {
    pub jail: &'a str,
    /// Only bans issued within this window count as active. `None`
    /// means each ban's own duration decides.
    pub for_ban_time: Option<Duration>,
    /// Cap applied to returned ban times. `Some(Permanent)` means no cap.
    pub correct_ban_time: Option<BanTime>,
    /// Matches kept per returned ticket.
    pub max_matches: usize,
}

pub trait BanStore: Send + Sync {
    fn current_bans(&self, query: &BanQuery<'_>) -> Result<Vec<Ticket>, StoreError>;

    fn add_ban(&self, jail: &str, ticket: &Ticket) -> Result<(), StoreError>;
}
