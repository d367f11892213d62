//! Re-injection of still-active bans when a jail starts.

use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{debug, error, info, warn};
use warden_telemetry::EventLogger;

use crate::context::JailContext;
use crate::store::{BanQuery, BanStore};
use crate::ticket::{BanTime, Ticket};
use crate::time::Clock;
use crate::worker::{Watcher, WorkerError};

/// What a restoration pass did with the tickets it was handed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: usize,
    pub ignored: usize,
    pub expired: usize,
    pub failed: usize,
}

enum Outcome {
    Reinject(Ticket),
    Ignored,
    Expired,
}

pub struct BanRestorer<'a> {
    context: &'a JailContext,
    watcher: &'a dyn Watcher,
    flat_ban_time: Duration,
    clock: &'a dyn Clock,
}

impl<'a> BanRestorer<'a> {
    pub fn new(
        context: &'a JailContext,
        watcher: &'a dyn Watcher,
        flat_ban_time: Duration,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            context,
            watcher,
            flat_ban_time,
            clock,
        }
    }

    /// Never fails: storage and per-ticket errors are logged and counted.
    pub fn restore(&self, store: &dyn BanStore) -> RestoreSummary {
        let jail = self.context.name();
        let metrics = self.context.metrics();
        let extra = self.context.ban_time_policy().snapshot();

        let (for_ban_time, correct_ban_time) = if extra.increment() {
            (None, Some(extra.max_possible_ban_time(self.flat_ban_time)))
        } else {
            (Some(self.flat_ban_time), None)
        };
        let query = BanQuery {
            jail,
            for_ban_time,
            correct_ban_time,
            max_matches: self.watcher.max_matches(),
        };

        let tickets = match store.current_bans(&query) {
            Ok(tickets) => tickets,
            Err(err) => {
                error!(%err, "Failed to load current bans, starting without them");
                metrics.inc_restore_failures(jail, 1);
                return RestoreSummary {
                    failed: 1,
                    ..RestoreSummary::default()
                };
            }
        };

        let now = self.clock.now();
        let mut summary = RestoreSummary::default();
        for ticket in tickets {
            let id = ticket.id().to_string();
            match self.restore_ticket(ticket, for_ban_time, now) {
                Ok(Outcome::Reinject(ticket)) => {
                    EventLogger::log_event(
                        "ban_restored",
                        vec![
                            KeyValue::new("jail", jail.to_string()),
                            KeyValue::new("ip", id),
                            KeyValue::new(
                                "remaining",
                                ticket.ban_time().map(|t| t.to_string()).unwrap_or_default(),
                            ),
                        ],
                    );
                    self.context.put_fail_ticket(ticket);
                    summary.restored += 1;
                }
                Ok(Outcome::Ignored) => {
                    debug!(ip = %id, "Restored ban ignored");
                    summary.ignored += 1;
                }
                Ok(Outcome::Expired) => {
                    debug!(ip = %id, "Restored ban already expired");
                    summary.expired += 1;
                }
                Err(err) => {
                    warn!(ip = %id, %err, "Failed to restore ban");
                    summary.failed += 1;
                }
            }
        }

        metrics.inc_tickets_restored(jail, summary.restored as u64);
        if summary.failed > 0 {
            metrics.inc_restore_failures(jail, summary.failed as u64);
        }
        info!(
            restored = summary.restored,
            ignored = summary.ignored,
            expired = summary.expired,
            failed = summary.failed,
            "Restored current bans"
        );
        summary
    }

    fn restore_ticket(
        &self,
        mut ticket: Ticket,
        floor: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<Outcome, WorkerError> {
        ticket.set_restored(true);
        if self.watcher.is_ignored(&ticket)? {
            return Ok(Outcome::Ignored);
        }

        let base = ticket
            .ban_time()
            .unwrap_or_else(|| BanTime::Finite(floor.unwrap_or(self.flat_ban_time)));
        let remaining = match base {
            BanTime::Permanent => BanTime::Permanent,
            BanTime::Finite(duration) => {
                let elapsed = now
                    .signed_duration_since(ticket.time())
                    .to_std()
                    .unwrap_or_default();
                match duration.checked_sub(elapsed) {
                    Some(left) if !left.is_zero() => BanTime::Finite(left),
                    _ => return Ok(Outcome::Expired),
                }
            }
        };

        ticket.set_ban_time(Some(remaining));
        ticket.set_time(now);
        Ok(Outcome::Reinject(ticket))
    }
}
