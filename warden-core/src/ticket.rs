//! ## warden-core::ticket
//! **Offense records handed from watchers to actuators**
//!
//! A ticket is created by a watcher on the first match for a source,
//! enriched by later matches, and consumed exactly once by the actuator.
//! Tickets recreated from the ban store at startup carry `restored = true`.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How long a source stays blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanTime {
    Finite(Duration),
    /// Never lifted. Also used as the "unbounded" marker for ban-time caps.
    Permanent,
}

impl BanTime {
    pub fn from_secs(secs: u64) -> Self {
        BanTime::Finite(Duration::from_secs(secs))
    }

    /// Converts an evaluated number of seconds. NaN falls back to `base`,
    /// values that do not fit a `Duration` are treated as permanent.
    pub(crate) fn from_evaluated(secs: f64, base: Duration) -> Self {
        if secs.is_nan() {
            return BanTime::Finite(base);
        }
        match Duration::try_from_secs_f64(secs.max(0.0)) {
            Ok(duration) => BanTime::Finite(duration),
            Err(_) => BanTime::Permanent,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, BanTime::Permanent)
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            BanTime::Finite(duration) => Some(*duration),
            BanTime::Permanent => None,
        }
    }
}

impl From<Duration> for BanTime {
    fn from(duration: Duration) -> Self {
        BanTime::Finite(duration)
    }
}

impl fmt::Display for BanTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BanTime::Finite(duration) => write!(f, "{:.0}s", duration.as_secs_f64()),
            BanTime::Permanent => f.write_str("permanent"),
        }
    }
}

/// A detected violation awaiting a block decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    id: String,
    time: DateTime<Utc>,
    #[serde(default)]
    ban_count: u32,
    #[serde(default)]
    ban_time: Option<BanTime>,
    #[serde(default)]
    matches: Vec<String>,
    #[serde(skip)]
    restored: bool,
}

impl Ticket {
    pub fn new(id: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            time,
            ban_count: 0,
            ban_time: None,
            matches: Vec::new(),
            restored: false,
        }
    }

    pub fn with_ban_count(mut self, ban_count: u32) -> Self {
        self.ban_count = ban_count;
        self
    }

    pub fn with_ban_time(mut self, ban_time: BanTime) -> Self {
        self.ban_time = Some(ban_time);
        self
    }

    pub fn with_matches(mut self, matches: Vec<String>) -> Self {
        self.matches = matches;
        self
    }

    /// Source identifier, usually an address.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn set_time(&mut self, time: DateTime<Utc>) {
        self.time = time;
    }

    /// How many times this source has been banned before.
    pub fn ban_count(&self) -> u32 {
        self.ban_count
    }

    pub fn inc_ban_count(&mut self) {
        self.ban_count = self.ban_count.saturating_add(1);
    }

    pub fn ban_time(&self) -> Option<BanTime> {
        self.ban_time
    }

    /// The ticket's own ban time, or `default` if none was assigned yet.
    pub fn ban_time_or(&self, default: BanTime) -> BanTime {
        self.ban_time.unwrap_or(default)
    }

    pub fn set_ban_time(&mut self, ban_time: Option<BanTime>) {
        self.ban_time = ban_time;
    }

    pub fn matches(&self) -> &[String] {
        &self.matches
    }

    /// Keeps only the most recent `max` matches.
    pub fn truncate_matches(&mut self, max: usize) {
        if self.matches.len() > max {
            let excess = self.matches.len() - max;
            self.matches.drain(..excess);
        }
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    pub fn set_restored(&mut self, restored: bool) {
        self.restored = restored;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn ban_time_falls_back_to_default() {
        let ticket = Ticket::new("192.0.2.1", epoch());
        assert_eq!(ticket.ban_time_or(BanTime::from_secs(600)), BanTime::from_secs(600));

        let ticket = ticket.with_ban_time(BanTime::Permanent);
        assert_eq!(ticket.ban_time_or(BanTime::from_secs(600)), BanTime::Permanent);
    }

    #[test]
    fn truncate_keeps_latest_matches() {
        let mut ticket = Ticket::new("192.0.2.1", epoch()).with_matches(vec![
            "a".into(),
            "b".into(),
            "c".into(),
        ]);
        ticket.truncate_matches(2);
        assert_eq!(ticket.matches(), ["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn evaluated_seconds_are_sanitized() {
        let base = Duration::from_secs(60);
        assert_eq!(BanTime::from_evaluated(f64::NAN, base), BanTime::Finite(base));
        assert_eq!(BanTime::from_evaluated(f64::INFINITY, base), BanTime::Permanent);
        assert_eq!(
            BanTime::from_evaluated(-5.0, base),
            BanTime::Finite(Duration::ZERO)
        );
        assert_eq!(BanTime::from_evaluated(90.0, base), BanTime::from_secs(90));
    }
}
