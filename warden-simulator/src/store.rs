//! In-memory ban store, optionally persisted as YAML between runs.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use warden_core::store::{BanQuery, BanStore, StoreError};
use warden_core::ticket::{BanTime, Ticket};
use warden_core::time::Clock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanRecord {
    pub jail: String,
    pub ticket: Ticket,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    bans: Vec<BanRecord>,
}

pub struct MemoryBanStore {
    records: RwLock<Vec<BanRecord>>,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
    available: AtomicBool,
}

impl MemoryBanStore {
    /// A store that lives only as long as the process.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            clock,
            path: None,
            available: AtomicBool::new(true),
        }
    }

    /// Loads `path` if it exists; [`save`](Self::save) writes back to it.
    pub fn load(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let records = if path.exists() {
            let text = fs::read_to_string(path)?;
            let file: StoreFile =
                serde_yaml::from_str(&text).map_err(|err| StoreError::Data(err.to_string()))?;
            info!(path = %path.display(), bans = file.bans.len(), "Loaded ban store");
            file.bans
        } else {
            debug!(path = %path.display(), "No ban store file yet");
            Vec::new()
        };

        Ok(Self {
            records: RwLock::new(records),
            clock,
            path: Some(path.to_path_buf()),
            available: AtomicBool::new(true),
        })
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = StoreFile {
            bans: self.records.read().clone(),
        };
        let text = serde_yaml::to_string(&file).map_err(|err| StoreError::Data(err.to_string()))?;
        fs::write(path, text)?;
        debug!(path = %path.display(), bans = file.bans.len(), "Saved ban store");
        Ok(())
    }

    /// Simulates an unreachable database.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn records(&self) -> Vec<BanRecord> {
        self.records.read().clone()
    }

    /// How often `id` was banned before, in `jail` or anywhere.
    pub fn ban_count(&self, jail: Option<&str>, id: &str) -> u32 {
        let count = self
            .records
            .read()
            .iter()
            .filter(|record| record.ticket.id() == id)
            .filter(|record| jail.map_or(true, |jail| record.jail == jail))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("simulated outage".into()))
        }
    }
}

fn is_active(ticket: &Ticket, window: Option<std::time::Duration>, now: DateTime<Utc>) -> bool {
    let lasts = match window {
        Some(window) => BanTime::Finite(window),
        None => match ticket.ban_time() {
            Some(ban_time) => ban_time,
            None => return false,
        },
    };
    match lasts {
        BanTime::Permanent => true,
        BanTime::Finite(duration) => TimeDelta::from_std(duration)
            .ok()
            .and_then(|delta| ticket.time().checked_add_signed(delta))
            .map_or(true, |until| until > now),
    }
}

impl BanStore for MemoryBanStore {
    fn current_bans(&self, query: &BanQuery<'_>) -> Result<Vec<Ticket>, StoreError> {
        self.check_available()?;
        let now = self.clock.now();

        // Latest ban per source.
        let mut latest: HashMap<&str, &Ticket> = HashMap::new();
        let records = self.records.read();
        for record in records.iter().filter(|record| record.jail == query.jail) {
            let ticket = &record.ticket;
            latest
                .entry(ticket.id())
                .and_modify(|current| {
                    if ticket.time() >= current.time() {
                        *current = ticket;
                    }
                })
                .or_insert(ticket);
        }

        let mut bans: Vec<Ticket> = latest
            .into_values()
            .filter(|ticket| is_active(ticket, query.for_ban_time, now))
            .cloned()
            .map(|mut ticket| {
                if let Some(BanTime::Finite(cap)) = query.correct_ban_time {
                    let corrected = match ticket.ban_time() {
                        Some(BanTime::Finite(duration)) => duration.min(cap),
                        _ => cap,
                    };
                    ticket.set_ban_time(Some(BanTime::Finite(corrected)));
                }
                ticket.truncate_matches(query.max_matches);
                ticket
            })
            .collect();
        bans.sort_by(|a, b| a.time().cmp(&b.time()).then_with(|| a.id().cmp(b.id())));
        Ok(bans)
    }

    fn add_ban(&self, jail: &str, ticket: &Ticket) -> Result<(), StoreError> {
        self.check_available()?;
        self.records.write().push(BanRecord {
            jail: jail.to_string(),
            ticket: ticket.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;
    use warden_core::time::ManualClock;

    fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn query(jail: &str) -> BanQuery<'_> {
        BanQuery {
            jail,
            for_ban_time: None,
            correct_ban_time: None,
            max_matches: 2,
        }
    }

    #[test]
    fn returns_latest_active_ban_per_source() {
        let clock = ManualClock::new(epoch());
        let store = MemoryBanStore::new(Arc::new(clock.clone()));
        let old = Ticket::new("192.0.2.1", epoch()).with_ban_time(BanTime::from_secs(60));
        let newer = Ticket::new("192.0.2.1", epoch() + TimeDelta::seconds(30))
            .with_ban_time(BanTime::from_secs(600))
            .with_ban_count(1);
        store.add_ban("sshd", &old).unwrap();
        store.add_ban("sshd", &newer).unwrap();
        store
            .add_ban("nginx", &Ticket::new("192.0.2.1", epoch()))
            .unwrap();

        clock.advance(Duration::from_secs(120));
        let bans = store.current_bans(&query("sshd")).unwrap();
        assert_eq!(bans, vec![newer]);
        assert_eq!(store.ban_count(Some("sshd"), "192.0.2.1"), 2);
        assert_eq!(store.ban_count(None, "192.0.2.1"), 3);
    }

    #[test]
    fn window_and_correction() {
        let clock = ManualClock::new(epoch());
        let store = MemoryBanStore::new(Arc::new(clock.clone()));
        store
            .add_ban(
                "sshd",
                &Ticket::new("192.0.2.1", epoch()).with_ban_time(BanTime::Permanent),
            )
            .unwrap();
        clock.advance(Duration::from_secs(3_600));

        let mut q = query("sshd");
        q.for_ban_time = Some(Duration::from_secs(600));
        assert!(store.current_bans(&q).unwrap().is_empty());

        let mut q = query("sshd");
        q.correct_ban_time = Some(BanTime::from_secs(86_400));
        let bans = store.current_bans(&q).unwrap();
        assert_eq!(bans[0].ban_time(), Some(BanTime::from_secs(86_400)));
    }

    #[test]
    fn truncates_matches() {
        let store = MemoryBanStore::new(Arc::new(ManualClock::new(epoch())));
        let ticket = Ticket::new("192.0.2.1", epoch())
            .with_ban_time(BanTime::Permanent)
            .with_matches(vec!["a".into(), "b".into(), "c".into()]);
        store.add_ban("sshd", &ticket).unwrap();
        let bans = store.current_bans(&query("sshd")).unwrap();
        assert_eq!(bans[0].matches(), ["b", "c"]);
    }

    #[test]
    fn outage_is_reported() {
        let store = MemoryBanStore::new(Arc::new(ManualClock::new(epoch())));
        store.set_available(false);
        assert!(matches!(
            store.current_bans(&query("sshd")),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn persists_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("bans.yaml");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(epoch()));

        let store = MemoryBanStore::load(&path, clock.clone()).unwrap();
        assert!(store.is_empty());
        let ticket = Ticket::new("192.0.2.1", epoch())
            .with_ban_time(BanTime::from_secs(600))
            .with_ban_count(2)
            .with_matches(vec!["Failed password".into()]);
        store.add_ban("sshd", &ticket).unwrap();
        store
            .add_ban(
                "sshd",
                &Ticket::new("192.0.2.2", epoch()).with_ban_time(BanTime::Permanent),
            )
            .unwrap();
        store.save().unwrap();

        let reloaded = MemoryBanStore::load(&path, clock).unwrap();
        assert_eq!(reloaded.records(), store.records());
    }
}
