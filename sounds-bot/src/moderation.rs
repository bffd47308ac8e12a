use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::{Configs, User};

const FALLBACK_BAN_MINUTES: i64 = 30;
const SHOWN_LOG_ENTRIES: usize = 10;

/// `start + delta`, saturating at the latest representable instant. A missing
/// delta means the value did not fit in a `Duration`.
fn saturating_after(start: DateTime<Utc>, delta: Option<Duration>) -> DateTime<Utc> {
    delta
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ThrottleRecord {
    window_start: DateTime<Utc>,
    count: i64,
}

/// Outcome of one counted play attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleStatus {
    pub throttled: bool,
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

/// Per-user play counters over a fixed window.
#[derive(Debug, Clone, Default)]
pub struct ThrottleTracker {
    /// Keyed by user name.
    records: HashMap<String, ThrottleRecord>,
}

impl ThrottleTracker {
    /// Counts a play attempt, including ones that end up rejected.
    ///
    /// Returns `None` without recording anything for admins or when throttling
    /// is disabled.
    pub fn check_and_record(
        &mut self,
        user: &User,
        configs: &Configs,
        now: DateTime<Utc>,
    ) -> Option<ThrottleStatus> {
        if user.is_admin || !configs.throttling() {
            return None;
        }
        let reset = Duration::try_seconds(configs.throttling_reset().max(0));
        let limit = configs.throttling_count();

        let record = self
            .records
            .entry(user.name.clone())
            .or_insert(ThrottleRecord {
                window_start: now,
                count: 0,
            });
        if reset.map_or(true, |reset| now - record.window_start < reset) {
            record.count += 1;
        } else {
            record.count = 1;
            record.window_start = now;
        }

        Some(ThrottleStatus {
            throttled: record.count > limit,
            remaining: (limit - record.count).max(0),
            reset_at: saturating_after(record.window_start, reset),
        })
    }
}

/// Temporary play bans. Expired entries are left in place and simply stop
/// matching.
#[derive(Debug, Clone, Default)]
pub struct PunishmentTracker {
    releases: HashMap<String, DateTime<Utc>>,
}

impl PunishmentTracker {
    pub fn is_punished(&self, user: &User, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if user.is_admin {
            return None;
        }
        self.releases
            .get(&user.name)
            .copied()
            .filter(|release| *release > now)
    }

    /// Overwrites any previous ban of `target`. Bans too long to represent
    /// last until the end of time.
    pub fn punish(&mut self, target: &User, minutes: i64, now: DateTime<Utc>) -> DateTime<Utc> {
        let release = saturating_after(now, Duration::try_minutes(minutes.max(0)));
        self.releases.insert(target.name.clone(), release);
        release
    }
}

/// Ban length: the requested minutes, else the configured default, else 30.
pub fn ban_minutes(requested: Option<i64>, configs: &Configs) -> i64 {
    requested
        .or_else(|| configs.default_ban_length())
        .unwrap_or(FALLBACK_BAN_MINUTES)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayLogEntry {
    pub user: String,
    pub sound: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PlayLog {
    entries: Vec<PlayLogEntry>,
}

impl PlayLog {
    pub fn record(&mut self, user: &User, sound: &str, at: DateTime<Utc>) {
        self.entries.push(PlayLogEntry {
            user: user.name.clone(),
            sound: sound.to_owned(),
            at,
        });
    }

    pub fn recent(&self) -> &[PlayLogEntry] {
        let start = self.entries.len().saturating_sub(SHOWN_LOG_ENTRIES);
        &self.entries[start..]
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
