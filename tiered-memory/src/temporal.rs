//! Temporal metadata for memory records
//!
//! Tracks creation, modification, access and expiry instants. Timestamps
//! never move backwards: refresh operations keep the later of the stored
//! value and the supplied instant.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Timestamps attached to every memory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalMetadata {
    /// When the record was stored
    pub created_at: DateTime<Utc>,

    /// Last mutation (update, optimizer write-back)
    pub updated_at: DateTime<Utc>,

    /// Last time the record was returned by a query
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,

    /// After this instant the record is removed by the decay pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl TemporalMetadata {
    /// Create metadata for a record stored at `now`
    pub fn new_at(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            last_accessed_at: None,
            expires_at: None,
        }
    }

    /// Create metadata for a record stored right now
    pub fn new_current() -> Self {
        Self::new_at(Utc::now())
    }

    /// Set an expiry instant
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Age in fractional days at `now` (never negative)
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        days_between(self.created_at, now)
    }

    /// Days since the last access, falling back to creation
    pub fn idle_days(&self, now: DateTime<Utc>) -> f64 {
        days_between(self.last_accessed_at.unwrap_or(self.created_at), now)
    }

    /// Most recent activity instant (access or creation)
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_accessed_at.unwrap_or(self.created_at)
    }

    /// Record a mutation at `now`
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Record an access at `now`
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        match self.last_accessed_at {
            Some(previous) if previous >= now => {}
            _ => self.last_accessed_at = Some(now),
        }
    }

    /// Check whether the record has passed its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    /// Check whether the record was created inside `[start, end]`
    pub fn created_within(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.created_at >= start && self.created_at <= end
    }

    /// Remaining lifetime, if an expiry is set
    pub fn time_to_live(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|expires_at| expires_at - now)
    }
}

impl Default for TemporalMetadata {
    fn default() -> Self {
        Self::new_current()
    }
}

/// Fractional days from `from` to `to`, clamped at zero
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let seconds = (to - from).num_milliseconds() as f64 / 1000.0;
    (seconds / SECONDS_PER_DAY).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_at() {
        let now = Utc::now();
        let meta = TemporalMetadata::new_at(now);
        assert_eq!(meta.created_at, now);
        assert_eq!(meta.updated_at, now);
        assert!(meta.last_accessed_at.is_none());
        assert!(meta.expires_at.is_none());
    }

    #[test]
    fn test_age_days() {
        let now = Utc::now();
        let meta = TemporalMetadata::new_at(now - Duration::days(40));
        assert!((meta.age_days(now) - 40.0).abs() < 1e-6);

        // Clock skew never produces a negative age
        assert_eq!(meta.age_days(now - Duration::days(41)), 0.0);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let now = Utc::now();
        let mut meta = TemporalMetadata::new_at(now);
        meta.touch(now - Duration::hours(1));
        assert_eq!(meta.updated_at, now);

        meta.touch(now + Duration::hours(1));
        assert_eq!(meta.updated_at, now + Duration::hours(1));
    }

    #[test]
    fn test_record_access_is_monotonic() {
        let now = Utc::now();
        let mut meta = TemporalMetadata::new_at(now);
        meta.record_access(now);
        meta.record_access(now - Duration::minutes(5));
        assert_eq!(meta.last_accessed_at, Some(now));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let meta = TemporalMetadata::new_at(now).with_expiry(now + Duration::hours(1));
        assert!(!meta.is_expired(now));
        assert!(meta.is_expired(now + Duration::hours(2)));
        assert_eq!(meta.time_to_live(now), Some(Duration::hours(1)));
    }

    #[test]
    fn test_idle_days_falls_back_to_creation() {
        let now = Utc::now();
        let mut meta = TemporalMetadata::new_at(now - Duration::days(10));
        assert!((meta.idle_days(now) - 10.0).abs() < 1e-6);

        meta.record_access(now - Duration::days(2));
        assert!((meta.idle_days(now) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_serialization() {
        let now = Utc::now();
        let meta = TemporalMetadata::new_at(now).with_expiry(now + Duration::days(1));

        let json = serde_json::to_string(&meta).unwrap();
        let deserialized: TemporalMetadata = serde_json::from_str(&json).unwrap();

        assert_eq!(meta, deserialized);
    }
}
