//! Cache freshness policy.
//!
//! The cache itself lives outside livesync. Sessions only read its identity
//! and policy to decide whether cached data is still good enough.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::CacheId;

/// Freshness policy of a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CachePolicy {
    /// How long an entry stays fresh. `None` means entries never go stale.
    #[serde(default, with = "optional_millis")]
    pub max_age: Option<Duration>,
    /// Extra window after `max_age` during which stale data is still served
    /// while a refresh runs in the background.
    #[serde(default, with = "millis")]
    pub stale_while_revalidate: Duration,
}

/// Verdict for a cached entry of a given age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within `max_age`; no fetch needed.
    Fresh,
    /// Past `max_age` but inside the stale-while-revalidate window: serve it
    /// and refetch.
    Stale,
    /// Past both windows, or nothing cached.
    Expired,
}

impl Freshness {
    /// Whether this verdict calls for a network fetch.
    pub fn needs_fetch(self) -> bool {
        !matches!(self, Freshness::Fresh)
    }
}

impl CachePolicy {
    /// A policy whose entries never go stale.
    pub fn never_expires() -> Self {
        Self::default()
    }

    /// A policy with the given max age and no stale-while-revalidate window.
    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
            stale_while_revalidate: Duration::ZERO,
        }
    }

    /// Set the stale-while-revalidate window.
    pub fn stale_while_revalidate(mut self, window: Duration) -> Self {
        self.stale_while_revalidate = window;
        self
    }

    /// True when entries never go stale.
    pub fn is_never_expiring(&self) -> bool {
        self.max_age.is_none()
    }

    /// Classify an entry of the given age. `None` means nothing is cached.
    pub fn freshness(&self, age: Option<Duration>) -> Freshness {
        let Some(age) = age else {
            return Freshness::Expired;
        };
        match self.max_age {
            None => Freshness::Fresh,
            Some(max_age) if age <= max_age => Freshness::Fresh,
            Some(max_age) if age <= max_age.saturating_add(self.stale_while_revalidate) => {
                Freshness::Stale
            }
            Some(_) => Freshness::Expired,
        }
    }
}

/// A cache instance as seen by a session: identity plus policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheHandle {
    /// Identity of the cache instance.
    pub id: CacheId,
    /// Freshness policy.
    pub policy: CachePolicy,
}

impl CacheHandle {
    /// Create a handle for a new cache instance with the given policy.
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            id: CacheId::new(),
            policy,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_expiring_policy_is_always_fresh() {
        let policy = CachePolicy::never_expires();
        assert!(policy.is_never_expiring());
        assert_eq!(
            policy.freshness(Some(Duration::from_secs(86_400 * 365))),
            Freshness::Fresh
        );
    }

    #[test]
    fn nothing_cached_is_expired() {
        let policy = CachePolicy::never_expires();
        assert_eq!(policy.freshness(None), Freshness::Expired);
        assert!(policy.freshness(None).needs_fetch());
    }

    #[test]
    fn stale_window_serves_and_refetches() {
        let policy = CachePolicy::with_max_age(Duration::from_secs(10))
            .stale_while_revalidate(Duration::from_secs(5));

        let fresh = policy.freshness(Some(Duration::from_secs(10)));
        let stale = policy.freshness(Some(Duration::from_secs(12)));
        let expired = policy.freshness(Some(Duration::from_secs(16)));

        assert_eq!(fresh, Freshness::Fresh);
        assert_eq!(stale, Freshness::Stale);
        assert!(!fresh.needs_fetch());
        assert!(stale.needs_fetch());
        assert_eq!(expired, Freshness::Expired);
        assert!(expired.needs_fetch());
    }

    #[test]
    fn zero_max_age_is_stale_immediately() {
        let policy = CachePolicy::with_max_age(Duration::ZERO);
        assert_eq!(
            policy.freshness(Some(Duration::from_millis(1))),
            Freshness::Expired
        );
    }

    #[test]
    fn policy_deserializes_from_millis() {
        let policy: CachePolicy =
            serde_json::from_str(r#"{"max_age":1500,"stale_while_revalidate":250}"#).unwrap();
        assert_eq!(policy.max_age, Some(Duration::from_millis(1500)));
        assert_eq!(policy.stale_while_revalidate, Duration::from_millis(250));

        let open: CachePolicy = serde_json::from_str("{}").unwrap();
        assert!(open.is_never_expiring());
    }

    #[test]
    fn handles_get_fresh_ids() {
        let a = CacheHandle::new(CachePolicy::default());
        let b = CacheHandle::new(CachePolicy::default());
        assert_ne!(a.id, b.id);
    }
}
