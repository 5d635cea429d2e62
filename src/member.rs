//! Membership records exchanged between beacons
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::millis;

/// Stable identity of a participant
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, PartialEq, PartialOrd, Ord, Eq, Hash,
)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        MemberId::new(id)
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        MemberId::new(id)
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One participant of a collective.
///
/// `lease` is the absolute expiry in milliseconds since the epoch. Two records
/// for the same id are reconciled by keeping the one with the larger lease.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub address: String,
    pub lease: i64,
    #[serde(default)]
    pub services: BTreeSet<String>,
}

impl Member {
    pub fn new(id: impl Into<MemberId>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            lease: 0,
            services: BTreeSet::new(),
        }
    }

    /// Build the runtime record for a member hosted by this process
    pub fn hosted(config: &HostedMember, address: &str, services: &BTreeSet<String>) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            address: address.to_string(),
            lease: 0,
            services: services.clone(),
        }
    }

    pub fn with_lease(mut self, lease: i64) -> Self {
        self.lease = lease;
        self
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.lease <= now
    }

    pub fn is_fresher_than(&self, other: &Member) -> bool {
        self.lease > other.lease
    }

    pub fn renew(&mut self, now: i64, lease_duration: Duration) {
        self.lease = now.saturating_add(millis(lease_duration));
    }

    /// Mark the lease as already elapsed (used on shutdown)
    pub fn expire(&mut self, now: i64) {
        self.lease = now - 1;
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.address == other.address
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.address.hash(state);
    }
}

impl std::fmt::Display for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})@{}", self.name, self.id, self.address)
    }
}

/// Configuration for a member hosted by this process
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct HostedMember {
    pub id: MemberId,
    pub name: String,
}

impl HostedMember {
    pub fn new(id: impl Into<MemberId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl std::str::FromStr for HostedMember {
    type Err = String;

    /// Parses `id` or `id:display name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, name) = match s.split_once(':') {
            Some((id, name)) => (id.trim(), name.trim()),
            None => (s.trim(), s.trim()),
        };
        if id.is_empty() {
            return Err(format!("Invalid member (empty id): {}", s));
        }
        Ok(HostedMember::new(id, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_ignores_lease_and_name() {
        let a = Member::new("m1", "one", "http://10.0.0.1:8410").with_lease(10);
        let b = Member::new("m1", "renamed", "http://10.0.0.1:8410").with_lease(99);
        let c = Member::new("m1", "one", "http://10.0.0.2:8410").with_lease(10);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<Member> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_lease_lifecycle() {
        let mut member = Member::new("m1", "one", "http://10.0.0.1:8410");
        member.renew(1_000, Duration::from_secs(5));
        assert_eq!(member.lease, 6_000);
        assert!(!member.is_expired(5_999));
        assert!(member.is_expired(6_000));

        member.expire(2_000);
        assert!(member.is_expired(2_000));
    }

    #[test]
    fn test_freshness() {
        let old = Member::new("m1", "one", "a").with_lease(10);
        let new = Member::new("m1", "one", "a").with_lease(11);
        assert!(new.is_fresher_than(&old));
        assert!(!old.is_fresher_than(&new));
        assert!(!old.is_fresher_than(&old.clone()));
    }

    #[test]
    fn test_hosted_member_parsing() {
        let parsed: HostedMember = "node-a:Node A".parse().unwrap();
        assert_eq!(parsed.id.as_str(), "node-a");
        assert_eq!(parsed.name, "Node A");

        let parsed: HostedMember = "node-b".parse().unwrap();
        assert_eq!(parsed.name, "node-b");

        assert!(":nameless".parse::<HostedMember>().is_err());
    }

    #[test]
    fn test_member_id_serializes_as_string() {
        let member = Member::new("m1", "one", "a").with_lease(5);
        let json = serde_json::to_value(&member).unwrap();
        assert_eq!(json["id"], "m1");
        assert_eq!(json["lease"], 5);
    }
}
