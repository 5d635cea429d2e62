//! Collective settings
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use crate::config_error;
use crate::error::Result;
use crate::event::CollectiveKind;
use crate::member::HostedMember;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_HTTP: u16 = 8410;
pub const DEFAULT_PORT_HTTP: &str = "8410";

pub const DEFAULT_FANOUT: &str = "3";
pub const DEFAULT_CYCLE: &str = "4";
pub const DEFAULT_RENEWAL_INTERVAL_MS: &str = "10000";
pub const DEFAULT_EVENT_INTERVAL_MS: &str = "500";
pub const DEFAULT_SYNC_INTERVAL_MS: &str = "15000";
pub const DEFAULT_SEED_REFRESH_INTERVAL_MS: &str = "5000";
pub const DEFAULT_DEAD_PEER_CEILING_MS: &str = "60000";
pub const DEFAULT_BACKOFF_INTERVAL_MS: &str = "2000";
pub const DEFAULT_LEASE_PADDING_MS: &str = "5000";

/// Configuration of one collective (one gossip domain on this node)
#[derive(Clone, Debug)]
pub struct CollectiveSettings {
    pub kind: CollectiveKind,

    // Gossip domain namespace; events from any other domain are dropped
    pub domain: String,

    // Address peers use to reach this node (base URL for the HTTP transport)
    pub address: String,

    // Number of peers an event is relayed to per hop
    pub fanout: usize,

    // Hop budget given to events originated here
    pub cycle: u32,

    pub renewal_interval: Duration,
    pub event_interval: Duration,
    pub sync_interval: Duration,
    pub seed_refresh_interval: Duration,

    // Failing peers are always retried after this long
    pub dead_peer_ceiling: Duration,
    // Cool-down per consecutive failure
    pub backoff_interval: Duration,
    pub lease_padding: Duration,

    // Outbound RPC timeouts
    pub connect_timeout: Duration,
    pub request_timeout: Duration,

    pub event_cache_capacity: usize,
    // Events waiting for relay; the oldest is dropped beyond this
    pub max_pending_events: usize,
    // Concurrent outbound relay calls
    pub max_in_flight: usize,

    // Ordered; the first reachable seed wins
    pub seeds: Vec<String>,
    pub members: Vec<HostedMember>,
    pub services: BTreeSet<String>,
}

impl CollectiveSettings {
    pub fn new(kind: CollectiveKind, domain: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            kind,
            domain: domain.into(),
            address: address.into(),
            fanout: 3,
            cycle: 4,
            renewal_interval: Duration::from_secs(10),
            event_interval: Duration::from_millis(500),
            sync_interval: Duration::from_secs(15),
            seed_refresh_interval: Duration::from_secs(5),
            dead_peer_ceiling: Duration::from_secs(60),
            backoff_interval: Duration::from_secs(2),
            lease_padding: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
            event_cache_capacity: 10_000,
            max_pending_events: 10_000,
            max_in_flight: 64,
            seeds: Vec::new(),
            members: Vec::new(),
            services: BTreeSet::new(),
        }
    }

    pub fn cluster(domain: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(CollectiveKind::Cluster, domain, address)
    }

    pub fn federation(domain: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(CollectiveKind::Federation, domain, address)
    }

    pub fn with_member(mut self, member: HostedMember) -> Self {
        self.members.push(member);
        self
    }

    pub fn with_seeds<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seeds = seeds.into_iter().map(Into::into).collect();
        self
    }

    /// How often hosted members are re-announced
    pub fn renewal_period(&self) -> Duration {
        self.renewal_interval + self.event_interval * self.cycle
    }

    /// Lease granted on each announce: long enough to survive one renewal
    /// period plus the time a full-TTL flood takes to settle
    pub fn lease_duration(&self) -> Duration {
        self.renewal_period() + self.lease_padding
    }

    /// Dedup entries are reclaimed once untouched for a whole lease
    pub fn event_cache_ttl(&self) -> Duration {
        self.lease_duration()
    }

    pub fn is_own_address(&self, address: &str) -> bool {
        normalize_address(address) == normalize_address(&self.address)
    }

    /// Fail fast on settings the protocol cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(config_error!("[{}] missing host address", self.kind));
        }
        if self.domain.trim().is_empty() {
            return Err(config_error!("[{}] missing domain name", self.kind));
        }
        if self.fanout == 0 {
            return Err(config_error!("[{}] fanout must be positive", self.kind));
        }
        if self.cycle == 0 {
            return Err(config_error!("[{}] cycle must be positive", self.kind));
        }
        if self.max_in_flight == 0 || self.event_cache_capacity == 0 || self.max_pending_events == 0
        {
            return Err(config_error!(
                "[{}] max_in_flight, event_cache_capacity and max_pending_events must be positive",
                self.kind
            ));
        }
        for (name, interval) in [
            ("renewal_interval", self.renewal_interval),
            ("event_interval", self.event_interval),
            ("sync_interval", self.sync_interval),
            ("seed_refresh_interval", self.seed_refresh_interval),
        ] {
            if interval.is_zero() {
                return Err(config_error!("[{}] {} must be positive", self.kind, name));
            }
        }

        let mut seen = HashSet::new();
        for member in self.members.iter() {
            if member.id.is_empty() {
                return Err(config_error!(
                    "[{}] hosted member '{}' has no id",
                    self.kind,
                    member.name
                ));
            }
            if !seen.insert(member.id.clone()) {
                return Err(config_error!(
                    "[{}] hosted member id '{}' is configured twice",
                    self.kind,
                    member.id
                ));
            }
        }
        Ok(())
    }
}

pub fn normalize_address(address: &str) -> &str {
    address.trim().trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CollectiveSettings {
        CollectiveSettings::cluster("acme", "http://10.0.0.1:8410")
            .with_member(HostedMember::new("node-a", "Node A"))
    }

    #[test]
    fn test_lease_duration() {
        let mut conf = settings();
        conf.renewal_interval = Duration::from_secs(10);
        conf.event_interval = Duration::from_millis(500);
        conf.cycle = 4;
        conf.lease_padding = Duration::from_secs(5);
        assert_eq!(conf.renewal_period(), Duration::from_secs(12));
        assert_eq!(conf.lease_duration(), Duration::from_secs(17));
    }

    #[test]
    fn test_validation_failures() {
        assert!(settings().validate().is_ok());

        let mut conf = settings();
        conf.fanout = 0;
        assert!(conf.validate().is_err());

        let mut conf = settings();
        conf.cycle = 0;
        assert!(conf.validate().is_err());

        let mut conf = settings();
        conf.address = " ".to_string();
        assert!(conf.validate().is_err());

        let conf = settings().with_member(HostedMember::new("", "nameless"));
        assert!(conf.validate().is_err());

        let conf = settings().with_member(HostedMember::new("node-a", "again"));
        assert!(conf.validate().is_err());

        let mut conf = settings();
        conf.sync_interval = Duration::ZERO;
        assert!(conf.validate().is_err());
    }

    #[test]
    fn test_own_address_ignores_trailing_slash() {
        let conf = settings();
        assert!(conf.is_own_address("http://10.0.0.1:8410/"));
        assert!(!conf.is_own_address("http://10.0.0.2:8410"));
    }
}
