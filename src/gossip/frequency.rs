//! A handle to one remote peer: its last known member record, a lazily built
//! RPC client and failure backoff state.
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::millis;
use crate::error::Result;
use crate::member::{Member, MemberId};
use crate::settings::normalize_address;
use crate::transport::{Connector, PeerClient};

pub struct HailingFrequency {
    member: Member,
    // (address the client was built for, client)
    client: Option<(String, Arc<dyn PeerClient>)>,
    failures: u32,
    last_failure: Option<i64>,
}

/// Serializable view of a frequency for diagnostics
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FrequencyStatus {
    pub member: Member,
    pub failures: u32,
    pub last_failure: Option<i64>,
}

impl std::fmt::Debug for HailingFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HailingFrequency")
            .field("member", &self.member)
            .field("connected", &self.client.is_some())
            .field("failures", &self.failures)
            .field("last_failure", &self.last_failure)
            .finish()
    }
}

impl HailingFrequency {
    pub fn new(member: Member) -> Self {
        Self {
            member,
            client: None,
            failures: 0,
            last_failure: None,
        }
    }

    pub fn id(&self) -> &MemberId {
        &self.member.id
    }

    pub fn member(&self) -> &Member {
        &self.member
    }

    pub fn address(&self) -> &str {
        &self.member.address
    }

    /// Replace the member snapshot. The client is rebuilt on next use if the
    /// address moved.
    pub fn update(&mut self, member: Member) {
        self.member = member;
    }

    /// The RPC client for the member's current address, built on first use
    pub fn client(&mut self, connector: &dyn Connector) -> Result<Arc<dyn PeerClient>> {
        let address = normalize_address(&self.member.address);
        if let Some((built_for, client)) = &self.client {
            if built_for == address {
                return Ok(client.clone());
            }
        }
        let client = connector.connect(address)?;
        self.client = Some((address.to_string(), client.clone()));
        Ok(client)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_failure(&mut self, now: i64) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.last_failure = None;
    }

    /// How long this peer is skipped after its latest failure: proportional
    /// to the consecutive failure count, never longer than `ceiling`
    pub fn cooldown(&self, step: Duration, ceiling: Duration) -> Duration {
        step.saturating_mul(self.failures).min(ceiling)
    }

    pub fn is_available(&self, now: i64, step: Duration, ceiling: Duration) -> bool {
        match self.last_failure {
            None => true,
            Some(_) if self.failures == 0 => true,
            Some(at) => now - at >= millis(self.cooldown(step, ceiling)),
        }
    }

    pub fn status(&self) -> FrequencyStatus {
        FrequencyStatus {
            member: self.member.clone(),
            failures: self.failures,
            last_failure: self.last_failure,
        }
    }
}
