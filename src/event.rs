//! Gossip Event Protocol
//!
//! An `Event` is the only message pushed between beacons. Membership deltas
//! (`Announce`, `Remove`) carry member records; `Broadcast` carries an opaque
//! application payload produced by the payload codec.
//!
//! Events are relayed at-least-once and out of order. Receivers rely on the
//! uuid for idempotence, `visited` to avoid sending to nodes that already saw
//! the event, and `cycle` as the remaining hop budget.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::member::{Member, MemberId};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum EventType {
    Announce,
    Remove,
    Broadcast,
}

/// Which gossip domain an event (or a collective) belongs to
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CollectiveKind {
    Cluster,
    Federation,
}

impl CollectiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectiveKind::Cluster => "cluster",
            CollectiveKind::Federation => "federation",
        }
    }
}

impl std::fmt::Display for CollectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CollectiveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cluster" => Ok(CollectiveKind::Cluster),
            "federation" => Ok(CollectiveKind::Federation),
            _ => Err(format!("Invalid collective kind: {}", s)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub enum Payload {
    Members(Vec<Member>),
    Bytes(Vec<u8>),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Event {
    pub domain: String,
    pub uuid: Uuid,
    pub event_type: EventType,
    pub kind: CollectiveKind,
    pub payload: Payload,
    pub cycle: u32,
    #[serde(default)]
    pub visited: BTreeSet<MemberId>,
}

/// Identity of an event's content, used to collapse semantically identical
/// events staged in the same relay batch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ContentKey {
    Members(EventType, BTreeSet<MemberId>),
    Unique(Uuid),
}

impl Event {
    fn new(
        domain: &str,
        kind: CollectiveKind,
        event_type: EventType,
        payload: Payload,
        cycle: u32,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            uuid: Uuid::new_v4(),
            event_type,
            kind,
            payload,
            cycle,
            visited: BTreeSet::new(),
        }
    }

    pub fn announce(domain: &str, kind: CollectiveKind, members: Vec<Member>, cycle: u32) -> Self {
        Self::new(domain, kind, EventType::Announce, Payload::Members(members), cycle)
    }

    pub fn remove(domain: &str, kind: CollectiveKind, members: Vec<Member>, cycle: u32) -> Self {
        Self::new(domain, kind, EventType::Remove, Payload::Members(members), cycle)
    }

    pub fn broadcast(domain: &str, kind: CollectiveKind, bytes: Vec<u8>, cycle: u32) -> Self {
        Self::new(domain, kind, EventType::Broadcast, Payload::Bytes(bytes), cycle)
    }

    pub fn with_visited<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = MemberId>,
    {
        self.visited.extend(ids);
        self
    }

    pub fn members(&self) -> &[Member] {
        match &self.payload {
            Payload::Members(members) => members,
            Payload::Bytes(_) => &[],
        }
    }

    /// Fold a re-delivery of the same uuid into this copy.
    ///
    /// `visited` only grows and the hop budget never increases.
    pub fn merge_redelivery(&mut self, other: &Event) {
        self.visited.extend(other.visited.iter().cloned());
        self.cycle = self.cycle.min(other.cycle);
    }

    /// The copy sent on the next hop, or `None` once the budget is spent
    pub fn relay_copy(&self) -> Option<Event> {
        let cycle = self.cycle.checked_sub(1).filter(|c| *c > 0)?;
        let mut copy = self.clone();
        copy.cycle = cycle;
        Some(copy)
    }

    pub fn content_key(&self) -> ContentKey {
        match &self.payload {
            Payload::Members(members) => ContentKey::Members(
                self.event_type,
                members.iter().map(|m| m.id.clone()).collect(),
            ),
            Payload::Bytes(_) => ContentKey::Unique(self.uuid),
        }
    }

    /// Largest lease carried by this event, used to pick the freshest of
    /// two announces for the same members
    pub fn freshest_lease(&self) -> i64 {
        self.members().iter().map(|m| m.lease).max().unwrap_or(i64::MIN)
    }

    /// Whether `self` should be relayed instead of `other` when both carry the same content
    pub fn supersedes(&self, other: &Event) -> bool {
        match self.event_type {
            EventType::Announce => {
                let (mine, theirs) = (self.freshest_lease(), other.freshest_lease());
                mine > theirs || (mine == theirs && self.cycle > other.cycle)
            }
            _ => self.cycle > other.cycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, lease: i64) -> Member {
        Member::new(id, id, format!("http://{}:8410", id)).with_lease(lease)
    }

    #[test]
    fn test_merge_redelivery_unions_and_takes_min_cycle() {
        let mut stored = Event::announce("acme", CollectiveKind::Cluster, vec![member("a", 5)], 4)
            .with_visited([MemberId::from("a")]);
        let mut redelivered = stored.clone();
        redelivered.cycle = 2;
        redelivered.visited.insert(MemberId::from("b"));

        stored.merge_redelivery(&redelivered);
        assert_eq!(stored.cycle, 2);
        assert_eq!(stored.visited.len(), 2);

        // A higher budget arriving later must not raise the stored one
        let mut late = stored.clone();
        late.cycle = 9;
        late.visited.clear();
        stored.merge_redelivery(&late);
        assert_eq!(stored.cycle, 2);
        assert_eq!(stored.visited.len(), 2);
    }

    #[test]
    fn test_relay_copy_spends_budget() {
        let event = Event::broadcast("acme", CollectiveKind::Cluster, vec![1, 2], 2);
        let hop = event.relay_copy().unwrap();
        assert_eq!(hop.cycle, 1);
        assert_eq!(hop.uuid, event.uuid);
        assert!(hop.relay_copy().is_none());
    }

    #[test]
    fn test_content_key_ignores_lease_and_order() {
        let a = Event::announce(
            "acme",
            CollectiveKind::Cluster,
            vec![member("a", 1), member("b", 1)],
            3,
        );
        let b = Event::announce(
            "acme",
            CollectiveKind::Cluster,
            vec![member("b", 7), member("a", 9)],
            3,
        );
        let c = Event::remove("acme", CollectiveKind::Cluster, vec![member("a", 1), member("b", 1)], 3);
        assert_eq!(a.content_key(), b.content_key());
        assert_ne!(a.content_key(), c.content_key());

        let x = Event::broadcast("acme", CollectiveKind::Cluster, vec![1], 3);
        let y = Event::broadcast("acme", CollectiveKind::Cluster, vec![1], 3);
        assert_ne!(x.content_key(), y.content_key());
    }

    #[test]
    fn test_supersedes_prefers_freshest_announce() {
        let old = Event::announce("acme", CollectiveKind::Cluster, vec![member("a", 10)], 5);
        let new = Event::announce("acme", CollectiveKind::Cluster, vec![member("a", 20)], 1);
        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));

        let low = Event::remove("acme", CollectiveKind::Cluster, vec![member("a", 0)], 1);
        let high = Event::remove("acme", CollectiveKind::Cluster, vec![member("a", 0)], 3);
        assert!(high.supersedes(&low));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Cluster".parse::<CollectiveKind>().unwrap(), CollectiveKind::Cluster);
        assert!("galaxy".parse::<CollectiveKind>().is_err());
        assert_eq!(
            serde_json::to_value(CollectiveKind::Federation).unwrap(),
            "federation"
        );
    }
}
