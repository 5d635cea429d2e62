//! In-process transport
//!
//! Beacons attached to a `LocalNetwork` call each other directly. Links can be
//! cut and nodes taken down to simulate loss and partitions; calls over a cut
//! link fail exactly like an unreachable peer would.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;

use super::{Connector, PeerClient};
use crate::error::Result;
use crate::event::{CollectiveKind, Event};
use crate::gossip::Beacon;
use crate::member::Member;
use crate::settings::normalize_address;
use crate::transport_error;

#[derive(Default)]
struct NetworkState {
    nodes: HashMap<(String, CollectiveKind), Weak<Beacon>>,
    // (from, to) pairs that drop every call
    cut: HashSet<(String, String)>,
    down: HashSet<String>,
    events_delivered: HashMap<String, usize>,
}

#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("LocalNetwork")
            .field("nodes", &state.nodes.len())
            .field("cut", &state.cut.len())
            .field("down", &state.down.len())
            .finish()
    }
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Connector for beacons of `kind` living at `from`
    pub fn connector(&self, from: &str, kind: CollectiveKind) -> Arc<LocalConnector> {
        Arc::new(LocalConnector {
            network: self.clone(),
            from: normalize_address(from).to_string(),
            kind,
        })
    }

    /// Make a beacon reachable at its own address
    pub fn attach(&self, beacon: &Arc<Beacon>) {
        let key = (
            normalize_address(beacon.address()).to_string(),
            beacon.kind(),
        );
        self.state().nodes.insert(key, Arc::downgrade(beacon));
    }

    /// Drop every call from `from` to `to` (one direction)
    pub fn cut(&self, from: &str, to: &str) {
        self.state().cut.insert((
            normalize_address(from).to_string(),
            normalize_address(to).to_string(),
        ));
    }

    pub fn heal(&self, from: &str, to: &str) {
        self.state().cut.remove(&(
            normalize_address(from).to_string(),
            normalize_address(to).to_string(),
        ));
    }

    pub fn take_down(&self, address: &str) {
        self.state()
            .down
            .insert(normalize_address(address).to_string());
    }

    pub fn bring_up(&self, address: &str) {
        self.state().down.remove(normalize_address(address));
    }

    /// Number of events pushed to `address` so far
    pub fn events_delivered(&self, address: &str) -> usize {
        self.state()
            .events_delivered
            .get(normalize_address(address))
            .copied()
            .unwrap_or(0)
    }

    fn route(&self, from: &str, to: &str, kind: CollectiveKind) -> Result<Arc<Beacon>> {
        let state = self.state();
        if state.down.contains(to) || state.down.contains(from) {
            return Err(transport_error!("{} is down", to));
        }
        if state.cut.contains(&(from.to_string(), to.to_string())) {
            return Err(transport_error!("link {} -> {} is cut", from, to));
        }
        state
            .nodes
            .get(&(to.to_string(), kind))
            .and_then(Weak::upgrade)
            .ok_or_else(|| transport_error!("no {} beacon at {}", kind, to))
    }
}

#[derive(Debug)]
pub struct LocalConnector {
    network: LocalNetwork,
    from: String,
    kind: CollectiveKind,
}

impl Connector for LocalConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn PeerClient>> {
        Ok(Arc::new(LocalPeerClient {
            network: self.network.clone(),
            from: self.from.clone(),
            to: normalize_address(address).to_string(),
            kind: self.kind,
        }))
    }
}

struct LocalPeerClient {
    network: LocalNetwork,
    from: String,
    to: String,
    kind: CollectiveKind,
}

#[async_trait]
impl PeerClient for LocalPeerClient {
    async fn members(&self) -> Result<Vec<Member>> {
        let beacon = self.network.route(&self.from, &self.to, self.kind)?;
        Ok(beacon.members())
    }

    async fn on_event(&self, event: Event) -> Result<()> {
        let beacon = self.network.route(&self.from, &self.to, self.kind)?;
        *self
            .network
            .state()
            .events_delivered
            .entry(self.to.clone())
            .or_default() += 1;
        beacon.on_event(event);
        Ok(())
    }
}
