use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use super::cache::EventCache;
use super::frequency::{FrequencyStatus, HailingFrequency};
use crate::clock::Clock;
use crate::codec::PayloadCodec;
use crate::config_error;
use crate::error::Result;
use crate::event::{CollectiveKind, ContentKey, Event, EventType, Payload};
use crate::member::{Member, MemberId};
use crate::pubsub::PubSub;
use crate::settings::{normalize_address, CollectiveSettings};
use crate::transport::{Connector, PeerClient};

/// Callbacks for changes to a beacon's membership view
pub trait MembershipListener: Send + Sync {
    fn member_added(&self, _kind: CollectiveKind, _member: &Member) {}
    fn member_removed(&self, _kind: CollectiveKind, _member: &Member) {}
}

/// Outbound calls started by one send. Dropping it leaves them running;
/// awaiting `settled` waits for every call to finish.
#[derive(Debug, Default)]
pub struct Dispatch {
    handles: Vec<JoinHandle<()>>,
}

impl Dispatch {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn extend(&mut self, other: Dispatch) {
        self.handles.extend(other.handles);
    }

    pub async fn settled(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delivery {
    // Pushed by a peer of this domain: staged for relay
    Relay,
    // Handed over by the collective of the other kind: applied, never relayed
    Forwarded,
    // Created here: applied without local bus delivery, relayed by the caller
    Origin,
}

#[derive(Debug, Default)]
struct ViewChanges {
    added: Vec<Member>,
    removed: Vec<Member>,
}

impl ViewChanges {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A peer chosen for one outbound call. `ids` are every member hosted at the
/// address, so their failure counters move together.
struct Target {
    address: String,
    ids: Vec<MemberId>,
    client: Arc<dyn PeerClient>,
}

struct BeaconState {
    hosted: BTreeMap<MemberId, Member>,
    frequencies: HashMap<MemberId, HailingFrequency>,
    events: EventCache,
    outbound: VecDeque<Event>,
}

impl BeaconState {
    fn has_peers(&self) -> bool {
        !self.frequencies.is_empty()
    }

    fn hosted_ids(&self) -> impl Iterator<Item = &MemberId> {
        self.hosted.keys()
    }

    /// Freshest-lease-wins merge of remote member records
    fn upsert(&mut self, members: &[Member], now: i64, changes: &mut ViewChanges) {
        for member in members {
            if member.id.is_empty() || self.hosted.contains_key(&member.id) {
                continue;
            }
            if member.is_expired(now) {
                continue;
            }
            match self.frequencies.get_mut(&member.id) {
                Some(frequency) => {
                    if member.is_fresher_than(frequency.member()) {
                        frequency.update(member.clone());
                    }
                }
                None => {
                    self.frequencies
                        .insert(member.id.clone(), HailingFrequency::new(member.clone()));
                    changes.added.push(member.clone());
                }
            }
        }
    }

    fn evict(&mut self, members: &[Member], changes: &mut ViewChanges) {
        for member in members {
            if self.hosted.contains_key(&member.id) {
                continue;
            }
            if let Some(frequency) = self.frequencies.remove(&member.id) {
                changes.removed.push(frequency.member().clone());
            }
        }
    }

    fn evict_expired(&mut self, now: i64, changes: &mut ViewChanges) {
        let expired: Vec<MemberId> = self
            .frequencies
            .values()
            .filter(|f| f.member().is_expired(now))
            .map(|f| f.id().clone())
            .collect();
        for id in expired {
            if let Some(frequency) = self.frequencies.remove(&id) {
                changes.removed.push(frequency.member().clone());
            }
        }
    }
}

/// The gossip engine of one collective.
///
/// Owns the membership view and the dedup cache, relays events with bounded
/// fan-out and hop budget, and repairs the view through periodic anti-entropy
/// pulls. All shared state sits behind one mutex that is never held across an
/// await; outbound calls run on spawned tasks bounded by a semaphore.
pub struct Beacon {
    label: String,
    settings: CollectiveSettings,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn PayloadCodec>,
    bus: Arc<dyn PubSub>,
    clock: Arc<dyn Clock>,
    listeners: RwLock<Vec<Arc<dyn MembershipListener>>>,
    state: Mutex<BeaconState>,
    pending: Notify,
    permits: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    nested: RwLock<Option<Weak<Beacon>>>,
    started: AtomicBool,
}

impl std::fmt::Debug for Beacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Beacon")
            .field("label", &self.label)
            .field("domain", &self.settings.domain)
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}

impl Beacon {
    pub fn new(
        settings: CollectiveSettings,
        connector: Arc<dyn Connector>,
        codec: Arc<dyn PayloadCodec>,
        bus: Arc<dyn PubSub>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        settings.validate()?;
        let now = clock.now_millis();
        let lease_duration = settings.lease_duration();
        let hosted: BTreeMap<MemberId, Member> = settings
            .members
            .iter()
            .map(|config| {
                let mut member = Member::hosted(config, &settings.address, &settings.services);
                member.renew(now, lease_duration);
                (member.id.clone(), member)
            })
            .collect();

        let (shutdown_tx, _) = watch::channel(false);
        let label = format!("{}@{}", settings.kind, normalize_address(&settings.address));
        info!(
            "[{}] Beacon for domain '{}' hosting {} members, fanout {} cycle {}",
            label,
            settings.domain,
            hosted.len(),
            settings.fanout,
            settings.cycle
        );

        Ok(Arc::new(Self {
            label,
            state: Mutex::new(BeaconState {
                hosted,
                frequencies: HashMap::new(),
                events: EventCache::new(settings.event_cache_capacity, settings.event_cache_ttl()),
                outbound: VecDeque::new(),
            }),
            permits: Arc::new(Semaphore::new(settings.max_in_flight)),
            settings,
            connector,
            codec,
            bus,
            clock,
            listeners: RwLock::new(Vec::new()),
            pending: Notify::new(),
            shutdown_tx,
            nested: RwLock::new(None),
            started: AtomicBool::new(false),
        }))
    }

    fn state(&self) -> MutexGuard<'_, BeaconState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn address(&self) -> &str {
        &self.settings.address
    }

    pub fn kind(&self) -> CollectiveKind {
        self.settings.kind
    }

    pub fn domain(&self) -> &str {
        &self.settings.domain
    }

    pub fn settings(&self) -> &CollectiveSettings {
        &self.settings
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Every known member, hosted ones included, ordered by id
    pub fn members(&self) -> Vec<Member> {
        let state = self.state();
        let mut members: Vec<Member> = state
            .hosted
            .values()
            .cloned()
            .chain(state.frequencies.values().map(|f| f.member().clone()))
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    pub fn hosted_members(&self) -> Vec<Member> {
        self.state().hosted.values().cloned().collect()
    }

    /// Handles to remote peers, ordered by member id
    pub fn frequencies(&self) -> Vec<FrequencyStatus> {
        let state = self.state();
        let mut statuses: Vec<FrequencyStatus> =
            state.frequencies.values().map(|f| f.status()).collect();
        statuses.sort_by(|a, b| a.member.id.cmp(&b.member.id));
        statuses
    }

    pub fn has_peers(&self) -> bool {
        self.state().has_peers()
    }

    /// Number of events waiting for the events loop
    pub fn pending_events(&self) -> usize {
        self.state().outbound.len()
    }

    pub fn add_listener(&self, listener: Arc<dyn MembershipListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    /// Link the beacon of the other kind for cross-domain forwarding
    pub fn set_nested(&self, nested: &Arc<Beacon>) -> Result<()> {
        if nested.kind() == self.kind() {
            return Err(config_error!(
                "[{}] cannot nest another {} collective",
                self.label,
                self.kind()
            ));
        }
        *self
            .nested
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::downgrade(nested));
        Ok(())
    }

    pub fn nested(&self) -> Option<Arc<Beacon>> {
        self.nested
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Inbound event from a peer. Safe to call concurrently; never blocks on
    /// the network.
    pub fn on_event(&self, event: Event) {
        if event.kind != self.kind() {
            match self.nested() {
                Some(nested) if nested.kind() == event.kind => {
                    trace!(
                        "[{}] Forwarding {} event {} to nested collective",
                        self.label,
                        event.kind,
                        event.uuid
                    );
                    nested.accept(event, Delivery::Forwarded);
                }
                _ => debug!(
                    "[{}] Dropping {} event {}: no collective of that kind",
                    self.label, event.kind, event.uuid
                ),
            }
            return;
        }
        self.accept(event, Delivery::Relay);
    }

    fn accept(&self, event: Event, delivery: Delivery) -> bool {
        if event.domain != self.settings.domain {
            debug!(
                "[{}] Dropping event {} from foreign domain '{}'",
                self.label, event.uuid, event.domain
            );
            return false;
        }
        self.deliver(event, delivery)
    }

    /// Apply an event once per uuid. Returns false for a re-delivery, which
    /// only folds `visited` and the hop budget into the stored copy.
    fn deliver(&self, mut event: Event, delivery: Delivery) -> bool {
        let now = self.clock.now_millis();
        let mut changes = ViewChanges::default();
        let staged;
        {
            let mut state = self.state();
            if let Some(stored) = state.events.get_mut(&event.uuid, now) {
                stored.merge_redelivery(&event);
                trace!(
                    "[{}] Re-delivery of {:?} {} (cycle now {})",
                    self.label,
                    stored.event_type,
                    stored.uuid,
                    stored.cycle
                );
                return false;
            }

            match event.event_type {
                EventType::Announce => state.upsert(event.members(), now, &mut changes),
                EventType::Remove => state.evict(event.members(), &mut changes),
                EventType::Broadcast => {}
            }

            let hosted: Vec<MemberId> = state.hosted_ids().cloned().collect();
            event.visited.extend(hosted);
            staged = delivery == Delivery::Relay && event.cycle > 0;
            if staged {
                if state.outbound.len() >= self.settings.max_pending_events {
                    if let Some(dropped) = state.outbound.pop_front() {
                        warn!(
                            "[{}] Relay queue full, dropping {:?} {}",
                            self.label, dropped.event_type, dropped.uuid
                        );
                    }
                }
                state.outbound.push_back(event.clone());
            }
            state.events.insert(event.clone(), now);
        }

        if staged {
            self.pending.notify_one();
        }
        self.notify_listeners(changes);
        if delivery != Delivery::Origin {
            if let Payload::Bytes(bytes) = &event.payload {
                self.publish_local(bytes);
            }
        }
        true
    }

    fn publish_local(&self, bytes: &[u8]) {
        match self.codec.decode(bytes) {
            Ok(message) => {
                let delivered = self.bus.publish(&message);
                trace!(
                    "[{}] Broadcast on '{}' reached {} local subscribers",
                    self.label,
                    message.topic,
                    delivered
                );
            }
            Err(err) => warn!("[{}] Failed decoding broadcast payload: {}", self.label, err),
        }
    }

    fn notify_listeners(&self, changes: ViewChanges) {
        if changes.is_empty() {
            return;
        }
        if !changes.added.is_empty() {
            // A queue held back while isolated can drain now
            self.pending.notify_one();
        }
        for member in changes.added.iter() {
            info!("[{}] Member joined: {}", self.label, member);
        }
        for member in changes.removed.iter() {
            info!("[{}] Member left: {}", self.label, member);
        }
        let listeners: Vec<Arc<dyn MembershipListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners.iter() {
            for member in changes.added.iter() {
                listener.member_added(self.kind(), member);
            }
            for member in changes.removed.iter() {
                listener.member_removed(self.kind(), member);
            }
        }
    }

    /// Record a locally created event and relay its first hop right away
    fn originate(self: &Arc<Self>, event: Event, reason: &str) -> Dispatch {
        let relay = event.relay_copy();
        self.deliver(event, Delivery::Origin);
        match relay {
            Some(relay) => self.gossip(relay, reason),
            None => Dispatch::default(),
        }
    }

    /// Renew every hosted member's lease and announce them
    pub fn announce(self: &Arc<Self>) -> Dispatch {
        let members = self.renew_hosted();
        if members.is_empty() {
            return Dispatch::default();
        }
        let event = Event::announce(
            &self.settings.domain,
            self.kind(),
            members.clone(),
            self.settings.cycle,
        )
        .with_visited(members.iter().map(|m| m.id.clone()));
        let mut dispatch = self.originate(event, "announce");

        if let Some(nested) = self.nested() {
            dispatch.extend(nested.echo(members));
        }
        dispatch
    }

    fn renew_hosted(&self) -> Vec<Member> {
        let now = self.clock.now_millis();
        let lease_duration = self.settings.lease_duration();
        let mut state = self.state();
        state
            .hosted
            .values_mut()
            .map(|member| {
                member.renew(now, lease_duration);
                member.clone()
            })
            .collect()
    }

    /// Take in members announced by the collective of the other kind and
    /// announce them to this domain. Never echoes back.
    pub fn echo(self: &Arc<Self>, members: Vec<Member>) -> Dispatch {
        if members.is_empty() || self.is_shutdown() {
            return Dispatch::default();
        }
        let hosted: Vec<MemberId> = self.state().hosted_ids().cloned().collect();
        let event = Event::announce(
            &self.settings.domain,
            self.kind(),
            members,
            self.settings.cycle,
        )
        .with_visited(hosted);
        self.originate(event, "echo")
    }

    /// Gossip an already encoded application payload
    pub fn broadcast(self: &Arc<Self>, bytes: Vec<u8>) -> Dispatch {
        let hosted: Vec<MemberId> = self.state().hosted_ids().cloned().collect();
        let event = Event::broadcast(&self.settings.domain, self.kind(), bytes, self.settings.cycle)
            .with_visited(hosted);
        self.originate(event, "broadcast")
    }

    /// Relay `event` to up to `fanout` peers that have not seen it
    pub fn gossip(self: &Arc<Self>, mut event: Event, reason: &str) -> Dispatch {
        let targets = self.select_targets(&event);
        if targets.is_empty() {
            trace!(
                "[{}] No targets for {} of {:?} {}",
                self.label,
                reason,
                event.event_type,
                event.uuid
            );
            return Dispatch::default();
        }

        for target in targets.iter() {
            event.visited.extend(target.ids.iter().cloned());
        }
        debug!(
            "[{}] Gossiping {:?} {} ({}) to {} peers with cycle {}",
            self.label,
            event.event_type,
            event.uuid,
            reason,
            targets.len(),
            event.cycle
        );

        let handles = targets
            .into_iter()
            .map(|target| {
                let beacon = Arc::clone(self);
                let permits = self.permits.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    let result = target.client.on_event(event).await;
                    if let Err(err) = &result {
                        warn!(
                            "[{}] Failed relaying to {}: {}",
                            beacon.label, target.address, err
                        );
                    }
                    beacon.record_outcome(&target, result.is_ok());
                })
            })
            .collect();
        Dispatch { handles }
    }

    fn select_targets(&self, event: &Event) -> Vec<Target> {
        let now = self.clock.now_millis();
        let mut state = self.state();

        let seen: HashSet<String> = event
            .visited
            .iter()
            .filter_map(|id| state.frequencies.get(id))
            .map(|f| normalize_address(f.address()).to_string())
            .collect();
        let mut by_address: BTreeMap<String, Vec<MemberId>> = BTreeMap::new();
        for frequency in state.frequencies.values() {
            let address = normalize_address(frequency.address());
            if self.settings.is_own_address(address)
                || seen.contains(address)
                || event.visited.contains(frequency.id())
            {
                continue;
            }
            if !frequency.is_available(
                now,
                self.settings.backoff_interval,
                self.settings.dead_peer_ceiling,
            ) {
                continue;
            }
            by_address
                .entry(address.to_string())
                .or_default()
                .push(frequency.id().clone());
        }

        let mut candidates: Vec<(String, Vec<MemberId>)> = by_address.into_iter().collect();
        if candidates.len() > self.settings.fanout {
            candidates.shuffle(&mut rand::rng());
            candidates.truncate(self.settings.fanout);
        }

        candidates
            .into_iter()
            .filter_map(|(address, ids)| self.target(&mut state, address, ids, now))
            .collect()
    }

    fn target(
        &self,
        state: &mut BeaconState,
        address: String,
        ids: Vec<MemberId>,
        now: i64,
    ) -> Option<Target> {
        let frequency = state.frequencies.get_mut(ids.first()?)?;
        match frequency.client(self.connector.as_ref()) {
            Ok(client) => Some(Target {
                address,
                ids,
                client,
            }),
            Err(err) => {
                warn!("[{}] Cannot reach {}: {}", self.label, address, err);
                frequency.record_failure(now);
                None
            }
        }
    }

    /// Update backoff state after a call. A failing peer leaves the view only
    /// once its lease is gone.
    fn record_outcome(&self, target: &Target, success: bool) {
        let now = self.clock.now_millis();
        let mut changes = ViewChanges::default();
        {
            let mut state = self.state();
            for id in target.ids.iter() {
                let Some(frequency) = state.frequencies.get_mut(id) else {
                    continue;
                };
                if success {
                    frequency.record_success();
                    continue;
                }
                frequency.record_failure(now);
                if frequency.member().is_expired(now) {
                    if let Some(frequency) = state.frequencies.remove(id) {
                        changes.removed.push(frequency.member().clone());
                    }
                }
            }
        }
        self.notify_listeners(changes);
    }

    /// Drain the outbound queue into one batch and relay it.
    ///
    /// Nothing is drained while no peer is known. The queue owns its events,
    /// so an entry the dedup cache has already evicted is still relayed. Each staged event spends one
    /// unit of hop budget; events at zero are dropped and events with the same
    /// content collapse into the one that supersedes the rest.
    pub fn process_events(self: &Arc<Self>) -> Dispatch {
        let batch = {
            let mut state = self.state();
            if state.outbound.is_empty() || !state.has_peers() {
                return Dispatch::default();
            }
            let staged: Vec<Event> = state.outbound.drain(..).collect();
            let mut batch: Vec<Event> = Vec::with_capacity(staged.len());
            let mut index: HashMap<ContentKey, usize> = HashMap::new();
            for mut event in staged {
                // Fold in redeliveries seen while the event sat in the queue
                if let Some(cached) = state.events.peek(&event.uuid) {
                    event.merge_redelivery(cached);
                }
                let Some(relay) = event.relay_copy() else {
                    continue;
                };
                match index.get(&relay.content_key()) {
                    Some(&slot) => {
                        if relay.supersedes(&batch[slot]) {
                            batch[slot] = relay;
                        }
                    }
                    None => {
                        index.insert(relay.content_key(), batch.len());
                        batch.push(relay);
                    }
                }
            }
            batch
        };

        let mut dispatch = Dispatch::default();
        for event in batch {
            dispatch.extend(self.gossip(event, "relay"));
        }
        dispatch
    }

    /// Drop every non-hosted member whose lease has run out
    pub fn expire_members(&self) -> usize {
        let now = self.clock.now_millis();
        let mut changes = ViewChanges::default();
        {
            let mut state = self.state();
            state.evict_expired(now, &mut changes);
            let purged = state.events.purge(now);
            if purged > 0 {
                trace!("[{}] Purged {} stale events", self.label, purged);
            }
        }
        let expired = changes.removed.len();
        self.notify_listeners(changes);
        expired
    }

    /// Merge a pulled member list
    pub fn merge_members(&self, members: &[Member]) {
        let now = self.clock.now_millis();
        let mut changes = ViewChanges::default();
        self.state().upsert(members, now, &mut changes);
        self.notify_listeners(changes);
    }

    /// One anti-entropy round: expire stale members, then pull the full
    /// member list from one random reachable peer. Returns whether a peer
    /// answered.
    pub async fn sync_once(&self) -> Result<bool> {
        self.expire_members();
        let Some(target) = self.sync_target() else {
            return Ok(false);
        };
        match target.client.members().await {
            Ok(members) => {
                debug!(
                    "[{}] Synced {} members from {}",
                    self.label,
                    members.len(),
                    target.address
                );
                self.record_outcome(&target, true);
                self.merge_members(&members);
                Ok(true)
            }
            Err(err) => {
                self.record_outcome(&target, false);
                Err(err)
            }
        }
    }

    fn sync_target(&self) -> Option<Target> {
        let now = self.clock.now_millis();
        let mut state = self.state();
        let mut by_address: BTreeMap<String, Vec<MemberId>> = BTreeMap::new();
        for frequency in state.frequencies.values() {
            let address = normalize_address(frequency.address());
            if self.settings.is_own_address(address)
                || !frequency.is_available(
                    now,
                    self.settings.backoff_interval,
                    self.settings.dead_peer_ceiling,
                )
            {
                continue;
            }
            by_address
                .entry(address.to_string())
                .or_default()
                .push(frequency.id().clone());
        }
        if by_address.is_empty() {
            return None;
        }
        let pick = rand::rng().random_range(0..by_address.len());
        let (address, ids) = by_address.into_iter().nth(pick)?;
        self.target(&mut state, address, ids, now)
    }

    /// One bootstrap attempt.
    ///
    /// A node whose only seed is itself, or that has no seeds, is the first
    /// of its collective and just announces. Otherwise the seeds are pulled in
    /// order, then any known peer. Returns the announce once a pull worked.
    pub async fn try_sync_seeds(self: &Arc<Self>) -> Option<Dispatch> {
        let seeds: Vec<&str> = self
            .settings
            .seeds
            .iter()
            .map(|seed| normalize_address(seed))
            .filter(|seed| !seed.is_empty())
            .collect();
        if seeds.iter().all(|seed| self.settings.is_own_address(seed)) {
            debug!("[{}] No remote seeds, announcing as first member", self.label);
            return Some(self.announce());
        }

        for seed in seeds.iter().filter(|s| !self.settings.is_own_address(s)) {
            let client = match self.connector.connect(seed) {
                Ok(client) => client,
                Err(err) => {
                    warn!("[{}] Cannot build client for seed {}: {}", self.label, seed, err);
                    continue;
                }
            };
            match client.members().await {
                Ok(members) => {
                    info!(
                        "[{}] Bootstrapped {} members from seed {}",
                        self.label,
                        members.len(),
                        seed
                    );
                    self.merge_members(&members);
                    return Some(self.announce());
                }
                Err(err) => debug!("[{}] Seed {} unreachable: {}", self.label, seed, err),
            }
        }

        match self.sync_once().await {
            Ok(true) => Some(self.announce()),
            Ok(false) => None,
            Err(err) => {
                debug!("[{}] No peer reachable: {}", self.label, err);
                None
            }
        }
    }

    /// Retry bootstrap every `seed_refresh_interval` until it succeeds.
    /// Returns false if shut down first.
    pub async fn sync_seeds(self: &Arc<Self>) -> bool {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            if *shutdown.borrow() {
                return false;
            }
            if self.try_sync_seeds().await.is_some() {
                return true;
            }
            debug!(
                "[{}] Bootstrap failed, retrying in {:?}",
                self.label, self.settings.seed_refresh_interval
            );
            tokio::select! {
                _ = time::sleep(self.settings.seed_refresh_interval) => {}
                _ = shutdown.changed() => return false,
            }
        }
    }

    /// Announce hosted members, then bootstrap from the seeds and run the
    /// events, sync and renewal loops until shutdown.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(config_error!("[{}] beacon already started", self.label));
        }
        if self.is_shutdown() {
            return Err(config_error!("[{}] beacon was shut down", self.label));
        }
        info!("[{}] Starting beacon", self.label);
        drop(self.announce());

        let beacon = Arc::clone(self);
        Ok(tokio::spawn(async move {
            if !beacon.sync_seeds().await {
                return;
            }
            tokio::join!(
                beacon.clone().events_loop(),
                beacon.clone().sync_loop(),
                beacon.clone().renewal_loop(),
            );
            info!("[{}] Beacon loops stopped", beacon.label);
        }))
    }

    async fn events_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            if *shutdown.borrow() {
                break;
            }
            if self.pending_events() == 0 || !self.has_peers() {
                tokio::select! {
                    _ = self.pending.notified() => continue,
                    _ = shutdown.changed() => break,
                }
            }
            // Let a batch build up before relaying
            tokio::select! {
                _ = time::sleep(self.settings.event_interval) => {}
                _ = shutdown.changed() => break,
            }
            drop(self.process_events());
        }
    }

    async fn sync_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let period = self.settings.sync_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sync_once().await {
                        debug!("[{}] Error during sync: {}", self.label, err);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn renewal_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let period = self.settings.renewal_period();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    drop(self.renewal());
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// One renewal tick: re-announce, or re-run the bootstrap while isolated
    pub fn renewal(self: &Arc<Self>) -> JoinHandle<()> {
        let beacon = Arc::clone(self);
        tokio::spawn(async move {
            if beacon.has_peers() {
                drop(beacon.announce());
            } else {
                debug!("[{}] Isolated, retrying seeds", beacon.label);
                drop(beacon.try_sync_seeds().await);
            }
        })
    }

    /// Expire hosted leases, gossip their removal and stop the loops.
    /// Later calls do nothing.
    pub fn shutdown(self: &Arc<Self>) -> Dispatch {
        if self.shutdown_tx.send_replace(true) {
            return Dispatch::default();
        }
        let now = self.clock.now_millis();
        let members: Vec<Member> = self
            .state()
            .hosted
            .values_mut()
            .map(|member| {
                member.expire(now);
                member.clone()
            })
            .collect();
        info!("[{}] Shutting down, removing {} members", self.label, members.len());
        if members.is_empty() {
            return Dispatch::default();
        }
        let event = Event::remove(&self.settings.domain, self.kind(), members.clone(), self.settings.cycle)
            .with_visited(members.iter().map(|m| m.id.clone()));
        self.originate(event, "shutdown")
    }

    #[cfg(test)]
    fn cached(&self, uuid: &uuid::Uuid) -> Option<Event> {
        self.state().events.peek(uuid).cloned()
    }

    #[cfg(test)]
    fn visited_ids(&self, uuid: &uuid::Uuid) -> std::collections::BTreeSet<MemberId> {
        self.cached(uuid).map(|e| e.visited).unwrap_or_default()
    }
}
