//! One gossip domain as seen by the rest of the application.
//!
//! A `Collective` binds validated settings to exactly one [`Beacon`] and the
//! collaborators it talks through. A cluster and a federation collective can
//! be nested so events and announces cross between the two domains.
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::auth::{Authenticator, NoAuth};
use crate::clock::{Clock, SystemClock};
use crate::codec::{JsonCodec, PayloadCodec};
use crate::error::Result;
use crate::event::{CollectiveKind, Event};
use crate::gossip::{Beacon, Dispatch, FrequencyStatus, MembershipListener};
use crate::member::Member;
use crate::pubsub::{Handler, LocalBus, Message, PubSub};
use crate::settings::CollectiveSettings;
use crate::transport::{Connector, HttpConnector};

pub struct CollectiveBuilder {
    settings: CollectiveSettings,
    connector: Option<Arc<dyn Connector>>,
    codec: Arc<dyn PayloadCodec>,
    bus: Arc<dyn PubSub>,
    clock: Arc<dyn Clock>,
    auth: Arc<dyn Authenticator>,
    listeners: Vec<Arc<dyn MembershipListener>>,
}

impl CollectiveBuilder {
    pub fn new(settings: CollectiveSettings) -> Self {
        Self {
            settings,
            connector: None,
            codec: Arc::new(JsonCodec),
            bus: Arc::new(LocalBus::new()),
            clock: Arc::new(SystemClock),
            auth: Arc::new(NoAuth),
            listeners: Vec::new(),
        }
    }

    /// Defaults to HTTP with the configured timeouts
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn bus(mut self, bus: Arc<dyn PubSub>) -> Self {
        self.bus = bus;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = auth;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn MembershipListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<Collective> {
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(HttpConnector::new(&self.settings, self.auth.clone())?),
        };
        let beacon = Beacon::new(
            self.settings,
            connector,
            self.codec.clone(),
            self.bus.clone(),
            self.clock,
        )?;
        for listener in self.listeners {
            beacon.add_listener(listener);
        }
        Ok(Collective {
            beacon,
            codec: self.codec,
            bus: self.bus,
            auth: self.auth,
            task: Arc::new(Mutex::new(None)),
        })
    }
}

#[derive(Clone)]
pub struct Collective {
    beacon: Arc<Beacon>,
    codec: Arc<dyn PayloadCodec>,
    bus: Arc<dyn PubSub>,
    auth: Arc<dyn Authenticator>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for Collective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collective")
            .field("beacon", &self.beacon)
            .finish()
    }
}

impl Collective {
    pub fn builder(settings: CollectiveSettings) -> CollectiveBuilder {
        CollectiveBuilder::new(settings)
    }

    /// Link two collectives of different kinds in both directions
    pub fn nest(outer: &Collective, inner: &Collective) -> Result<()> {
        outer.beacon.set_nested(&inner.beacon)?;
        inner.beacon.set_nested(&outer.beacon)?;
        info!(
            "Nested {} collective '{}' with {} collective '{}'",
            outer.kind(),
            outer.settings().domain,
            inner.kind(),
            inner.settings().domain
        );
        Ok(())
    }

    pub fn kind(&self) -> CollectiveKind {
        self.beacon.kind()
    }

    pub fn settings(&self) -> &CollectiveSettings {
        self.beacon.settings()
    }

    pub fn beacon(&self) -> &Arc<Beacon> {
        &self.beacon
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.auth
    }

    /// Announce hosted members and run the background loops
    pub fn start(&self) -> Result<()> {
        let handle = self.beacon.start()?;
        *self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        Ok(())
    }

    /// Gossip removal of hosted members and stop the loops
    pub fn shutdown(&self) -> Dispatch {
        self.beacon.shutdown()
    }

    /// Wait for the background loops to exit after `shutdown`
    pub async fn stopped(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn members(&self) -> Vec<Member> {
        self.beacon.members()
    }

    pub fn frequencies(&self) -> Vec<FrequencyStatus> {
        self.beacon.frequencies()
    }

    pub fn on_event(&self, event: Event) {
        self.beacon.on_event(event);
    }

    pub fn subscribe(&self, topic: &str, handler: Handler) {
        self.bus.subscribe(topic, handler);
    }

    pub fn add_listener(&self, listener: Arc<dyn MembershipListener>) {
        self.beacon.add_listener(listener);
    }

    /// Deliver to local subscribers, then gossip as a broadcast
    pub fn publish(&self, message: &Message) -> Result<Dispatch> {
        let delivered = self.bus.publish(message);
        let bytes = self.codec.encode(message)?;
        debug!(
            "[{}] Publishing '{}' ({} local subscribers, {} bytes)",
            self.beacon.label(),
            message.topic,
            delivered,
            bytes.len()
        );
        Ok(self.beacon.broadcast(bytes))
    }
}
