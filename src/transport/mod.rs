//! Peer RPC transport
//!
//! A beacon reaches remote peers through two operations only: pulling their
//! member list (anti-entropy and seed bootstrap) and pushing an event
//! (fire-and-forget relay). Any transport implementing [`PeerClient`] and a
//! [`Connector`] to build clients by address can carry the protocol.
//!
//! - `http`: JSON over HTTP with reqwest, served by the axum API
//! - `local`: in-process network of beacons, for tests and embedding
pub mod http;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::event::Event;
use crate::member::Member;

pub use http::{HttpConnector, HttpPeerClient};
pub use local::{LocalConnector, LocalNetwork};

/// Client for one remote peer address
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Pull the peer's full member list
    async fn members(&self) -> Result<Vec<Member>>;

    /// Push an event; the receiving side must be idempotent
    async fn on_event(&self, event: Event) -> Result<()>;
}

/// Builds clients for peer addresses
pub trait Connector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Arc<dyn PeerClient>>;
}
