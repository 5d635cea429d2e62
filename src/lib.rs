//! Gossip based cluster and federation membership.
//!
//! Each node runs one [`collective::Collective`] per gossip domain. Members
//! are announced with time-boxed leases, spread by bounded-hop epidemic
//! relay and repaired through periodic anti-entropy pulls; a cluster and a
//! federation collective can be nested to forward events between domains.
pub mod api;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod codec;
pub mod collective;
pub mod error;
pub mod event;
pub mod gossip;
pub mod member;
pub mod pubsub;
pub mod settings;
pub mod transport;

pub use collective::{Collective, CollectiveBuilder};
pub use error::{CollectiveError, Result};
pub use event::{CollectiveKind, Event, EventType};
pub use member::{HostedMember, Member, MemberId};
pub use settings::CollectiveSettings;
