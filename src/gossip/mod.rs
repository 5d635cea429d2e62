//! Gossip membership engine
//!
//! Push-style epidemic broadcast of membership deltas and application
//! messages, with a hop budget per event, randomized fan-out, lease based
//! expiry and periodic anti-entropy pulls to repair lost messages.
//!
//! - `beacon`: the engine and its background loops
//! - `cache`: uuid dedup cache with expire-after-access eviction
//! - `frequency`: per-peer client and failure backoff
pub mod beacon;
pub mod cache;
pub mod frequency;

pub use beacon::{Beacon, Dispatch, MembershipListener};
pub use cache::EventCache;
pub use frequency::{FrequencyStatus, HailingFrequency};
