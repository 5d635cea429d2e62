//! All Paths are recorded here for use throughout this codebase
use crate::event::CollectiveKind;

pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
}

/// Served once per configured collective, `:kind` is `cluster` or `federation`
pub mod collective {
    pub const MEMBERS: &str = "/:kind/members";
    pub const EVENTS: &str = "/:kind/events";
    pub const FREQUENCIES: &str = "/:kind/frequencies";
    pub const MESSAGES: &str = "/:kind/messages";
}

fn for_kind(path: &str, kind: CollectiveKind) -> String {
    path.replace(":kind", kind.as_str())
}

pub fn members(kind: CollectiveKind) -> String {
    for_kind(collective::MEMBERS, kind)
}

pub fn events(kind: CollectiveKind) -> String {
    for_kind(collective::EVENTS, kind)
}

pub fn frequencies(kind: CollectiveKind) -> String {
    for_kind(collective::FREQUENCIES, kind)
}

pub fn messages(kind: CollectiveKind) -> String {
    for_kind(collective::MESSAGES, kind)
}
