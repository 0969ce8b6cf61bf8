use facet::Facet;

use crate::{ObjectId, PromiseId};

/// Observable settlement of a handled promise.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// How messages sent to a promise are currently routed.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum BindingKind {
    /// Buffered or intercepted by the unfulfilled handler.
    Pending,
    /// Re-sent to another handled promise this one resolved to.
    Forward,
    /// Dispatched to the fulfilled handler of a presence.
    Presence,
    /// Applied to the settled value by the vat's forwarding handler.
    Local,
}

#[derive(Facet, Clone, Debug, PartialEq, Eq)]
pub struct PresenceEntry {
    pub presence: ObjectId,
    /// Canonical promise, if it is still alive.
    pub promise: Option<PromiseId>,
    pub state: Option<PromiseState>,
}

/// Point-in-time view of a vat's presence registry.
#[derive(Facet, Clone, Debug, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub vat: String,
    pub presences: Vec<PresenceEntry>,
}

impl RegistrySnapshot {
    pub fn contains(&self, presence: ObjectId) -> bool {
        self.presences.iter().any(|entry| entry.presence == presence)
    }
}
