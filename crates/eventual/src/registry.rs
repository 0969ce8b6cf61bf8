use eventual_types::{ObjectId, PresenceEntry, RegistrySnapshot};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use super::handler::Handler;
use super::promise::{HandledPromise, WeakPromise};
use super::value::{Value, WeakPresence};

struct PresenceRecord {
    presence: WeakPresence,
    /// Owned by the promises bound to the presence.
    handler: Weak<dyn Handler>,
    /// The promise that first bound this presence.
    promise: WeakPromise,
}

impl PresenceRecord {
    fn is_alive(&self) -> bool {
        self.presence.is_alive() && self.handler.strong_count() > 0
    }
}

/// Presence→handler and presence→canonical-promise lookups for one vat.
///
/// Records own nothing. A record dies once its presence or its handler is
/// dropped, and every operation prunes dead records before it answers, so
/// a handler that holds its vat never keeps that vat alive.
#[derive(Default)]
pub(crate) struct PresenceRegistry {
    records: BTreeMap<ObjectId, PresenceRecord>,
}

impl PresenceRegistry {
    /// First registrant wins. Returns `false` when `presence` already had a
    /// live binding, which is left untouched.
    pub(crate) fn register(
        &mut self,
        presence: &Value,
        handler: &Rc<dyn Handler>,
        promise: &HandledPromise,
    ) -> bool {
        let (Some(id), Some(weak)) = (presence.object_id(), presence.downgrade_presence()) else {
            return false;
        };
        self.prune();
        if self.records.contains_key(&id) {
            return false;
        }
        self.records.insert(
            id,
            PresenceRecord {
                presence: weak,
                handler: Rc::downgrade(handler),
                promise: promise.downgrade(),
            },
        );
        true
    }

    fn live_record(&mut self, presence: &Value) -> Option<&PresenceRecord> {
        let id = presence.object_id()?;
        self.prune();
        self.records.get(&id)
    }

    pub(crate) fn handler_for(&mut self, presence: &Value) -> Option<Rc<dyn Handler>> {
        self.live_record(presence)?.handler.upgrade()
    }

    pub(crate) fn promise_for(&mut self, presence: &Value) -> Option<HandledPromise> {
        self.live_record(presence)?.promise.upgrade()
    }

    /// Drops records whose presence or handler is gone. Only weak handles
    /// are released here, so no destructor runs while the registry is
    /// borrowed.
    pub(crate) fn prune(&mut self) {
        self.records.retain(|_, record| record.is_alive());
    }

    pub(crate) fn snapshot(&mut self, vat: &str) -> RegistrySnapshot {
        self.prune();
        let presences = self
            .records
            .iter()
            .map(|(id, record)| {
                let promise = record.promise.upgrade();
                PresenceEntry {
                    presence: *id,
                    promise: promise.as_ref().map(HandledPromise::id),
                    state: promise.as_ref().map(HandledPromise::state),
                }
            })
            .collect();
        RegistrySnapshot {
            vat: vat.to_string(),
            presences,
        }
    }
}
