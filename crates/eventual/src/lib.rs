//! Eventual sends with promise pipelining.
//!
//! A [`HandledPromise`] accepts property reads, writes, deletes and calls
//! before it settles. Sends issued against an unresolved promise are held by
//! its handler and replayed, in order, once the promise resolves, so a
//! caller can chain sends onto results that do not exist yet. A promise
//! resolved to a *presence* routes every later send through that presence's
//! fulfilled handler, which is where a transport would plug in.
//!
//! [`Chain`] is the ergonomic front end: it peeks one step ahead to tell a
//! method call from a property read.

pub(crate) mod chain;
pub(crate) mod config;
pub(crate) mod handler;
pub(crate) mod promise;
pub(crate) mod registry;
pub(crate) mod turns;
pub(crate) mod value;
pub(crate) mod vat;

pub use self::chain::{Chain, ChainState};
pub use self::config::{MAX_BUFFERED_ENV, VAT_NAME_ENV, VatConfig};
pub use self::handler::{Handler, LocalHandler, Message, Postponer, validate_handler};
pub use self::promise::{HandledPromise, IntoHandled, Resolver, Settled, validate_presence};
pub use self::value::{Function, NativeFn, Object, Value};
pub use self::vat::{Vat, VatBuilder};
pub use eventual_types::*;

#[cfg(test)]
mod tests;
