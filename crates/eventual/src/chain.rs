use eventual_types::Error;
use std::fmt;
use std::future::IntoFuture;
use std::rc::Rc;

use super::handler::Message;
use super::promise::{HandledPromise, IntoHandled, Settled};
use super::value::Value;
use super::vat::Vat;

/// Whether a chain node is holding back a property access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainState {
    Initial,
    /// A property name was read but not yet sent: the next step decides
    /// whether it is a GET or the method name of a POST.
    Peeking(Rc<str>),
}

/// Lazy builder for eventual sends.
///
/// Looks one step ahead so that `chain.get("m").call(args)` becomes a single
/// method POST, while a trailing `get` only turns into a GET once the chain
/// is forced. Nodes are immutable; every step returns a new one.
#[derive(Clone)]
pub struct Chain {
    vat: Vat,
    parent: Value,
    state: ChainState,
}

impl Chain {
    pub(crate) fn new(vat: Vat, parent: Value) -> Self {
        Self {
            vat,
            parent,
            state: ChainState::Initial,
        }
    }

    fn with(&self, parent: Value, state: ChainState) -> Self {
        Self {
            vat: self.vat.clone(),
            parent,
            state,
        }
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// What the chain builds on: the base, or the result of the last
    /// committed send.
    pub fn parent(&self) -> &Value {
        &self.parent
    }

    fn send(&self, message: Message) -> Value {
        Value::Promise(self.vat.send(&self.parent, message))
    }

    // ── Steps ────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Chain {
        match &self.state {
            ChainState::Initial => {
                self.with(self.parent.clone(), ChainState::Peeking(name.into()))
            }
            ChainState::Peeking(prop) => {
                let parent = self.send(Message::get(Rc::clone(prop)));
                self.with(parent, ChainState::Peeking(name.into()))
            }
        }
    }

    /// Calls with the receiver kept: a peeked name becomes the method.
    pub fn call(&self, args: impl IntoIterator<Item = Value>) -> Chain {
        let message = match &self.state {
            ChainState::Initial => Message::apply(args),
            ChainState::Peeking(prop) => Message::invoke(Rc::clone(prop), args),
        };
        self.with(self.send(message), ChainState::Initial)
    }

    /// Calls without a receiver: a peeked name is fetched first and the
    /// fetched value is called on its own.
    pub fn apply(&self, args: impl IntoIterator<Item = Value>) -> Chain {
        let parent = match &self.state {
            ChainState::Initial => self.send(Message::apply(args)),
            ChainState::Peeking(prop) => {
                let callee = self.vat.send(&self.parent, Message::get(Rc::clone(prop)));
                Value::Promise(callee.apply(args))
            }
        };
        self.with(parent, ChainState::Initial)
    }

    pub fn invoke(&self, name: &str, args: impl IntoIterator<Item = Value>) -> Chain {
        self.get(name).call(args)
    }

    /// Forces the chain, committing a pending GET.
    pub fn then(&self) -> HandledPromise {
        match &self.state {
            ChainState::Initial => self.vat.resolve(self.parent.clone()),
            ChainState::Peeking(prop) => {
                self.vat.send(&self.parent, Message::get(Rc::clone(prop)))
            }
        }
    }

    // ── Read-only surface ────────────────────────────────

    pub fn set(&self, _name: &str, _value: Value) -> bool {
        false
    }

    pub fn delete(&self, _name: &str) -> bool {
        false
    }

    pub fn set_prototype(&self, _prototype: Value) -> bool {
        false
    }

    pub fn prevent_extensions(&self) -> bool {
        false
    }

    pub fn is_extensible(&self) -> bool {
        false
    }

    pub fn keys(&self) -> Vec<&'static str> {
        vec!["then"]
    }

    pub fn has(&self, name: &str) -> bool {
        name == "then"
    }

    pub fn construct(&self, _args: impl IntoIterator<Item = Value>) -> Result<Chain, Error> {
        Err(Error::type_error("eventual chains cannot be constructed"))
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[Eventual Chain]")
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("parent", &self.parent)
            .field("state", &self.state)
            .finish()
    }
}

impl IntoHandled for Chain {
    fn into_handled(self, _vat: &Vat) -> HandledPromise {
        self.then()
    }
}

impl IntoFuture for Chain {
    type Output = Result<Value, Error>;
    type IntoFuture = Settled;

    fn into_future(self) -> Settled {
        self.then().into_future()
    }
}
