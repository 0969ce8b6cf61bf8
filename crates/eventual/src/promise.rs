use eventual_types::{
    BindingKind, Error, HandlerRole, PresenceViolation, PromiseId, PromiseState,
};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use super::handler::{Handler, Message, Postponer, validate_handler};
use super::value::Value;
use super::vat::Vat;

type Reaction = Box<dyn FnOnce(Result<Value, Error>)>;

enum Settlement {
    Pending {
        reactions: Vec<Reaction>,
        wakers: Vec<Waker>,
    },
    Fulfilled(Value),
    Rejected(Error),
}

impl Settlement {
    fn outcome(&self) -> Option<Result<Value, Error>> {
        match self {
            Settlement::Pending { .. } => None,
            Settlement::Fulfilled(value) => Some(Ok(value.clone())),
            Settlement::Rejected(err) => Some(Err(err.clone())),
        }
    }
}

/// Where sends to a promise go right now.
#[derive(Clone)]
pub(crate) enum Binding {
    /// Unresolved: the unfulfilled handler intercepts, with the promise as target.
    Pending(Rc<dyn Handler>),
    /// Resolved to another handled promise: sends are re-issued there.
    Forward(HandledPromise),
    /// Settled to a registered presence. The binding owns the handler; the
    /// registry only refers to it.
    Presence {
        presence: Value,
        handler: Rc<dyn Handler>,
    },
    /// Settled (or settling) to a plain value or a rejection.
    Local,
}

impl Binding {
    fn kind(&self) -> BindingKind {
        match self {
            Binding::Pending(_) => BindingKind::Pending,
            Binding::Forward(_) => BindingKind::Forward,
            Binding::Presence { .. } => BindingKind::Presence,
            Binding::Local => BindingKind::Local,
        }
    }
}

struct Shared {
    id: PromiseId,
    vat: Vat,
    settlement: RefCell<Settlement>,
    binding: RefCell<Binding>,
}

/// A promise that accepts eventual sends before it settles.
///
/// Cloning is cheap and yields the same promise; identity is preserved
/// through [`HandledPromise::ptr_eq`] and [`HandledPromise::id`].
#[derive(Clone)]
pub struct HandledPromise {
    shared: Rc<Shared>,
}

impl HandledPromise {
    pub(crate) fn new(vat: Vat, binding: Binding) -> Self {
        Self {
            shared: Rc::new(Shared {
                id: PromiseId::next(),
                vat,
                settlement: RefCell::new(Settlement::Pending {
                    reactions: Vec::new(),
                    wakers: Vec::new(),
                }),
                binding: RefCell::new(binding),
            }),
        }
    }

    pub fn id(&self) -> PromiseId {
        self.shared.id
    }

    pub fn vat(&self) -> &Vat {
        &self.shared.vat
    }

    pub fn state(&self) -> PromiseState {
        match &*self.shared.settlement.borrow() {
            Settlement::Pending { .. } => PromiseState::Pending,
            Settlement::Fulfilled(_) => PromiseState::Fulfilled,
            Settlement::Rejected(_) => PromiseState::Rejected,
        }
    }

    pub fn binding_kind(&self) -> BindingKind {
        self.shared.binding.borrow().kind()
    }

    pub fn is_settled(&self) -> bool {
        self.state() != PromiseState::Pending
    }

    /// The settled outcome, without waiting.
    pub fn outcome(&self) -> Option<Result<Value, Error>> {
        self.shared.settlement.borrow().outcome()
    }

    pub fn ptr_eq(a: &HandledPromise, b: &HandledPromise) -> bool {
        Rc::ptr_eq(&a.shared, &b.shared)
    }

    pub(crate) fn downgrade(&self) -> WeakPromise {
        WeakPromise(Rc::downgrade(&self.shared))
    }

    /// The presence sends to this promise end up at, following forwarding
    /// links.
    pub(crate) fn presence(&self) -> Option<Value> {
        let mut current = self.clone();
        loop {
            let next = match &*current.shared.binding.borrow() {
                Binding::Presence { presence, .. } => return Some(presence.clone()),
                Binding::Forward(next) => next.clone(),
                _ => return None,
            };
            current = next;
        }
    }

    /// True when sends to `self` would end up at `other`, following
    /// forwarding links.
    pub(crate) fn forwards_to(&self, other: &HandledPromise) -> bool {
        let mut current = self.clone();
        loop {
            if Self::ptr_eq(&current, other) {
                return true;
            }
            let next = match &*current.shared.binding.borrow() {
                Binding::Forward(next) => next.clone(),
                _ => return false,
            };
            current = next;
        }
    }

    pub(crate) fn set_binding(&self, binding: Binding) {
        tracing::debug!(
            vat = %self.vat().name(),
            promise = %self.id(),
            binding = ?binding.kind(),
            "rebinding"
        );
        *self.shared.binding.borrow_mut() = binding;
    }

    // ── Settlement ───────────────────────────────────────

    /// Settles once; later calls return `false` and change nothing.
    pub(crate) fn settle(&self, outcome: Result<Value, Error>) -> bool {
        let (reactions, wakers) = {
            let mut settlement = self.shared.settlement.borrow_mut();
            let Settlement::Pending { reactions, wakers } = &mut *settlement else {
                return false;
            };
            let reactions = std::mem::take(reactions);
            let wakers = std::mem::take(wakers);
            *settlement = match &outcome {
                Ok(value) => Settlement::Fulfilled(value.clone()),
                Err(err) => Settlement::Rejected(err.clone()),
            };
            (reactions, wakers)
        };

        match &outcome {
            Ok(value) => {
                tracing::debug!(vat = %self.vat().name(), promise = %self.id(), %value, "fulfilled")
            }
            Err(err) => {
                tracing::debug!(vat = %self.vat().name(), promise = %self.id(), %err, "rejected")
            }
        }

        for reaction in reactions {
            let outcome = outcome.clone();
            self.vat().queue(move || reaction(outcome));
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Fulfills with `value`, or follows it when it is itself a promise.
    pub(crate) fn adopt(&self, value: Value) {
        match value {
            Value::Promise(other) if Self::ptr_eq(self, &other) => {
                self.settle(Err(Error::ResolutionCycle));
            }
            Value::Promise(other) => {
                let this = self.clone();
                other.subscribe(move |outcome| match outcome {
                    Ok(value) => this.adopt(value),
                    Err(err) => {
                        this.settle(Err(err));
                    }
                });
            }
            value => {
                self.settle(Ok(value));
            }
        }
    }

    /// Runs `reaction` in a later turn, once this promise has settled.
    pub(crate) fn subscribe(&self, reaction: impl FnOnce(Result<Value, Error>) + 'static) {
        if let Some(outcome) = self.outcome() {
            self.vat().queue(move || reaction(outcome));
            return;
        }
        if let Settlement::Pending { reactions, .. } = &mut *self.shared.settlement.borrow_mut() {
            reactions.push(Box::new(reaction));
        }
    }

    /// Derives a plain promise from this one's fulfillment.
    pub fn then(
        &self,
        on_fulfilled: impl FnOnce(Value) -> Result<Value, Error> + 'static,
    ) -> HandledPromise {
        let derived = HandledPromise::new(self.vat().clone(), Binding::Local);
        let target = derived.clone();
        self.subscribe(move |outcome| match outcome.and_then(on_fulfilled) {
            Ok(value) => target.adopt(value),
            Err(err) => {
                target.settle(Err(err));
            }
        });
        derived
    }

    /// Derives a plain promise that can recover from this one's rejection.
    pub fn catch(
        &self,
        on_rejected: impl FnOnce(Error) -> Result<Value, Error> + 'static,
    ) -> HandledPromise {
        let derived = HandledPromise::new(self.vat().clone(), Binding::Local);
        let target = derived.clone();
        self.subscribe(move |outcome| match outcome.or_else(on_rejected) {
            Ok(value) => target.adopt(value),
            Err(err) => {
                target.settle(Err(err));
            }
        });
        derived
    }

    // ── Eventual sends ───────────────────────────────────

    /// Routes `message` through whatever this promise is currently bound to.
    /// The returned promise never settles within the calling turn.
    pub fn send(&self, message: Message) -> HandledPromise {
        let binding = self.shared.binding.borrow().clone();
        let vat = self.vat();
        match binding {
            Binding::Pending(handler) => vat.dispatch_later(
                handler,
                HandlerRole::Unfulfilled,
                Value::Promise(self.clone()),
                message,
            ),
            Binding::Presence { presence, handler } => {
                vat.dispatch_later(handler, HandlerRole::Fulfilled, presence, message)
            }
            Binding::Forward(next) => next.send(message),
            Binding::Local => self.forward_when_settled(message),
        }
    }

    fn forward_when_settled(&self, message: Message) -> HandledPromise {
        let vat = self.vat().clone();
        self.then(move |value| vat.forward(&value, message))
    }

    pub fn get(&self, key: &str) -> HandledPromise {
        self.send(Message::get(key))
    }

    pub fn put(&self, key: &str, value: impl Into<Value>) -> HandledPromise {
        self.send(Message::put(key, value))
    }

    pub fn delete(&self, key: &str) -> HandledPromise {
        self.send(Message::delete(key))
    }

    /// `method: None` calls the eventual target itself.
    pub fn post(
        &self,
        method: Option<&str>,
        args: impl IntoIterator<Item = Value>,
    ) -> HandledPromise {
        self.send(Message::Post {
            method: method.map(Rc::from),
            args: args.into_iter().collect(),
        })
    }

    pub fn invoke(&self, method: &str, args: impl IntoIterator<Item = Value>) -> HandledPromise {
        self.send(Message::invoke(method, args))
    }

    pub fn apply(&self, args: impl IntoIterator<Item = Value>) -> HandledPromise {
        self.send(Message::apply(args))
    }
}

impl fmt::Debug for HandledPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandledPromise")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("binding", &self.binding_kind())
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakPromise(Weak<Shared>);

impl WeakPromise {
    pub(crate) fn upgrade(&self) -> Option<HandledPromise> {
        self.0.upgrade().map(|shared| HandledPromise { shared })
    }
}

// ── Awaiting ─────────────────────────────────────────────

/// Future returned by awaiting a [`HandledPromise`].
pub struct Settled {
    promise: HandledPromise,
}

impl Future for Settled {
    type Output = Result<Value, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut settlement = self.promise.shared.settlement.borrow_mut();
        if let Settlement::Pending { wakers, .. } = &mut *settlement {
            if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                wakers.push(cx.waker().clone());
            }
            return Poll::Pending;
        }
        match settlement.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl IntoFuture for HandledPromise {
    type Output = Result<Value, Error>;
    type IntoFuture = Settled;

    fn into_future(self) -> Settled {
        Settled { promise: self }
    }
}

impl IntoFuture for &HandledPromise {
    type Output = Result<Value, Error>;
    type IntoFuture = Settled;

    fn into_future(self) -> Settled {
        Settled {
            promise: self.clone(),
        }
    }
}

// ── Resolution ───────────────────────────────────────────

/// Refuses values that cannot stand for a settled remote identity.
pub fn validate_presence(value: &Value) -> Result<(), Error> {
    match value {
        Value::Null => Err(Error::InvalidPresence(PresenceViolation::Null)),
        value if value.is_thenable() => Err(Error::InvalidPresence(PresenceViolation::Thenable)),
        Value::Object(_) | Value::Function(_) => Ok(()),
        _ => Err(Error::InvalidPresence(PresenceViolation::Primitive)),
    }
}

/// Settles one handled promise. Handed to the executor of
/// [`Vat::make_handled`]; clones share the settle-once flag.
#[derive(Clone)]
pub struct Resolver {
    promise: HandledPromise,
    postponer: Option<Rc<Postponer>>,
    done: Rc<Cell<bool>>,
}

impl Resolver {
    pub(crate) fn new(promise: HandledPromise, postponer: Option<Rc<Postponer>>) -> Self {
        Self {
            promise,
            postponer,
            done: Rc::new(Cell::new(false)),
        }
    }

    pub fn promise(&self) -> &HandledPromise {
        &self.promise
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }

    /// Resolves to a plain value, a presence someone else registered, or
    /// another promise (which is then followed).
    pub fn resolve(&self, target: impl Into<Value>) {
        if self.done.replace(true) {
            return;
        }
        self.resolve_unhandled(target.into());
    }

    /// Resolves to `target` as a presence intercepted by `handler`.
    pub fn resolve_with_handler(&self, target: impl Into<Value>, handler: Rc<dyn Handler>) {
        if self.done.replace(true) {
            return;
        }
        let target = target.into();
        if let Err(err) = self.install_presence(&target, handler) {
            self.promise.set_binding(Binding::Local);
            self.promise.settle(Err(err));
        }
        self.continue_forwarding(None);
    }

    pub fn reject(&self, error: Error) {
        if self.done.replace(true) {
            return;
        }
        self.promise.set_binding(Binding::Local);
        self.promise.settle(Err(error));
        self.continue_forwarding(None);
    }

    fn resolve_unhandled(&self, target: Value) {
        let promise = &self.promise;
        if let Value::Promise(next) = &target
            && next.forwards_to(promise)
        {
            promise.set_binding(Binding::Local);
            promise.settle(Err(Error::ResolutionCycle));
            self.continue_forwarding(None);
            return;
        }

        promise.adopt(target.clone());
        if let Value::Promise(next) = &target
            && next.binding_kind() != BindingKind::Local
        {
            promise.set_binding(Binding::Forward(next.clone()));
            self.continue_forwarding(Some(next.clone()));
            return;
        }

        // Sends keep buffering until the awaited value is known.
        let resolver = self.clone();
        promise.vat().resolve(target).subscribe(move |outcome| {
            let promise = &resolver.promise;
            let binding = match outcome {
                Ok(value) => match promise.vat().fulfilled_handler(&value) {
                    Some(handler) => Binding::Presence {
                        presence: value,
                        handler,
                    },
                    None => Binding::Local,
                },
                Err(_) => Binding::Local,
            };
            promise.set_binding(binding);
            resolver.continue_forwarding(None);
        });
    }

    fn install_presence(&self, target: &Value, handler: Rc<dyn Handler>) -> Result<(), Error> {
        validate_handler(&*handler)?;
        validate_presence(target)?;

        let promise = &self.promise;
        let vat = promise.vat();
        if vat.register_presence(target, &handler, promise) {
            tracing::debug!(vat = %vat.name(), promise = %promise.id(), presence = %target, "registered presence");
        } else {
            tracing::debug!(vat = %vat.name(), promise = %promise.id(), presence = %target, "presence already bound, reusing");
        }
        // The first live registration decides who serves the presence.
        let handler = vat.fulfilled_handler(target).unwrap_or(handler);
        promise.set_binding(Binding::Presence {
            presence: target.clone(),
            handler,
        });
        promise.settle(Ok(target.clone()));
        Ok(())
    }

    fn continue_forwarding(&self, next: Option<HandledPromise>) {
        if let Some(postponer) = &self.postponer {
            postponer.release(next);
        }
    }
}

/// Turns something promise-like into a handled promise of a given vat.
///
/// Converting a value that already is a handled promise returns it
/// unchanged, so the conversion can be applied any number of times.
pub trait IntoHandled {
    fn into_handled(self, vat: &Vat) -> HandledPromise;
}

impl IntoHandled for HandledPromise {
    fn into_handled(self, _vat: &Vat) -> HandledPromise {
        self
    }
}

impl IntoHandled for Value {
    fn into_handled(self, vat: &Vat) -> HandledPromise {
        vat.resolve(self)
    }
}
