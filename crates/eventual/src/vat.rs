use eventual_types::{Error, HandlerRole, RegistrySnapshot};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use super::chain::Chain;
use super::config::VatConfig;
use super::handler::{Handler, LocalHandler, Message, Postponer, dispatch, validate_handler};
use super::promise::{Binding, HandledPromise, Resolver};
use super::registry::PresenceRegistry;
use super::turns::TurnQueue;
use super::value::Value;

struct VatInner {
    config: VatConfig,
    queue: Rc<TurnQueue>,
    registry: RefCell<PresenceRegistry>,
    local: Rc<dyn Handler>,
}

/// One independent instance of the eventual-send protocol: a turn queue,
/// a presence registry and the handler that forwards sends to plain values.
///
/// A vat is single-threaded. Every send, settlement and replay is queued on
/// its turn queue, which is pumped with `tokio::task::spawn_local`, so a
/// vat must be used from inside a tokio `LocalSet`.
#[derive(Clone)]
pub struct Vat {
    inner: Rc<VatInner>,
}

impl Default for Vat {
    fn default() -> Self {
        Self::new()
    }
}

impl Vat {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn from_env() -> Self {
        Self::builder().config(VatConfig::from_env()).build()
    }

    pub fn builder() -> VatBuilder {
        VatBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &VatConfig {
        &self.inner.config
    }

    // ── Construction ─────────────────────────────────────

    /// Creates a handled promise and runs `executor` synchronously with its
    /// resolver. `unfulfilled` intercepts sends until the promise resolves;
    /// `None` installs the default postponing handler.
    pub fn make_handled(
        &self,
        executor: impl FnOnce(Resolver),
        unfulfilled: Option<Rc<dyn Handler>>,
    ) -> Result<HandledPromise, Error> {
        let resolver = match unfulfilled {
            Some(handler) => {
                validate_handler(&*handler)?;
                let promise = HandledPromise::new(self.clone(), Binding::Pending(handler));
                Resolver::new(promise, None)
            }
            None => self.postponed_resolver(),
        };
        let promise = resolver.promise().clone();
        tracing::debug!(vat = %self.name(), promise = %promise.id(), "created handled promise");
        executor(resolver);
        Ok(promise)
    }

    /// [`Vat::make_handled`] with the default postponing handler, which
    /// cannot fail validation.
    pub fn make_handled_default(&self, executor: impl FnOnce(Resolver)) -> HandledPromise {
        let resolver = self.postponed_resolver();
        let promise = resolver.promise().clone();
        executor(resolver);
        promise
    }

    /// A promise for `value`. Promises come back unchanged; a registered
    /// presence comes back as its canonical promise while that is alive.
    pub fn resolve(&self, value: impl Into<Value>) -> HandledPromise {
        let value = value.into();
        if let Value::Promise(promise) = value {
            return promise;
        }
        let canonical = self.inner.registry.borrow_mut().promise_for(&value);
        if let Some(canonical) = canonical {
            return canonical;
        }
        let binding = match self.fulfilled_handler(&value) {
            Some(handler) => Binding::Presence {
                presence: value.clone(),
                handler,
            },
            None => Binding::Local,
        };
        let promise = HandledPromise::new(self.clone(), binding);
        promise.settle(Ok(value));
        promise
    }

    pub fn reject(&self, error: Error) -> HandledPromise {
        let promise = HandledPromise::new(self.clone(), Binding::Local);
        promise.settle(Err(error));
        promise
    }

    /// The presence `promise` settled to, if any. A promise resolved to
    /// another promise reports that promise's presence once it has settled.
    pub fn anti_resolve(&self, promise: &HandledPromise) -> Option<Value> {
        if !promise.is_settled() {
            return None;
        }
        promise.presence()
    }

    /// Adapts an arbitrary future into a handled promise. The future is
    /// spawned on the current `LocalSet`.
    pub fn wrap_future<F>(&self, fut: F) -> HandledPromise
    where
        F: Future<Output = Result<Value, Error>> + 'static,
    {
        let resolver = self.postponed_resolver();
        let promise = resolver.promise().clone();
        tokio::task::spawn_local(async move {
            match fut.await {
                Ok(value) => resolver.resolve(value),
                Err(err) => resolver.reject(err),
            }
        });
        promise
    }

    // ── Eventual sends on raw targets ────────────────────

    pub fn send(&self, target: &Value, message: Message) -> HandledPromise {
        self.resolve(target.clone()).send(message)
    }

    pub fn get(&self, target: &Value, key: &str) -> HandledPromise {
        self.send(target, Message::get(key))
    }

    pub fn put(&self, target: &Value, key: &str, value: impl Into<Value>) -> HandledPromise {
        self.send(target, Message::put(key, value))
    }

    pub fn delete(&self, target: &Value, key: &str) -> HandledPromise {
        self.send(target, Message::delete(key))
    }

    pub fn post(
        &self,
        target: &Value,
        method: Option<&str>,
        args: impl IntoIterator<Item = Value>,
    ) -> HandledPromise {
        self.resolve(target.clone()).post(method, args)
    }

    pub fn chain(&self, base: impl Into<Value>) -> Chain {
        Chain::new(self.clone(), base.into())
    }

    pub fn registry_snapshot(&self) -> RegistrySnapshot {
        self.inner.registry.borrow_mut().snapshot(self.name())
    }

    // ── Crate internals ──────────────────────────────────

    pub(crate) fn queue(&self, job: impl FnOnce() + 'static) {
        self.inner.queue.enqueue(Box::new(job));
    }

    fn postponed_resolver(&self) -> Resolver {
        let postponer = Rc::new(Postponer::new(self.clone()));
        let handler: Rc<dyn Handler> = postponer.clone();
        let promise = HandledPromise::new(self.clone(), Binding::Pending(handler));
        Resolver::new(promise, Some(postponer))
    }

    /// An unresolved promise with the default postponing handler, used for
    /// the result of every send so that results can be pipelined on too.
    pub(crate) fn pending_pair(&self) -> (HandledPromise, Resolver) {
        let resolver = self.postponed_resolver();
        (resolver.promise().clone(), resolver)
    }

    pub(crate) fn fulfilled_handler(&self, presence: &Value) -> Option<Rc<dyn Handler>> {
        self.inner.registry.borrow_mut().handler_for(presence)
    }

    pub(crate) fn register_presence(
        &self,
        presence: &Value,
        handler: &Rc<dyn Handler>,
        promise: &HandledPromise,
    ) -> bool {
        self.inner
            .registry
            .borrow_mut()
            .register(presence, handler, promise)
    }

    /// Applies `message` to a settled value: through its presence handler
    /// when it has one, otherwise through the local forwarding handler.
    pub(crate) fn forward(&self, target: &Value, message: Message) -> Result<Value, Error> {
        match self.fulfilled_handler(target) {
            Some(handler) => dispatch(&*handler, HandlerRole::Fulfilled, target, message),
            None => dispatch(
                &*self.inner.local,
                HandlerRole::Forwarding,
                target,
                message,
            ),
        }
    }

    /// Dispatches `message` to `handler` in a later turn.
    pub(crate) fn dispatch_later(
        &self,
        handler: Rc<dyn Handler>,
        role: HandlerRole,
        target: Value,
        message: Message,
    ) -> HandledPromise {
        let (result, resolver) = self.pending_pair();
        self.queue(move || match dispatch(&*handler, role, &target, message) {
            Ok(value) => resolver.resolve(value),
            Err(err) => resolver.reject(err),
        });
        result
    }
}

impl fmt::Debug for Vat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vat")
            .field("name", &self.name())
            .field("queued", &self.inner.queue.len())
            .finish()
    }
}

/// Configures a [`Vat`] before it starts accepting sends.
pub struct VatBuilder {
    config: VatConfig,
    local: Rc<dyn Handler>,
}

impl Default for VatBuilder {
    fn default() -> Self {
        Self {
            config: VatConfig::default(),
            local: Rc::new(LocalHandler),
        }
    }
}

impl VatBuilder {
    pub fn config(mut self, config: VatConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the handler that applies sends to settled plain values.
    pub fn local_handler(mut self, handler: Rc<dyn Handler>) -> Self {
        self.local = handler;
        self
    }

    pub fn build(self) -> Vat {
        let queue = TurnQueue::new(Rc::from(self.config.name.as_str()));
        Vat {
            inner: Rc::new(VatInner {
                config: self.config,
                queue,
                registry: RefCell::new(PresenceRegistry::default()),
                local: self.local,
            }),
        }
    }
}
