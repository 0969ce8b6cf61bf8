use eventual_types::{Error, HandlerRole, Op};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::promise::{HandledPromise, Resolver};
use super::value::Value;
use super::vat::Vat;

/// One eventual send, as it travels through handlers and buffers.
#[derive(Clone, Debug)]
pub enum Message {
    Get { key: Rc<str> },
    Put { key: Rc<str>, value: Value },
    Delete { key: Rc<str> },
    /// `method: None` calls the target itself.
    Post { method: Option<Rc<str>>, args: Vec<Value> },
}

impl Message {
    pub fn get(key: impl Into<Rc<str>>) -> Self {
        Message::Get { key: key.into() }
    }

    pub fn put(key: impl Into<Rc<str>>, value: impl Into<Value>) -> Self {
        Message::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Rc<str>>) -> Self {
        Message::Delete { key: key.into() }
    }

    pub fn invoke(method: impl Into<Rc<str>>, args: impl IntoIterator<Item = Value>) -> Self {
        Message::Post {
            method: Some(method.into()),
            args: args.into_iter().collect(),
        }
    }

    pub fn apply(args: impl IntoIterator<Item = Value>) -> Self {
        Message::Post {
            method: None,
            args: args.into_iter().collect(),
        }
    }

    pub fn op(&self) -> Op {
        match self {
            Message::Get { .. } => Op::Get,
            Message::Put { .. } => Op::Put,
            Message::Delete { .. } => Op::Delete,
            Message::Post { .. } => Op::Post,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Get { key } => write!(f, "GET {key}"),
            Message::Put { key, .. } => write!(f, "PUT {key}"),
            Message::Delete { key } => write!(f, "DELETE {key}"),
            Message::Post {
                method: Some(method),
                args,
            } => write!(f, "POST {method}/{}", args.len()),
            Message::Post { method: None, args } => write!(f, "POST ()/{}", args.len()),
        }
    }
}

/// Interception point for the four eventual operations.
///
/// `target` is the promise itself when the handler is bound to an
/// unresolved promise, and the presence when it is a fulfilled handler.
/// Returning a [`Value::Promise`] makes the send's result follow it.
///
/// Every operation has a default body so a handler can implement a subset;
/// advertise that subset through [`Handler::supports`] and unsupported
/// sends are rejected with [`Error::MissingOperation`] before they reach it.
pub trait Handler {
    fn supports(&self, op: Op) -> bool {
        let _ = op;
        true
    }

    fn get(&self, target: &Value, key: &str) -> Result<Value, Error> {
        let _ = (target, key);
        Err(Error::type_error("handler GET is not a function"))
    }

    fn put(&self, target: &Value, key: &str, value: Value) -> Result<Value, Error> {
        let _ = (target, key, value);
        Err(Error::type_error("handler PUT is not a function"))
    }

    fn delete(&self, target: &Value, key: &str) -> Result<Value, Error> {
        let _ = (target, key);
        Err(Error::type_error("handler DELETE is not a function"))
    }

    fn post(&self, target: &Value, method: Option<&str>, args: &[Value]) -> Result<Value, Error> {
        let _ = (target, method, args);
        Err(Error::type_error("handler POST is not a function"))
    }
}

/// Refuses handlers that cannot intercept anything.
pub fn validate_handler(handler: &dyn Handler) -> Result<(), Error> {
    if Op::ALL.iter().any(|op| handler.supports(*op)) {
        Ok(())
    } else {
        Err(Error::InvalidHandler {
            reason: "handler implements none of GET, PUT, DELETE, POST".to_string(),
        })
    }
}

pub(crate) fn dispatch(
    handler: &dyn Handler,
    role: HandlerRole,
    target: &Value,
    message: Message,
) -> Result<Value, Error> {
    let op = message.op();
    if !handler.supports(op) {
        return Err(Error::MissingOperation { role, op });
    }
    tracing::trace!(%role, %message, %target, "dispatch");
    match message {
        Message::Get { key } => handler.get(target, &key),
        Message::Put { key, value } => handler.put(target, &key, value),
        Message::Delete { key } => handler.delete(target, &key),
        Message::Post { method, args } => handler.post(target, method.as_deref(), &args),
    }
}

// ── Direct local handler ─────────────────────────────────

/// Applies every operation directly to the settled value.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalHandler;

impl Handler for LocalHandler {
    fn get(&self, target: &Value, key: &str) -> Result<Value, Error> {
        target.get_property(key)
    }

    fn put(&self, target: &Value, key: &str, value: Value) -> Result<Value, Error> {
        target.set_property(key, value)
    }

    fn delete(&self, target: &Value, key: &str) -> Result<Value, Error> {
        target.delete_property(key)
    }

    fn post(&self, target: &Value, method: Option<&str>, args: &[Value]) -> Result<Value, Error> {
        match method {
            None => target.call(args),
            Some(method) => target.call_method(method, args),
        }
    }
}

// ── Postponing handler ───────────────────────────────────

struct Postponed {
    subject: Value,
    message: Message,
    resolver: Resolver,
}

enum Interlock {
    Waiting(Vec<Postponed>),
    /// `Some` when the guarded promise resolved to another handled promise.
    Released(Option<HandledPromise>),
}

/// Default unfulfilled handler: holds every send until the guarded promise
/// is resolved or rejected, then replays them in issue order.
pub struct Postponer {
    vat: Vat,
    limit: Option<usize>,
    interlock: RefCell<Interlock>,
}

impl Postponer {
    pub(crate) fn new(vat: Vat) -> Self {
        let limit = vat.config().max_buffered_sends;
        Self {
            vat,
            limit,
            interlock: RefCell::new(Interlock::Waiting(Vec::new())),
        }
    }

    pub fn buffered(&self) -> usize {
        match &*self.interlock.borrow() {
            Interlock::Waiting(buffer) => buffer.len(),
            Interlock::Released(_) => 0,
        }
    }

    fn postpone(&self, subject: &Value, message: Message) -> Result<Value, Error> {
        let mut interlock = self.interlock.borrow_mut();
        match &mut *interlock {
            Interlock::Waiting(buffer) => {
                if let Some(limit) = self.limit
                    && buffer.len() >= limit
                {
                    tracing::warn!(vat = %self.vat.name(), limit, %message, "postponed send buffer full");
                    return Err(Error::BufferFull { limit });
                }
                let (promise, resolver) = self.vat.pending_pair();
                tracing::trace!(vat = %self.vat.name(), %message, result = %promise.id(), "postponing send");
                buffer.push(Postponed {
                    subject: subject.clone(),
                    message,
                    resolver,
                });
                Ok(Value::Promise(promise))
            }
            Interlock::Released(next) => {
                let next = next
                    .clone()
                    .map(Value::Promise)
                    .unwrap_or_else(|| subject.clone());
                drop(interlock);
                Ok(Value::Promise(self.vat.send(&next, message)))
            }
        }
    }

    /// Ends buffering; held sends are replayed against `next` (or against
    /// their original subject) in a later turn.
    pub(crate) fn release(&self, next: Option<HandledPromise>) {
        let previous = self
            .interlock
            .replace(Interlock::Released(next.clone()));
        let Interlock::Waiting(buffered) = previous else {
            return;
        };
        if buffered.is_empty() {
            return;
        }
        tracing::trace!(vat = %self.vat.name(), count = buffered.len(), "releasing postponed sends");
        let vat = self.vat.clone();
        self.vat.queue(move || {
            for postponed in buffered {
                let target = next
                    .clone()
                    .map(Value::Promise)
                    .unwrap_or(postponed.subject);
                let result = vat.send(&target, postponed.message);
                postponed.resolver.resolve(Value::Promise(result));
            }
        });
    }
}

impl Handler for Postponer {
    fn get(&self, target: &Value, key: &str) -> Result<Value, Error> {
        self.postpone(target, Message::get(key))
    }

    fn put(&self, target: &Value, key: &str, value: Value) -> Result<Value, Error> {
        self.postpone(target, Message::put(key, value))
    }

    fn delete(&self, target: &Value, key: &str) -> Result<Value, Error> {
        self.postpone(target, Message::delete(key))
    }

    fn post(&self, target: &Value, method: Option<&str>, args: &[Value]) -> Result<Value, Error> {
        let message = Message::Post {
            method: method.map(Rc::from),
            args: args.to_vec(),
        };
        self.postpone(target, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Function, Object};

    struct NoOps;

    impl Handler for NoOps {
        fn supports(&self, _op: Op) -> bool {
            false
        }
    }

    struct GetOnly;

    impl Handler for GetOnly {
        fn supports(&self, op: Op) -> bool {
            op == Op::Get
        }

        fn get(&self, _target: &Value, key: &str) -> Result<Value, Error> {
            Ok(Value::from(key))
        }
    }

    #[test]
    fn handlers_without_operations_are_invalid() {
        assert!(matches!(
            validate_handler(&NoOps),
            Err(Error::InvalidHandler { .. })
        ));
        assert!(validate_handler(&GetOnly).is_ok());
        assert!(validate_handler(&LocalHandler).is_ok());
    }

    #[test]
    fn dispatch_rejects_unsupported_operations() {
        let target = Value::from(Object::new());
        let err = dispatch(
            &GetOnly,
            HandlerRole::Fulfilled,
            &target,
            Message::apply([]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::MissingOperation {
                role: HandlerRole::Fulfilled,
                op: Op::Post
            }
        );

        let ok = dispatch(&GetOnly, HandlerRole::Fulfilled, &target, Message::get("k"));
        assert_eq!(ok, Ok(Value::from("k")));
    }

    #[test]
    fn local_handler_performs_structural_operations() {
        let obj = Object::new().with(
            "double",
            Function::new(|_this, args| Ok(Value::from(2.0 * args[0].as_number().unwrap_or(0.0)))),
        );
        let target = Value::from(obj.clone());
        let role = HandlerRole::Forwarding;

        dispatch(&LocalHandler, role, &target, Message::put("x", 5)).expect("put succeeds");
        assert_eq!(obj.get("x"), Some(Value::from(5)));
        assert_eq!(
            dispatch(&LocalHandler, role, &target, Message::get("x")),
            Ok(Value::from(5))
        );
        assert_eq!(
            dispatch(&LocalHandler, role, &target, Message::invoke("double", [Value::from(6)])),
            Ok(Value::from(12))
        );
        assert_eq!(
            dispatch(&LocalHandler, role, &target, Message::delete("x")),
            Ok(Value::Bool(true))
        );
        assert_eq!(obj.get("x"), None);

        let err = dispatch(&LocalHandler, role, &target, Message::apply([])).unwrap_err();
        assert!(err.is_type_error());
    }

    #[test]
    fn message_display_is_compact() {
        insta::assert_snapshot!(
            Message::invoke("hello", [Value::from("Hello")]),
            @"POST hello/1"
        );
        insta::assert_snapshot!(Message::apply([]), @"POST ()/0");
        insta::assert_snapshot!(Message::delete("k"), @"DELETE k");
    }
}
