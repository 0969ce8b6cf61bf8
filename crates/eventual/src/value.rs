use eventual_types::{Error, ObjectId};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::promise::HandledPromise;

/// Native callable: receives the receiver (`Undefined` for a bare call) and
/// the arguments.
pub type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value, Error>;

/// Dynamic value that eventual sends operate on.
///
/// Primitives compare structurally; objects, functions and promises compare
/// by identity.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    Function(Function),
    Promise(HandledPromise),
}

impl Value {
    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            Value::Object(_) | Value::Function(_) | Value::Promise(_)
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Promise(_) => "promise",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(&**s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&HandledPromise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Identity of an object or function; `None` for everything else.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Value::Object(o) => Some(o.id()),
            Value::Function(f) => Some(f.id()),
            _ => None,
        }
    }

    /// True for objects carrying a callable `then`, and for promises.
    pub fn is_thenable(&self) -> bool {
        match self {
            Value::Promise(_) => true,
            Value::Object(o) => matches!(o.get("then"), Some(Value::Function(_))),
            _ => false,
        }
    }

    /// Reads `key` the way a direct property access would.
    pub fn get_property(&self, key: &str) -> Result<Value, Error> {
        match self {
            Value::Undefined | Value::Null => Err(Error::type_error(format!(
                "cannot read properties of {self} (reading '{key}')"
            ))),
            Value::Object(o) => Ok(o.get(key).unwrap_or(Value::Undefined)),
            Value::String(s) if key == "length" => Ok(Value::Number(s.chars().count() as f64)),
            _ => Ok(Value::Undefined),
        }
    }

    pub fn set_property(&self, key: &str, value: Value) -> Result<Value, Error> {
        match self {
            Value::Object(o) => {
                o.set(key, value.clone())?;
                Ok(value)
            }
            other => Err(Error::type_error(format!(
                "cannot set property '{key}' on {}",
                other.type_name()
            ))),
        }
    }

    pub fn delete_property(&self, key: &str) -> Result<Value, Error> {
        match self {
            Value::Undefined | Value::Null => Err(Error::type_error(format!(
                "cannot delete property '{key}' of {self}"
            ))),
            Value::Object(o) => Ok(Value::Bool(o.delete(key))),
            _ => Ok(Value::Bool(true)),
        }
    }

    /// Calls this value as a function with no receiver.
    pub fn call(&self, args: &[Value]) -> Result<Value, Error> {
        match self {
            Value::Function(f) => f.call(&Value::Undefined, args),
            other => Err(Error::type_error(format!(
                "{} is not a function",
                other.type_name()
            ))),
        }
    }

    /// Calls the method named `key` with this value as the receiver.
    pub fn call_method(&self, key: &str, args: &[Value]) -> Result<Value, Error> {
        match self.get_property(key)? {
            Value::Function(f) => f.call(self, args),
            _ => Err(Error::type_error(format!("{key} is not a function"))),
        }
    }

    pub(crate) fn downgrade_presence(&self) -> Option<WeakPresence> {
        match self {
            Value::Object(o) => Some(WeakPresence::Object(Rc::downgrade(&o.0))),
            Value::Function(f) => Some(WeakPresence::Function(Rc::downgrade(&f.0))),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Object::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Function::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => HandledPromise::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// 2^53: past this, integral floats are printed by `f64`'s own formatting.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < MAX_EXACT_INTEGER => {
                write!(f, "{}", *n as i64)
            }
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::Object(o) => write!(f, "[object {}]", o.id()),
            Value::Function(func) => write!(f, "[function {}]", func.name()),
            Value::Promise(p) => write!(f, "[{}]", p.id()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Rc::from(value))
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl From<Function> for Value {
    fn from(value: Function) -> Self {
        Value::Function(value)
    }
}

impl From<HandledPromise> for Value {
    fn from(value: HandledPromise) -> Self {
        Value::Promise(value)
    }
}

// ── Objects ──────────────────────────────────────────────

pub(crate) struct ObjectInner {
    id: ObjectId,
    props: RefCell<BTreeMap<String, Value>>,
    frozen: Cell<bool>,
}

/// Shared, identity-compared property bag.
#[derive(Clone)]
pub struct Object(Rc<ObjectInner>);

impl Object {
    pub fn new() -> Self {
        Self(Rc::new(ObjectInner {
            id: ObjectId::next(),
            props: RefCell::new(BTreeMap::new()),
            frozen: Cell::new(false),
        }))
    }

    /// Builder-style insert, for assembling objects before they are shared.
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.is_frozen() {
            self.0.props.borrow_mut().insert(key.into(), value.into());
        }
        self
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.props.borrow().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) -> Result<(), Error> {
        if self.is_frozen() {
            return Err(Error::type_error(format!(
                "cannot assign to property '{key}' of frozen object"
            )));
        }
        self.0.props.borrow_mut().insert(key.to_string(), value);
        Ok(())
    }

    /// Returns whether the property is gone afterwards.
    pub fn delete(&self, key: &str) -> bool {
        if self.is_frozen() {
            return !self.0.props.borrow().contains_key(key);
        }
        self.0.props.borrow_mut().remove(key);
        true
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.props.borrow().keys().cloned().collect()
    }

    pub fn freeze(self) -> Self {
        self.0.frozen.set(true);
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    pub fn ptr_eq(a: &Object, b: &Object) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

// ── Functions ────────────────────────────────────────────

pub(crate) struct FunctionInner {
    id: ObjectId,
    name: Rc<str>,
    call: Box<NativeFn>,
}

/// Identity-compared native callable.
#[derive(Clone)]
pub struct Function(Rc<FunctionInner>);

impl Function {
    pub fn new(call: impl Fn(&Value, &[Value]) -> Result<Value, Error> + 'static) -> Self {
        Self::named("anonymous", call)
    }

    pub fn named(
        name: impl Into<Rc<str>>,
        call: impl Fn(&Value, &[Value]) -> Result<Value, Error> + 'static,
    ) -> Self {
        Self(Rc::new(FunctionInner {
            id: ObjectId::next(),
            name: name.into(),
            call: Box::new(call),
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value, Error> {
        (self.0.call)(this, args)
    }

    pub fn ptr_eq(a: &Function, b: &Function) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

// ── Weak presence references ─────────────────────────────

/// Non-owning reference to a presence, held by the registry.
#[derive(Clone)]
pub(crate) enum WeakPresence {
    Object(Weak<ObjectInner>),
    Function(Weak<FunctionInner>),
}

impl WeakPresence {
    pub(crate) fn upgrade(&self) -> Option<Value> {
        match self {
            WeakPresence::Object(weak) => weak.upgrade().map(|inner| Value::Object(Object(inner))),
            WeakPresence::Function(weak) => {
                weak.upgrade().map(|inner| Value::Function(Function(inner)))
            }
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        match self {
            WeakPresence::Object(weak) => weak.strong_count() > 0,
            WeakPresence::Function(weak) => weak.strong_count() > 0,
        }
    }
}
