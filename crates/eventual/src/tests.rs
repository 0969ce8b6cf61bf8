use super::*;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

fn block_on<F: Future>(fut: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime builds");
    tokio::task::LocalSet::new().block_on(&rt, fut)
}

fn deferred(vat: &Vat) -> (HandledPromise, Resolver) {
    let mut slot = None;
    let promise = vat.make_handled_default(|resolver| slot = Some(resolver));
    (promise, slot.expect("executor runs synchronously"))
}

fn number(args: &[Value]) -> f64 {
    args.first().and_then(Value::as_number).unwrap_or(0.0)
}

type Log = Rc<RefCell<Vec<String>>>;

/// Fulfilled handler standing in for a remote vat: applies each send to
/// the presence, records it, and hands out objects it returns as new
/// presences so that further sends keep going through it.
#[derive(Clone)]
struct Remote {
    vat: Vat,
    log: Log,
}

impl Remote {
    fn new(vat: &Vat) -> (Rc<dyn Handler>, Log) {
        let log = Log::default();
        let handler: Rc<dyn Handler> = Rc::new(Remote {
            vat: vat.clone(),
            log: Rc::clone(&log),
        });
        (handler, log)
    }

    fn record(&self, message: &Message) {
        self.log.borrow_mut().push(message.to_string());
    }

    fn export(&self, value: Value) -> Value {
        if validate_presence(&value).is_err() {
            return value;
        }
        let handler: Rc<dyn Handler> = Rc::new(self.clone());
        Value::Promise(
            self.vat
                .make_handled_default(|resolver| resolver.resolve_with_handler(value, handler)),
        )
    }
}

impl Handler for Remote {
    fn get(&self, target: &Value, key: &str) -> Result<Value, Error> {
        self.record(&Message::get(key));
        Ok(self.export(target.get_property(key)?))
    }

    fn put(&self, target: &Value, key: &str, value: Value) -> Result<Value, Error> {
        self.record(&Message::put(key, value.clone()));
        target.set_property(key, value)
    }

    fn delete(&self, target: &Value, key: &str) -> Result<Value, Error> {
        self.record(&Message::delete(key));
        target.delete_property(key)
    }

    fn post(&self, target: &Value, method: Option<&str>, args: &[Value]) -> Result<Value, Error> {
        self.record(&Message::Post {
            method: method.map(Rc::from),
            args: args.to_vec(),
        });
        let out = match method {
            None => target.call(args)?,
            Some(method) => target.call_method(method, args)?,
        };
        Ok(self.export(out))
    }
}

struct GetOnly;

impl Handler for GetOnly {
    fn supports(&self, op: Op) -> bool {
        op == Op::Get
    }

    fn get(&self, target: &Value, key: &str) -> Result<Value, Error> {
        target.get_property(key)
    }
}

struct Inert;

impl Handler for Inert {
    fn supports(&self, _op: Op) -> bool {
        false
    }
}

fn server() -> Object {
    Object::new()
        .with(
            "double",
            Function::named("double", |_this, args| Ok(Value::from(2.0 * number(args)))),
        )
        .with(
            "hello",
            Function::named("hello", |_this, args| {
                let greeting = args.first().and_then(Value::as_str).unwrap_or("Hi");
                Ok(Value::from(format!("{greeting}, buddy!")))
            }),
        )
        .with("prop", 123)
        .with(
            "fn",
            Function::named("fn", |_this, args| Ok(Value::from(number(args) + 3.0))),
        )
}

// ── Pipelining ───────────────────────────────────────────

#[test]
fn sends_pipeline_before_settlement() {
    block_on(async {
        let vat = Vat::new();
        let (remote, log) = Remote::new(&vat);
        let (p, resolver) = deferred(&vat);

        let doubled = p.invoke("double", [Value::from(6)]);
        let greeting = vat.chain(p.clone()).invoke("hello", [Value::from("Hello")]);
        assert_eq!(doubled.state(), PromiseState::Pending);

        resolver.resolve_with_handler(server(), remote);
        assert_eq!(doubled.await, Ok(Value::from(12)));
        assert_eq!(greeting.await, Ok(Value::from("Hello, buddy!")));
        assert_eq!(*log.borrow(), vec!["POST double/1", "POST hello/1"]);
    });
}

#[test]
fn sends_pipeline_onto_unsettled_results() {
    block_on(async {
        let vat = Vat::new();
        let (remote, log) = Remote::new(&vat);
        let inner = server();
        let outer = Object::new().with("inner", inner);
        let (p, resolver) = deferred(&vat);

        let result = vat
            .chain(p.clone())
            .get("inner")
            .invoke("double", [Value::from(21)]);
        resolver.resolve_with_handler(outer, remote);

        assert_eq!(result.await, Ok(Value::from(42)));
        assert_eq!(*log.borrow(), vec!["GET inner", "POST double/1"]);
    });
}

#[test]
fn method_call_is_one_post_and_property_read_is_one_get() {
    block_on(async {
        let vat = Vat::new();
        let (remote, log) = Remote::new(&vat);
        let (p, resolver) = deferred(&vat);
        resolver.resolve_with_handler(server(), remote);

        let hello = vat.chain(p.clone()).get("hello").call([]);
        assert_eq!(hello.await, Ok(Value::from("Hi, buddy!")));
        assert_eq!(*log.borrow(), vec!["POST hello/0"]);

        log.borrow_mut().clear();
        let prop = vat.chain(p.clone()).get("prop");
        assert!(log.borrow().is_empty());
        assert_eq!(prop.await, Ok(Value::from(123)));
        assert_eq!(*log.borrow(), vec!["GET prop"]);
    });
}

#[test]
fn anonymous_call_fetches_then_calls() {
    block_on(async {
        let vat = Vat::new();
        let (remote, log) = Remote::new(&vat);
        let (p, resolver) = deferred(&vat);

        let result = vat.chain(p.clone()).get("fn").apply([Value::from(5)]);
        resolver.resolve_with_handler(server(), remote);

        assert_eq!(result.await, Ok(Value::from(8)));
        assert_eq!(*log.borrow(), vec!["GET fn", "POST ()/1"]);
    });
}

#[test]
fn plain_values_are_evaluated_locally() {
    block_on(async {
        let vat = Vat::new();
        let f = Value::from(Function::named("suffix", |_this, args| {
            let s = args.first().and_then(Value::as_str).unwrap_or("");
            Ok(Value::from(format!("{s}123")))
        }));

        let method = vat.chain(f.clone()).get("apply").call([Value::from("foo")]);
        let err = method.await.expect_err("functions have no apply method");
        assert!(err.is_type_error());

        let direct = vat.chain(f).apply([Value::from("foo")]);
        assert_eq!(direct.await, Ok(Value::from("foo123")));

        let prop = vat.chain(server()).get("prop");
        assert_eq!(prop.await, Ok(Value::from(123)));
    });
}

// ── Turn discipline ──────────────────────────────────────

#[test]
fn handlers_never_run_in_the_sending_turn() {
    block_on(async {
        let vat = Vat::new();
        let (remote, log) = Remote::new(&vat);
        let (p, resolver) = deferred(&vat);
        resolver.resolve_with_handler(server(), remote);

        let prop = p.get("prop");
        assert_eq!(prop.state(), PromiseState::Pending);
        assert!(log.borrow().is_empty());
        assert_eq!(prop.await, Ok(Value::from(123)));
        assert_eq!(log.borrow().len(), 1);
    });
}

#[test]
fn buffered_sends_replay_in_issue_order() {
    block_on(async {
        let vat = Vat::new();
        let (remote, log) = Remote::new(&vat);
        let (p, resolver) = deferred(&vat);

        let first = p.put("x", 1);
        let read_one = p.get("x");
        let second = p.put("x", 2);
        let read_two = p.get("x");
        let removed = p.delete("x");
        resolver.resolve_with_handler(Object::new(), remote);

        assert_eq!(first.await, Ok(Value::from(1)));
        assert_eq!(read_one.await, Ok(Value::from(1)));
        assert_eq!(second.await, Ok(Value::from(2)));
        assert_eq!(read_two.await, Ok(Value::from(2)));
        assert_eq!(removed.await, Ok(Value::Bool(true)));
        assert_eq!(
            *log.borrow(),
            vec!["PUT x", "GET x", "PUT x", "GET x", "DELETE x"]
        );
    });
}

#[test]
fn buffered_sends_follow_plain_resolution() {
    block_on(async {
        let vat = Vat::new();
        let (p, resolver) = deferred(&vat);
        let len = p.get("length");
        resolver.resolve("four");
        assert_eq!(len.await, Ok(Value::from(4)));
        assert_eq!(p.binding_kind(), BindingKind::Local);
    });
}

#[test]
fn resolving_to_a_pending_promise_forwards_sends() {
    block_on(async {
        let vat = Vat::new();
        let (remote, log) = Remote::new(&vat);
        let (outer, outer_resolver) = deferred(&vat);
        let (inner, inner_resolver) = deferred(&vat);

        let early = outer.invoke("double", [Value::from(2)]);
        outer_resolver.resolve(inner.clone());
        assert_eq!(outer.binding_kind(), BindingKind::Forward);
        let late = outer.invoke("double", [Value::from(3)]);

        inner_resolver.resolve_with_handler(server(), remote);
        assert_eq!(early.await, Ok(Value::from(4)));
        assert_eq!(late.await, Ok(Value::from(6)));
        assert_eq!(log.borrow().len(), 2);
        assert!(outer.await.expect("outer fulfills").as_object().is_some());
    });
}

// ── Failures ─────────────────────────────────────────────

#[test]
fn rejection_reaches_every_buffered_send() {
    block_on(async {
        let vat = Vat::new();
        let (p, resolver) = deferred(&vat);
        let read = p.get("a");
        let call = read.invoke("m", []);
        resolver.reject(Error::rejected("boom"));

        assert_eq!(read.await, Err(Error::rejected("boom")));
        assert_eq!(call.await, Err(Error::rejected("boom")));
        assert_eq!(p.await, Err(Error::rejected("boom")));
    });
}

#[test]
fn buffer_cap_rejects_only_the_overflowing_send() {
    block_on(async {
        let vat = Vat::builder()
            .config(VatConfig::default().with_max_buffered_sends(2))
            .build();
        let (p, resolver) = deferred(&vat);
        let a = p.get("prop");
        let b = p.get("prop");
        let c = p.get("prop");

        assert_eq!(c.await, Err(Error::BufferFull { limit: 2 }));
        resolver.resolve(server());
        assert_eq!(a.await, Ok(Value::from(123)));
        assert_eq!(b.await, Ok(Value::from(123)));
    });
}

#[test]
fn buffer_cap_leaves_derived_promises_alone() {
    block_on(async {
        let vat = Vat::builder()
            .config(VatConfig::default().with_max_buffered_sends(1))
            .build();
        let (p, resolver) = deferred(&vat);
        let derived = p.then(Ok);

        let held = p.get("prop");
        let over = p.get("prop");
        let reads: Vec<_> = (0..3).map(|_| derived.get("prop")).collect();
        assert_eq!(over.await, Err(Error::BufferFull { limit: 1 }));

        resolver.resolve(server());
        assert_eq!(held.await, Ok(Value::from(123)));
        for read in reads {
            assert_eq!(read.await, Ok(Value::from(123)));
        }
    });
}

#[test]
fn missing_operation_rejects_only_that_send() {
    block_on(async {
        let vat = Vat::new();
        let (p, resolver) = deferred(&vat);
        resolver.resolve_with_handler(server(), Rc::new(GetOnly));

        let call = p.invoke("double", [Value::from(1)]);
        let read = p.get("prop");
        assert_eq!(
            call.await,
            Err(Error::MissingOperation {
                role: HandlerRole::Fulfilled,
                op: Op::Post
            })
        );
        assert_eq!(read.await, Ok(Value::from(123)));
    });
}

#[test]
fn invalid_presences_reject_the_promise() {
    block_on(async {
        let vat = Vat::new();
        let thenable =
            Object::new().with("then", Function::new(|_this, _args| Ok(Value::Undefined)));
        let cases = [
            (Value::Null, PresenceViolation::Null),
            (Value::from(3), PresenceViolation::Primitive),
            (Value::Promise(vat.resolve(1)), PresenceViolation::Thenable),
            (Value::from(thenable), PresenceViolation::Thenable),
        ];
        for (target, violation) in cases {
            let (p, resolver) = deferred(&vat);
            let pending = p.get("x");
            resolver.resolve_with_handler(target, Rc::new(LocalHandler));
            assert_eq!(p.await, Err(Error::InvalidPresence(violation)));
            assert_eq!(pending.await, Err(Error::InvalidPresence(violation)));
        }
    });
}

#[test]
fn invalid_handlers_fail_synchronously() {
    let vat = Vat::new();
    let err = vat
        .make_handled(|_resolver| {}, Some(Rc::new(Inert) as Rc<dyn Handler>))
        .expect_err("handler without operations");
    assert!(matches!(err, Error::InvalidHandler { .. }));
    insta::assert_snapshot!(err, @"invalid handler: handler implements none of GET, PUT, DELETE, POST");
}

#[test]
fn self_resolution_is_a_cycle() {
    block_on(async {
        let vat = Vat::new();
        let (p, resolver) = deferred(&vat);
        let pending = p.get("x");
        resolver.resolve(p.clone());
        assert_eq!(p.await, Err(Error::ResolutionCycle));
        assert_eq!(pending.await, Err(Error::ResolutionCycle));

        let (a, resolve_a) = deferred(&vat);
        let (b, resolve_b) = deferred(&vat);
        resolve_a.resolve(b.clone());
        resolve_b.resolve(a.clone());
        assert_eq!(b.await, Err(Error::ResolutionCycle));
    });
}

#[test]
fn resolvers_settle_once() {
    block_on(async {
        let vat = Vat::new();
        let (p, resolver) = deferred(&vat);
        resolver.resolve(1);
        resolver.clone().resolve(2);
        resolver.reject(Error::rejected("late"));
        assert!(resolver.is_done());
        assert_eq!(p.await, Ok(Value::from(1)));
    });
}

#[test]
fn custom_unfulfilled_handler_sees_the_promise() {
    block_on(async {
        struct Echo;

        impl Handler for Echo {
            fn get(&self, target: &Value, key: &str) -> Result<Value, Error> {
                Ok(Value::from(format!("{target}.{key}")))
            }
        }

        let vat = Vat::new();
        let p = vat
            .make_handled(|_resolver| {}, Some(Rc::new(Echo) as Rc<dyn Handler>))
            .expect("valid handler");
        let id = p.id();
        assert_eq!(p.get("x").await, Ok(Value::from(format!("[{id}].x"))));
    });
}

#[test]
fn catch_recovers_from_rejection() {
    block_on(async {
        let vat = Vat::new();
        let recovered = vat
            .reject(Error::rejected("boom"))
            .catch(|err| Ok(Value::from(err.to_string())));
        assert_eq!(recovered.await, Ok(Value::from("rejected: boom")));

        let mapped = vat.resolve(20).then(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) + 1.0)));
        assert_eq!(mapped.await, Ok(Value::from(21)));
    });
}

// ── Identity ─────────────────────────────────────────────

#[test]
fn first_presence_binding_wins() {
    block_on(async {
        let vat = Vat::new();
        let (first, first_log) = Remote::new(&vat);
        let (second, second_log) = Remote::new(&vat);
        let obj = server();

        let (p1, r1) = deferred(&vat);
        let (p2, r2) = deferred(&vat);
        r1.resolve_with_handler(obj.clone(), first);
        r2.resolve_with_handler(obj.clone(), second);

        assert_eq!(p2.get("prop").await, Ok(Value::from(123)));
        assert_eq!(first_log.borrow().len(), 1);
        assert!(second_log.borrow().is_empty());

        let canonical = vat.resolve(obj.clone());
        assert!(HandledPromise::ptr_eq(&canonical, &p1));
        assert_eq!(vat.anti_resolve(&p2), Some(Value::from(obj)));
    });
}

#[test]
fn into_handled_is_idempotent() {
    block_on(async {
        let vat = Vat::new();
        let p = vat.resolve(5);
        let once = p.clone().into_handled(&vat);
        let twice = once.clone().into_handled(&vat);
        assert!(HandledPromise::ptr_eq(&p, &once));
        assert!(HandledPromise::ptr_eq(&p, &twice));

        let wrapped = Value::Promise(p.clone()).into_handled(&vat);
        assert!(HandledPromise::ptr_eq(&p, &wrapped));

        let forced = vat.chain(p.clone()).into_handled(&vat);
        assert!(HandledPromise::ptr_eq(&p, &forced));
        assert_eq!(forced.await, Ok(Value::from(5)));
    });
}

#[test]
fn anti_resolve_only_knows_presences() {
    block_on(async {
        let vat = Vat::new();
        let obj = Object::new();
        let (p, resolver) = deferred(&vat);
        assert_eq!(vat.anti_resolve(&p), None);
        resolver.resolve_with_handler(obj.clone(), Rc::new(LocalHandler));
        assert_eq!(vat.anti_resolve(&p), Some(Value::from(obj)));
        assert_eq!(vat.anti_resolve(&vat.resolve(1)), None);
    });
}

#[test]
fn anti_resolve_follows_promises_resolved_to_presences() {
    block_on(async {
        let vat = Vat::new();
        let obj = server();
        let (p1, r1) = deferred(&vat);
        let (p2, r2) = deferred(&vat);
        let (p3, r3) = deferred(&vat);
        r1.resolve_with_handler(obj.clone(), Rc::new(LocalHandler));
        r2.resolve(p1.clone());
        r3.resolve(p2.clone());
        assert_eq!(vat.anti_resolve(&p2), None);

        assert_eq!(p3.clone().await, Ok(Value::from(obj.clone())));
        assert_eq!(vat.anti_resolve(&p2), Some(Value::from(obj.clone())));
        assert_eq!(vat.anti_resolve(&p3), Some(Value::from(obj)));
    });
}

#[test]
fn registry_does_not_keep_handlers_or_vats_alive() {
    let (handler, local) = block_on(async {
        let local: Rc<dyn Handler> = Rc::new(LocalHandler);
        let local_weak = Rc::downgrade(&local);
        let vat = Vat::builder().local_handler(local).build();
        let (remote, log) = Remote::new(&vat);
        let handler = Rc::downgrade(&remote);

        let obj = server();
        let id = obj.id();
        {
            let (p, resolver) = deferred(&vat);
            resolver.resolve_with_handler(obj.clone(), remote);
            assert_eq!(p.get("prop").await, Ok(Value::from(123)));
            assert!(vat.registry_snapshot().contains(id));
        }

        // The presence is still held here, but nothing owns its handler.
        assert!(handler.upgrade().is_none());
        assert!(vat.registry_snapshot().presences.is_empty());
        assert_eq!(
            vat.get(&Value::from(obj), "prop").await,
            Ok(Value::from(123))
        );
        assert_eq!(*log.borrow(), vec!["GET prop"]);
        (handler, local_weak)
    });
    assert!(handler.upgrade().is_none());
    assert!(local.upgrade().is_none(), "vat outlived its last handle");
}

#[test]
fn registry_forgets_dropped_presences() {
    block_on(async {
        let vat = Vat::builder()
            .config(VatConfig::default().with_name("registry"))
            .build();
        let kept = Object::new();
        let (kept_promise, kept_resolver) = deferred(&vat);
        kept_resolver.resolve_with_handler(kept.clone(), Rc::new(LocalHandler));

        let dropped_id = {
            let obj = Object::new();
            let id = obj.id();
            let (_p, resolver) = deferred(&vat);
            resolver.resolve_with_handler(obj, Rc::new(LocalHandler));
            assert!(vat.registry_snapshot().contains(id));
            id
        };

        let snapshot = vat.registry_snapshot();
        assert!(!snapshot.contains(dropped_id));
        assert!(snapshot.contains(kept.id()));
        assert_eq!(snapshot.presences.len(), 1);
        assert_eq!(snapshot.presences[0].promise, Some(kept_promise.id()));
        assert_eq!(snapshot.presences[0].state, Some(PromiseState::Fulfilled));

        let json = facet_json::to_string(&snapshot).expect("snapshot serializes");
        assert!(json.contains("\"registry\""));
        assert!(json.contains("\"fulfilled\""));
    });
}
