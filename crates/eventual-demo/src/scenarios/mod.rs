pub mod failures;
pub mod local_pipeline;
pub mod remote_pipeline;

use eventual::{
    Error, Handler, HandledPromise, Op, Resolver, Value, Vat, VatConfig, validate_presence,
};
use std::future::IntoFuture;
use std::rc::Rc;
use std::time::Duration;

/// Resolved settings shared by every scenario.
pub struct Settings {
    pub vat: VatConfig,
    pub latency: Duration,
    pub print_snapshot: bool,
}

impl Settings {
    pub fn build_vat(&self) -> Vat {
        Vat::builder().config(self.vat.clone()).build()
    }

    /// Prints the registry while the scenario still holds its presences.
    pub fn report(&self, vat: &Vat) -> Result<(), String> {
        if !self.print_snapshot {
            return Ok(());
        }
        let json = facet_json::to_string(&vat.registry_snapshot())
            .map_err(|e| format!("failed to serialize registry snapshot: {e}"))?;
        println!("registry: {json}");
        Ok(())
    }
}

pub fn deferred(vat: &Vat) -> Result<(HandledPromise, Resolver), String> {
    let mut slot = None;
    let promise = vat.make_handled_default(|resolver| slot = Some(resolver));
    let resolver = slot.ok_or_else(|| "executor did not run".to_string())?;
    Ok((promise, resolver))
}

pub async fn expect_failure(
    label: &str,
    pending: impl IntoFuture<Output = Result<Value, Error>>,
) -> Result<(), String> {
    match pending.await {
        Ok(value) => Err(format!("{label}: expected a failure, got {value}")),
        Err(err) => {
            println!("{label}: {err}");
            Ok(())
        }
    }
}

/// Stand-in for a peer across a network link. Every GET and POST takes one
/// simulated round trip; objects it hands back become presences served by
/// the same link. Writes are not offered.
#[derive(Clone)]
pub struct SlowRemote {
    vat: Vat,
    latency: Duration,
}

impl SlowRemote {
    pub fn new(vat: &Vat, latency: Duration) -> Rc<dyn Handler> {
        Rc::new(Self {
            vat: vat.clone(),
            latency,
        })
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

    fn round_trip(
        &self,
        label: String,
        op: impl FnOnce() -> Result<Value, Error> + 'static,
    ) -> Value {
        let this = self.clone();
        Value::Promise(self.vat.wrap_future(async move {
            tokio::time::sleep(this.latency).await;
            tracing::info!(vat = %this.vat.name(), %label, "remote handled");
            Ok(this.export(op()?))
        }))
    }
}

impl Handler for SlowRemote {
    fn supports(&self, op: Op) -> bool {
        matches!(op, Op::Get | Op::Post)
    }

    fn get(&self, target: &Value, key: &str) -> Result<Value, Error> {
        let target = target.clone();
        let key = key.to_owned();
        Ok(self.round_trip(format!("GET {key}"), move || {
            target.get_property(&key)
        }))
    }

    fn post(&self, target: &Value, method: Option<&str>, args: &[Value]) -> Result<Value, Error> {
        let target = target.clone();
        let method = method.map(str::to_owned);
        let args = args.to_vec();
        let label = format!("POST {}", method.as_deref().unwrap_or("()"));
        Ok(self.round_trip(label, move || match method {
            None => target.call(&args),
            Some(method) => target.call_method(&method, &args),
        }))
    }
}
