use crate::scenarios::{Settings, deferred};
use eventual::{Function, Object, Value};

fn counter() -> Object {
    Object::new()
        .with("label", "demo.counter")
        .with("count", 0)
        .with(
            "increment",
            Function::named("increment", |this, args| {
                let by = args.first().and_then(Value::as_number).unwrap_or(1.0);
                let count = this.get_property("count")?.as_number().unwrap_or(0.0) + by;
                this.set_property("count", Value::from(count))
            }),
        )
}

pub async fn run(settings: &Settings) -> Result<(), String> {
    let vat = settings.build_vat();
    let (counter_promise, resolver) = deferred(&vat)?;

    let first = counter_promise.invoke("increment", [Value::from(2)]);
    let second = counter_promise.invoke("increment", [Value::from(3)]);
    let label_len = vat.chain(counter_promise.clone()).get("label").get("length");
    println!("queued 3 sends against {counter_promise:?} before it has a value");

    let latency = settings.latency;
    tokio::task::spawn_local(async move {
        tokio::time::sleep(latency).await;
        resolver.resolve(counter());
    });

    let first = first.await.map_err(|e| format!("first increment failed: {e}"))?;
    let second = second
        .await
        .map_err(|e| format!("second increment failed: {e}"))?;
    let label_len = label_len
        .await
        .map_err(|e| format!("label read failed: {e}"))?;
    println!("increments replayed in order: {first} then {second}");
    println!("label has {label_len} characters");

    settings.report(&vat)
}
