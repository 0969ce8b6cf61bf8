use crate::scenarios::{Settings, SlowRemote, deferred};
use eventual::{Function, Object, Value};
use std::time::Instant;

fn account(owner: String) -> Object {
    Object::new()
        .with("owner", owner)
        .with("balance", 0)
        .with(
            "deposit",
            Function::named("deposit", |this, args| {
                let amount = args.first().and_then(Value::as_number).unwrap_or(0.0);
                let balance = this.get_property("balance")?.as_number().unwrap_or(0.0) + amount;
                this.set_property("balance", Value::from(balance))
            }),
        )
}

fn bank() -> Object {
    Object::new().with("name", "demo.bank").with(
        "open_account",
        Function::named("open_account", |_this, args| {
            let owner = args
                .first()
                .and_then(Value::as_str)
                .unwrap_or("anonymous")
                .to_owned();
            Ok(Value::from(account(owner)))
        }),
    )
}

pub async fn run(settings: &Settings) -> Result<(), String> {
    let vat = settings.build_vat();
    let remote = SlowRemote::new(&vat, settings.latency);
    let started = Instant::now();

    // The bootstrap reference itself only arrives after one round trip.
    let (bootstrap, resolver) = deferred(&vat)?;
    let latency = settings.latency;
    tokio::task::spawn_local(async move {
        tokio::time::sleep(latency).await;
        resolver.resolve_with_handler(bank(), remote);
    });

    let account = vat
        .chain(bootstrap.clone())
        .invoke("open_account", [Value::from("alice")]);
    let deposited = account.invoke("deposit", [Value::from(100)]);
    let owner = account.get("owner");

    let balance = deposited
        .await
        .map_err(|e| format!("deposit failed: {e}"))?;
    let owner = owner.await.map_err(|e| format!("owner read failed: {e}"))?;
    println!("{owner} deposited, balance is now {balance}");
    println!(
        "4 pipelined sends settled in {:?} over a {:?} link",
        started.elapsed(),
        settings.latency
    );

    settings.report(&vat)
}
