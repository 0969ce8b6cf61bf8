use crate::scenarios::{Settings, SlowRemote, deferred, expect_failure};
use eventual::{Error, Object, Value, Vat};

const DEFAULT_DEMO_CAP: usize = 2;

pub async fn run(settings: &Settings) -> Result<(), String> {
    let vat = settings.build_vat();
    let remote = SlowRemote::new(&vat, settings.latency);

    let (rejected, resolver) = deferred(&vat)?;
    let buffered = rejected.invoke("anything", []);
    resolver.reject(Error::rejected("peer went away"));
    expect_failure("buffered send after rejection", buffered).await?;

    let (primitive, resolver) = deferred(&vat)?;
    resolver.resolve_with_handler(42, remote.clone());
    expect_failure("primitive presence", primitive).await?;

    let (service, resolver) = deferred(&vat)?;
    resolver.resolve_with_handler(Object::new().with("state", "idle"), remote);
    expect_failure("write to a read-only link", service.put("state", "busy")).await?;
    let state = service
        .get("state")
        .await
        .map_err(|e| format!("sibling read failed: {e}"))?;
    println!("sibling read still succeeds: {state}");

    if let Err(err) = vat.chain(service.clone()).construct([]) {
        println!("constructing a chain: {err}");
    }

    buffer_overflow(settings).await?;
    settings.report(&vat)
}

async fn buffer_overflow(settings: &Settings) -> Result<(), String> {
    let limit = settings
        .vat
        .max_buffered_sends
        .unwrap_or(DEFAULT_DEMO_CAP);
    let vat = Vat::builder()
        .config(settings.vat.clone().with_max_buffered_sends(limit))
        .build();

    let (target, resolver) = deferred(&vat)?;
    let accepted: Vec<_> = (0..limit).map(|_| target.get("ready")).collect();
    let overflow = target.get("ready");
    expect_failure("send over the buffer cap", overflow).await?;

    resolver.resolve(Object::new().with("ready", true));
    for pending in accepted {
        pending
            .await
            .map_err(|e| format!("buffered send failed: {e}"))?;
    }
    println!("{limit} buffered sends under the cap were delivered");
    Ok(())
}
