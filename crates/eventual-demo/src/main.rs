use eventual::VatConfig;
use facet::Facet;
use figue as args;
use std::time::Duration;

mod scenarios;

use scenarios::Settings;

type AnyResult<T> = Result<T, String>;

const LATENCY_ENV: &str = "EVENTUAL_DEMO_LATENCY_MS";
const DEFAULT_LATENCY_MS: u64 = 50;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    #[facet(args::named, default)]
    vat_name: Option<String>,
    #[facet(args::named, default)]
    max_buffered: Option<usize>,
    #[facet(args::named, default)]
    latency_ms: Option<u64>,
    #[facet(args::named, default)]
    no_snapshot: bool,
    #[facet(args::subcommand)]
    command: CommandKind,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum CommandKind {
    LocalPipeline,
    RemotePipeline,
    Failures,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> AnyResult<()> {
    let cli = parse_cli()?;
    let cfg = config_from_cli(&cli);
    tokio::task::LocalSet::new()
        .run_until(dispatch_command(&cfg, cli.command))
        .await
}

fn parse_cli() -> AnyResult<Cli> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("eventual-demo")
                .description("Run eventual-send pipelining scenarios as subcommands")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();

    args::Driver::new(figue_config)
        .run()
        .into_result()
        .map(|v| v.value)
        .map_err(|e| e.to_string())
}

fn config_from_cli(cli: &Cli) -> Settings {
    let mut vat = VatConfig::from_env();
    if let Some(name) = cli.vat_name.as_ref() {
        vat = vat.with_name(name.clone());
    }
    if let Some(limit) = cli.max_buffered {
        vat = vat.with_max_buffered_sends(limit);
    }

    let latency_ms = cli
        .latency_ms
        .or_else(|| {
            std::env::var(LATENCY_ENV)
                .ok()
                .and_then(|v| v.trim().parse().ok())
        })
        .unwrap_or(DEFAULT_LATENCY_MS);

    Settings {
        vat,
        latency: Duration::from_millis(latency_ms),
        print_snapshot: !cli.no_snapshot,
    }
}

async fn dispatch_command(cfg: &Settings, command: CommandKind) -> AnyResult<()> {
    match command {
        CommandKind::LocalPipeline => scenarios::local_pipeline::run(cfg).await,
        CommandKind::RemotePipeline => scenarios::remote_pipeline::run(cfg).await,
        CommandKind::Failures => scenarios::failures::run(cfg).await,
    }
}
