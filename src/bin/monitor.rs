use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use health_monitor::{
    config::load_config,
    monitors::SysinfoAccessor,
    pipeline::{Pipeline, build_alert_notifier, open_store, resolve_hostname},
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    /// Config file (JSON); defaults apply when omitted
    #[arg(short)]
    file: Option<String>,

    /// Log everything down to TRACE
    #[arg(long)]
    verbose: bool,
}

fn log_filter(verbose: bool) -> filter::Targets {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    // the binary and the library share the `health_monitor` target
    filter::Targets::new().with_target("health_monitor", level)
}

fn init(verbose: bool) {
    let filter = log_filter(verbose);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = load_config(args.file.as_deref()).context("failed to load configuration")?;
    let hostname = resolve_hostname(&config);
    info!(
        "monitoring {hostname} every {}s",
        config.sampling.interval_secs
    );

    let store = open_store(&config.storage).await;
    let notifier = build_alert_notifier(&config, &hostname);

    let accessor = Arc::new(SysinfoAccessor::new());
    let pipeline = Pipeline::start(&config, accessor.clone(), accessor, store, notifier);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");

    pipeline.shutdown().await
}
