use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use overwatch::{
    api::{RegistryState, spawn_registry_server},
    registry::Registry,
    util::get_registry_port,
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Address to bind to, defaults to 0.0.0.0 on $REGISTRY_PORT
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Ttl given to registrations that do not ask for one
    #[arg(short, long, default_value_t = 30)]
    ttl: u64,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("overwatch", LevelFilter::DEBUG),
        ("overwatch_registry", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
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
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    if args.ttl == 0 {
        anyhow::bail!("ttl must be greater than zero");
    }

    let bind = args
        .bind
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, get_registry_port())));

    let state = RegistryState::new(Arc::new(Registry::new()), args.ttl);
    spawn_registry_server(bind, state).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
