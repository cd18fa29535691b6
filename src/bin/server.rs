use std::net::SocketAddr;

use clap::Parser;
use overwatch::{
    actors::Monitor,
    api::{ApiConfig, ApiState, spawn_api_server},
    client::{Announcer, RegistryClient},
    config::{Config, read_config_file},
    registry::ServiceRole,
    util::backoff,
};
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: Option<String>,

    /// Address to bind the API to, overrides the config file
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Registry to announce this server in, overrides the config file
    #[arg(short, long)]
    registry: Option<String>,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("overwatch", LevelFilter::DEBUG),
        ("overwatch_server", LevelFilter::TRACE),
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

    let mut config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(registry) = args.registry {
        config.server.registry_url = Some(registry);
    }
    config.validate()?;

    let monitor = Monitor::spawn(&config);
    let addr = spawn_api_server(ApiConfig::from(&config.server), ApiState::new(&monitor)).await?;

    let announcer = config.server.registry_url.as_ref().map(|registry_url| {
        let advertised = config
            .server
            .advertise_address
            .clone()
            .unwrap_or_else(|| addr.to_string());
        info!("announcing {advertised} in registry {registry_url}");
        Announcer::new(
            RegistryClient::new(registry_url),
            &format!("server-{advertised}"),
            &advertised,
            ServiceRole::Server,
            config.server.registration_ttl_secs,
        )
    });

    match announcer {
        Some(mut announcer) => {
            tokio::select! {
                _ = announce(&mut announcer) => {}
                result = tokio::signal::ctrl_c() => result?,
            }
            info!("shutting down");
            announcer.deregister().await;
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
        }
    }

    monitor.shutdown().await;
    Ok(())
}

/// Keep the server registered until the task is dropped.
#[instrument(skip_all)]
async fn announce(announcer: &mut Announcer) {
    let mut failures = 0;

    loop {
        let result = if announcer.is_registered() {
            announcer.renew().await
        } else {
            announcer.ensure_registered().await
        };

        let delay = match result {
            Ok(()) => {
                failures = 0;
                debug!("registration renewed");
                announcer.renew_interval()
            }
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    warn!("registry unreachable: {e}");
                } else {
                    error!("registry unreachable ({failures} attempts): {e}");
                }
                backoff(failures, Duration::from_secs(1), announcer.renew_interval())
            }
        };

        sleep(delay).await;
    }
}
