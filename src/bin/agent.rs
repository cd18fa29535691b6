use std::time::Duration;

use clap::Parser;
use overwatch::{
    api::types::ReportRequest,
    client::{Announcer, ClientError, RegistryClient, ServerClient},
    monitors::system::SystemSampler,
    registry::ServiceRole,
    util::{backoff, get_addr, get_agent_id, get_interval, get_registry_url, get_secret, get_ttl},
};
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at, sleep};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Consecutive failed reports before the server is looked up again
const MAX_REPORT_FAILURES: u32 = 3;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Registry address, defaults to $REGISTRY_URL
    #[arg(short, long)]
    registry: Option<String>,

    /// Push to this server instead of looking one up in the registry
    #[arg(short, long)]
    server: Option<String>,

    /// Agent id, defaults to $AGENT_ID or the host name
    #[arg(short, long)]
    id: Option<String>,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("overwatch", LevelFilter::DEBUG),
        ("overwatch_agent", LevelFilter::TRACE),
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

    let agent_id = args.id.unwrap_or_else(get_agent_id);
    let address = get_addr().unwrap_or_else(|| agent_id.clone());
    let registry_url = args.registry.unwrap_or_else(get_registry_url);
    let report_interval = get_interval();

    info!("agent {agent_id} reporting every {}s", report_interval.as_secs());

    let mut announcer = Announcer::new(
        RegistryClient::new(&registry_url),
        &agent_id,
        &address,
        ServiceRole::Client,
        get_ttl(),
    );

    let mut agent = Agent {
        agent_id,
        address,
        fixed_server: args.server,
        server: None,
        sampler: SystemSampler::new(),
        failures: 0,
    };

    tokio::select! {
        _ = agent.run(&mut announcer, report_interval) => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    info!("shutting down");
    announcer.deregister().await;
    Ok(())
}

struct Agent {
    agent_id: String,
    address: String,
    fixed_server: Option<String>,
    server: Option<ServerClient>,
    sampler: SystemSampler,
    failures: u32,
}

impl Agent {
    #[instrument(skip_all, fields(agent = %self.agent_id))]
    async fn run(&mut self, announcer: &mut Announcer, report_interval: Duration) {
        register(announcer).await;

        let mut reports = interval(report_interval);
        reports.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let renew_every = announcer.renew_interval();
        let mut renewals = interval_at(Instant::now() + renew_every, renew_every);
        renewals.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // the first cpu reading needs a previous refresh to compare against
        sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

        loop {
            tokio::select! {
                _ = reports.tick() => {
                    self.report(announcer.registry()).await;
                }

                _ = renewals.tick() => {
                    if let Err(e) = announcer.renew().await {
                        warn!("failed to renew registration: {e}");
                    }
                }
            }
        }
    }

    async fn report(&mut self, registry: &RegistryClient) {
        let Some(server) = self.server(registry).await else {
            return;
        };

        let sample = self.sampler.sample();
        let report = ReportRequest {
            client_id: self.agent_id.clone(),
            timestamp: Some(chrono::Utc::now()),
            metrics: sample.to_report(),
        };

        match server.submit_report(&report).await {
            Ok(response) => {
                self.failures = 0;
                trace!("{} metrics accepted", response.accepted.len());
                for rejection in response.rejected {
                    warn!("{} rejected: {}", rejection.metric, rejection.error);
                }
            }
            Err(e) => {
                self.failures += 1;
                error!("failed to push report to {}: {e}", server.base_url());
                if self.failures >= MAX_REPORT_FAILURES {
                    warn!("dropping server {} after {} failures", server.base_url(), self.failures);
                    self.server = None;
                    self.failures = 0;
                }
            }
        }
    }

    /// The current server, looked up and registered with on first use.
    async fn server(&mut self, registry: &RegistryClient) -> Option<ServerClient> {
        if let Some(server) = &self.server {
            return Some(server.clone());
        }

        let address = match &self.fixed_server {
            Some(address) => address.clone(),
            None => match registry.lookup(ServiceRole::Server).await {
                Ok(servers) => {
                    let Some(address) = servers.into_iter().next() else {
                        warn!("no server registered yet");
                        return None;
                    };
                    address
                }
                Err(e) => {
                    warn!("server lookup failed: {e}");
                    return None;
                }
            },
        };

        let server = ServerClient::new(&address, get_secret());
        if let Err(e) = server
            .register_client(&self.agent_id, Some(self.address.clone()))
            .await
        {
            warn!("failed to register with server {address}: {e}");
            return None;
        }

        info!("reporting to server {address}");
        self.server = Some(server.clone());
        Some(server)
    }
}

/// Register with the registry, retrying with backoff until it succeeds.
async fn register(announcer: &mut Announcer) {
    let mut attempt = 0;
    loop {
        match announcer.ensure_registered().await {
            Ok(()) => {
                debug!("registered in registry");
                return;
            }
            Err(ClientError::Status(status, body)) if status.is_client_error() => {
                error!("registry refused registration ({status}): {body}");
            }
            Err(e) => {
                warn!("registration failed: {e}");
            }
        }

        sleep(backoff(attempt, Duration::from_secs(1), MAX_BACKOFF)).await;
        attempt += 1;
    }
}
