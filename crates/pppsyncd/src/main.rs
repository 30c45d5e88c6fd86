//! PPPoE Subscriber Sync Daemon
//!
//! Serves the sync REST API: fetches PPPoE account rosters from access
//! routers over the RouterOS API and converges the customer directory in
//! Redis. With `--fixture-roster` the daemon runs entirely in memory
//! against the deterministic fixture transport, which is the mode the
//! smoke tests use.

use anyhow::Context;
use clap::Parser;
use pppsync_core::{
    AbsentAccountPolicy, CustomerDirectory, FixtureRosterClient, MemoryDirectory, MemoryRegistry,
    Plan, PlanMap, RosterClient, RouterRegistry, SyncConfig, SyncOrchestrator,
};
use pppsyncd::metrics::SyncMetrics;
use pppsyncd::redis_directory::RedisDirectory;
use pppsyncd::redis_registry::RedisRegistry;
use pppsyncd::rest_api::{build_router, AppState};
use pppsyncd::routeros::RouterOsClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(name = "pppsyncd", about = "PPPoE subscriber sync daemon")]
struct Args {
    /// Address to bind the HTTP API on.
    #[arg(long, default_value = "127.0.0.1:3001")]
    bind: String,

    /// Redis connection URL for the directory and registry.
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Per-attempt roster fetch timeout, in seconds.
    #[arg(long, default_value_t = 10)]
    fetch_timeout_secs: u64,

    /// Retries after the first fetch attempt (transient failures only).
    #[arg(long, default_value_t = 2)]
    max_retries: u32,

    /// Backoff between fetch attempts, in milliseconds.
    #[arg(long, default_value_t = 200)]
    retry_backoff_ms: u64,

    /// Policy for directory customers absent from the device roster:
    /// keep, disable or delete.
    #[arg(long, default_value = "keep")]
    absent_policy: String,

    /// JSON file with the service plan list. Device profiles matching a
    /// plan name map onto that plan's id.
    #[arg(long)]
    plans_file: Option<String>,

    /// Run against the in-memory fixture transport and stores instead of
    /// live RouterOS devices and Redis.
    #[arg(long, default_value_t = false)]
    fixture_roster: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let args = Args::parse();
    info!(bind = %args.bind, fixture = args.fixture_roster, "pppsyncd: Starting");

    let absent_policy = AbsentAccountPolicy::parse(&args.absent_policy)
        .with_context(|| format!("invalid absent policy: {}", args.absent_policy))?;

    let plans = load_plans(args.plans_file.as_deref())?;
    let plan_map: PlanMap = plans
        .iter()
        .map(|p| (p.name.clone(), p.id.clone()))
        .collect();
    info!(plans = plans.len(), "pppsyncd: Loaded plan map");

    let config = SyncConfig {
        fetch_timeout: Duration::from_secs(args.fetch_timeout_secs),
        max_retries: args.max_retries,
        retry_backoff: Duration::from_millis(args.retry_backoff_ms),
        absent_policy,
        plan_map,
    };

    let (roster, directory, registry): (
        Arc<dyn RosterClient>,
        Arc<dyn CustomerDirectory>,
        Arc<dyn RouterRegistry>,
    ) = if args.fixture_roster {
        info!("pppsyncd: Fixture mode, using in-memory stores");
        (
            Arc::new(FixtureRosterClient::new()),
            Arc::new(MemoryDirectory::new()),
            Arc::new(MemoryRegistry::new()),
        )
    } else {
        let client = redis::Client::open(args.redis_url.as_str())
            .with_context(|| format!("invalid redis url: {}", args.redis_url))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        info!(url = %args.redis_url, "pppsyncd: Connected to redis");
        (
            Arc::new(RouterOsClient::new()),
            Arc::new(RedisDirectory::new(conn.clone())),
            Arc::new(RedisRegistry::new(conn)),
        )
    };

    let orch = SyncOrchestrator::new(roster, directory, registry, config);
    let metrics = SyncMetrics::new().context("failed to build metrics registry")?;
    let state = AppState {
        orch,
        plans: Arc::new(plans),
        metrics,
    };

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(addr = %args.bind, "pppsyncd: HTTP API listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("pppsyncd: Graceful shutdown complete");
    Ok(())
}

/// Initialize structured logging.
fn init_logging() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set logger")?;
    Ok(())
}

fn load_plans(path: Option<&str>) -> anyhow::Result<Vec<Plan>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("failed to read plans file {path}"))?;
    let plans: Vec<Plan> =
        serde_json::from_str(&raw).with_context(|| format!("invalid plans file {path}"))?;
    Ok(plans)
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_ok() {
        info!("pppsyncd: Received SIGINT/SIGTERM");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["pppsyncd"]);
        assert_eq!(args.bind, "127.0.0.1:3001");
        assert_eq!(args.fetch_timeout_secs, 10);
        assert_eq!(args.max_retries, 2);
        assert_eq!(args.absent_policy, "keep");
        assert!(!args.fixture_roster);
    }

    #[test]
    fn test_missing_plans_file_is_empty() {
        assert!(load_plans(None).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_absent_policy_rejected() {
        assert!(AbsentAccountPolicy::parse("purge").is_none());
    }
}
