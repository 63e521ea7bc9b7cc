//! routemgrd entry point.

use anyhow::Context;
use clap::Parser;
use hybridnet_daemon_common::{
    run_reconcile_loop, trigger_channel, HostNetwork, ShellHost, Trigger, TriggerReceiver,
};
use hybridnet_routemgrd::{
    watch_snapshot_file, ReconcilerSettings, RouteManager, RouteMgrConfig, RouteStatusHandle,
    SnapshotStore, SubnetReconciler, DEFAULT_CONFIG_PATH,
};
use hybridnet_types::{ClusterSnapshot, IpFamily};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// hybridnet node route manager
#[derive(Parser, Debug)]
#[command(name = "routemgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Name of this node
    #[arg(short = 'n', long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// Cluster snapshot document
    #[arg(short = 's', long)]
    snapshot: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Route remote subnets of peer clusters
    #[arg(long)]
    multicluster: bool,
}

fn load_config(args: &Args) -> anyhow::Result<RouteMgrConfig> {
    let mut config = RouteMgrConfig::load_or_default(&args.config)?;
    if let Some(node_name) = &args.node_name {
        config.node_name = node_name.clone();
    }
    if let Some(snapshot) = &args.snapshot {
        config.snapshot_path = snapshot.clone();
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if args.multicluster {
        config.multicluster_enabled = true;
    }
    config.validate()?;
    Ok(config)
}

/// Logs every firewall resync request with the NAT-enabled overlay subnets.
async fn consume_firewall_triggers(
    mut rx: TriggerReceiver,
    status: (RouteStatusHandle, RouteStatusHandle),
) {
    while rx.wait().await {
        for handle in [&status.0, &status.1] {
            let snapshot = handle.current();
            let nat: Vec<String> = snapshot
                .subnets
                .iter()
                .filter(|s| s.is_overlay && s.auto_nat_outgoing)
                .map(|s| s.cidr.to_string())
                .collect();
            info!(
                family = ?snapshot.family,
                nat_subnets = ?nat,
                remote_subnets = snapshot.remote_subnets.len(),
                "Firewall resync requested"
            );
        }
    }
}

async fn periodic_resync(interval: Duration, trigger: Trigger, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                trigger.fire();
            }
        }
    }
}

async fn run(config: RouteMgrConfig) -> anyhow::Result<()> {
    info!(
        node = %config.node_name,
        vlan_if = %config.node_vlan_if_name,
        vxlan_if = %config.node_vxlan_if_name,
        multicluster = config.multicluster_enabled,
        "Starting routemgrd"
    );

    let initial = match SnapshotStore::load_file(&config.snapshot_path).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "No usable snapshot yet, starting empty");
            ClusterSnapshot::default()
        }
    };
    let store = Arc::new(SnapshotStore::new(initial));
    let host: Arc<dyn HostNetwork> = Arc::new(ShellHost::new());

    let route_v4 = RouteManager::new(IpFamily::V4, config.routing, host.clone());
    let route_v6 = RouteManager::new(IpFamily::V6, config.routing, host.clone());

    let (firewall_trigger, firewall_rx) = trigger_channel();
    let (trigger, trigger_rx) = trigger_channel();
    let shutdown = CancellationToken::new();

    let mut reconciler = SubnetReconciler::new(
        ReconcilerSettings {
            node_name: config.node_name.clone(),
            node_vlan_if_name: config.node_vlan_if_name.clone(),
            node_vxlan_if_name: config.node_vxlan_if_name.clone(),
            multicluster_enabled: config.multicluster_enabled,
        },
        store.clone(),
        host,
        route_v4,
        route_v6,
        firewall_trigger,
    );

    let firewall = tokio::spawn(consume_firewall_triggers(
        firewall_rx,
        reconciler.status_handles(),
    ));
    let watcher = tokio::spawn(watch_snapshot_file(
        store,
        config.snapshot_path.clone(),
        config.watch_interval(),
        trigger.clone(),
        shutdown.clone(),
    ));
    let ticker = config
        .periodic_interval()
        .map(|interval| tokio::spawn(periodic_resync(interval, trigger.clone(), shutdown.clone())));

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_shutdown.cancel();
    });

    trigger.fire();
    let stats = run_reconcile_loop(
        &mut reconciler,
        trigger_rx,
        config.backoff_policy(),
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    drop(reconciler);
    watcher.await.context("snapshot watcher panicked")?;
    if let Some(ticker) = ticker {
        ticker.await.context("resync ticker panicked")?;
    }
    firewall.await.context("firewall trigger consumer panicked")?;

    info!(passes = stats.passes, failures = stats.failures, "routemgrd stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("routemgrd: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("routemgrd failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
