//! Daemon entrypoint: one process per node, reading the same CNI config
//! file the plugin is installed with to pick a dataplane strategy and
//! running it until asked to stop.

use clap::Parser;
use ferrocni_core::cni_wire::{CniConfig, DataplaneMode};
use ferrocni_core::Error;
use ferrocni_daemon::{EvpnStrategy, HostGwStrategy, Scheduler, Strategy, VxlanStrategy};
use ferrocni_ipam::Ipam;
use ferrocni_kv::{EtcdKv, KvClient};
use ferrocni_net::{hostenv, Netlink, RtNetlink};
use ferrocni_storage::Storage;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONF_PATH: &str = "/etc/cni/net.d/ferrocni.json";
const VRF_NAME: &str = "vrf-evpn";
const BRIDGE_L3_NAME: &str = "br-evpn-l3";
const VXLAN_NAME: &str = "vxlan-evpn";
const VRF_TABLE: u32 = 100;
const VXLAN_VNI: u32 = 42;
const VXLAN_DST_PORT: u16 = 4789;
const DEFAULT_INTERVAL_SECS: u64 = 5;

#[derive(Parser)]
#[command(name = "ferrocni-daemon")]
#[command(about = "Per-node reconciliation daemon for the ferrocni dataplane")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Tracing filter level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    loglevel: String,

    /// Kubernetes API server URL, overriding the inferred kubeconfig/in-cluster config
    #[arg(long)]
    apiserver: Option<String>,

    /// Skip TLS verification when talking to the API server
    #[arg(long)]
    insecure: bool,

    /// Reconciliation tick interval, in seconds
    #[arg(long, default_value_t = DEFAULT_INTERVAL_SECS)]
    interval: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.loglevel))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&cli).await {
        tracing::error!(error = %e, "ferrocni-daemon exited with an error");
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> ferrocni_core::Result<()> {
    let conf = read_conf()?;
    conf.validate()?;

    let netlink: Arc<dyn Netlink> = Arc::new(RtNetlink::new());
    let host = hostenv::discover(netlink.as_ref()).await?;

    let endpoints = etcd_endpoints(conf.ssl);
    let kv: Arc<dyn KvClient> = Arc::new(EtcdKv::connect(&endpoints, None).await?);
    let ipam = Ipam::new(kv.clone());
    let storage = Storage::new(kv);
    let cluster: Arc<dyn ferrocni_cluster::ClusterView> = Arc::new(kube_cluster_view(cli).await?);

    let strategy: Arc<dyn Strategy> = match conf.ipam.mode {
        DataplaneMode::HostGw => Arc::new(HostGwStrategy::new(netlink, cluster, ipam)),
        DataplaneMode::Vxlan => Arc::new(VxlanStrategy::new(netlink, cluster, storage, VXLAN_NAME)),
        DataplaneMode::Evpn => Arc::new(EvpnStrategy::new(
            netlink,
            VRF_NAME,
            VRF_TABLE,
            BRIDGE_L3_NAME,
            &conf.bridge,
            VXLAN_NAME,
            VXLAN_VNI,
            &host.underlay_dev,
            host.underlay_addr,
            VXLAN_DST_PORT,
        )),
    };

    let mut scheduler =
        Scheduler::new(strategy, host.node_name.clone()).with_interval(Duration::from_secs(cli.interval));
    scheduler.start().await?;
    tracing::info!(node = %host.node_name, mode = %conf.ipam.mode, "ferrocni-daemon started");

    wait_for_shutdown_signal().await;

    tracing::info!("shutting down");
    scheduler.stop().await
}

/// Builds the Kubernetes client from `--apiserver`/`--insecure` when given,
/// falling back to the usual kubeconfig/in-cluster inference otherwise.
async fn kube_cluster_view(cli: &Cli) -> ferrocni_core::Result<ferrocni_cluster::KubeClusterView> {
    if cli.apiserver.is_none() && !cli.insecure {
        return ferrocni_cluster::KubeClusterView::new()
            .await
            .map_err(|e| Error::Network(format!("connect to Kubernetes API: {e}")));
    }

    let mut config = kube::Config::infer()
        .await
        .map_err(|e| Error::Network(format!("infer Kubernetes config: {e}")))?;
    if let Some(apiserver) = &cli.apiserver {
        config.cluster_url = apiserver
            .parse()
            .map_err(|e| Error::Network(format!("invalid --apiserver {apiserver}: {e}")))?;
    }
    if cli.insecure {
        config.accept_invalid_certs = true;
    }

    let client = kube::Client::try_from(config)
        .map_err(|e| Error::Network(format!("create kube client: {e}")))?;
    Ok(ferrocni_cluster::KubeClusterView::from_client(client))
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

fn read_conf() -> ferrocni_core::Result<CniConfig> {
    let path = std::env::var("FERROCNI_CNI_CONF").unwrap_or_else(|_| DEFAULT_CONF_PATH.to_string());
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("{path}: {e}"))))?;
    serde_json::from_str(&raw).map_err(Error::Serialization)
}

/// Etcd is assumed colocated with the Kubernetes API server on the
/// standard client port, unless overridden explicitly.
fn etcd_endpoints(ssl: bool) -> Vec<String> {
    if let Ok(raw) = std::env::var("FERROCNI_ETCD_ENDPOINTS") {
        return raw.split(',').map(|s| s.trim().to_string()).collect();
    }
    let host = std::env::var("KUBERNETES_SERVICE_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let scheme = if ssl { "https" } else { "http" };
    vec![format!("{scheme}://{host}:2379")]
}
