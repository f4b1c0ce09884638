//! CNI process entrypoint: one process per invocation, talking to the
//! runtime over env vars + stdin/stdout per the CNI spec.

use ferrocni_core::cni_wire::{CniCommand, CniConfig, CniEnv, CniError, CniVersionResult};
use ferrocni_core::Error;
use ferrocni_ipam::Ipam;
use ferrocni_kv::{EtcdKv, KvClient};
use ferrocni_net::{hostenv, Netlink, RtNetlink};
use ferrocni_storage::Storage;
use std::io::Read;
use std::sync::Arc;

const GET_CONF_FILE: &str = "./ferrocni.json";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    if std::env::args().nth(1).as_deref() == Some("--get-conf") {
        if let Err(e) = write_default_conf() {
            tracing::error!(error = %e, "failed to write default config");
            std::process::exit(1);
        }
        return;
    }

    let env = match CniEnv::from_process_env() {
        Ok(env) => env,
        Err(e) => {
            print_error(ferrocni_core::cni_wire::CNI_VERSION, &e);
            std::process::exit(1);
        }
    };

    if env.command == CniCommand::Version {
        println!(
            "{}",
            serde_json::to_string_pretty(&CniVersionResult::default()).unwrap()
        );
        return;
    }

    let conf = match read_config() {
        Ok(conf) => conf,
        Err(e) => {
            print_error(ferrocni_core::cni_wire::CNI_VERSION, &e);
            std::process::exit(1);
        }
    };

    if !env.command.is_supported() {
        let err = CniError::not_supported(&conf.cni_version, &format!("{:?}", env.command));
        println!("{}", serde_json::to_string_pretty(&err).unwrap());
        std::process::exit(1);
    }

    match run(&conf, &env).await {
        Ok(Some(result)) => {
            println!("{}", serde_json::to_string_pretty(&result).unwrap());
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "CNI {:?} failed", env.command);
            print_error(&conf.cni_version, &e);
            std::process::exit(1);
        }
    }
}

async fn run(
    conf: &CniConfig,
    env: &CniEnv,
) -> ferrocni_core::Result<Option<ferrocni_core::cni_wire::CniResult>> {
    let netlink: Arc<dyn Netlink> = Arc::new(RtNetlink::new());
    let host = hostenv::discover(netlink.as_ref()).await?;

    let endpoints = etcd_endpoints(conf.ssl);
    let kv: Arc<dyn KvClient> = Arc::new(EtcdKv::connect(&endpoints, None).await?);
    let ipam = Ipam::new(kv.clone());
    let storage = Storage::new(kv);
    let cluster: Arc<dyn ferrocni_cluster::ClusterView> = Arc::new(
        ferrocni_cluster::KubeClusterView::new()
            .await
            .map_err(|e| Error::Network(format!("connect to Kubernetes API: {e}")))?,
    );

    let lifecycle = ferrocni_cni::Lifecycle::new(netlink, ipam, storage, cluster, conf.clone(), host);

    match env.command {
        CniCommand::Add => Ok(Some(lifecycle.add(env).await?)),
        CniCommand::Del => {
            lifecycle.del(env).await?;
            Ok(None)
        }
        _ => unreachable!("unsupported commands are rejected before run() is called"),
    }
}

fn write_default_conf() -> ferrocni_core::Result<()> {
    let json = serde_json::to_string_pretty(&CniConfig::default_json()).map_err(Error::Serialization)?;
    std::fs::write(GET_CONF_FILE, json).map_err(Error::Io)
}

fn read_config() -> ferrocni_core::Result<CniConfig> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .map_err(Error::Io)?;
    serde_json::from_str(&buf).map_err(Error::Serialization)
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

fn print_error(cni_version: &str, err: &Error) {
    let out = CniError::from_error(cni_version, err);
    println!("{}", serde_json::to_string_pretty(&out).unwrap());
}
