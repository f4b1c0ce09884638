//! `KvClient` backed by a real etcd cluster via `etcd-client`.

use crate::client::KvClient;
use async_trait::async_trait;
use etcd_client::{Certificate, Client, ConnectOptions, GetOptions, Identity, TlsOptions};
use ferrocni_core::cni_wire::LIST_SEPARATOR;
use ferrocni_core::{Error, Result};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// TLS material for connecting to etcd over mutual TLS, mirroring the
/// `--cacert`/`--cert`/`--key` triple the config's `ssl` flag gates.
pub struct EtcdTls {
    pub ca_cert_pem: Vec<u8>,
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

pub struct EtcdKv {
    client: Mutex<Client>,
}

impl EtcdKv {
    pub async fn connect(endpoints: &[String], tls: Option<EtcdTls>) -> Result<Self> {
        let options = match tls {
            Some(tls) => {
                let tls_options = TlsOptions::new()
                    .ca_certificate(Certificate::from_pem(tls.ca_cert_pem))
                    .identity(Identity::from_pem(tls.cert_pem, tls.key_pem));
                ConnectOptions::new().with_tls(tls_options)
            }
            None => ConnectOptions::new(),
        };

        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(|e| Error::Storage(format!("connect to etcd {endpoints:?}: {e}")))?;

        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

#[async_trait]
impl KvClient for EtcdKv {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.client
            .lock()
            .await
            .put(key, value, None)
            .await
            .map_err(|e| Error::Storage(format!("put {key}: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let resp = self
            .client
            .lock()
            .await
            .get(key, None)
            .await
            .map_err(|e| Error::Storage(format!("get {key}: {e}")))?;
        match resp.kvs().first() {
            Some(kv) => Ok(Some(
                kv.value_str()
                    .map_err(|e| Error::Storage(format!("decode value of {key}: {e}")))?
                    .to_string(),
            )),
            None => Ok(None),
        }
    }

    async fn get_prefix(&self, prefix: &str) -> Result<HashMap<String, String>> {
        let resp = self
            .client
            .lock()
            .await
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| Error::Storage(format!("get_prefix {prefix}: {e}")))?;

        let mut out = HashMap::new();
        for kv in resp.kvs() {
            let key = kv
                .key_str()
                .map_err(|e| Error::Storage(format!("decode key under {prefix}: {e}")))?
                .to_string();
            let value = kv
                .value_str()
                .map_err(|e| Error::Storage(format!("decode value under {prefix}: {e}")))?
                .to_string();
            out.insert(key, value);
        }
        Ok(out)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.client
            .lock()
            .await
            .delete(key, None)
            .await
            .map_err(|e| Error::Storage(format!("del {key}: {e}")))?;
        Ok(())
    }

    async fn append(&self, key: &str, value: &str) -> Result<()> {
        let joined = match self.get(key).await? {
            Some(existing) if !existing.is_empty() => {
                format!("{existing}{LIST_SEPARATOR}{value}")
            }
            _ => value.to_string(),
        };
        self.put(key, &joined).await
    }

    async fn del_token(&self, key: &str, value: &str) -> Result<()> {
        let mut tokens = self.list(key).await?;
        tokens.retain(|t| t != value);
        if tokens.is_empty() {
            self.del(key).await
        } else {
            self.put(key, &tokens.join(&LIST_SEPARATOR.to_string()))
                .await
        }
    }

    async fn list(&self, key: &str) -> Result<Vec<String>> {
        match self.get(key).await? {
            Some(value) if !value.is_empty() => {
                Ok(value.split(LIST_SEPARATOR).map(|s| s.to_string()).collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn dump(&self, prefix: &str) -> Result<String> {
        let map = self.get_prefix(prefix).await?;
        let mut out = String::new();
        for (key, value) in map {
            out.push_str(&format!("{key} -> {value}\n"));
        }
        Ok(out)
    }
}
