//! An in-memory `KvClient` for tests in this crate and downstream ones.
//! Same list/token semantics as the etcd-backed implementation, no network.

use crate::client::KvClient;
use async_trait::async_trait;
use ferrocni_core::cni_wire::LIST_SEPARATOR;
use ferrocni_core::Result;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemKv {
    store: Mutex<HashMap<String, String>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvClient for MemKv {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.store
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.lock().unwrap().get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.store.lock().unwrap().remove(key);
        Ok(())
    }

    async fn append(&self, key: &str, value: &str) -> Result<()> {
        let joined = {
            let store = self.store.lock().unwrap();
            match store.get(key) {
                Some(existing) if !existing.is_empty() => {
                    format!("{existing}{LIST_SEPARATOR}{value}")
                }
                _ => value.to_string(),
            }
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
