//! The distributed KV capability everything else in the cluster is built
//! on: a flat key space with one multi-valued-scalar convention —
//! a value is either a single token or a comma-joined list of tokens.

use async_trait::async_trait;
use ferrocni_core::Result;
use std::collections::HashMap;

#[async_trait]
pub trait KvClient: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Scalar read. `None` when the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// All keys under `prefix`, unparsed.
    async fn get_prefix(&self, prefix: &str) -> Result<HashMap<String, String>>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Appends `value` to the comma-joined list at `key`; behaves like
    /// `put` if the key doesn't exist yet.
    async fn append(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `value` from the comma-joined list at `key`. Deletes the
    /// key outright if that was the last token.
    async fn del_token(&self, key: &str, value: &str) -> Result<()>;

    /// The comma-joined list at `key`, split into tokens. Empty if the
    /// key doesn't exist.
    async fn list(&self, key: &str) -> Result<Vec<String>>;

    /// Renders every key under `prefix` as `"key -> value\n"` lines.
    async fn dump(&self, prefix: &str) -> Result<String>;
}
