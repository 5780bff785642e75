use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

/// Whole-collection persistence: every write replaces the full record set.
#[async_trait]
pub trait DocumentStore<T>: Send + Sync {
    async fn get_all(&self) -> anyhow::Result<Vec<T>>;
    async fn put_all(&self, records: &[T]) -> anyhow::Result<()>;
}

/// Pretty-printed JSON array on local disk.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "store".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl<T> DocumentStore<T> for JsonFileStore
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get_all(&self) -> anyhow::Result<Vec<T>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&raw).with_context(|| format!("parse {}", self.path.display()))
    }

    async fn put_all(&self, records: &[T]) -> anyhow::Result<()> {
        let body = serde_json::to_vec_pretty(records).context("serialize records")?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }
        // rename keeps readers from ever observing a half-written file
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("rename {} -> {}", tmp.display(), self.path.display()))?;
        Ok(())
    }
}

/// In-process store, used by tests and `AppState::fake`.
pub struct MemoryStore<T> {
    records: Mutex<Vec<T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl<T> DocumentStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get_all(&self) -> anyhow::Result<Vec<T>> {
        Ok(self.records.lock().clone())
    }

    async fn put_all(&self, records: &[T]) -> anyhow::Result<()> {
        *self.records.lock() = records.to_vec();
        Ok(())
    }
}
