//! Document storage behind player and global memory.

use super::MemoryDocument;
use crate::error::MemoryError;
use crate::store::write_atomic;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::fs;

/// Keyed JSON documents grouped by namespace.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read(&self, namespace: &str, id: &str) -> Result<Option<MemoryDocument>, MemoryError>;

    async fn write(&self, document: &MemoryDocument) -> Result<(), MemoryError>;

    async fn list(&self, namespace: &str) -> Result<Vec<MemoryDocument>, MemoryError>;
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<BTreeMap<(String, String), MemoryDocument>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> MemoryError {
        MemoryError::Io(std::io::Error::other("document store lock poisoned"))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn read(&self, namespace: &str, id: &str) -> Result<Option<MemoryDocument>, MemoryError> {
        let docs = self.docs.read().map_err(|_| Self::poisoned())?;
        Ok(docs.get(&(namespace.to_string(), id.to_string())).cloned())
    }

    async fn write(&self, document: &MemoryDocument) -> Result<(), MemoryError> {
        let mut docs = self.docs.write().map_err(|_| Self::poisoned())?;
        docs.insert(
            (document.namespace.clone(), document.id.clone()),
            document.clone(),
        );
        Ok(())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<MemoryDocument>, MemoryError> {
        let docs = self.docs.read().map_err(|_| Self::poisoned())?;
        Ok(docs
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, d)| d.clone())
            .collect())
    }
}

/// Documents as JSON files at `<root>/<namespace>/<id>.json`, with both
/// names percent-encoded so distinct keys never share a file.
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(file_name(namespace))
    }

    fn path(&self, namespace: &str, id: &str) -> PathBuf {
        self.namespace_dir(namespace).join(format!("{}.json", file_name(id)))
    }
}

fn file_name(name: &str) -> String {
    match name {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => urlencoding::encode(name).into_owned(),
    }
}

async fn read_document(path: PathBuf) -> Result<MemoryDocument, MemoryError> {
    let json = fs::read_to_string(&path).await?;
    Ok(serde_json::from_str(&json)?)
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn read(&self, namespace: &str, id: &str) -> Result<Option<MemoryDocument>, MemoryError> {
        match fs::read_to_string(self.path(namespace, id)).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, document: &MemoryDocument) -> Result<(), MemoryError> {
        fs::create_dir_all(self.namespace_dir(&document.namespace)).await?;
        let json = serde_json::to_string_pretty(document)?;
        write_atomic(&self.path(&document.namespace, &document.id), json.as_bytes()).await?;
        Ok(())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<MemoryDocument>, MemoryError> {
        let dir = self.namespace_dir(namespace);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        futures::future::try_join_all(paths.into_iter().map(read_document)).await
    }
}
