use crate::DocId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Display metadata for one document. Consulted only to decorate final
/// hits, never to compute scores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocRecord {
    pub title: String,
    pub url: String,
    pub summary: String,
}

/// Key-value lookup `doc_id -> {title, url, summary}` backed by sled.
/// Written once by the pipeline, read-only while serving.
pub struct DocStore {
    db: sled::Db,
}

impl DocStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())
            .with_context(|| format!("failed to open doc store at {}", path.as_ref().display()))?;
        Ok(DocStore { db })
    }

    pub fn put(&self, doc_id: DocId, record: &DocRecord) -> Result<()> {
        let bytes = bincode::serialize(record)?;
        self.db.insert(doc_id.to_be_bytes(), bytes)?;
        Ok(())
    }

    /// Missing rows are represented as None; callers decorate with empty
    /// fields rather than failing the request.
    pub fn get(&self, doc_id: DocId) -> Result<Option<DocRecord>> {
        match self.db.get(doc_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
