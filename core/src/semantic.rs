use crate::persist::{load_embeddings, IndexPaths};
use crate::DocId;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// External embedding provider: a black-box `text -> vector` function with a
/// fixed output dimension. The core never assumes a particular model.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimension(&self) -> usize;
}

/// Semantic capability, decided once at initialization rather than probed at
/// call sites. `Unavailable` is a normal serving state, not an error.
pub enum Semantic {
    Available(SemanticIndex),
    Unavailable,
}

impl Semantic {
    /// Available only when both halves exist: a query-side embedder and a
    /// document embedding cache built by the pipeline.
    pub fn init(paths: &IndexPaths, embedder: Option<Arc<dyn Embedder>>) -> Self {
        let embedder = match embedder {
            Some(e) => e,
            None => {
                tracing::info!("no embedding provider configured, semantic search disabled");
                return Semantic::Unavailable;
            }
        };
        match load_embeddings(paths) {
            Ok(Some(embeddings)) if !embeddings.is_empty() => {
                tracing::info!(num_embeddings = embeddings.len(), "semantic search available");
                Semantic::Available(SemanticIndex { embedder, embeddings })
            }
            Ok(_) => {
                tracing::info!("no embedding cache in index, semantic search disabled");
                Semantic::Unavailable
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to load embedding cache, semantic search disabled");
                Semantic::Unavailable
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Semantic::Available(_))
    }
}

/// Query-time similarity over the precomputed document embedding cache.
pub struct SemanticIndex {
    embedder: Arc<dyn Embedder>,
    embeddings: BTreeMap<DocId, Vec<f32>>,
}

impl SemanticIndex {
    pub fn new(embedder: Arc<dyn Embedder>, embeddings: BTreeMap<DocId, Vec<f32>>) -> Self {
        SemanticIndex { embedder, embeddings }
    }

    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embedder.embed(query)
    }

    pub fn has_doc(&self, doc_id: DocId) -> bool {
        self.embeddings.contains_key(&doc_id)
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.embeddings.keys().copied()
    }

    /// Cosine similarity of the query vector against one cached document
    /// embedding; None when the document has no embedding.
    pub fn similarity(&self, query_vec: &[f32], doc_id: DocId) -> Option<f32> {
        self.embeddings
            .get(&doc_id)
            .map(|doc_vec| cosine_similarity(query_vec, doc_vec))
    }
}

/// Cosine similarity; 0.0 for zero-length or mismatched vectors so degenerate
/// embeddings score as irrelevant instead of erroring.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
