use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type DocId = u64;
pub type ShardId = u32;

/// One (term, document) occurrence. `weight = tf * idf` is the unnormalized
/// TF-IDF weight; the document's L2 norm lives in the shard's norm table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub tf: u32,
    pub idf: f32,
    pub weight: f32,
}

/// One partition of the inverted index, holding the complete posting lists
/// for the documents assigned to it by `doc_id % num_shards`.
///
/// Postings are sharded by document id, so one term's posting list may span
/// every shard; a reader consults all shards for a term and merges. Maps are
/// BTree-ordered so that serializing an identical build yields identical
/// bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Shard {
    pub shard_id: ShardId,
    /// term -> postings, each list sorted by doc_id ascending.
    pub postings: BTreeMap<String, Vec<Posting>>,
    /// L2 norm for every document assigned to this shard, including
    /// documents with no extractable terms (norm 0.0).
    pub norms: BTreeMap<DocId, f32>,
}

impl Shard {
    pub fn new(shard_id: ShardId) -> Self {
        Shard {
            shard_id,
            ..Default::default()
        }
    }
}

/// Build-time facts about a published index, stored as human-readable JSON
/// alongside the shard files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub num_docs: u64,
    pub num_shards: u32,
    pub created_at: String,
    pub version: u32,
}

/// A fully loaded shard set. Immutable once constructed; the server shares it
/// across request tasks without locking.
pub struct LoadedIndex {
    pub meta: IndexMeta,
    shards: Vec<Shard>,
}

impl LoadedIndex {
    pub fn new(meta: IndexMeta, shards: Vec<Shard>) -> Self {
        LoadedIndex { meta, shards }
    }

    pub fn num_docs(&self) -> u64 {
        self.meta.num_docs
    }

    pub fn num_shards(&self) -> u32 {
        self.meta.num_shards
    }

    /// All postings for `term`, merged across shards and sorted by doc_id.
    /// Empty when the term is not in the index.
    pub fn postings(&self, term: &str) -> Vec<&Posting> {
        let mut merged: Vec<&Posting> = Vec::new();
        for shard in &self.shards {
            if let Some(list) = shard.postings.get(term) {
                merged.extend(list.iter());
            }
        }
        merged.sort_unstable_by_key(|p| p.doc_id);
        merged
    }

    /// IDF for `term`. Every posting of a term carries the same idf, so any
    /// shard that knows the term can answer.
    pub fn idf(&self, term: &str) -> Option<f32> {
        self.shards
            .iter()
            .find_map(|s| s.postings.get(term).and_then(|l| l.first()))
            .map(|p| p.idf)
    }

    pub fn contains_term(&self, term: &str) -> bool {
        self.shards.iter().any(|s| s.postings.contains_key(term))
    }

    /// L2 norm of a document, or None for ids the pipeline never saw.
    pub fn norm(&self, doc_id: DocId) -> Option<f32> {
        if self.shards.is_empty() {
            return None;
        }
        let shard = (doc_id % self.shards.len() as u64) as usize;
        self.shards.get(shard)?.norms.get(&doc_id).copied()
    }
}
