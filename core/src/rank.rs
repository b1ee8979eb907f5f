use crate::persist::{load_index, load_pagerank, IndexPaths};
use crate::semantic::{Embedder, Semantic};
use crate::tokenizer::tokenize;
use crate::{DocId, LoadedIndex};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Traditional,
    Semantic,
    Hybrid,
}

impl SearchMode {
    /// Unknown mode strings fall back to traditional rather than erroring.
    pub fn parse(s: &str) -> Self {
        match s {
            "semantic" => SearchMode::Semantic,
            "hybrid" => SearchMode::Hybrid,
            _ => SearchMode::Traditional,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Traditional => "traditional",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

/// Which documents semantic scoring may consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticCandidates {
    /// Only documents that matched at least one query term lexically.
    LexicalOverlap,
    /// Every document with a cached embedding, regardless of lexical overlap.
    FullCorpus,
}

#[derive(Debug, Clone)]
pub struct RankConfig {
    /// Weight on the semantic similarity in hybrid mode, in [0,1].
    /// Independent of the per-query PageRank weight.
    pub semantic_blend: f32,
    /// Semantic candidates scoring below this similarity are dropped.
    pub min_similarity: f32,
    pub candidates: SemanticCandidates,
}

impl Default for RankConfig {
    fn default() -> Self {
        RankConfig {
            semantic_blend: 0.3,
            min_similarity: 0.1,
            candidates: SemanticCandidates::FullCorpus,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub doc_id: DocId,
    pub score: f32,
}

/// One completed ranking call. `mode` is the mode actually used, which may
/// be a fallback from the one requested.
pub struct RankOutcome {
    pub hits: Vec<Hit>,
    pub mode: SearchMode,
    pub semantic_available: bool,
}

/// Online ranking over an immutable shard set: TF-IDF cosine scoring,
/// PageRank blending, and optional embedding similarity. Safe to share
/// across concurrent readers; every call re-executes retrieval.
pub struct RankingEngine {
    index: LoadedIndex,
    pagerank: BTreeMap<DocId, f32>,
    semantic: Semantic,
    config: RankConfig,
}

impl RankingEngine {
    pub fn new(
        index: LoadedIndex,
        pagerank: BTreeMap<DocId, f32>,
        semantic: Semantic,
        config: RankConfig,
    ) -> Self {
        RankingEngine {
            index,
            pagerank,
            semantic,
            config,
        }
    }

    /// Load a published index directory: shards, PageRank table, and the
    /// semantic capability if an embedder is supplied and the cache exists.
    pub fn open(
        paths: &IndexPaths,
        embedder: Option<Arc<dyn Embedder>>,
        config: RankConfig,
    ) -> Result<Self> {
        let index = load_index(paths)?;
        let pagerank = load_pagerank(paths)?;
        let semantic = Semantic::init(paths, embedder);
        tracing::info!(
            num_docs = index.num_docs(),
            num_shards = index.num_shards(),
            pagerank_entries = pagerank.len(),
            semantic_available = semantic.is_available(),
            "ranking engine loaded"
        );
        Ok(RankingEngine::new(index, pagerank, semantic, config))
    }

    pub fn index(&self) -> &LoadedIndex {
        &self.index
    }

    pub fn semantic_available(&self) -> bool {
        self.semantic.is_available()
    }

    /// Rank documents for `query`. `pagerank_weight` in [0,1] blends the
    /// lexical cosine score with document authority; values outside the
    /// range are clamped. Semantic and hybrid requests degrade to
    /// traditional when the semantic capability is absent or the query
    /// embedding fails.
    pub fn rank(&self, query: &str, pagerank_weight: f32, mode: SearchMode) -> RankOutcome {
        let weight = pagerank_weight.clamp(0.0, 1.0);
        let semantic_available = self.semantic.is_available();

        let effective = match mode {
            SearchMode::Traditional => SearchMode::Traditional,
            m if !semantic_available => {
                tracing::debug!(requested = m.as_str(), "semantic unavailable, using traditional");
                SearchMode::Traditional
            }
            m => m,
        };

        // A query with nothing left after tokenization is empty in every
        // mode; raw stop-word text must never reach the embedder.
        if tokenize(query).is_empty() {
            return RankOutcome {
                hits: Vec::new(),
                mode: effective,
                semantic_available,
            };
        }

        let (hits, mode_used) = match effective {
            SearchMode::Traditional => (self.rank_traditional(query, weight), SearchMode::Traditional),
            SearchMode::Semantic => match self.rank_semantic(query) {
                Some(hits) => (hits, SearchMode::Semantic),
                None => (self.rank_traditional(query, weight), SearchMode::Traditional),
            },
            SearchMode::Hybrid => match self.rank_hybrid(query, weight) {
                Some(hits) => (hits, SearchMode::Hybrid),
                None => (self.rank_traditional(query, weight), SearchMode::Traditional),
            },
        };

        RankOutcome {
            hits,
            mode: mode_used,
            semantic_available,
        }
    }

    /// Query vector: per-term `tf_q * idf` for terms present in the index,
    /// plus its L2 norm. None when nothing survives tokenization or lookup.
    fn query_weights(&self, query: &str) -> Option<(HashMap<String, f32>, f32)> {
        let mut tf_q: HashMap<String, u32> = HashMap::new();
        for term in tokenize(query) {
            if self.index.contains_term(&term) {
                *tf_q.entry(term).or_insert(0) += 1;
            }
        }
        if tf_q.is_empty() {
            return None;
        }
        let mut weights: HashMap<String, f32> = HashMap::with_capacity(tf_q.len());
        for (term, tf) in tf_q {
            let idf = self.index.idf(&term).unwrap_or(0.0);
            weights.insert(term, tf as f32 * idf);
        }
        let norm = weights.values().map(|w| w * w).sum::<f32>().sqrt();
        if norm == 0.0 {
            // Every surviving term appears in all documents (idf 0).
            return None;
        }
        Some((weights, norm))
    }

    /// Lexical cosine blended with PageRank:
    /// `(1 - w) * dot(q, d) / (|q| * |d|) + w * pagerank[d]`.
    /// Candidates are documents matching at least one query term; a
    /// candidate with zero cosine and zero PageRank is dropped entirely.
    fn traditional_scores(&self, query: &str, weight: f32) -> HashMap<DocId, f32> {
        let mut scores = HashMap::new();
        let Some((q_weights, q_norm)) = self.query_weights(query) else {
            return scores;
        };

        let mut dots: HashMap<DocId, f32> = HashMap::new();
        for (term, q_w) in &q_weights {
            for posting in self.index.postings(term) {
                *dots.entry(posting.doc_id).or_insert(0.0) += q_w * posting.weight;
            }
        }

        for (doc_id, dot) in dots {
            // A zero norm means the document has no terms; it cannot have a
            // posting, so this only guards against a corrupt shard.
            let cosine = match self.index.norm(doc_id) {
                Some(n) if n > 0.0 => dot / (q_norm * n),
                _ => 0.0,
            };
            let authority = self.pagerank.get(&doc_id).copied().unwrap_or(0.0);
            if cosine == 0.0 && authority == 0.0 {
                continue;
            }
            scores.insert(doc_id, (1.0 - weight) * cosine + weight * authority);
        }
        scores
    }

    fn rank_traditional(&self, query: &str, weight: f32) -> Vec<Hit> {
        sorted_hits(self.traditional_scores(query, weight))
    }

    /// Embedding similarities for the configured candidate set, with the
    /// minimum-similarity floor applied. None when the capability is absent
    /// or the query embedding fails, in which case the caller falls back.
    fn semantic_scores(&self, query: &str) -> Option<HashMap<DocId, f32>> {
        let Semantic::Available(sem) = &self.semantic else {
            return None;
        };
        let query_vec = match sem.embed_query(query) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed, falling back to traditional");
                return None;
            }
        };

        let candidates: Vec<DocId> = match self.config.candidates {
            SemanticCandidates::FullCorpus => sem.doc_ids().collect(),
            SemanticCandidates::LexicalOverlap => self
                .traditional_scores(query, 0.0)
                .into_keys()
                .filter(|d| sem.has_doc(*d))
                .collect(),
        };

        let mut scores = HashMap::new();
        for doc_id in candidates {
            if let Some(sim) = sem.similarity(&query_vec, doc_id) {
                if sim >= self.config.min_similarity {
                    scores.insert(doc_id, sim);
                }
            }
        }
        Some(scores)
    }

    fn rank_semantic(&self, query: &str) -> Option<Vec<Hit>> {
        self.semantic_scores(query).map(sorted_hits)
    }

    /// Hybrid blend over the union of lexical and semantic candidates:
    /// `(1 - b) * traditional + b * similarity`, where `b` is the configured
    /// semantic blend. A document missing from one signal contributes zero
    /// for that signal.
    fn rank_hybrid(&self, query: &str, weight: f32) -> Option<Vec<Hit>> {
        let semantic = self.semantic_scores(query)?;
        let traditional = self.traditional_scores(query, weight);
        let b = self.config.semantic_blend.clamp(0.0, 1.0);

        let mut blended: HashMap<DocId, f32> = HashMap::new();
        for (doc_id, score) in &traditional {
            blended.insert(*doc_id, (1.0 - b) * score);
        }
        for (doc_id, sim) in semantic {
            *blended.entry(doc_id).or_insert(0.0) += b * sim;
        }
        Some(sorted_hits(blended))
    }
}

/// Descending by score, ties broken by doc_id ascending.
fn sorted_hits(scores: HashMap<DocId, f32>) -> Vec<Hit> {
    let mut hits: Vec<Hit> = scores
        .into_iter()
        .map(|(doc_id, score)| Hit { doc_id, score })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    hits
}
