//! Offline index build: a fixed sequence of batch stages that turns a crawl
//! directory into a partitioned, queryable TF-IDF index.
//!
//! Stage order is load-bearing. The document count N feeds the IDF join, the
//! joined weights feed normalization, and the norms feed sharding, so each
//! stage takes its predecessor's output as an explicit value. Nothing here
//! probes the filesystem to discover whether an earlier stage ran.

pub mod input;
pub mod stages;

use anyhow::{ensure, Context, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use webrank_core::persist::{publish, save_embeddings, save_meta, save_shard, IndexPaths};
use webrank_core::semantic::Embedder;
use webrank_core::store::DocStore;
use webrank_core::{DocId, IndexMeta};

#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Crawl input: a JSON/JSONL file or a directory of them.
    pub input: PathBuf,
    /// Live index directory. The build writes to a staging sibling and
    /// swaps it in atomically on success.
    pub output: PathBuf,
    /// Partition count; fixed per build, recorded in the index metadata.
    pub num_shards: u32,
    /// Optional PageRank table (`doc_id,score` lines) copied into the index.
    pub pagerank: Option<PathBuf>,
}

pub struct BuildSummary {
    pub num_docs: u64,
    pub num_terms: usize,
    pub num_shards: u32,
}

/// Run the full pipeline and atomically publish the result. Any stage
/// failure aborts before publish, leaving the live index untouched.
///
/// When an embedding provider is supplied, the document embedding cache is
/// built alongside the shards; without one the published index simply has
/// no semantic capability.
pub fn run_build(cfg: &BuildConfig, embedder: Option<&dyn Embedder>) -> Result<BuildSummary> {
    ensure!(cfg.num_shards >= 1, "index must have at least one shard");

    let records = input::collect_records(&cfg.input)
        .with_context(|| format!("failed to read crawl input {}", cfg.input.display()))?;

    // Stage 0: document count. Malformed records still count toward N.
    let total_docs = stages::count_documents(&records);
    tracing::info!(total_docs, "document count complete");

    // Stage 1: parse into (doc_id, terms, outlinks).
    let parsed = stages::parse_documents(&records);

    // Stage 2: per-document term frequencies, ordered by doc_id.
    let doc_terms = stages::aggregate_term_frequencies(&parsed);

    // Stage 3: document frequencies, IDF, and TF-IDF weights.
    let postings = stages::join_idf(&doc_terms, total_docs);
    tracing::info!(num_terms = postings.len(), "idf join complete");

    // Stage 4: per-document L2 norms.
    let doc_ids: Vec<DocId> = parsed.iter().map(|d| d.doc_id).collect();
    let norms = stages::compute_norms(&postings, &doc_ids);

    // Stage 5: partition into shards.
    let shards = stages::build_shards(postings, &norms, cfg.num_shards);

    // Write everything into a fresh staging directory, then swap.
    let staging = staging_dir(&cfg.output);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    let paths = IndexPaths::new(&staging);

    let mut num_terms = 0;
    for shard in &shards {
        num_terms += shard.postings.len();
        save_shard(&paths, shard)?;
    }

    save_meta(
        &paths,
        &IndexMeta {
            num_docs: total_docs,
            num_shards: cfg.num_shards,
            created_at: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
            version: 1,
        },
    )?;

    write_doc_store(&paths, &parsed)?;
    write_link_graph(&paths, &parsed)?;

    if let Some(src) = &cfg.pagerank {
        fs::copy(src, paths.pagerank())
            .with_context(|| format!("failed to copy pagerank table {}", src.display()))?;
    }

    if let Some(embedder) = embedder {
        build_embedding_cache(&paths, &parsed, embedder)?;
    }

    publish(&staging, &cfg.output)?;
    tracing::info!(
        output = %cfg.output.display(),
        num_docs = total_docs,
        num_shards = cfg.num_shards,
        "index build published"
    );

    Ok(BuildSummary {
        num_docs: total_docs,
        num_terms,
        num_shards: cfg.num_shards,
    })
}

fn staging_dir(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".staging");
    output.with_file_name(name)
}

fn write_doc_store(paths: &IndexPaths, parsed: &[stages::ParsedDoc]) -> Result<()> {
    let store = DocStore::open(paths.doc_store())?;
    for doc in parsed {
        store.put(doc.doc_id, &doc.meta)?;
    }
    store.flush()?;
    // sled must release its lock before the staging directory is renamed.
    drop(store);
    Ok(())
}

/// Export the outgoing-link edges as `src,dst` lines for the external
/// link-graph analysis that produces the PageRank table.
fn write_link_graph(paths: &IndexPaths, parsed: &[stages::ParsedDoc]) -> Result<()> {
    let mut f = File::create(paths.root.join("links.out"))?;
    for doc in parsed {
        for dst in &doc.outlinks {
            writeln!(f, "{},{}", doc.doc_id, dst)?;
        }
    }
    Ok(())
}

fn build_embedding_cache(
    paths: &IndexPaths,
    parsed: &[stages::ParsedDoc],
    embedder: &dyn Embedder,
) -> Result<()> {
    let mut cache: BTreeMap<DocId, Vec<f32>> = BTreeMap::new();
    for doc in parsed {
        let text = format!("{} {}", doc.meta.title, doc.meta.summary);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let vector = embedder
            .embed(text)
            .with_context(|| format!("embedding failed for doc {}", doc.doc_id))?;
        cache.insert(doc.doc_id, vector);
    }
    tracing::info!(num_embeddings = cache.len(), "embedding cache built");
    save_embeddings(paths, &cache)
}
