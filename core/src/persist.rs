use crate::{DocId, IndexMeta, LoadedIndex, Shard, ShardId};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs::{self, create_dir_all, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Layout of a published (or staging) index directory.
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn meta(&self) -> PathBuf {
        self.root.join("meta.json")
    }

    fn shard(&self, shard_id: ShardId) -> PathBuf {
        self.root.join(format!("shard_{shard_id:04}.bin"))
    }

    pub fn pagerank(&self) -> PathBuf {
        self.root.join("pagerank.out")
    }

    fn embeddings(&self) -> PathBuf {
        self.root.join("embeddings.bin")
    }

    pub fn doc_store(&self) -> PathBuf {
        self.root.join("docstore")
    }
}

pub fn save_meta(paths: &IndexPaths, meta: &IndexMeta) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<IndexMeta> {
    let path = paths.meta();
    let mut buf = String::new();
    File::open(&path)
        .with_context(|| format!("index metadata {} missing; build the index first", path.display()))?
        .read_to_string(&mut buf)?;
    let meta: IndexMeta = serde_json::from_str(&buf)?;
    Ok(meta)
}

pub fn save_shard(paths: &IndexPaths, shard: &Shard) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.shard(shard.shard_id))?;
    let bytes = bincode::serialize(shard)?;
    f.write_all(&bytes)?;
    Ok(())
}

pub fn load_shard(paths: &IndexPaths, shard_id: ShardId) -> Result<Shard> {
    let path = paths.shard(shard_id);
    let mut buf = Vec::new();
    File::open(&path)
        .with_context(|| {
            format!(
                "shard file {} missing; the sharder stage has not published this index",
                path.display()
            )
        })?
        .read_to_end(&mut buf)?;
    let shard: Shard = bincode::deserialize(&buf)?;
    if shard.shard_id != shard_id {
        bail!(
            "shard file {} claims shard id {}, expected {}",
            path.display(),
            shard.shard_id,
            shard_id
        );
    }
    Ok(shard)
}

/// Load metadata and every shard of a published index. Each shard file is
/// self-contained, so a missing or corrupt one is reported individually.
pub fn load_index(paths: &IndexPaths) -> Result<LoadedIndex> {
    let meta = load_meta(paths)?;
    let mut shards = Vec::with_capacity(meta.num_shards as usize);
    for shard_id in 0..meta.num_shards {
        shards.push(load_shard(paths, shard_id)?);
    }
    Ok(LoadedIndex::new(meta, shards))
}

/// Parse a PageRank table of `doc_id,score` lines. Malformed lines are
/// skipped; a missing file is an empty table, not an error, since PageRank
/// is an optional external input.
pub fn load_pagerank(paths: &IndexPaths) -> Result<BTreeMap<DocId, f32>> {
    let path = paths.pagerank();
    let mut table = BTreeMap::new();
    let f = match File::open(&path) {
        Ok(f) => f,
        Err(_) => {
            tracing::info!(path = %path.display(), "no pagerank table, authority signal disabled");
            return Ok(table);
        }
    };
    for line in BufReader::new(f).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ',');
        let docid = parts.next().and_then(|s| s.trim().parse::<DocId>().ok());
        let score = parts.next().and_then(|s| s.trim().parse::<f32>().ok());
        match (docid, score) {
            (Some(d), Some(s)) => {
                table.insert(d, s);
            }
            _ => tracing::warn!(line, "skipping malformed pagerank line"),
        }
    }
    Ok(table)
}

pub fn save_embeddings(paths: &IndexPaths, embeddings: &BTreeMap<DocId, Vec<f32>>) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.embeddings())?;
    let bytes = bincode::serialize(embeddings)?;
    f.write_all(&bytes)?;
    Ok(())
}

/// Load the document embedding cache. `Ok(None)` when the cache was never
/// built; semantic search is then simply unavailable.
pub fn load_embeddings(paths: &IndexPaths) -> Result<Option<BTreeMap<DocId, Vec<f32>>>> {
    let path = paths.embeddings();
    let mut buf = Vec::new();
    match File::open(&path) {
        Ok(mut f) => f.read_to_end(&mut buf)?,
        Err(_) => return Ok(None),
    };
    let embeddings = bincode::deserialize(&buf)
        .with_context(|| format!("embedding cache {} is corrupt", path.display()))?;
    Ok(Some(embeddings))
}

/// Atomically swap a fully written staging directory into the live location.
/// In-flight readers keep their already-loaded shard set; new loads see
/// either the old index or the new one, never a mix.
pub fn publish(staging: &Path, live: &Path) -> Result<()> {
    if !staging.is_dir() {
        bail!("staging directory {} does not exist", staging.display());
    }
    let retired = live.with_extension("retired");
    if retired.exists() {
        fs::remove_dir_all(&retired)?;
    }
    if live.exists() {
        fs::rename(live, &retired)
            .with_context(|| format!("failed to retire old index at {}", live.display()))?;
    }
    fs::rename(staging, live)
        .with_context(|| format!("failed to publish index to {}", live.display()))?;
    if retired.exists() {
        fs::remove_dir_all(&retired)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Posting;

    #[test]
    fn shard_round_trip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let mut shard = Shard::new(0);
        shard.postings.insert(
            "rust".into(),
            vec![
                Posting { doc_id: 0, tf: 2, idf: 0.4, weight: 0.8 },
                Posting { doc_id: 3, tf: 1, idf: 0.4, weight: 0.4 },
            ],
        );
        shard.norms.insert(0, 0.8);
        shard.norms.insert(3, 0.4);
        save_shard(&paths, &shard).unwrap();
        let loaded = load_shard(&paths, 0).unwrap();
        assert_eq!(loaded.postings["rust"], shard.postings["rust"]);
        assert_eq!(loaded.norms, shard.norms);
    }

    #[test]
    fn missing_shard_names_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_shard(&IndexPaths::new(dir.path()), 7).unwrap_err();
        assert!(err.to_string().contains("sharder stage"));
    }

    #[test]
    fn pagerank_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        std::fs::create_dir_all(&paths.root).unwrap();
        std::fs::write(paths.pagerank(), "1,0.25\ngarbage\n2,0.75\n3;0.5\n").unwrap();
        let table = load_pagerank(&paths).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[&1], 0.25);
        assert_eq!(table[&2], 0.75);
    }

    #[test]
    fn publish_swaps_directories() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("index.staging");
        let live = dir.path().join("index");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("meta.json"), "v2").unwrap();
        std::fs::create_dir_all(&live).unwrap();
        std::fs::write(live.join("meta.json"), "v1").unwrap();
        publish(&staging, &live).unwrap();
        assert_eq!(std::fs::read_to_string(live.join("meta.json")).unwrap(), "v2");
        assert!(!staging.exists());
    }
}
