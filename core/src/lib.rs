//! Shared index model, tokenization, persistence, and the online ranking
//! engine for the webrank search stack.
//!
//! The offline pipeline (`webrank-pipeline`) produces the artifacts defined
//! here; the query server (`webrank-server`) loads them read-only and serves
//! ranked hits through [`rank::RankingEngine`].

pub mod index;
pub mod persist;
pub mod rank;
pub mod semantic;
pub mod store;
pub mod tokenizer;

pub use index::{DocId, IndexMeta, LoadedIndex, Posting, Shard, ShardId};
