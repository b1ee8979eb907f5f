use crate::input::CrawlDoc;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use webrank_core::store::DocRecord;
use webrank_core::tokenizer::tokenize;
use webrank_core::{DocId, Posting, Shard, ShardId};

const SUMMARY_CHARS: usize = 200;

/// Parser output for one document: its normalized term sequence, outgoing
/// links, and display metadata. Documents with no extractable text still
/// appear here with an empty term list.
pub struct ParsedDoc {
    pub doc_id: DocId,
    pub terms: Vec<String>,
    pub outlinks: BTreeSet<DocId>,
    pub meta: DocRecord,
}

/// Per-document term frequencies, the map side of the TF aggregation.
pub struct DocTerms {
    pub doc_id: DocId,
    pub counts: BTreeMap<String, u32>,
}

/// term -> postings sorted by doc_id, with idf and weight joined on.
pub type TermPostings = BTreeMap<String, Vec<Posting>>;

/// Stage 0: total document count N. Every record counts, including records
/// the parser will later reject, so IDF is computed over the whole crawl.
pub fn count_documents(records: &[String]) -> u64 {
    records.len() as u64
}

/// Stage 1: decode and tokenize each record. Records that fail to decode
/// are logged and produce no postings (they remain counted in N). Output
/// is ordered by doc_id; duplicate ids keep the first occurrence.
pub fn parse_documents(records: &[String]) -> Vec<ParsedDoc> {
    let mut parsed: Vec<ParsedDoc> = records
        .par_iter()
        .filter_map(|record| match serde_json::from_str::<CrawlDoc>(record) {
            Ok(doc) => Some(parse_one(doc)),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed crawl record");
                None
            }
        })
        .collect();
    parsed.sort_by_key(|d| d.doc_id);
    parsed.dedup_by(|b, a| {
        if a.doc_id == b.doc_id {
            tracing::warn!(doc_id = a.doc_id, "duplicate doc id in crawl, keeping first");
            true
        } else {
            false
        }
    });
    parsed
}

fn parse_one(doc: CrawlDoc) -> ParsedDoc {
    let terms = tokenize(&doc.body);
    let summary = match doc.summary {
        Some(s) if !s.trim().is_empty() => s,
        _ => doc.body.chars().take(SUMMARY_CHARS).collect(),
    };
    ParsedDoc {
        doc_id: doc.id,
        terms,
        outlinks: doc.links.into_iter().collect(),
        meta: DocRecord {
            title: doc.title,
            url: doc.url.unwrap_or_default(),
            summary,
        },
    }
}

/// Stage 2: raw term counts per document. Term order within a document is
/// irrelevant to the counts; output ordering follows the doc_id order of
/// the input.
pub fn aggregate_term_frequencies(parsed: &[ParsedDoc]) -> Vec<DocTerms> {
    parsed
        .par_iter()
        .map(|doc| {
            let mut counts: BTreeMap<String, u32> = BTreeMap::new();
            for term in &doc.terms {
                *counts.entry(term.clone()).or_insert(0) += 1;
            }
            DocTerms {
                doc_id: doc.doc_id,
                counts,
            }
        })
        .collect()
}

/// Stage 3: document frequency and IDF, joined back onto every
/// (doc, term, tf) triple as `weight = tf * idf`.
///
/// The shuffle groups occurrences by term; since the input is ordered by
/// doc_id, each posting list comes out sorted by doc_id without a second
/// sort. `df` is the occurrence count per term, which is the distinct
/// document count because stage 2 emits one entry per (doc, term).
/// `idf = ln(N/df)`; a term in every document gets idf 0 and contributes
/// nothing to scores, which is valid, not an error.
pub fn join_idf(doc_terms: &[DocTerms], total_docs: u64) -> TermPostings {
    let mut grouped: BTreeMap<String, Vec<(DocId, u32)>> = BTreeMap::new();
    for dt in doc_terms {
        for (term, tf) in &dt.counts {
            grouped
                .entry(term.clone())
                .or_default()
                .push((dt.doc_id, *tf));
        }
    }

    let n = total_docs as f32;
    grouped
        .into_iter()
        .map(|(term, occurrences)| {
            let df = occurrences.len() as f32;
            let idf = (n / df).ln();
            let postings = occurrences
                .into_iter()
                .map(|(doc_id, tf)| Posting {
                    doc_id,
                    tf,
                    idf,
                    weight: tf as f32 * idf,
                })
                .collect();
            (term, postings)
        })
        .collect()
}

/// Stage 4: per-document L2 norm `sqrt(sum weight^2)`. Every document in
/// `doc_ids` gets an entry; documents with no terms get 0.0, and consumers
/// must treat that as "no defined cosine", never divide by it.
pub fn compute_norms(postings: &TermPostings, doc_ids: &[DocId]) -> BTreeMap<DocId, f32> {
    let mut sums: BTreeMap<DocId, f32> = doc_ids.iter().map(|d| (*d, 0.0)).collect();
    for list in postings.values() {
        for posting in list {
            if let Some(sum) = sums.get_mut(&posting.doc_id) {
                *sum += posting.weight * posting.weight;
            }
        }
    }
    for sum in sums.values_mut() {
        *sum = sum.sqrt();
    }
    sums
}

/// Stage 5: partition by `doc_id % num_shards`. Each shard is assembled
/// independently from the shared read-only inputs, so shard workers never
/// touch each other's output. Posting lists stay sorted by doc_id under
/// filtering.
pub fn build_shards(
    postings: TermPostings,
    norms: &BTreeMap<DocId, f32>,
    num_shards: u32,
) -> Vec<Shard> {
    let shard_of = |doc_id: DocId| (doc_id % num_shards as u64) as ShardId;
    (0..num_shards)
        .into_par_iter()
        .map(|shard_id| {
            let mut shard = Shard::new(shard_id);
            for (term, list) in &postings {
                let local: Vec<Posting> = list
                    .iter()
                    .filter(|p| shard_of(p.doc_id) == shard_id)
                    .cloned()
                    .collect();
                if !local.is_empty() {
                    shard.postings.insert(term.clone(), local);
                }
            }
            for (doc_id, norm) in norms {
                if shard_of(*doc_id) == shard_id {
                    shard.norms.insert(*doc_id, *norm);
                }
            }
            shard
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, body: &str) -> String {
        serde_json::json!({ "id": id, "title": format!("doc {id}"), "body": body }).to_string()
    }

    #[test]
    fn malformed_records_count_but_emit_nothing() {
        let records = vec![record(1, "cat dog"), "not json at all".to_string()];
        assert_eq!(count_documents(&records), 2);
        let parsed = parse_documents(&records);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].doc_id, 1);
    }

    #[test]
    fn empty_body_still_parses() {
        let records = vec![record(9, "")];
        let parsed = parse_documents(&records);
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].terms.is_empty());
    }

    #[test]
    fn idf_is_zero_for_ubiquitous_terms() {
        let records = vec![record(1, "shared cat"), record(2, "shared dog")];
        let parsed = parse_documents(&records);
        let doc_terms = aggregate_term_frequencies(&parsed);
        let postings = join_idf(&doc_terms, 2);
        let shared = &postings["share"]; // stemmed
        assert_eq!(shared.len(), 2);
        assert_eq!(shared[0].idf, 0.0);
        assert_eq!(shared[0].weight, 0.0);
        let cat = &postings["cat"];
        assert!((cat[0].idf - (2.0f32).ln()).abs() < 1e-6);
    }

    #[test]
    fn norms_cover_empty_documents() {
        let records = vec![record(1, "cat cat"), record(2, "")];
        let parsed = parse_documents(&records);
        let doc_terms = aggregate_term_frequencies(&parsed);
        let postings = join_idf(&doc_terms, 2);
        let ids: Vec<u64> = parsed.iter().map(|d| d.doc_id).collect();
        let norms = compute_norms(&postings, &ids);
        assert_eq!(norms[&2], 0.0);
        let w = 2.0 * (2.0f32).ln();
        assert!((norms[&1] - w).abs() < 1e-6);
    }

    #[test]
    fn sharding_is_total_and_disjoint() {
        let records: Vec<String> = (0..10).map(|i| record(i, "cat dog fish")).collect();
        let parsed = parse_documents(&records);
        let doc_terms = aggregate_term_frequencies(&parsed);
        let postings = join_idf(&doc_terms, 10);
        let ids: Vec<u64> = parsed.iter().map(|d| d.doc_id).collect();
        let norms = compute_norms(&postings, &ids);
        let shards = build_shards(postings, &norms, 3);

        for doc_id in 0..10u64 {
            let holders: Vec<u32> = shards
                .iter()
                .filter(|s| s.norms.contains_key(&doc_id))
                .map(|s| s.shard_id)
                .collect();
            assert_eq!(holders, vec![(doc_id % 3) as u32]);
        }
        // posting lists stay sorted by doc_id inside each shard
        for shard in &shards {
            for list in shard.postings.values() {
                assert!(list.windows(2).all(|w| w[0].doc_id < w[1].doc_id));
            }
        }
    }
}
