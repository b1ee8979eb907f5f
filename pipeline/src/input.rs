use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use webrank_core::DocId;

/// One crawled document as the crawler hands it over: raw text plus the
/// outgoing links it extracted.
#[derive(Debug, Deserialize)]
pub struct CrawlDoc {
    pub id: DocId,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub links: Vec<DocId>,
}

/// Enumerate raw crawl records from a JSON/JSONL file or a directory of
/// them. Records are returned undecoded so the counter stage can count
/// every record, including ones that later fail to parse.
///
/// File bytes are read lossily; unparseable byte sequences are dropped
/// rather than failing the run.
pub fn collect_records(input: &Path) -> Result<Vec<String>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
        files.sort();
    } else {
        files.push(input.to_path_buf());
    }

    let mut records = Vec::new();
    for file in files {
        let bytes = fs::read(&file)?;
        let text = String::from_utf8_lossy(&bytes);
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            for line in text.lines() {
                if !line.trim().is_empty() {
                    records.push(line.to_string());
                }
            }
        } else {
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(serde_json::Value::Array(arr)) => {
                    for value in arr {
                        records.push(value.to_string());
                    }
                }
                Ok(value @ serde_json::Value::Object(_)) => records.push(value.to_string()),
                Ok(_) | Err(_) => {
                    tracing::warn!(file = %file.display(), "skipping non-document input file");
                }
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{count_documents, parse_documents};

    #[test]
    fn invalid_utf8_bytes_are_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.jsonl");
        let mut bytes = br#"{"id": 1, "title": "Cafe", "body": "caf"#.to_vec();
        bytes.push(0xE9); // lone Latin-1 byte, not valid UTF-8
        bytes.extend_from_slice(br#" dog"}"#);
        std::fs::write(&path, bytes).unwrap();

        let records = collect_records(&path).unwrap();
        assert_eq!(count_documents(&records), 1);
        let parsed = parse_documents(&records);
        assert_eq!(parsed.len(), 1);
        // the offending byte is replaced, the rest of the body indexes
        assert!(parsed[0].terms.contains(&"dog".to_string()));
    }

    #[test]
    fn json_array_files_yield_one_record_per_element() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.json");
        std::fs::write(
            &path,
            r#"[{"id": 1, "title": "a", "body": "cat"}, {"id": 2, "title": "b", "body": "dog"}]"#,
        )
        .unwrap();
        let records = collect_records(&path).unwrap();
        assert_eq!(count_documents(&records), 2);
    }
}
