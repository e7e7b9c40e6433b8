//! Note-vault importer.
//!
//! Walks a vault directory for note files, extracts `[[wikilinks]]` and
//! `#tags`, and emits a `part_of` link for every resolved wikilink
//! target. Notes may reference each other in cycles; the graph allows
//! that and traversal stays finite.
//!
//! Canonical locator: the absolute path of the note file, so the same
//! vault imported twice resolves to the same records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use context_ingest_core::error::{IngestError, ItemError};
use context_ingest_core::models::{ExtractedItem, ItemLink, Payload, RelationKind, SourceKind};

use crate::importer::{channel, is_ignored_path, ExtractRequest, Importer, ItemSender, ItemStream};
use crate::options::{ImportOptions, VaultOptions};

pub struct VaultImporter;

#[async_trait]
impl Importer for VaultImporter {
    fn source_kind(&self) -> SourceKind {
        SourceKind::Vault
    }

    fn description(&self) -> &str {
        "Import notes from a personal note vault, preserving wikilink relations"
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<ItemStream, IngestError> {
        let opts = match &request.options {
            ImportOptions::Vault(opts) => opts.clone(),
            _ => {
                return Err(IngestError::InvalidOptions(
                    "vault importer given non-vault options".to_string(),
                ))
            }
        };

        let root = Path::new(&request.reference);
        if !root.is_dir() {
            return Err(IngestError::unavailable(format!(
                "vault path does not exist: {}",
                request.reference
            )));
        }
        let root = root
            .canonicalize()
            .map_err(|e| IngestError::unavailable(e.to_string()))?;

        let (tx, rx) = channel();
        tokio::task::spawn_blocking(move || {
            walk_vault(&root, &opts, tx);
        });

        Ok(rx)
    }
}

fn walk_vault(root: &Path, opts: &VaultOptions, tx: ItemSender) {
    // First pass collects note paths so wikilinks can be resolved by
    // note name; bodies are read one at a time during the stream.
    let mut notes: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if is_ignored_path(relative) || relative.starts_with(".obsidian") {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) == Some(opts.note_extension.as_str()) {
            notes.push(path.to_path_buf());
        }
    }
    notes.sort();

    // Note name (file stem) → absolute path, for wikilink resolution.
    let mut by_stem: HashMap<String, PathBuf> = HashMap::new();
    for path in &notes {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            by_stem.entry(stem.to_lowercase()).or_insert(path.clone());
        }
    }

    for path in notes {
        let locator = path.to_string_lossy().to_string();
        let result = match note_item(&path, root, &by_stem) {
            Ok(item) => Ok(item),
            Err(reason) => Err(ItemError::new(locator, reason)),
        };
        if tx.blocking_send(result).is_err() {
            debug!("vault stream receiver dropped, stopping walk");
            return;
        }
    }
}

fn note_item(
    path: &Path,
    root: &Path,
    by_stem: &HashMap<String, PathBuf>,
) -> Result<ExtractedItem, String> {
    let body = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let relative = path.strip_prefix(root).unwrap_or(path);

    let wikilinks = parse_wikilinks(&body);
    let tags = parse_tags(&body);

    let links: Vec<ItemLink> = wikilinks
        .iter()
        .filter_map(|target| by_stem.get(&target.to_lowercase()))
        .filter(|resolved| resolved.as_path() != path)
        .map(|resolved| ItemLink {
            relation: RelationKind::PartOf,
            locator: resolved.to_string_lossy().to_string(),
        })
        .collect();

    let modified: Option<DateTime<Utc>> = std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from);

    // `extracted_at` stays the time of this extraction; the note's own
    // mtime is metadata.
    let size = body.len() as u64;
    let mut item = ExtractedItem::new(
        SourceKind::Vault,
        path.to_string_lossy().to_string(),
        Payload::Text { body },
    );
    item.metadata = serde_json::json!({
        "vault_path": relative.to_string_lossy(),
        "title": path.file_stem().and_then(|s| s.to_str()),
        "wikilinks": wikilinks,
        "tags": tags,
        "size": size,
        "mime_type": "text/markdown",
        "modified_at": modified.map(|t| t.timestamp()),
    });
    item.links = links;
    Ok(item)
}

/// Targets of `[[wikilinks]]`, without alias or heading suffixes.
fn parse_wikilinks(body: &str) -> Vec<String> {
    let link = Regex::new(r"\[\[([^\]\[]+)\]\]").expect("wikilink regex");
    let mut out = Vec::new();
    for cap in link.captures_iter(body) {
        let inner = &cap[1];
        // `[[Target|alias]]` and `[[Target#heading]]` both point at Target.
        let target = inner
            .split('|')
            .next()
            .unwrap_or(inner)
            .split('#')
            .next()
            .unwrap_or(inner)
            .trim();
        if !target.is_empty() && !out.iter().any(|t| t == target) {
            out.push(target.to_string());
        }
    }
    out
}

fn parse_tags(body: &str) -> Vec<String> {
    let tag = Regex::new(r"(?:^|\s)#([A-Za-z][A-Za-z0-9_/-]*)").expect("tag regex");
    let mut out = Vec::new();
    for cap in tag.captures_iter(body) {
        let t = cap[1].to_string();
        if !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wikilinks_drop_aliases_and_headings() {
        let body = "See [[Project Plan|the plan]] and [[Meetings#2024]] and [[Plain]].";
        assert_eq!(parse_wikilinks(body), vec!["Project Plan", "Meetings", "Plain"]);
    }

    #[test]
    fn wikilinks_deduplicate() {
        assert_eq!(parse_wikilinks("[[A]] then [[A]] then [[B]]"), vec!["A", "B"]);
    }

    #[test]
    fn tags_require_word_boundary() {
        let body = "#daily note about rust#notatag and #work/projects";
        assert_eq!(parse_tags(body), vec!["daily", "work/projects"]);
    }

    #[test]
    fn backdated_note_keeps_extraction_time() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let path = root.join("old.md");
        std::fs::write(&path, "# Old note\n").unwrap();

        let past = std::time::SystemTime::UNIX_EPOCH
            + std::time::Duration::from_secs(1_546_300_800);
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_times(std::fs::FileTimes::new().set_modified(past))
            .unwrap();

        let item = note_item(&path, &root, &HashMap::new()).unwrap();
        // The record is stamped with this extraction, not the note's age.
        assert!((Utc::now() - item.extracted_at).num_seconds().abs() < 60);
        assert_eq!(item.metadata["modified_at"], serde_json::json!(1_546_300_800));
    }
}
