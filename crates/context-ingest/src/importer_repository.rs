//! Repository importer.
//!
//! Clones (or updates) a git repository into a local cache, resolves the
//! requested ref to a commit, and streams one record per matching file.
//! A local directory reference is scanned in place without cloning.
//!
//! Canonical locator: `{repo_url}@{commit}:{relative_path}`, so record
//! identity is pinned to the content address, not the working tree.

use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use context_ingest_core::error::{IngestError, ItemError};
use context_ingest_core::models::{ExtractedItem, Payload, SourceKind};

use crate::importer::{
    build_globset, channel, is_ignored_path, ExtractRequest, Importer, ItemSender, ItemStream,
};
use crate::options::ImportOptions;

pub struct RepositoryImporter {
    cache_dir: PathBuf,
}

impl RepositoryImporter {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Resolve the reference to a checked-out working tree plus its
    /// commit. Local directories are used in place; remote URLs are
    /// cloned into the cache (or fetched if already cached).
    fn prepare(
        &self,
        reference: &str,
        git_ref: Option<&str>,
    ) -> Result<(PathBuf, String), IngestError> {
        let local = Path::new(reference);
        if local.is_dir() {
            let sha = git_output(local, &["rev-parse", "HEAD"])
                .map_err(|e| IngestError::unavailable(format!("'{}': {}", reference, e)))?;
            return Ok((local.to_path_buf(), sha));
        }
        if reference.starts_with('/') || reference.starts_with("./") {
            return Err(IngestError::unavailable(format!(
                "repository path does not exist: {}",
                reference
            )));
        }

        let clone_dir = self.cache_dir.join(short_hash(reference));
        if clone_dir.join(".git").exists() {
            git_run(&clone_dir, &["fetch", "origin", "--tags", "--prune"])
                .map_err(IngestError::unavailable)?;
        } else {
            std::fs::create_dir_all(&self.cache_dir)
                .map_err(|e| IngestError::unavailable(e.to_string()))?;
            let dest = clone_dir.to_string_lossy().to_string();
            git_run(Path::new("."), &["clone", reference, &dest])
                .map_err(|e| IngestError::unavailable(format!("clone failed: {}", e)))?;
        }

        let target = match git_ref {
            Some(r) => r.to_string(),
            None => git_output(&clone_dir, &["rev-parse", "origin/HEAD"])
                .or_else(|_| git_output(&clone_dir, &["rev-parse", "HEAD"]))
                .map_err(IngestError::unavailable)?,
        };
        git_run(&clone_dir, &["checkout", "--detach", &target])
            .map_err(|e| IngestError::unavailable(format!("cannot check out '{}': {}", target, e)))?;
        let sha = git_output(&clone_dir, &["rev-parse", "HEAD"]).map_err(IngestError::unavailable)?;

        Ok((clone_dir, sha))
    }
}

#[async_trait]
impl Importer for RepositoryImporter {
    fn source_kind(&self) -> SourceKind {
        SourceKind::Repository
    }

    fn description(&self) -> &str {
        "Import files from a git repository (remote URL or local checkout)"
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<ItemStream, IngestError> {
        let opts = match &request.options {
            ImportOptions::Repository(opts) => opts.clone(),
            _ => {
                return Err(IngestError::InvalidOptions(
                    "repository importer given non-repository options".to_string(),
                ))
            }
        };

        let reference = request.reference.clone();
        let cache_dir = self.cache_dir.clone();
        let git_ref = opts.git_ref.clone();
        let (repo_dir, sha) = tokio::task::spawn_blocking(move || {
            RepositoryImporter::new(cache_dir).prepare(&reference, git_ref.as_deref())
        })
        .await
        .map_err(|e| IngestError::unavailable(e.to_string()))??;

        let include = build_globset(&opts.include_globs)?;
        let exclude = build_globset(&opts.exclude_globs)?;

        let repo_url = request.reference.clone();
        let (tx, rx) = channel();
        tokio::task::spawn_blocking(move || {
            walk_repository(&repo_dir, &repo_url, &sha, &include, &exclude, tx);
        });

        Ok(rx)
    }
}

fn walk_repository(
    repo_dir: &Path,
    repo_url: &str,
    sha: &str,
    include: &globset::GlobSet,
    exclude: &globset::GlobSet,
    tx: ItemSender,
) {
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(repo_dir) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let locator = e
                    .path()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| repo_dir.to_string_lossy().to_string());
                if tx
                    .blocking_send(Err(ItemError::new(locator, e.to_string())))
                    .is_err()
                {
                    return;
                }
                continue;
            }
        };
        if entry.file_type().is_file() {
            entries.push(entry.into_path());
        }
    }
    entries.sort();

    for path in entries {
        let relative = path.strip_prefix(repo_dir).unwrap_or(&path);
        let rel_str = relative.to_string_lossy().to_string();
        if is_ignored_path(relative) || exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }

        let locator = format!("{}@{}:{}", repo_url, sha, rel_str);
        let result = match file_item(&path, &rel_str, repo_dir, repo_url, sha, &locator) {
            Ok(item) => Ok(item),
            Err(reason) => Err(ItemError::new(locator, reason)),
        };
        if tx.blocking_send(result).is_err() {
            debug!("repository stream receiver dropped, stopping walk");
            return;
        }
    }
}

fn file_item(
    path: &Path,
    rel_str: &str,
    repo_dir: &Path,
    repo_url: &str,
    sha: &str,
    locator: &str,
) -> Result<ExtractedItem, String> {
    let body = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let size = body.len() as u64;

    // `extracted_at` stays the time of this extraction; the file's last
    // commit time and author are metadata.
    let committed_at = file_last_commit_time(repo_dir, path);
    let author = file_last_author(repo_dir, path);

    let mut item = ExtractedItem::new(SourceKind::Repository, locator, Payload::Text { body });
    item.metadata = serde_json::json!({
        "repo_url": repo_url,
        "commit": sha,
        "path": rel_str,
        "size": size,
        "author": author,
        "committed_at": committed_at,
    });
    Ok(item)
}

/// Last commit timestamp for a file, if git can tell us.
fn file_last_commit_time(repo_dir: &Path, file_path: &Path) -> Option<i64> {
    let output = Command::new("git")
        .args(["log", "-1", "--format=%ct", "--"])
        .arg(file_path)
        .current_dir(repo_dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}

fn file_last_author(repo_dir: &Path, file_path: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["log", "-1", "--format=%an", "--"])
        .arg(file_path)
        .current_dir(repo_dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let author = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!author.is_empty()).then_some(author)
}

fn git_run(dir: &Path, args: &[&str]) -> Result<(), String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| format!("failed to execute git: {}", e))?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(())
}

fn git_output(dir: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| format!("failed to execute git: {}", e))?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}
