//! Media importers for image, video, and audio files.
//!
//! One file-walking implementation parameterized by kind and extension
//! set. Media bytes stay on disk: the payload is a binary reference
//! carrying the file's sha256, which is what the store uses for change
//! and duplicate detection.
//!
//! Canonical locator: the absolute file path.

use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use context_ingest_core::error::{IngestError, ItemError};
use context_ingest_core::models::{ExtractedItem, Payload, SourceKind};

use crate::importer::{channel, is_ignored_path, ExtractRequest, Importer, ItemSender, ItemStream};
use crate::options::{ImportOptions, MediaOptions};

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpeg", "jpg", "bmp", "svg", "gif", "webp", "tiff", "heic", "nef",
];
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "mpg", "m4v",
];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac", "wma", "opus"];

pub struct MediaImporter {
    kind: SourceKind,
    extensions: &'static [&'static str],
    description: &'static str,
}

impl MediaImporter {
    pub fn image() -> Self {
        Self {
            kind: SourceKind::Image,
            extensions: IMAGE_EXTENSIONS,
            description: "Import image files as binary references with content hashes",
        }
    }

    pub fn video() -> Self {
        Self {
            kind: SourceKind::Video,
            extensions: VIDEO_EXTENSIONS,
            description: "Import video files as binary references with content hashes",
        }
    }

    pub fn audio() -> Self {
        Self {
            kind: SourceKind::Audio,
            extensions: AUDIO_EXTENSIONS,
            description: "Import audio files as binary references with content hashes",
        }
    }
}

fn accepts(extensions: &[&str], path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .map(|e| extensions.contains(&e.as_str()))
        .unwrap_or(false)
}

#[async_trait]
impl Importer for MediaImporter {
    fn source_kind(&self) -> SourceKind {
        self.kind
    }

    fn description(&self) -> &str {
        self.description
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<ItemStream, IngestError> {
        let opts = match &request.options {
            ImportOptions::Media(opts) => opts.clone(),
            _ => {
                return Err(IngestError::InvalidOptions(
                    "media importer given non-media options".to_string(),
                ))
            }
        };

        let root = Path::new(&request.reference);
        if !root.exists() {
            return Err(IngestError::unavailable(format!(
                "media path does not exist: {}",
                request.reference
            )));
        }
        let root = root
            .canonicalize()
            .map_err(|e| IngestError::unavailable(e.to_string()))?;

        let kind = self.kind;
        let extensions = self.extensions;
        let (tx, rx) = channel();
        tokio::task::spawn_blocking(move || {
            walk_media(kind, extensions, &root, &opts, tx);
        });

        Ok(rx)
    }
}

fn walk_media(
    kind: SourceKind,
    extensions: &'static [&'static str],
    root: &Path,
    opts: &MediaOptions,
    tx: ItemSender,
) {
    let mut files: Vec<PathBuf> = Vec::new();
    if root.is_file() {
        if accepts(extensions, root) {
            files.push(root.to_path_buf());
        } else {
            let reason = format!("not a recognized {} file", kind);
            let _ = tx.blocking_send(Err(ItemError::new(root.to_string_lossy(), reason)));
            return;
        }
    } else {
        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if is_ignored_path(relative) {
                continue;
            }
            if !opts.include_hidden && is_hidden(relative) {
                continue;
            }
            if accepts(extensions, path) {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
    }

    for path in files {
        let locator = path.to_string_lossy().to_string();
        let result = match media_item(kind, &path) {
            Ok(item) => Ok(item),
            Err(reason) => Err(ItemError::new(locator, reason)),
        };
        if tx.blocking_send(result).is_err() {
            debug!("media stream receiver dropped, stopping walk");
            return;
        }
    }
}

fn is_hidden(relative: &Path) -> bool {
    relative.components().any(|c| {
        c.as_os_str()
            .to_string_lossy()
            .starts_with('.')
    })
}

fn media_item(kind: SourceKind, path: &Path) -> Result<ExtractedItem, String> {
    let metadata = std::fs::metadata(path).map_err(|e| e.to_string())?;
    let size = metadata.len();
    let sha256 = hash_file(path).map_err(|e| e.to_string())?;
    let modified: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::<Utc>::from);

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let locator = path.to_string_lossy().to_string();

    let mut item = ExtractedItem::new(
        kind,
        locator.clone(),
        Payload::Binary {
            reference: locator,
            size,
            sha256,
        },
    );
    // `extracted_at` stays the time of this extraction; the file's own
    // mtime is metadata.
    item.metadata = serde_json::json!({
        "filename": path.file_name().and_then(|n| n.to_str()),
        "extension": extension,
        "mime_type": mime_type(kind, &extension),
        "size": size,
        "modified_at": modified.map(|t| t.timestamp()),
    });
    Ok(item)
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn mime_type(kind: SourceKind, extension: &str) -> String {
    let family = match kind {
        SourceKind::Image => "image",
        SourceKind::Video => "video",
        SourceKind::Audio => "audio",
        _ => "application",
    };
    let subtype = match extension {
        "jpg" => "jpeg",
        "svg" => "svg+xml",
        "mkv" => "x-matroska",
        "mov" => "quicktime",
        "mp3" => "mpeg",
        "m4a" | "m4v" => "mp4",
        other => other,
    };
    format!("{}/{}", family, subtype)
}
