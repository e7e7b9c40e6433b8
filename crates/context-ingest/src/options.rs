//! Per-job import options.
//!
//! An import request carries a JSON mapping of options; before the job
//! starts they are deserialized into the typed struct for the requested
//! source kind and validated. Anything unrecognized or out of range
//! fails fast with [`IngestError::InvalidOptions`] — the job never
//! reaches the resolving stage.

use globset::Glob;
use serde::Deserialize;

use context_ingest_core::error::IngestError;
use context_ingest_core::models::SourceKind;

/// Validated options for one import job, scoped to that job. Passed
/// explicitly rather than read from process-wide state so concurrent
/// jobs cannot couple through configuration.
#[derive(Debug, Clone)]
pub enum ImportOptions {
    Repository(RepositoryOptions),
    Web(WebOptions),
    Media(MediaOptions),
    Vault(VaultOptions),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryOptions {
    /// Branch, tag, or commit to check out. Defaults to the remote HEAD.
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebOptions {
    /// 0 = fetch only the referenced page.
    #[serde(default)]
    pub max_depth: u32,
    /// Follow links off the reference's host.
    #[serde(default)]
    pub follow_external: bool,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

fn default_max_pages() -> usize {
    200
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MediaOptions {
    /// Descend into hidden directories.
    #[serde(default)]
    pub include_hidden: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultOptions {
    #[serde(default = "default_note_extension")]
    pub note_extension: String,
}

fn default_note_extension() -> String {
    "md".to_string()
}

/// Parse and validate the raw options mapping for a source kind.
pub fn validate(kind: SourceKind, raw: &serde_json::Value) -> Result<ImportOptions, IngestError> {
    if !raw.is_object() && !raw.is_null() {
        return Err(IngestError::InvalidOptions(
            "options must be a JSON object".to_string(),
        ));
    }
    let value = if raw.is_null() {
        serde_json::json!({})
    } else {
        raw.clone()
    };

    match kind {
        SourceKind::Repository => {
            let opts: RepositoryOptions = deserialize(value)?;
            for pattern in opts.include_globs.iter().chain(opts.exclude_globs.iter()) {
                Glob::new(pattern).map_err(|e| {
                    IngestError::InvalidOptions(format!("bad glob '{}': {}", pattern, e))
                })?;
            }
            Ok(ImportOptions::Repository(opts))
        }
        SourceKind::Web => {
            let opts: WebOptions = deserialize(value)?;
            if opts.max_depth > 8 {
                return Err(IngestError::InvalidOptions(
                    "max_depth must be <= 8".to_string(),
                ));
            }
            if opts.max_pages == 0 {
                return Err(IngestError::InvalidOptions(
                    "max_pages must be >= 1".to_string(),
                ));
            }
            Ok(ImportOptions::Web(opts))
        }
        SourceKind::Image | SourceKind::Video | SourceKind::Audio => {
            let opts: MediaOptions = deserialize(value)?;
            Ok(ImportOptions::Media(opts))
        }
        SourceKind::Vault => {
            let opts: VaultOptions = deserialize(value)?;
            if opts.note_extension.is_empty() || opts.note_extension.starts_with('.') {
                return Err(IngestError::InvalidOptions(
                    "note_extension must be a bare extension like 'md'".to_string(),
                ));
            }
            Ok(ImportOptions::Vault(opts))
        }
    }
}

fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, IngestError> {
    serde_json::from_value(value).map_err(|e| IngestError::InvalidOptions(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_options_use_defaults() {
        let opts = validate(SourceKind::Vault, &serde_json::Value::Null).unwrap();
        match opts {
            ImportOptions::Vault(v) => assert_eq!(v.note_extension, "md"),
            other => panic!("unexpected options: {:?}", other),
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = validate(SourceKind::Web, &json!({"max_dpeth": 2})).unwrap_err();
        assert!(matches!(err, IngestError::InvalidOptions(_)));
    }

    #[test]
    fn bad_glob_is_rejected() {
        let err = validate(
            SourceKind::Repository,
            &json!({"include_globs": ["src/[*.rs"]}),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::InvalidOptions(_)));
    }

    #[test]
    fn depth_and_extension_bounds() {
        assert!(validate(SourceKind::Web, &json!({"max_depth": 9})).is_err());
        assert!(validate(SourceKind::Vault, &json!({"note_extension": ".md"})).is_err());
        assert!(validate(SourceKind::Web, &json!({"max_depth": 2})).is_ok());
    }
}
