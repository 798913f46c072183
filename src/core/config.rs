use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::analysis::locale::LocaleMatch;
use crate::core::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub storage_path: PathBuf,

    // Command queue
    pub command_batch_size: usize, // Auto-flush threshold for pending commands

    // Background catch-up
    pub background_batch_size: usize, // Max documents reprocessed per pass

    // Locale handling
    pub default_locale: String,
    pub locale_match: LocaleMatch, // Expansion breadth for untokenised text

    // Query compilation
    pub lowercase_expanded_terms: bool,
    pub tenant: Option<String>, // Tenant prefix for identity rewriting

    // Content
    pub max_atomic_content_size: u64, // Larger bodies defer to the catch-up worker
}

impl IndexerConfig {
    /// Load a configuration file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            Error::new(
                ErrorKind::Parse,
                format!("bad config {}: {}", path.display(), e),
            )
        })
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            storage_path: PathBuf::from("./index-data"),
            command_batch_size: 100,            // Flush every 100 pending commands
            background_batch_size: 1000,        // Reprocess up to 1000 docs per pass
            default_locale: "en".to_string(),
            locale_match: LocaleMatch::ExactAndLanguage,
            lowercase_expanded_terms: true,
            tenant: None,
            max_atomic_content_size: 1024 * 1024, // 1MB inline, rest deferred
        }
    }
}
