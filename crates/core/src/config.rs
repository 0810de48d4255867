use crate::answer::DEFAULT_CACHE_CAPACITY;
use crate::chunking::ChunkingConfig;
use crate::error::IngestError;
use crate::index::DEFAULT_SEARCH_LIMIT;
use crate::llm::{is_known_model, DEFAULT_API_BASE_URL, DEFAULT_MODEL, KNOWN_MODELS};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_SOURCE_DIR: &str = "documentos";
pub const DEFAULT_OUTPUT_DIR: &str = "documentos_chunks";
pub const DEFAULT_FILE_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Folder scanned for `.pdf`, `.txt` and `.json` sources.
    pub source_dir: PathBuf,
    /// Folder holding one passage record per ingested document.
    pub output_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub model: String,
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub strict_by_default: bool,
    pub search_limit: usize,
    /// Zero disables answer caching.
    pub answer_cache_capacity: usize,
    /// Throttle between files of one ingestion pass.
    pub file_pause: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from(DEFAULT_SOURCE_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            chunking: ChunkingConfig::default(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            strict_by_default: true,
            search_limit: DEFAULT_SEARCH_LIMIT,
            answer_cache_capacity: DEFAULT_CACHE_CAPACITY,
            file_pause: DEFAULT_FILE_PAUSE,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        self.chunking.validate()?;

        if self.search_limit == 0 {
            return Err(IngestError::InvalidConfig(
                "search limit must be greater than zero".to_string(),
            ));
        }

        if !is_known_model(&self.model) {
            warn!(
                model = %self.model,
                known = %KNOWN_MODELS.join(", "),
                "configured model is not in the verified list"
            );
        }

        Ok(())
    }

    /// The API key with surrounding whitespace removed; blank keys count as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ServiceConfig::default();

        assert_eq!(config.source_dir, PathBuf::from("documentos"));
        assert_eq!(config.output_dir, PathBuf::from("documentos_chunks"));
        assert_eq!(config.chunking.max_chars, 1_000);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.model, "llama-3.3-70b-versatile");
        assert!(config.strict_by_default);
        assert_eq!(config.search_limit, 8);
        assert_eq!(config.answer_cache_capacity, 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_chunking_is_rejected() {
        let mut config = ServiceConfig::default();
        config.chunking.overlap_chars = config.chunking.max_chars;
        assert!(matches!(
            config.validate(),
            Err(IngestError::InvalidChunkConfig(_))
        ));

        let config = ServiceConfig {
            search_limit: 0,
            ..ServiceConfig::default()
        };
        assert!(matches!(config.validate(), Err(IngestError::InvalidConfig(_))));
    }

    #[test]
    fn unknown_model_only_warns() {
        let config = ServiceConfig {
            model: "llama3-70b-8192".to_string(),
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let mut config = ServiceConfig::default();
        assert_eq!(config.api_key(), None);

        config.api_key = Some("   ".to_string());
        assert_eq!(config.api_key(), None);

        config.api_key = Some(" gsk_abc ".to_string());
        assert_eq!(config.api_key(), Some("gsk_abc"));
    }
}
