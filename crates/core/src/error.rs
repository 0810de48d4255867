use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("no usable text could be extracted from {0}")]
    ExtractionEmpty(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Broad category of a generative-model failure, used to pick user guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    UnknownModel,
    Unauthorized,
    RateLimited,
    Other,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("401 Unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limit reached: {0}")]
    RateLimited(String),

    #[error("model unavailable: {0}")]
    UnknownModel(String),

    #[error("http error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl LlmError {
    /// Structured variants win; free-text matching is only used for errors
    /// that carry no status or code of their own.
    pub fn kind(&self) -> FailureKind {
        match self {
            LlmError::Unauthorized(_) => FailureKind::Unauthorized,
            LlmError::RateLimited(_) => FailureKind::RateLimited,
            LlmError::UnknownModel(_) => FailureKind::UnknownModel,
            other => classify_message(&other.to_string()),
        }
    }
}

pub fn classify_message(message: &str) -> FailureKind {
    let lowered = message.to_lowercase();
    if lowered.contains("model_decommissioned")
        || lowered.contains("model_not_found")
        || lowered.contains("does not exist")
    {
        FailureKind::UnknownModel
    } else if lowered.contains("401") || lowered.contains("unauthorized") {
        FailureKind::Unauthorized
    } else if lowered.contains("rate limit") || lowered.contains("rate_limit") {
        FailureKind::RateLimited
    } else {
        FailureKind::Other
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_variants_do_not_depend_on_message_text() {
        let error = LlmError::RateLimited("slow down".to_string());
        assert_eq!(error.kind(), FailureKind::RateLimited);

        let error = LlmError::Unauthorized(String::new());
        assert_eq!(error.kind(), FailureKind::Unauthorized);
    }

    #[test]
    fn api_errors_fall_back_to_message_matching() {
        let error = LlmError::Api {
            status: 400,
            message: "The model `llama3-70b-8192` has been decommissioned (model_decommissioned)"
                .to_string(),
        };
        assert_eq!(error.kind(), FailureKind::UnknownModel);

        let error = LlmError::Api {
            status: 503,
            message: "upstream overloaded".to_string(),
        };
        assert_eq!(error.kind(), FailureKind::Other);
    }

    #[test]
    fn message_classification_priority() {
        assert_eq!(classify_message("Rate limit reached for model"), FailureKind::RateLimited);
        assert_eq!(classify_message("Error 401 Unauthorized"), FailureKind::Unauthorized);
        assert_eq!(classify_message("connection reset"), FailureKind::Other);
    }
}
