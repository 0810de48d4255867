pub mod answer;
pub mod chunking;
pub mod config;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod store;
pub mod traits;

pub use answer::{AnswerCache, AnswerComposer, SharedChatModel};
pub use chunking::{chunk_text, ChunkingConfig};
pub use config::ServiceConfig;
pub use error::{FailureKind, IngestError, LlmError, Result};
pub use extractor::{
    extract_document, BracketScrapeStrategy, ExtractedText, PdfExtractionChain, PdfStrategy,
    RawLineStrategy, SourceFormat, TextLayerStrategy,
};
pub use index::CorpusSnapshot;
pub use ingest::{discover_source_files, process_document, ProcessedDocument};
pub use llm::{GroqClient, KNOWN_MODELS};
pub use models::{
    AskOutcome, ExtractionMethod, IngestionOutcome, IngestionReport, PassageSet,
    PassageSetMetadata, Posting, SearchMatch, ServiceStatus, SkippedFile,
};
pub use normalize::{clean, tokenize};
pub use orchestrator::QaService;
pub use traits::{ChatMessage, ChatModel, CompletionRequest, Role};
