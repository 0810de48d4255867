//! The question-answering service: owns the active corpus snapshot, the
//! answer composer and the single-flight ingestion pass.

use crate::answer::{AnswerComposer, SharedChatModel, NO_INPUT_MESSAGE};
use crate::config::ServiceConfig;
use crate::index::CorpusSnapshot;
use crate::ingest::{discover_source_files, process_document};
use crate::models::{
    AskOutcome, IngestionOutcome, IngestionReport, SearchMatch, ServiceStatus, SkippedFile,
};
use crate::store::{latest_processed_at, load_corpus};
use crate::{IngestError, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Held for the duration of one ingestion pass; releases the flag on drop.
struct IngestionPermit<'a> {
    flag: &'a AtomicBool,
}

impl<'a> IngestionPermit<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for IngestionPermit<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct QaService {
    config: ServiceConfig,
    snapshot: RwLock<Arc<CorpusSnapshot>>,
    composer: AnswerComposer,
    ingesting: AtomicBool,
    last_ingestion: Mutex<Option<DateTime<Utc>>>,
}

impl QaService {
    /// Validates `config`, prepares the working directories and loads
    /// whatever passage records are already on disk. The last-ingestion time
    /// starts as the newest record's processing time.
    ///
    /// `model` is `None` when no credential is configured; questions are then
    /// answered with configuration guidance instead of a generated reply.
    pub async fn open(config: ServiceConfig, model: Option<SharedChatModel>) -> Result<Self> {
        config.validate()?;
        ensure_directories(&config).await?;

        let composer = AnswerComposer::new(model, config.model.clone(), config.answer_cache_capacity);
        let service = Self {
            config,
            snapshot: RwLock::new(Arc::new(CorpusSnapshot::default())),
            composer,
            ingesting: AtomicBool::new(false),
            last_ingestion: Mutex::new(None),
        };

        let passages = service.reload().await?;

        let output_dir = service.config.output_dir.clone();
        let recorded = tokio::task::spawn_blocking(move || latest_processed_at(&output_dir)).await??;
        *service.last_ingestion.lock().await = recorded;

        if passages == 0 {
            let source_dir = service.config.source_dir.clone();
            let pending = tokio::task::spawn_blocking(move || discover_source_files(&source_dir).len()).await?;
            info!(
                pending,
                source_dir = %service.config.source_dir.display(),
                "no passages loaded; run an ingestion pass to index the source documents"
            );
        }

        Ok(service)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The snapshot readers should use; it never changes underneath them.
    pub async fn snapshot(&self) -> Arc<CorpusSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Rebuilds the snapshot from the persisted records and swaps it in.
    /// Returns the number of passages now loaded.
    pub async fn reload(&self) -> Result<usize> {
        let output_dir = self.config.output_dir.clone();
        let snapshot =
            tokio::task::spawn_blocking(move || load_corpus(&output_dir).map(CorpusSnapshot::build))
                .await??;

        let passages = snapshot.total_passages();
        info!(
            documents = snapshot.documents(),
            passages,
            terms = snapshot.term_count(),
            "corpus snapshot rebuilt"
        );

        *self.snapshot.write().await = Arc::new(snapshot);
        Ok(passages)
    }

    pub async fn search(&self, query: &str, limit: usize) -> Vec<SearchMatch> {
        self.snapshot().await.search(query, limit)
    }

    pub async fn answer(&self, question: &str, context: &str, strict: bool) -> String {
        self.composer.answer(question, context, strict).await
    }

    /// Retrieves passages for `question` and composes an answer from them.
    pub async fn ask(&self, question: &str, strict: bool) -> AskOutcome {
        let question = question.trim();
        if question.is_empty() {
            return AskOutcome {
                answer: NO_INPUT_MESSAGE.to_string(),
                matches: Vec::new(),
            };
        }

        // Observed before the snapshot read so an answer built on a corpus
        // replaced mid-flight is never cached.
        let generation = self.composer.cache_generation().await;
        let matches = self.search(question, self.config.search_limit).await;
        let context = build_context(&matches);
        debug!(matches = matches.len(), context_chars = context.chars().count(), "context assembled");

        AskOutcome {
            answer: self
                .composer
                .answer_for_generation(generation, question, &context, strict)
                .await,
            matches,
        }
    }

    /// Runs one ingestion pass and reports whether any document succeeded.
    /// A pass already in flight makes this return `false` immediately.
    pub async fn run_ingestion(&self) -> bool {
        match self.try_run_ingestion().await {
            Ok(outcome) => outcome.succeeded(),
            Err(error) => {
                warn!(%error, "ingestion pass failed");
                false
            }
        }
    }

    pub async fn try_run_ingestion(&self) -> Result<IngestionOutcome> {
        let Some(_permit) = IngestionPermit::acquire(&self.ingesting) else {
            info!("ingestion already running; request rejected");
            return Ok(IngestionOutcome::Busy);
        };

        ensure_directories(&self.config).await?;

        let source_dir = self.config.source_dir.clone();
        let files = tokio::task::spawn_blocking(move || discover_source_files(&source_dir)).await?;
        if files.is_empty() {
            info!(source_dir = %self.config.source_dir.display(), "no source documents found");
            return Ok(IngestionOutcome::NoSourceFiles);
        }

        let mut report = IngestionReport {
            discovered: files.len(),
            ..IngestionReport::default()
        };
        info!(files = files.len(), "ingestion pass started");

        let last = files.len() - 1;
        for (position, path) in files.into_iter().enumerate() {
            match self.process_file(path.clone()).await {
                Ok(passages) => {
                    report.succeeded += 1;
                    report.total_passages += passages;
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "document skipped");
                    report.skipped.push(SkippedFile {
                        path,
                        reason: error.to_string(),
                    });
                }
            }

            if position < last && !self.config.file_pause.is_zero() {
                tokio::time::sleep(self.config.file_pause).await;
            }
        }

        self.reload().await?;
        self.composer.clear_cache().await;

        let finished_at = Utc::now();
        *self.last_ingestion.lock().await = Some(finished_at);
        report.finished_at = Some(finished_at);

        info!(
            succeeded = report.succeeded,
            discovered = report.discovered,
            passages = report.total_passages,
            skipped = report.skipped.len(),
            "ingestion pass finished"
        );
        Ok(IngestionOutcome::Completed(report))
    }

    async fn process_file(&self, path: PathBuf) -> Result<usize> {
        let output_dir = self.config.output_dir.clone();
        let chunking = self.config.chunking;
        let processed =
            tokio::task::spawn_blocking(move || process_document(&path, &output_dir, chunking))
                .await??;
        Ok(processed.passages)
    }

    pub fn is_busy(&self) -> bool {
        self.ingesting.load(Ordering::Acquire)
    }

    pub async fn last_ingestion(&self) -> Option<DateTime<Utc>> {
        *self.last_ingestion.lock().await
    }

    pub async fn status(&self) -> ServiceStatus {
        let snapshot = self.snapshot().await;
        ServiceStatus {
            documents: snapshot.documents(),
            total_passages: snapshot.total_passages(),
            busy: self.is_busy(),
            last_ingestion: self.last_ingestion().await,
        }
    }

    pub async fn cached_answers(&self) -> usize {
        self.composer.cached_answers().await
    }
}

async fn ensure_directories(config: &ServiceConfig) -> Result<(), IngestError> {
    tokio::fs::create_dir_all(&config.source_dir).await?;
    tokio::fs::create_dir_all(&config.output_dir).await?;
    Ok(())
}

fn build_context(matches: &[SearchMatch]) -> String {
    matches
        .iter()
        .map(|found| format!("[{} #{}]\n{}", found.document, found.passage_index, found.text))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::store::discover_records;
    use crate::traits::{ChatModel, CompletionRequest};
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;
    use std::time::Duration;
    use tempfile::tempdir;

    struct CountingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for CountingModel {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("El tucán pico iris habita bosques húmedos tropicales del norte de Colombia.".to_string())
        }
    }

    /// Holds its first completion until released, so a test can change the
    /// corpus while an answer is being generated.
    struct GatedModel {
        calls: AtomicUsize,
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ChatModel for GatedModel {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                self.started.notify_one();
                self.release.notified().await;
                return Ok("Respuesta construida con el corpus anterior a la nueva ingesta.".to_string());
            }
            Ok("Respuesta construida con el corpus vigente después de la ingesta.".to_string())
        }
    }

    fn config_in(root: &Path) -> ServiceConfig {
        ServiceConfig {
            source_dir: root.join("documentos"),
            output_dir: root.join("documentos_chunks"),
            file_pause: Duration::ZERO,
            ..ServiceConfig::default()
        }
    }

    fn tucan_paragraph() -> String {
        (0..16)
            .map(|index| {
                format!(
                    "El tucán observado en la estación {index:02} se alimentaba de frutos maduros en el dosel alto."
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn long_text_document_is_chunked_indexed_and_reloaded() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        fs::create_dir_all(&config.source_dir)?;
        let paragraph = tucan_paragraph();
        assert!(paragraph.chars().count() > 1_500);
        fs::write(config.source_dir.join("Tucan.txt"), &paragraph)?;

        let service = QaService::open(config.clone(), None).await?;
        assert_eq!(service.status().await.total_passages, 0);

        assert!(service.run_ingestion().await);

        let status = service.status().await;
        assert_eq!(status.documents, 1);
        assert!(status.total_passages >= 2);
        assert!(!status.busy);
        assert!(status.last_ingestion.is_some());

        let snapshot = service.snapshot().await;
        for index in 0..status.total_passages {
            let passage = snapshot.passage("Tucan.txt", index).ok_or("missing passage")?;
            assert!(passage.chars().count() >= 50);
        }

        let matches = service.search("tucán dosel", 8).await;
        assert!(!matches.is_empty());
        assert!(matches.iter().all(|found| found.document == "Tucan.txt"));

        let reopened = QaService::open(config, None).await?;
        let reopened_status = reopened.status().await;
        assert_eq!(reopened_status.total_passages, status.total_passages);
        assert!(reopened_status.last_ingestion.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn empty_source_folder_reports_no_success() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let service = QaService::open(config_in(dir.path()), None).await?;

        assert!(matches!(
            service.try_run_ingestion().await?,
            IngestionOutcome::NoSourceFiles
        ));
        assert!(!service.run_ingestion().await);
        assert!(dir.path().join("documentos").is_dir());
        assert!(dir.path().join("documentos_chunks").is_dir());
        assert!(!service.is_busy());
        Ok(())
    }

    #[tokio::test]
    async fn ingestion_in_flight_rejects_a_second_pass() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        let service = QaService::open(config.clone(), None).await?;
        fs::write(config.source_dir.join("Tucan.txt"), tucan_paragraph())?;

        {
            let _permit = IngestionPermit::acquire(&service.ingesting).ok_or("permit unavailable")?;
            assert!(service.is_busy());
            assert!(matches!(service.try_run_ingestion().await?, IngestionOutcome::Busy));
            assert!(!service.run_ingestion().await);
            assert!(discover_records(&config.output_dir)?.is_empty());
        }

        assert!(!service.is_busy());
        assert!(service.run_ingestion().await);
        assert_eq!(discover_records(&config.output_dir)?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failing_documents_are_skipped_without_stopping_the_pass(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        let service = QaService::open(config.clone(), None).await?;

        fs::write(config.source_dir.join("a_roto.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(config.source_dir.join("b_corto.txt"), "Muy poco texto.")?;
        fs::write(config.source_dir.join("c_tucan.txt"), tucan_paragraph())?;

        let outcome = service.try_run_ingestion().await?;
        assert!(outcome.succeeded());

        let IngestionOutcome::Completed(report) = outcome else {
            return Err("expected a completed pass".into());
        };
        assert_eq!(report.discovered, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.finished_at.is_some());
        assert_eq!(service.status().await.total_passages, report.total_passages);
        Ok(())
    }

    #[tokio::test]
    async fn ingestion_clears_cached_answers() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        fs::create_dir_all(&config.source_dir)?;
        fs::write(config.source_dir.join("Tucan.txt"), tucan_paragraph())?;

        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let shared: SharedChatModel = model.clone();
        let service = QaService::open(config, Some(shared)).await?;
        assert!(service.run_ingestion().await);

        let first = service.ask("¿Dónde come el tucán?", true).await;
        let second = service.ask("¿Dónde come el tucán?", true).await;
        assert!(!first.matches.is_empty());
        assert_eq!(first.answer, second.answer);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.cached_answers().await, 1);

        assert!(service.run_ingestion().await);
        assert_eq!(service.cached_answers().await, 0);

        service.ask("¿Dónde come el tucán?", true).await;
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn answer_in_flight_during_ingestion_is_not_cached() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = config_in(dir.path());
        fs::create_dir_all(&config.source_dir)?;
        let source = config.source_dir.join("Tucan.txt");
        fs::write(&source, tucan_paragraph())?;

        let model = Arc::new(GatedModel {
            calls: AtomicUsize::new(0),
            started: Notify::new(),
            release: Notify::new(),
        });
        let shared: SharedChatModel = model.clone();
        let service = Arc::new(QaService::open(config, Some(shared)).await?);
        assert!(service.run_ingestion().await);

        let asking = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.ask("¿Dónde come el tucán?", true).await }
        });
        model.started.notified().await;

        fs::write(&source, tucan_paragraph().replace("frutos maduros", "insectos pequeños"))?;
        assert!(service.run_ingestion().await);
        assert_eq!(service.cached_answers().await, 0);

        model.release.notify_one();
        let stale = asking.await?;
        assert!(stale.answer.contains("corpus anterior"));
        assert_eq!(service.cached_answers().await, 0);

        let fresh = service.ask("¿Dónde come el tucán?", true).await;
        assert!(fresh.answer.contains("corpus vigente"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(service.cached_answers().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn blank_questions_short_circuit() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let service = QaService::open(config_in(dir.path()), None).await?;

        let outcome = service.ask("   ", true).await;
        assert_eq!(outcome.answer, NO_INPUT_MESSAGE);
        assert!(outcome.matches.is_empty());
        Ok(())
    }

    #[test]
    fn context_lists_each_match_with_its_location() {
        let matches = vec![
            SearchMatch {
                document: "aves.pdf".to_string(),
                passage_index: 3,
                text: "El colibrí".to_string(),
                score: 11,
                matched_terms: vec!["colibri".to_string()],
            },
            SearchMatch {
                document: "rutas.txt".to_string(),
                passage_index: 0,
                text: "Ruta del colibrí".to_string(),
                score: 11,
                matched_terms: vec!["colibri".to_string()],
            },
        ];

        assert_eq!(
            build_context(&matches),
            "[aves.pdf #3]\nEl colibrí\n\n---\n\n[rutas.txt #0]\nRuta del colibrí"
        );
        assert_eq!(build_context(&[]), "");
    }
}
