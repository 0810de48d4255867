use crate::chunking::MIN_PASSAGE_CHARS;
use crate::error::IngestError;
use crate::models::PassageSet;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const RECORD_SUFFIX: &str = "_chunks.json";

/// Record file name for a source document: `<stem>_chunks.json`.
pub fn record_file_name(source: &Path) -> Result<String, IngestError> {
    let stem = source
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| IngestError::MissingFileName(source.display().to_string()))?;
    Ok(format!("{stem}{RECORD_SUFFIX}"))
}

/// Writes the record through a temporary file so readers never see half of it.
pub fn write_passage_set(
    output_dir: &Path,
    source: &Path,
    record: &PassageSet,
) -> Result<PathBuf, IngestError> {
    fs::create_dir_all(output_dir)?;
    let target = output_dir.join(record_file_name(source)?);
    let staging = target.with_extension("json.tmp");

    fs::write(&staging, serde_json::to_vec_pretty(record)?)?;
    fs::rename(&staging, &target)?;
    Ok(target)
}

/// Lists the record files in `output_dir`, sorted by name.
pub fn discover_records(output_dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !output_dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = fs::read_dir(output_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(RECORD_SUFFIX))
        })
        .collect::<Vec<_>>();

    records.sort_unstable();
    Ok(records)
}

pub fn read_passage_set(path: &Path) -> Result<PassageSet, IngestError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Loads every record into a document-name → passages map.
///
/// Documents are keyed by their declared original name. Passages below the
/// minimum length are dropped, documents left with none are omitted, and
/// unreadable records are logged and skipped.
pub fn load_corpus(output_dir: &Path) -> Result<BTreeMap<String, Vec<String>>, IngestError> {
    let mut corpus = BTreeMap::new();

    for path in discover_records(output_dir)? {
        let record = match read_passage_set(&path) {
            Ok(record) => record,
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable passage record");
                continue;
            }
        };

        let passages = record
            .chunks
            .into_iter()
            .filter(|passage| passage.chars().count() >= MIN_PASSAGE_CHARS)
            .collect::<Vec<_>>();

        if passages.is_empty() {
            debug!(path = %path.display(), "record has no usable passages");
            continue;
        }

        debug!(document = %record.metadata.original_name, passages = passages.len(), "loaded record");
        corpus.insert(record.metadata.original_name, passages);
    }

    Ok(corpus)
}

/// Newest `processed_at` across the readable records, if any.
pub fn latest_processed_at(output_dir: &Path) -> Result<Option<DateTime<Utc>>, IngestError> {
    Ok(discover_records(output_dir)?
        .iter()
        .filter_map(|path| read_passage_set(path).ok())
        .map(|record| record.metadata.processed_at)
        .max())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PassageSetMetadata;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(name: &str, chunks: Vec<String>) -> PassageSet {
        PassageSet {
            metadata: PassageSetMetadata {
                original_name: name.to_string(),
                method: "plain-text".to_string(),
                processed_at: Utc::now(),
                total_chunks: chunks.len(),
                total_chars: chunks.iter().map(|chunk| chunk.chars().count()).sum(),
                checksum: None,
            },
            chunks,
        }
    }

    #[test]
    fn record_names_derive_from_the_file_stem() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(record_file_name(Path::new("docs/Guía Aves.pdf"))?, "Guía Aves_chunks.json");
        assert_eq!(record_file_name(Path::new("Tucan.txt"))?, "Tucan_chunks.json");
        assert!(record_file_name(Path::new("")).is_err());
        Ok(())
    }

    #[test]
    fn corpus_is_keyed_by_original_name_and_filters_short_passages(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let long = "El cucarachero común canta desde arbustos bajos cerca de las casas.".to_string();

        let written = write_passage_set(
            dir.path(),
            Path::new("cucarachero.txt"),
            &record("Cucarachero.txt", vec!["corto".to_string(), long.clone()]),
        )?;
        assert!(written.ends_with("cucarachero_chunks.json"));

        let corpus = load_corpus(dir.path())?;
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.get("Cucarachero.txt"), Some(&vec![long]));
        Ok(())
    }

    #[test]
    fn malformed_and_foreign_files_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("roto_chunks.json"), b"{ not json")?;
        fs::write(dir.path().join("notas.json"), b"{}")?;
        write_passage_set(
            dir.path(),
            Path::new("vacio.txt"),
            &record("vacio.txt", vec!["muy corto".to_string()]),
        )?;

        assert_eq!(discover_records(dir.path())?.len(), 2);
        assert!(load_corpus(dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn records_with_spanish_field_names_are_loaded() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let passage = "La pava caucana vive en bosques secundarios del Valle del Cauca y del Quindío.";
        let legacy = serde_json::json!({
            "metadata": {
                "nombreOriginal": "Pava Caucana.pdf",
                "fechaProcesamiento": "2024-03-18T14:05:09.123Z",
                "totalChunks": 2,
                "totalCaracteres": 96,
                "metodo": "pdf-parse + fallback"
            },
            "chunks": [passage, "corto"]
        });
        fs::write(
            dir.path().join("Pava Caucana_chunks.json"),
            serde_json::to_vec_pretty(&legacy)?,
        )?;

        let corpus = load_corpus(dir.path())?;
        assert_eq!(corpus.get("Pava Caucana.pdf"), Some(&vec![passage.to_string()]));

        let record = read_passage_set(&dir.path().join("Pava Caucana_chunks.json"))?;
        assert_eq!(record.metadata.method, "pdf-parse + fallback");
        assert_eq!(record.metadata.total_chars, 96);
        assert_eq!(record.metadata.checksum, None);
        Ok(())
    }

    #[test]
    fn latest_processing_time_is_the_newest_record() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert_eq!(latest_processed_at(dir.path())?, None);

        let long = "El gallito de roca andino exhibe su cresta naranja en los leks de cañones húmedos.";
        let mut older = record("gallito.txt", vec![long.to_string()]);
        older.metadata.processed_at = "2024-01-01T00:00:00Z".parse()?;
        let mut newer = record("pava.txt", vec![long.to_string()]);
        newer.metadata.processed_at = "2024-06-01T00:00:00Z".parse()?;

        write_passage_set(dir.path(), Path::new("gallito.txt"), &older)?;
        write_passage_set(dir.path(), Path::new("pava.txt"), &newer)?;
        fs::write(dir.path().join("roto_chunks.json"), b"{ not json")?;

        assert_eq!(latest_processed_at(dir.path())?, Some(newer.metadata.processed_at));
        Ok(())
    }

    #[test]
    fn missing_directory_loads_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(load_corpus(&dir.path().join("nada"))?.is_empty());
        Ok(())
    }
}
