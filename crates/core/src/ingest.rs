use crate::chunking::{build_chunks, normalize_whitespace, ChunkingConfig};
use crate::config::PipelineConfig;
use crate::deadline::within;
use crate::error::{EmbeddingError, IngestError, StoreError};
use crate::extractor::TextExtractor;
use crate::models::{Chunk, DocumentFingerprint};
use crate::services::RagServices;
use crate::store::{collection_for, MetadataFilter, StoredChunk};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Why an ingestion call stored nothing. Each variant has a fixed status line.
#[derive(Debug, Error)]
pub enum IngestFailure {
    #[error("The embedding model is not configured.")]
    EmbeddingNotConfigured,

    #[error("Owner id must not be blank.")]
    BlankOwner,

    #[error("No PDF documents were found.")]
    NoDocuments,

    #[error("No usable document content was extracted.")]
    NoContent,

    #[error("Error while processing {path}: {source}")]
    Document { path: String, source: IngestError },

    #[error("Failed to store document chunks: {0}")]
    Store(#[from] IngestError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReport {
    pub owner: String,
    pub documents: usize,
    pub chunks: usize,
}

impl IngestionReport {
    pub fn status(&self) -> String {
        format!("{} document chunks were stored in the vector store.", self.chunks)
    }
}

/// Splits, embeds and stores an owner's documents. Each call replaces the
/// owner's whole collection.
pub struct Ingestor {
    services: RagServices,
    config: PipelineConfig,
}

impl Ingestor {
    pub fn new(services: RagServices, config: PipelineConfig) -> Self {
        Self { services, config }
    }

    /// Status-string entry point for callers that only display the outcome.
    pub async fn ingest(&self, owner: &str, folder: &Path) -> String {
        match self.ingest_folder(owner, folder).await {
            Ok(report) => report.status(),
            Err(failure) => {
                warn!(owner, folder = %folder.display(), error = %failure, "ingestion stored nothing");
                failure.to_string()
            }
        }
    }

    pub async fn ingest_folder(&self, owner: &str, folder: &Path) -> Result<IngestionReport, IngestFailure> {
        if self.services.embedder.model().trim().is_empty() {
            return Err(IngestFailure::EmbeddingNotConfigured);
        }
        if owner.trim().is_empty() {
            return Err(IngestFailure::BlankOwner);
        }

        let files = discover_pdf_files(folder);
        if files.is_empty() {
            return Err(IngestFailure::NoDocuments);
        }

        let config = ChunkingConfig::from(&self.config);
        let mut chunks = Vec::new();
        for path in &files {
            let extractor = Arc::clone(&self.services.extractor);
            let owner_id = owner.to_string();
            let document = path.clone();

            // lopdf parsing is CPU-bound; keep it off the async workers.
            let document_chunks = tokio::task::spawn_blocking(move || {
                chunk_document(extractor.as_ref(), &owner_id, &document, config)
            })
            .await
            .map_err(IngestError::from)
            .and_then(|chunked| chunked)
            .map_err(|source| IngestFailure::Document {
                path: path.display().to_string(),
                source,
            })?;
            chunks.extend(document_chunks);
        }

        if chunks.is_empty() {
            return Err(IngestFailure::NoContent);
        }

        info!(owner, documents = files.len(), chunk_count = chunks.len(), "embedding chunks");
        let items = self.embed_chunks(chunks).await?;
        self.replace_collection(owner, &items).await?;

        Ok(IngestionReport {
            owner: owner.to_string(),
            documents: files.len(),
            chunks: items.len(),
        })
    }

    /// Removes one document's chunks from the owner's collection.
    pub async fn delete_document(&self, owner: &str, source_document_id: &str) -> Result<usize, StoreError> {
        let collection = collection_for(owner);
        let filter = MetadataFilter::SourceDocumentId(source_document_id.to_string());
        let removed = within(
            self.config.remote_timeout,
            self.services.store.delete_where(&collection, &filter),
            StoreError::Timeout,
        )
        .await?;

        info!(owner, source_document_id, removed, "deleted document chunks");
        Ok(removed)
    }

    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<StoredChunk>, IngestError> {
        let mut items = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.config.ingest_batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embeddings = within(
                self.config.remote_timeout,
                self.services.embedder.embed_batch(&texts),
                EmbeddingError::Timeout,
            )
            .await?;

            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: embeddings.len(),
                }
                .into());
            }

            items.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(embeddings)
                    .map(|(chunk, embedding)| StoredChunk { chunk, embedding }),
            );
        }

        Ok(items)
    }

    async fn replace_collection(&self, owner: &str, items: &[StoredChunk]) -> Result<(), IngestError> {
        let collection = collection_for(owner);
        let limit = self.config.remote_timeout;
        let store = &self.services.store;

        within(limit, store.delete_collection(&collection), StoreError::Timeout).await?;
        // Sized from what the model actually returned, not what it claims.
        let dimensions = items
            .first()
            .map_or_else(|| self.services.embedder.dimensions(), |item| item.embedding.len());
        within(limit, store.create_collection(&collection, dimensions), StoreError::Timeout).await?;

        for batch in items.chunks(self.config.ingest_batch_size) {
            if let Err(store_error) =
                within(limit, store.upsert(&collection, batch), StoreError::Timeout).await
            {
                error!(owner, collection = %collection, error = %store_error, "upsert failed");
                // A half-written collection would answer from part of the corpus.
                if let Err(cleanup_error) =
                    within(limit, store.delete_collection(&collection), StoreError::Timeout).await
                {
                    error!(owner, collection = %collection, error = %cleanup_error, "partial collection left behind");
                }
                return Err(store_error.into());
            }
        }

        info!(owner, collection = %collection, chunk_count = items.len(), "collection replaced");
        Ok(())
    }
}

fn chunk_document(
    extractor: &dyn TextExtractor,
    owner: &str,
    path: &Path,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let fingerprint = build_document_fingerprint(path)?;
    let pages = extractor.extract(path)?;

    let mut chunks = Vec::new();
    let mut cursor = 0u64;

    for page in pages {
        let normalized = normalize_whitespace(&page.text);
        if normalized.is_empty() {
            continue;
        }

        let (page_chunks, next_cursor) =
            build_chunks(&fingerprint, owner, Some(page.number), &normalized, config, cursor)?;
        cursor = next_cursor;
        chunks.extend(page_chunks);
    }

    Ok(chunks)
}

fn build_document_fingerprint(path: &Path) -> Result<DocumentFingerprint, IngestError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    Ok(DocumentFingerprint {
        document_id: generate_document_id(path),
        filename: name.to_string(),
        source_path: path.to_string_lossy().to_string(),
    })
}

pub fn generate_document_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder};
    use crate::error::LlmError;
    use crate::extractor::PageText;
    use crate::llm::ChatModel;
    use crate::store::{MetadataFilter, StoreHit};
    use crate::stores::InMemoryVectorStore;
    use crate::traits::VectorStore;
    use async_trait::async_trait;
    use std::fs::{self, File};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Reads the file bytes as one page; files named `bad*` fail.
    struct FileTextExtractor;

    impl TextExtractor for FileTextExtractor {
        fn extract(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.starts_with("bad") {
                return Err(IngestError::PdfParse("unreadable".to_string()));
            }
            let text = fs::read_to_string(path)?;
            Ok(text
                .split('\u{000c}')
                .enumerate()
                .map(|(index, page)| PageText {
                    number: index as u32 + 1,
                    text: page.to_string(),
                })
                .collect())
        }
    }

    struct SilentModel;

    #[async_trait]
    impl ChatModel for SilentModel {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            Ok(String::new())
        }
    }

    fn ingestor(store: Arc<InMemoryVectorStore>) -> Ingestor {
        ingestor_with(store, Arc::new(CharacterNgramEmbedder::default()), PipelineConfig::default())
    }

    fn ingestor_with(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: PipelineConfig,
    ) -> Ingestor {
        let services = RagServices {
            extractor: Arc::new(FileTextExtractor),
            embedder,
            chat: Arc::new(SilentModel),
            store,
        };
        Ingestor::new(services, config)
    }

    /// In-memory store that records the writes it sees and can refuse the
    /// n-th upsert (1-based).
    #[derive(Default)]
    struct RecordingStore {
        inner: InMemoryVectorStore,
        fail_on_upsert: Option<usize>,
        upserts: AtomicUsize,
        created_with: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn create_collection(&self, collection: &str, dimensions: usize) -> Result<(), StoreError> {
            self.created_with.lock().expect("dimension log").push(dimensions);
            self.inner.create_collection(collection, dimensions).await
        }

        async fn upsert(&self, collection: &str, items: &[StoredChunk]) -> Result<(), StoreError> {
            let call = self.upserts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_upsert == Some(call) {
                return Err(StoreError::BackendResponse {
                    backend: "recording".to_string(),
                    details: "400 Bad Request".to_string(),
                });
            }
            self.inner.upsert(collection, items).await
        }

        async fn query(&self, collection: &str, query_vector: &[f32], k: usize) -> Result<Vec<StoreHit>, StoreError> {
            self.inner.query(collection, query_vector, k).await
        }

        async fn delete_collection(&self, collection: &str) -> Result<(), StoreError> {
            self.inner.delete_collection(collection).await
        }

        async fn delete_where(&self, collection: &str, filter: &MetadataFilter) -> Result<usize, StoreError> {
            self.inner.delete_where(collection, filter).await
        }
    }

    /// Returns vectors narrower than the width it advertises.
    struct Misreporting(CharacterNgramEmbedder);

    #[async_trait]
    impl Embedder for Misreporting {
        fn model(&self) -> &str {
            "misreporting"
        }

        fn dimensions(&self) -> usize {
            128
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.0.embed_batch(texts).await
        }
    }

    fn three_page_folder() -> Result<tempfile::TempDir, std::io::Error> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("kings.pdf"),
            "Jangsu ruled Goguryeo.\u{000c}He moved the capital.\u{000c}He reigned for decades.",
        )?;
        Ok(dir)
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn document_id_is_reproducible() {
        let first = generate_document_id(Path::new("/docs/a.pdf"));
        let second = generate_document_id(Path::new("/docs/a.pdf"));
        assert_eq!(first, second);
        assert_ne!(first, generate_document_id(Path::new("/docs/b.pdf")));
    }

    #[tokio::test]
    async fn ingestion_reports_missing_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = Arc::new(InMemoryVectorStore::new());
        let status = ingestor(store).ingest("owner", dir.path()).await;
        assert_eq!(status, "No PDF documents were found.");
        Ok(())
    }

    #[tokio::test]
    async fn blank_pages_yield_no_content() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("empty.pdf"), " \n\u{200b}\u{000c}\t")?;
        let store = Arc::new(InMemoryVectorStore::new());
        let result = ingestor(store.clone()).ingest_folder("owner", dir.path()).await;
        assert!(matches!(result, Err(IngestFailure::NoContent)));
        assert_eq!(store.len(&collection_for("owner")).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn one_bad_document_aborts_the_whole_call() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a_good.pdf"), "King Jangsu ruled Goguryeo.")?;
        fs::write(dir.path().join("bad.pdf"), "ignored")?;
        let store = Arc::new(InMemoryVectorStore::new());

        let status = ingestor(store.clone()).ingest("owner", dir.path()).await;
        assert!(status.contains("bad.pdf"), "{status}");
        assert_eq!(store.len(&collection_for("owner")).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn reingestion_replaces_previous_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let first = tempdir()?;
        fs::write(first.path().join("a.pdf"), "first page\u{000c}second page")?;
        let second = tempdir()?;
        fs::write(second.path().join("b.pdf"), "only page")?;

        let store = Arc::new(InMemoryVectorStore::new());
        let ingestor = ingestor(store.clone());

        let report = ingestor.ingest_folder("owner", first.path()).await?;
        assert_eq!(report.chunks, 2);
        assert_eq!(report.status(), "2 document chunks were stored in the vector store.");

        ingestor.ingest_folder("owner", second.path()).await?;
        assert_eq!(store.len(&collection_for("owner")).await, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn delete_document_cascades_to_its_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let keep = dir.path().join("keep.pdf");
        let dropped = dir.path().join("drop.pdf");
        fs::write(&keep, "keep this page")?;
        fs::write(&dropped, "drop page one\u{000c}drop page two")?;

        let store = Arc::new(InMemoryVectorStore::new());
        let ingestor = ingestor(store.clone());
        ingestor.ingest_folder("owner", dir.path()).await?;
        assert_eq!(store.len(&collection_for("owner")).await, Some(3));

        let removed = ingestor
            .delete_document("owner", &generate_document_id(&dropped))
            .await?;
        assert_eq!(removed, 2);
        assert_eq!(store.len(&collection_for("owner")).await, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn chunks_are_written_in_fixed_size_batches() -> Result<(), Box<dyn std::error::Error>> {
        let dir = three_page_folder()?;
        let store = Arc::new(RecordingStore::default());
        let config = PipelineConfig::builder().ingest_batch_size(2).build()?;
        let ingestor = ingestor_with(store.clone(), Arc::new(CharacterNgramEmbedder::default()), config);

        let report = ingestor.ingest_folder("owner", dir.path()).await?;
        assert_eq!(report.chunks, 3);
        assert_eq!(store.upserts.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.len(&collection_for("owner")).await, Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_partial_collection() -> Result<(), Box<dyn std::error::Error>> {
        let dir = three_page_folder()?;
        let store = Arc::new(RecordingStore {
            fail_on_upsert: Some(2),
            ..RecordingStore::default()
        });
        let config = PipelineConfig::builder().ingest_batch_size(1).build()?;
        let ingestor = ingestor_with(store.clone(), Arc::new(CharacterNgramEmbedder::default()), config);

        let result = ingestor.ingest_folder("owner", dir.path()).await;
        assert!(matches!(result, Err(IngestFailure::Store(IngestError::Store(_)))));
        assert_eq!(store.upserts.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.len(&collection_for("owner")).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn collection_width_follows_the_returned_vectors() -> Result<(), Box<dyn std::error::Error>> {
        let dir = three_page_folder()?;
        let store = Arc::new(RecordingStore::default());
        let embedder = Arc::new(Misreporting(CharacterNgramEmbedder { dimensions: 6 }));
        let ingestor = ingestor_with(store.clone(), embedder, PipelineConfig::default());

        ingestor.ingest_folder("owner", dir.path()).await?;
        assert_eq!(*store.created_with.lock().expect("dimension log"), vec![6]);
        Ok(())
    }

    #[tokio::test]
    async fn unconfigured_embedder_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        struct Unconfigured;

        #[async_trait]
        impl crate::embeddings::Embedder for Unconfigured {
            fn model(&self) -> &str {
                ""
            }

            fn dimensions(&self) -> usize {
                0
            }

            async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                Ok(Vec::new())
            }
        }

        let dir = tempdir()?;
        fs::write(dir.path().join("a.pdf"), "text")?;
        let services = RagServices {
            extractor: Arc::new(FileTextExtractor),
            embedder: Arc::new(Unconfigured),
            chat: Arc::new(SilentModel),
            store: Arc::new(InMemoryVectorStore::new()),
        };
        let status = Ingestor::new(services, PipelineConfig::default())
            .ingest("owner", dir.path())
            .await;
        assert_eq!(status, "The embedding model is not configured.");
        Ok(())
    }
}
