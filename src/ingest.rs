//! Document service: upload ingestion, deletion, listing and reset.
//!
//! Every mutation keeps three things consistent: the registry row, the
//! chunks in the dense index, and the lexical index generation. Ingestion
//! runs store → preprocess → chunk → embed (one batch) → one dense upsert →
//! registry add → `notify_corpus_changed()`. A failure before the registry
//! add removes the stored file and any chunks already written, so no
//! partial document is left behind.

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::dense::DenseIndex;
use crate::embedding::Embedder;
use crate::lexical::LexicalIndex;
use crate::models::{chunk_id, Chunk, DocumentRecord};
use crate::preprocess::{extension_of, is_supported, preprocess_file};
use crate::registry::DocumentRegistry;

/// File name component of `filename` with spaces replaced by `_`.
pub fn safe_name(filename: &str) -> Option<String> {
    Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().replace(' ', "_"))
        .filter(|n| !n.is_empty())
}

pub struct DocumentService {
    uploads_dir: PathBuf,
    chunking: ChunkingConfig,
    embedder: Arc<dyn Embedder>,
    dense: Arc<dyn DenseIndex>,
    lexical: Arc<LexicalIndex>,
    registry: DocumentRegistry,
}

impl DocumentService {
    pub fn new(
        uploads_dir: PathBuf,
        chunking: ChunkingConfig,
        embedder: Arc<dyn Embedder>,
        dense: Arc<dyn DenseIndex>,
        lexical: Arc<LexicalIndex>,
        registry: DocumentRegistry,
    ) -> Self {
        Self {
            uploads_dir,
            chunking,
            embedder,
            dense,
            lexical,
            registry,
        }
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    /// Store, index and register an uploaded file.
    ///
    /// Returns the new record and its chunk count.
    pub async fn ingest(&self, filename: &str, data: &[u8]) -> Result<(DocumentRecord, usize)> {
        let original_name =
            safe_name(filename).ok_or_else(|| anyhow!("Invalid file name: {:?}", filename))?;
        let ext = extension_of(Path::new(&original_name));
        if !is_supported(&ext) {
            bail!("Unsupported file extension: .{}", ext);
        }

        let doc_id = Uuid::new_v4().simple().to_string();
        std::fs::create_dir_all(&self.uploads_dir).with_context(|| {
            format!("Failed to create uploads dir: {}", self.uploads_dir.display())
        })?;
        let stored_path = self
            .uploads_dir
            .join(format!("{}_{}", doc_id, original_name));
        std::fs::write(&stored_path, data)
            .with_context(|| format!("Failed to store upload: {}", stored_path.display()))?;

        let record = DocumentRecord {
            doc_id,
            original_name,
            stored_path: stored_path.display().to_string(),
            ext,
            chunk_ids: Vec::new(),
        };

        match self.index(record).await {
            Ok((record, count)) => {
                self.lexical.notify_corpus_changed();
                tracing::info!(
                    doc_id = %record.doc_id,
                    name = %record.original_name,
                    chunks = count,
                    "ingested document"
                );
                Ok((record, count))
            }
            Err(e) => {
                remove_file_if_present(&stored_path);
                tracing::error!(path = %stored_path.display(), error = %e, "ingestion failed");
                Err(e)
            }
        }
    }

    async fn index(&self, mut record: DocumentRecord) -> Result<(DocumentRecord, usize)> {
        let stored_path = PathBuf::from(&record.stored_path);
        let text = preprocess_file(&stored_path)?;
        let pieces = chunk_text(
            &text,
            self.chunking.chunk_size,
            self.chunking.overlap,
            self.chunking.use_tiktoken,
        );

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(idx, text)| Chunk {
                chunk_id: chunk_id(&record.doc_id, idx as i64),
                doc_id: record.doc_id.clone(),
                chunk_index: idx as i64,
                text,
                source_path: record.stored_path.clone(),
                doc_format: Some(record.ext.clone()),
                original_name: Some(record.original_name.clone()),
            })
            .collect();

        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .context("Failed to embed document chunks")?;
            self.dense.upsert(&chunks, &vectors).await?;
        }

        record.chunk_ids = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        if let Err(e) = self.registry.add(&record).await {
            if let Err(cleanup) = self.dense.delete(&record.chunk_ids).await {
                tracing::error!(doc_id = %record.doc_id, error = %cleanup, "failed to roll back chunks");
            }
            return Err(e);
        }

        Ok((record, chunks.len()))
    }

    /// Read a file from disk and ingest it under its own name.
    pub async fn ingest_path(&self, path: &Path) -> Result<(DocumentRecord, usize)> {
        let data =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.ingest(&filename, &data).await
    }

    /// Remove a document, its chunks and its stored file.
    ///
    /// Returns `false` if the document is unknown.
    pub async fn delete_document(&self, doc_id: &str) -> Result<bool> {
        let Some(record) = self.registry.get(doc_id).await? else {
            return Ok(false);
        };

        if record.chunk_ids.is_empty() {
            self.dense.delete_document(doc_id).await?;
        } else {
            self.dense.delete(&record.chunk_ids).await?;
        }
        self.lexical.notify_corpus_changed();

        remove_file_if_present(Path::new(&record.stored_path));
        self.registry.remove(doc_id).await?;

        tracing::info!(doc_id, chunks = record.chunk_ids.len(), "deleted document");
        Ok(true)
    }

    /// Most recently ingested first.
    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        self.registry.list().await
    }

    /// Delete every document. Individual failures are logged and skipped.
    /// Returns the number of documents removed.
    pub async fn reset(&self) -> Result<usize> {
        let mut removed = 0;
        for record in self.list_documents().await? {
            match self.delete_document(&record.doc_id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(
                    doc_id = %record.doc_id,
                    error = %e,
                    "failed to delete document during reset"
                ),
            }
        }
        Ok(removed)
    }
}

fn remove_file_if_present(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove stored file");
        }
    }
}

// ============ CLI ============

pub async fn run_ingest(service: &DocumentService, path: &Path) -> Result<()> {
    let (record, chunks) = service.ingest_path(path).await?;
    println!("ingest {}", path.display());
    println!("  doc_id: {}", record.doc_id);
    println!("  stored: {}", record.stored_path);
    println!("  chunks: {}", chunks);
    println!("ok");
    Ok(())
}

pub async fn run_list(service: &DocumentService) -> Result<()> {
    let documents = service.list_documents().await?;
    if documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    println!("{:<34} {:<6} {:>7}  NAME", "DOC_ID", "EXT", "CHUNKS");
    for doc in documents {
        println!(
            "{:<34} {:<6} {:>7}  {}",
            doc.doc_id,
            doc.ext,
            doc.chunk_ids.len(),
            doc.original_name
        );
    }
    Ok(())
}

pub async fn run_delete(service: &DocumentService, doc_id: &str) -> Result<()> {
    if service.delete_document(doc_id).await? {
        println!("Deleted document {}.", doc_id);
        Ok(())
    } else {
        bail!("Document not found: {}", doc_id)
    }
}

pub async fn run_reset(service: &DocumentService) -> Result<()> {
    let removed = service.reset().await?;
    println!("Removed {} document(s).", removed);
    Ok(())
}
