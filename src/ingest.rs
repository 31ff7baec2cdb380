//! Offline corpus ingestion.
//!
//! Scans the docs directory, chunks every matching document, embeds all
//! chunks in batches, and replaces the index store wholesale. Unreadable
//! documents are skipped with a warning; ingestion fails only when the
//! entire corpus yields zero chunks.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use walkdir::WalkDir;

use crate::chunk::split_markdown;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, normalize_l2, vec_to_blob, Embedder};
use crate::models::DocumentChunk;

pub async fn run_ingest(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Ingestion requires embeddings. Set [embedding] provider in config.");
    }
    let embedder = create_embedder(&config.embedding)?;

    let chunks = collect_chunks(config)?;
    if chunks.is_empty() {
        bail!(
            "No chunks produced from corpus at {}",
            config.corpus.docs_dir.display()
        );
    }

    let pool = db::connect(config).await?;
    db::apply_schema(&pool).await?;

    let written = write_index(&pool, embedder.as_ref(), config, &chunks).await?;
    pool.close().await;

    println!("ingest");
    println!("  documents dir: {}", config.corpus.docs_dir.display());
    println!("  chunks written: {}", chunks.len());
    println!("  embeddings written: {}", written);
    println!("ok");
    Ok(())
}

/// Scan the docs directory and chunk every matching document. Per-source
/// chunk ids are contiguous integers starting at 0.
pub fn collect_chunks(config: &Config) -> Result<Vec<DocumentChunk>> {
    let include = build_globset(&config.corpus.include_globs)?;
    let exclude = build_globset(&config.corpus.exclude_globs)?;

    let mut chunks: Vec<DocumentChunk> = Vec::new();

    for entry in WalkDir::new(&config.corpus.docs_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let rel = entry
            .path()
            .strip_prefix(&config.corpus.docs_dir)
            .unwrap_or(entry.path());
        if !include.is_match(rel) || exclude.is_match(rel) {
            continue;
        }

        let source = rel.to_string_lossy().to_string();
        let text = match std::fs::read_to_string(entry.path()) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "skipping unreadable document");
                continue;
            }
        };

        for (chunk_id, (title, body)) in split_markdown(&text).into_iter().enumerate() {
            chunks.push(DocumentChunk {
                source: source.clone(),
                chunk_id: chunk_id as i64,
                title,
                text: body,
            });
        }
    }

    Ok(chunks)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Replace the index store contents: embed every chunk (unit-normalized)
/// and write chunks + vectors in one transaction per batch.
async fn write_index(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    config: &Config,
    chunks: &[DocumentChunk],
) -> Result<u64> {
    // Full rebuild: the corpus is immutable between ingests.
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunk_vectors").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
    tx.commit().await?;

    let mut written = 0u64;

    for batch in chunks.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let mut vectors = embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            );
        }

        let mut tx = pool.begin().await?;
        for (chunk, vector) in batch.iter().zip(vectors.iter_mut()) {
            normalize_l2(vector);

            let mut hasher = Sha256::new();
            hasher.update(chunk.text.as_bytes());
            let hash = format!("{:x}", hasher.finalize());

            sqlx::query(
                "INSERT INTO chunks (source, chunk_id, title, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.source)
            .bind(chunk.chunk_id)
            .bind(&chunk.title)
            .bind(&chunk.text)
            .bind(&hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunk_vectors (source, chunk_id, embedding) VALUES (?, ?, ?)",
            )
            .bind(&chunk.source)
            .bind(chunk.chunk_id)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;

            written += 1;
        }
        tx.commit().await?;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuditConfig, CorpusConfig, DbConfig, RolesConfig, ServerConfig,
    };
    use std::fs;
    use std::path::Path;

    fn test_config(root: &Path) -> Config {
        Config {
            db: DbConfig {
                path: root.join("data/index.sqlite"),
            },
            corpus: CorpusConfig {
                docs_dir: root.join("docs"),
                include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
                exclude_globs: vec![],
            },
            roles: RolesConfig {
                path: root.join("roles.toml"),
            },
            retrieval: Default::default(),
            embedding: Default::default(),
            ner: Default::default(),
            generation: Default::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
            audit: AuditConfig {
                path: root.join("audit.jsonl"),
            },
        }
    }

    #[test]
    fn test_collect_chunks_assigns_per_source_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(
            docs.join("policy.md"),
            "# Payout\nWithin 2 bankdays.\n\n# Approval\nTwo signatures.",
        )
        .unwrap();
        fs::write(docs.join("faq.txt"), "Q and A.\n\nMore answers.").unwrap();

        let chunks = collect_chunks(&test_config(tmp.path())).unwrap();
        let policy: Vec<_> = chunks.iter().filter(|c| c.source == "policy.md").collect();
        let faq: Vec<_> = chunks.iter().filter(|c| c.source == "faq.txt").collect();

        assert_eq!(policy.len(), 2);
        assert_eq!(policy[0].chunk_id, 0);
        assert_eq!(policy[1].chunk_id, 1);
        assert_eq!(faq.len(), 2);
        assert_eq!(faq[0].chunk_id, 0);
    }

    #[test]
    fn test_collect_chunks_respects_globs() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("keep.md"), "Kept text.").unwrap();
        fs::write(docs.join("skip.pdf"), "binary-ish").unwrap();

        let chunks = collect_chunks(&test_config(tmp.path())).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source, "keep.md");
    }

    #[test]
    fn test_collect_chunks_empty_docs_yield_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("blank.md"), "   \n\n").unwrap();

        let chunks = collect_chunks(&test_config(tmp.path())).unwrap();
        assert!(chunks.is_empty());
    }
}
