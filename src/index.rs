//! In-memory vector index over the ingested corpus.
//!
//! Loaded once from the SQLite index store and shared read-only across
//! queries. Entries hold unit-normalized vectors, so nearest-neighbor
//! lookup is a descending inner-product scan.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, inner_product};
use crate::models::DocumentChunk;

/// One indexed chunk with its unit-normalized embedding.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: DocumentChunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Default)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Build an index directly from entries. Vectors must already be
    /// unit-normalized; entry order defines the deterministic tie order.
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    /// Load all chunks and vectors from the index store, ordered by
    /// `(source, chunk_id)` so a fixed store always yields the same
    /// in-memory layout.
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let rows = sqlx::query(
            r#"
            SELECT c.source, c.chunk_id, c.title, c.text, v.embedding
            FROM chunks c
            JOIN chunk_vectors v ON v.source = c.source AND v.chunk_id = c.chunk_id
            ORDER BY c.source, c.chunk_id
            "#,
        )
        .fetch_all(pool)
        .await?;

        let entries = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                IndexEntry {
                    chunk: DocumentChunk {
                        source: row.get("source"),
                        chunk_id: row.get("chunk_id"),
                        title: row.get("title"),
                        text: row.get("text"),
                    },
                    embedding: blob_to_vec(&blob),
                }
            })
            .collect();

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return up to `k_prime` entries nearest to `query_vec` by inner
    /// product, descending. Ties keep index order (stable sort). A corpus
    /// smaller than `k_prime` simply returns fewer results.
    pub fn query(&self, query_vec: &[f32], k_prime: usize) -> Vec<(&DocumentChunk, f32)> {
        let mut scored: Vec<(&DocumentChunk, f32)> = self
            .entries
            .iter()
            .map(|e| (&e.chunk, inner_product(query_vec, &e.embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k_prime);
        scored
    }
}
