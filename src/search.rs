//! Hybrid retrieval: semantic candidates, permission filter, keyword boost.
//!
//! Retrieval over-fetches `max(2k + 2, 8)` candidates from the vector
//! index to leave headroom for the permission filter, drops anything the
//! caller's role may not read, then reranks by
//! `hybrid = cosine + min(0.04 × keyword hits, 0.2)` and truncates to k.

use anyhow::Result;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::embedding::{normalize_l2, Embedder};
use crate::index::VectorIndex;
use crate::models::SearchHit;

/// Approval/payout/timeframe/transfer vocabulary rewarded by the boost.
static BOOST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(approval|approved|payout|disbursement|within|after|day|days|bankday|bankdays|transfer|wire)\b",
    )
    .expect("boost keyword pattern")
});

/// Saturating keyword boost in `[0.0, 0.2]`, 0.04 per match.
pub fn keyword_boost(text: &str) -> f32 {
    let hits = BOOST_RE.find_iter(text).count();
    (0.04 * hits as f32).min(0.2)
}

/// Candidate pool fetched before permission filtering for a requested
/// top-k. Computed against the requested k regardless of filtering yield.
pub fn candidate_pool_size(k: usize) -> usize {
    (2 * k + 2).max(8)
}

/// Run hybrid retrieval for one query. Returns at most `k` hits, all from
/// `allowed_sources`, ordered by hybrid score descending; ties keep the
/// cosine-descending order the index already established.
pub async fn retrieve(
    index: &VectorIndex,
    embedder: &dyn Embedder,
    query: &str,
    allowed_sources: &BTreeSet<String>,
    k: usize,
) -> Result<Vec<SearchHit>> {
    if index.is_empty() {
        return Ok(Vec::new());
    }

    let mut query_vec = embedder
        .embed(&[query.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty embedding response for query"))?;
    normalize_l2(&mut query_vec);

    let candidates = index.query(&query_vec, candidate_pool_size(k));

    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter(|(chunk, _)| allowed_sources.contains(&chunk.source))
        .map(|(chunk, cosine)| {
            let boost = keyword_boost(&chunk.text);
            SearchHit {
                chunk: chunk.clone(),
                score_cosine: cosine,
                score_hybrid: cosine + boost,
            }
        })
        .collect();

    // Stable sort: exact hybrid ties preserve the cosine ordering.
    hits.sort_by(|a, b| {
        b.score_hybrid
            .partial_cmp(&a.score_hybrid)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);

    Ok(hits)
}
