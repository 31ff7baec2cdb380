//! Append-only audit trail of completed queries.
//!
//! One JSON line per completed (non-blocked) query: timestamp, role,
//! question, the redacted answer, and the source list with per-hit
//! metadata. Blocked queries are never recorded here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

use crate::models::SourceRef;

#[derive(Debug, Serialize)]
pub struct AuditRecord {
    pub ts: String,
    pub role: String,
    pub question: String,
    pub answer_masked: String,
    pub sources: Vec<SourceRef>,
}

impl AuditRecord {
    pub fn new(
        role: &str,
        question: &str,
        answer_masked: &str,
        sources: Vec<SourceRef>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            role: role.to_string(),
            question: question.to_string(),
            answer_masked: answer_masked.to_string(),
            sources,
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}

/// JSONL file sink. The parent directory is created on first write.
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open audit log: {}", self.path.display()))?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentChunk;

    fn record() -> AuditRecord {
        let chunk = DocumentChunk {
            source: "policy.md".to_string(),
            chunk_id: 0,
            title: Some("Payout".to_string()),
            text: "Payout occurs within 2 bankdays.".to_string(),
        };
        AuditRecord::new(
            "clerk",
            "How long does payout take?",
            "Within 2 bankdays.",
            vec![SourceRef::from_chunk(&chunk)],
        )
    }

    #[tokio::test]
    async fn test_append_writes_one_json_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs").join("audit.jsonl");
        let sink = JsonlAuditSink::new(&path);

        sink.append(&record()).await.unwrap();
        sink.append(&record()).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["role"], "clerk");
        assert_eq!(parsed["sources"][0]["document"], "policy.md");
        assert!(parsed["ts"].as_str().unwrap().contains('T'));
    }
}
