//! Reversible-looking pseudonym labels for the pre-generation path.
//!
//! Detected entities become per-type tokens like `[PERSON_1]` before the
//! context reaches the generator. The label counters live in a
//! [`PseudonymState`] owned by the query session, so sequence numbers
//! never leak between requests and concurrent queries cannot collide.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::pii::{apply_replacements, EntityLabel, PiiDetector, PiiEntity};

/// Per-type label counters, scoped to one query session.
#[derive(Debug, Default)]
pub struct PseudonymState {
    counters: BTreeMap<&'static str, u32>,
}

impl PseudonymState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next label token for a type; counters are monotonic per type.
    pub fn next_label(&mut self, label: EntityLabel) -> String {
        let counter = self.counters.entry(label.token()).or_insert(0);
        *counter += 1;
        format!("[{}_{}]", label.token(), counter)
    }
}

/// One pseudonym substitution, span offsets against the input text.
#[derive(Debug, Clone)]
pub struct PseudonymReplacement {
    pub start: usize,
    pub end: usize,
    pub label: String,
}

pub struct Pseudonymizer {
    detector: PiiDetector,
}

impl Pseudonymizer {
    pub fn new(detector: PiiDetector) -> Self {
        Self { detector }
    }

    /// Replace every detected entity with an incrementing per-type label.
    /// Structured spans are claimed before model spans; numbering reads
    /// left to right. The transformed text is generation context only,
    /// never shown to the requester.
    pub async fn pseudonymize(
        &self,
        text: &str,
        state: &mut PseudonymState,
    ) -> Result<(String, Vec<PseudonymReplacement>)> {
        let entities = self.detector.detect(text).await?;

        let mut replacements = Vec::with_capacity(entities.len());
        let transformed = apply_replacements(text, &entities, |e: &PiiEntity| {
            let label = state.next_label(e.label);
            replacements.push(PseudonymReplacement {
                start: e.start,
                end: e.end,
                label: label.clone(),
            });
            label
        });

        Ok((transformed, replacements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pii::{EntityRecognizer, NerSpan};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NameRecognizer;

    #[async_trait]
    impl EntityRecognizer for NameRecognizer {
        async fn recognize(&self, text: &str) -> Result<Vec<NerSpan>> {
            let mut spans = Vec::new();
            for surface in ["Erika Muster", "Max Berger"] {
                if let Some(pos) = text.find(surface) {
                    spans.push(NerSpan {
                        start: pos,
                        end: pos + surface.len(),
                        label: "PER".to_string(),
                    });
                }
            }
            Ok(spans)
        }
    }

    fn pseudonymizer() -> Pseudonymizer {
        Pseudonymizer::new(PiiDetector::new(Arc::new(NameRecognizer)))
    }

    #[tokio::test]
    async fn test_labels_increment_per_type() {
        let p = pseudonymizer();
        let mut state = PseudonymState::new();
        let text = "Erika Muster pays DE89 3704 0044 0532 0130 00, Max Berger countersigns.";
        let (out, replacements) = p.pseudonymize(text, &mut state).await.unwrap();

        assert!(out.contains("[PERSON_1]"));
        assert!(out.contains("[PERSON_2]"));
        assert!(out.contains("[ACCOUNT_1]"));
        assert!(!out.contains("Erika Muster"));
        assert!(!out.contains("DE89"));
        assert_eq!(replacements.len(), 3);
    }

    #[tokio::test]
    async fn test_numbering_reads_left_to_right() {
        let p = pseudonymizer();
        let mut state = PseudonymState::new();
        let (out, _) = p
            .pseudonymize("Erika Muster then Max Berger.", &mut state)
            .await
            .unwrap();
        let first = out.find("[PERSON_1]").unwrap();
        let second = out.find("[PERSON_2]").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_state_carries_across_contexts_in_one_session() {
        let p = pseudonymizer();
        let mut state = PseudonymState::new();
        let (a, _) = p.pseudonymize("Erika Muster.", &mut state).await.unwrap();
        let (b, _) = p.pseudonymize("Max Berger.", &mut state).await.unwrap();
        assert!(a.contains("[PERSON_1]"));
        assert!(b.contains("[PERSON_2]"));
    }

    #[tokio::test]
    async fn test_fresh_state_restarts_numbering() {
        let p = pseudonymizer();
        let mut first = PseudonymState::new();
        p.pseudonymize("Erika Muster.", &mut first).await.unwrap();

        let mut second = PseudonymState::new();
        let (out, _) = p.pseudonymize("Max Berger.", &mut second).await.unwrap();
        assert!(out.contains("[PERSON_1]"));
    }

    #[tokio::test]
    async fn test_existing_tokens_not_relabeled() {
        let p = pseudonymizer();
        let mut state = PseudonymState::new();
        let (out, replacements) = p
            .pseudonymize("Already holds [PERSON_1] only.", &mut state)
            .await
            .unwrap();
        assert_eq!(out, "Already holds [PERSON_1] only.");
        assert!(replacements.is_empty());
    }
}
