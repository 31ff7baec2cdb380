//! PII detection: structured patterns, model-based NER, exclusion rules.
//!
//! Detection is layered. Structured patterns (account numbers, street
//! addresses) run first against the raw text. The model-based recognizer
//! then runs over a copy of the text with structured spans blanked out,
//! which keeps its offsets valid against the original while guaranteeing
//! the two layers never claim the same span — structured matches win on
//! overlap by construction.
//!
//! Model entities pass an ordered exclusion-rule table before acceptance.
//! Spans overlapping an existing redaction tag or pseudonym token are
//! always dropped, which is what makes the maskers idempotent.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::ops::Range;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::config::NerConfig;

/// Entity categories this system detects and transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntityLabel {
    Person,
    Location,
    Organization,
    Account,
    Address,
}

impl EntityLabel {
    /// Token used in pseudonym labels, e.g. `[PERSON_1]`.
    pub fn token(self) -> &'static str {
        match self {
            EntityLabel::Person => "PERSON",
            EntityLabel::Location => "LOCATION",
            EntityLabel::Organization => "ORGANIZATION",
            EntityLabel::Account => "ACCOUNT",
            EntityLabel::Address => "ADDRESS",
        }
    }

    /// Map a recognizer label to the categories this system accepts.
    /// Anything outside person/location/organization is ignored.
    pub fn from_ner(label: &str) -> Option<Self> {
        match label {
            "PER" | "PERSON" => Some(EntityLabel::Person),
            "LOC" | "GPE" | "LOCATION" => Some(EntityLabel::Location),
            "ORG" | "ORGANIZATION" => Some(EntityLabel::Organization),
            _ => None,
        }
    }
}

/// A detected entity span, offsets against the text the detector was
/// given. Spans in one detection result never overlap.
#[derive(Debug, Clone)]
pub struct PiiEntity {
    pub start: usize,
    pub end: usize,
    pub label: EntityLabel,
    pub text: String,
}

// ============ Structured patterns ============

/// Checksum-free structured account number: two letters, two digits,
/// grouped digit blocks.
static ACCOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{2}\d{2}(?:\s?\d{2,4}){3,7}\b").expect("account pattern")
});

/// Simplified street address: street token, house number, postal code, city.
static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+ (?:Street|St\.|Road|Rd\.|Avenue|Ave\.|Lane|Way) \d+, \d{5} [A-Z][a-z]+\b")
        .expect("address pattern")
});

/// Output of earlier privacy passes; spans overlapping these are never
/// re-detected, so masking an already-masked text is a no-op.
static PROTECTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[(?:name|location|organization|account|address) redacted[^\]]*\]|\[(?:PERSON|LOCATION|ORGANIZATION|ACCOUNT|ADDRESS)_\d+\]",
    )
    .expect("protected span pattern")
});

// ============ Exclusion rules ============

/// Process-vocabulary terms that coincide with entity surface forms but are
/// never PII.
pub const ALLOWED_TERMS: &[&str] = &[
    "Payout",
    "Payouts",
    "Transfer",
    "Transfers",
    "Term",
    "Terms",
    "Account",
    "Accounts",
    "Bankday",
    "Bankdays",
    "IBAN",
    "Hours",
];

/// Place names considered non-sensitive for this corpus.
pub const NON_SENSITIVE_PLACES: &[&str] = &[
    "Germany",
    "France",
    "Austria",
    "Switzerland",
    "Munich",
    "Berlin",
    "Paris",
];

const DURATION_UNITS: &[&str] = &[
    "hour", "hours", "day", "days", "week", "weeks", "month", "months",
];

/// One entry in the ordered exclusion table consulted before a model
/// entity is accepted.
#[derive(Debug, Clone, Copy)]
pub enum ExclusionRule {
    /// Literal allow-list of domain terms.
    AllowedTerm,
    /// Spans mixing digits with a time-unit word are durations, not PII.
    DurationPhrase,
    /// Well-known place names that carry no personal information.
    NonSensitivePlace,
}

impl ExclusionRule {
    fn excludes(self, label: EntityLabel, text: &str) -> bool {
        match self {
            ExclusionRule::AllowedTerm => ALLOWED_TERMS.contains(&text),
            ExclusionRule::DurationPhrase => {
                let lower = text.to_lowercase();
                text.chars().any(|c| c.is_ascii_digit())
                    && DURATION_UNITS
                        .iter()
                        .any(|unit| lower.split_whitespace().any(|w| w == *unit))
            }
            ExclusionRule::NonSensitivePlace => {
                label == EntityLabel::Location && NON_SENSITIVE_PLACES.contains(&text)
            }
        }
    }
}

/// Consulted in order; the first matching rule excludes the span.
pub const EXCLUSION_RULES: &[ExclusionRule] = &[
    ExclusionRule::AllowedTerm,
    ExclusionRule::DurationPhrase,
    ExclusionRule::NonSensitivePlace,
];

fn is_excluded(label: EntityLabel, text: &str) -> bool {
    EXCLUSION_RULES
        .iter()
        .any(|rule| rule.excludes(label, text))
}

// ============ Recognizer collaborator ============

/// One span reported by the external named-entity recognizer. Offsets are
/// byte offsets into the submitted text.
#[derive(Debug, Clone, Deserialize)]
pub struct NerSpan {
    pub start: usize,
    pub end: usize,
    pub label: String,
}

#[async_trait]
pub trait EntityRecognizer: Send + Sync {
    async fn recognize(&self, text: &str) -> Result<Vec<NerSpan>>;
}

/// No recognizer configured: the model layer contributes nothing and
/// detection relies on structured patterns alone.
pub struct DisabledRecognizer;

#[async_trait]
impl EntityRecognizer for DisabledRecognizer {
    async fn recognize(&self, _text: &str) -> Result<Vec<NerSpan>> {
        Ok(Vec::new())
    }
}

/// Remote recognizer calling an HTTP endpoint:
/// `POST endpoint {"text": ...}` → `{"entities": [{start, end, label}]}`.
pub struct RemoteRecognizer {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RecognizeResponse {
    entities: Vec<NerSpan>,
}

impl RemoteRecognizer {
    pub fn new(config: &NerConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ner.endpoint required for remote provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl EntityRecognizer for RemoteRecognizer {
    async fn recognize(&self, text: &str) -> Result<Vec<NerSpan>> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("ner endpoint {}: {}", status, body);
        }

        let parsed: RecognizeResponse = resp.json().await?;
        Ok(parsed.entities)
    }
}

/// Instantiate the recognizer named by the configuration. A disabled
/// recognizer is reported once here, at startup, not per query.
pub fn create_recognizer(config: &NerConfig) -> Result<Arc<dyn EntityRecognizer>> {
    match config.provider.as_str() {
        "disabled" => {
            tracing::warn!(
                "ner provider disabled; PII detection degrades to structured patterns only"
            );
            Ok(Arc::new(DisabledRecognizer))
        }
        "remote" => Ok(Arc::new(RemoteRecognizer::new(config)?)),
        other => anyhow::bail!("Unknown ner provider: {}", other),
    }
}

// ============ Detector ============

pub struct PiiDetector {
    recognizer: Arc<dyn EntityRecognizer>,
}

impl PiiDetector {
    pub fn new(recognizer: Arc<dyn EntityRecognizer>) -> Self {
        Self { recognizer }
    }

    /// Structured-pattern layer only: account numbers, then addresses,
    /// skipping anything overlapping an accepted span or an earlier
    /// privacy pass's output. Sorted by start offset.
    pub fn structured_entities(text: &str) -> Vec<PiiEntity> {
        let protected = protected_ranges(text);
        let mut entities: Vec<PiiEntity> = Vec::new();

        for (re, label) in [
            (&*ACCOUNT_RE, EntityLabel::Account),
            (&*ADDRESS_RE, EntityLabel::Address),
        ] {
            for m in re.find_iter(text) {
                let range = m.start()..m.end();
                if overlaps_any(&range, &protected)
                    || entities
                        .iter()
                        .any(|e| ranges_overlap(&range, &(e.start..e.end)))
                {
                    continue;
                }
                entities.push(PiiEntity {
                    start: m.start(),
                    end: m.end(),
                    label,
                    text: m.as_str().to_string(),
                });
            }
        }

        entities.sort_by_key(|e| e.start);
        entities
    }

    /// Full detection pass: structured entities plus model entities found
    /// in the text with structured spans already blanked out. All offsets
    /// are valid against the input text; spans never overlap.
    ///
    /// A recognizer failure degrades to the structured layer with a
    /// warning; it never fails the query.
    pub async fn detect(&self, text: &str) -> Result<Vec<PiiEntity>> {
        let mut entities = Self::structured_entities(text);

        let blanked = blank_spans(text, &entities);
        let spans = match self.recognizer.recognize(&blanked).await {
            Ok(spans) => spans,
            Err(e) => {
                tracing::warn!(error = %e, "entity recognizer failed; using structured patterns only");
                Vec::new()
            }
        };

        let protected = protected_ranges(text);
        let mut model: Vec<PiiEntity> = Vec::new();
        for span in spans {
            let Some(label) = EntityLabel::from_ner(&span.label) else {
                continue;
            };
            if span.start >= span.end
                || span.end > text.len()
                || !text.is_char_boundary(span.start)
                || !text.is_char_boundary(span.end)
            {
                continue;
            }
            let surface = &text[span.start..span.end];
            if is_excluded(label, surface) {
                continue;
            }
            let range = span.start..span.end;
            if overlaps_any(&range, &protected) {
                continue;
            }
            model.push(PiiEntity {
                start: span.start,
                end: span.end,
                label,
                text: surface.to_string(),
            });
        }

        entities.extend(model);
        entities.sort_by_key(|e| e.start);

        // Drop overlaps, keeping the earlier span.
        let mut accepted: Vec<PiiEntity> = Vec::with_capacity(entities.len());
        for e in entities {
            if accepted.last().map_or(true, |prev| e.start >= prev.end) {
                accepted.push(e);
            }
        }
        Ok(accepted)
    }
}

/// Replace each entity span with `repl(entity)`. Labels are computed in
/// ascending start order (so per-type sequence numbers read left to
/// right), then spliced right to left so earlier replacements never
/// invalidate later offsets.
pub fn apply_replacements(
    text: &str,
    entities: &[PiiEntity],
    mut repl: impl FnMut(&PiiEntity) -> String,
) -> String {
    let labels: Vec<String> = entities.iter().map(|e| repl(e)).collect();
    let mut out = text.to_string();
    for (e, label) in entities.iter().zip(labels.iter()).rev() {
        out.replace_range(e.start..e.end, label);
    }
    out
}

fn protected_ranges(text: &str) -> Vec<Range<usize>> {
    PROTECTED_RE
        .find_iter(text)
        .map(|m| m.start()..m.end())
        .collect()
}

fn ranges_overlap(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

fn overlaps_any(range: &Range<usize>, ranges: &[Range<usize>]) -> bool {
    ranges.iter().any(|r| ranges_overlap(range, r))
}

/// Overwrite the given spans with spaces, preserving byte offsets.
fn blank_spans(text: &str, entities: &[PiiEntity]) -> String {
    let mut bytes = text.as_bytes().to_vec();
    for e in entities {
        for b in &mut bytes[e.start..e.end] {
            *b = b' ';
        }
    }
    // Spans sit on char boundaries and are replaced with ASCII.
    String::from_utf8(bytes).expect("blanking preserves utf-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubRecognizer {
        names: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl EntityRecognizer for StubRecognizer {
        async fn recognize(&self, text: &str) -> Result<Vec<NerSpan>> {
            let mut spans = Vec::new();
            for (surface, label) in &self.names {
                let mut offset = 0;
                while let Some(pos) = text[offset..].find(surface) {
                    let start = offset + pos;
                    spans.push(NerSpan {
                        start,
                        end: start + surface.len(),
                        label: label.to_string(),
                    });
                    offset = start + surface.len();
                }
            }
            Ok(spans)
        }
    }

    struct FailingRecognizer;

    #[async_trait]
    impl EntityRecognizer for FailingRecognizer {
        async fn recognize(&self, _text: &str) -> Result<Vec<NerSpan>> {
            anyhow::bail!("recognizer offline")
        }
    }

    #[test]
    fn test_account_pattern_matches() {
        let text = "Wire to DE89 3704 0044 0532 0130 00 before Friday.";
        let entities = PiiDetector::structured_entities(text);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].label, EntityLabel::Account);
        assert_eq!(entities[0].text, "DE89 3704 0044 0532 0130 00");
    }

    #[test]
    fn test_address_pattern_matches() {
        let text = "Send mail to Baker Street 221, 80331 Munich please.";
        let entities = PiiDetector::structured_entities(text);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].label, EntityLabel::Address);
    }

    #[test]
    fn test_structured_spans_do_not_overlap() {
        let text = "DE89 3704 0044 0532 0130 00 and Baker Street 221, 80331 Munich";
        let entities = PiiDetector::structured_entities(text);
        assert_eq!(entities.len(), 2);
        assert!(entities[0].end <= entities[1].start);
    }

    #[tokio::test]
    async fn test_detect_combines_layers_without_overlap() {
        let detector = PiiDetector::new(Arc::new(StubRecognizer {
            names: vec![("Erika Muster", "PER"), ("Acme Bank", "ORG")],
        }));
        let text = "Erika Muster moved funds via Acme Bank to DE89 3704 0044 0532 0130 00.";
        let entities = detector.detect(text).await.unwrap();
        assert_eq!(entities.len(), 3);
        for w in entities.windows(2) {
            assert!(w[0].end <= w[1].start);
        }
        assert!(entities.iter().any(|e| e.label == EntityLabel::Account));
        assert!(entities.iter().any(|e| e.label == EntityLabel::Person));
    }

    #[tokio::test]
    async fn test_allowed_term_not_detected() {
        let detector = PiiDetector::new(Arc::new(StubRecognizer {
            names: vec![("Payout", "ORG"), ("Transfer", "ORG")],
        }));
        let entities = detector.detect("Payout follows Transfer.").await.unwrap();
        assert!(entities.is_empty());
    }

    #[tokio::test]
    async fn test_duration_phrase_not_detected() {
        let detector = PiiDetector::new(Arc::new(StubRecognizer {
            names: vec![("2 days", "LOC"), ("24 hours", "LOC")],
        }));
        let entities = detector
            .detect("Processing takes 2 days, at most 24 hours extra.")
            .await
            .unwrap();
        assert!(entities.is_empty());
    }

    #[tokio::test]
    async fn test_non_sensitive_place_not_detected() {
        let detector = PiiDetector::new(Arc::new(StubRecognizer {
            names: vec![("Berlin", "LOC"), ("Smallville", "LOC")],
        }));
        let entities = detector
            .detect("Offices in Berlin and Smallville.")
            .await
            .unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].text, "Smallville");
    }

    #[tokio::test]
    async fn test_person_named_like_place_still_detected() {
        // NonSensitivePlace only applies to location spans.
        let detector = PiiDetector::new(Arc::new(StubRecognizer {
            names: vec![("Paris", "PER")],
        }));
        let entities = detector.detect("Paris signed the form.").await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].label, EntityLabel::Person);
    }

    #[tokio::test]
    async fn test_recognizer_failure_degrades_to_structured() {
        let detector = PiiDetector::new(Arc::new(FailingRecognizer));
        let text = "Account DE89 3704 0044 0532 0130 00, contact Erika Muster.";
        let entities = detector.detect(text).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].label, EntityLabel::Account);
    }

    #[tokio::test]
    async fn test_spans_inside_redaction_tags_ignored() {
        let detector = PiiDetector::new(Arc::new(StubRecognizer {
            names: vec![("name redacted", "PER")],
        }));
        let entities = detector
            .detect("Contact [name redacted] for details.")
            .await
            .unwrap();
        assert!(entities.is_empty());
    }

    #[test]
    fn test_apply_replacements_preserves_surroundings() {
        let text = "A DE89 3704 0044 0532 0130 00 B";
        let entities = PiiDetector::structured_entities(text);
        let out = apply_replacements(text, &entities, |_| "[account redacted]".to_string());
        assert_eq!(out, "A [account redacted] B");
    }

    #[test]
    fn test_exclusion_rule_order_is_fixed() {
        assert!(matches!(EXCLUSION_RULES[0], ExclusionRule::AllowedTerm));
        assert!(matches!(EXCLUSION_RULES[1], ExclusionRule::DurationPhrase));
        assert!(matches!(
            EXCLUSION_RULES[2],
            ExclusionRule::NonSensitivePlace
        ));
    }
}
