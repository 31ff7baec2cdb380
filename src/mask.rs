//! Irreversible display masks for the post-generation path.
//!
//! Shared contract of both entry points: the output never contains the
//! original sensitive substring, and masking already-masked text is a
//! no-op. [`Masker::mask_raw`] runs a full detection pass; pseudonym
//! labels need no detection because their token format is already
//! delimited, so converting them is plain substring substitution.

use anyhow::Result;

use crate::pii::{apply_replacements, EntityLabel, PiiDetector};

/// Human-readable redaction tag for an entity type.
pub fn redaction_tag(label: EntityLabel) -> &'static str {
    match label {
        EntityLabel::Person => "[name redacted]",
        EntityLabel::Location => "[location redacted]",
        EntityLabel::Organization => "[organization redacted]",
        EntityLabel::Account => "[account redacted]",
        EntityLabel::Address => "[address redacted]",
    }
}

/// Pseudonym-label prefix → display-tag prefix pairs. The trailing space
/// keeps the sequence number visible, e.g. `[PERSON_2]` → `[name redacted 2]`.
const LABEL_PREFIXES: &[(&str, &str)] = &[
    ("[PERSON_", "[name redacted "),
    ("[LOCATION_", "[location redacted "),
    ("[ORGANIZATION_", "[organization redacted "),
    ("[ACCOUNT_", "[account redacted "),
    ("[ADDRESS_", "[address redacted "),
];

pub struct Masker {
    detector: PiiDetector,
}

impl Masker {
    pub fn new(detector: PiiDetector) -> Self {
        Self { detector }
    }

    /// Detect and redact every accepted entity span in raw text.
    /// Structured account numbers are caught by the detector's pattern
    /// layer independently of the recognizer, so they are redacted even
    /// when the model layer is degraded.
    pub async fn mask_raw(&self, text: &str) -> Result<String> {
        let entities = self.detector.detect(text).await?;
        Ok(apply_replacements(text, &entities, |e| {
            redaction_tag(e.label).to_string()
        }))
    }

    /// Convert pseudonym labels to display masks by literal prefix
    /// substitution. No detection pass; label boundaries come from the
    /// pseudonymizer's token format.
    pub fn mask_pseudonym_labels(text: &str) -> String {
        let mut out = text.to_string();
        for (prefix, replacement) in LABEL_PREFIXES {
            out = out.replace(prefix, replacement);
        }
        out
    }
}

/// Strip simple markdown emphasis (`**bold**`, `*italic*`, `_italic_`)
/// from a display answer.
pub fn strip_markdown(text: &str) -> String {
    let mut out = text.replace("**", "");
    out = out.replace('*', "");
    out.replace('_', "")
}
