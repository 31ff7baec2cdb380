//! Heading-aware document chunker.
//!
//! Splits a document into retrievable units along markdown headings: each
//! heading (1–6 leading `#`) starts a new chunk whose stored text is
//! `title + "\n" + body`. Content before the first heading becomes an
//! untitled leading chunk. Documents without any heading fall back to a
//! blank-line paragraph split, each paragraph its own untitled chunk.

/// A `(title, text)` pair produced by [`split_markdown`]. For titled chunks
/// the text already includes the title as its first line.
pub type ChunkPiece = (Option<String>, String);

/// Split a document into ordered chunk pieces. Empty bodies are dropped;
/// a document that is blank after trimming yields no pieces.
pub fn split_markdown(text: &str) -> Vec<ChunkPiece> {
    let mut pieces: Vec<ChunkPiece> = Vec::new();
    let mut current_title: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();
    let mut saw_heading = false;

    for line in text.lines() {
        if let Some(title) = heading_title(line) {
            saw_heading = true;
            flush(&mut pieces, current_title.take(), &buffer);
            buffer.clear();
            current_title = Some(title);
        } else {
            buffer.push(line);
        }
    }
    flush(&mut pieces, current_title, &buffer);

    if !saw_heading {
        // Paragraph fallback: blank-line delimited, untitled.
        return text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| (None, p.to_string()))
            .collect();
    }

    pieces
}

/// Returns the heading text if the line is a markdown heading (1–6 hashes
/// followed by whitespace).
fn heading_title(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &trimmed[hashes..];
    if rest.starts_with(' ') || rest.starts_with('\t') {
        Some(rest.trim().to_string())
    } else {
        None
    }
}

fn flush(pieces: &mut Vec<ChunkPiece>, title: Option<String>, buffer: &[&str]) {
    let body = buffer.join("\n").trim().to_string();
    if body.is_empty() {
        return;
    }
    match title {
        Some(t) => {
            let text = format!("{}\n{}", t, body);
            pieces.push((Some(t), text));
        }
        None => pieces.push((None, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings_yield_titled_chunks() {
        let doc = "# Payout\nWithin 2 bankdays.\n\n## Approval\nNeeds two signatures.";
        let pieces = split_markdown(doc);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].0.as_deref(), Some("Payout"));
        assert_eq!(pieces[0].1, "Payout\nWithin 2 bankdays.");
        assert_eq!(pieces[1].0.as_deref(), Some("Approval"));
        assert_eq!(pieces[1].1, "Approval\nNeeds two signatures.");
    }

    #[test]
    fn test_content_before_first_heading_is_untitled() {
        let doc = "Intro paragraph.\n# Terms\nBody.";
        let pieces = split_markdown(doc);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].0, None);
        assert_eq!(pieces[0].1, "Intro paragraph.");
        assert_eq!(pieces[1].0.as_deref(), Some("Terms"));
    }

    #[test]
    fn test_heading_with_empty_body_dropped() {
        let doc = "# Empty\n\n# Full\nSomething.";
        let pieces = split_markdown(doc);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].0.as_deref(), Some("Full"));
    }

    #[test]
    fn test_no_headings_splits_paragraphs() {
        let doc = "First paragraph.\n\nSecond paragraph.\n\n\nThird.";
        let pieces = split_markdown(doc);
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|(t, _)| t.is_none()));
    }

    #[test]
    fn test_no_headings_no_breaks_single_chunk() {
        let doc = "One line.\nAnother line on the same paragraph.";
        let pieces = split_markdown(doc);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].1, doc);
    }

    #[test]
    fn test_blank_document_yields_nothing() {
        assert!(split_markdown("").is_empty());
        assert!(split_markdown("   \n\n\t\n").is_empty());
    }

    #[test]
    fn test_hash_without_space_is_not_heading() {
        let doc = "#hashtag not a heading\n\nreal text";
        let pieces = split_markdown(doc);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].0, None);
    }

    #[test]
    fn test_six_levels_recognized_seven_not() {
        assert_eq!(heading_title("###### Deep").as_deref(), Some("Deep"));
        assert_eq!(heading_title("####### Too deep"), None);
    }
}
