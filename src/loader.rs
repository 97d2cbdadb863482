/// PDF loading
///
/// Extracts the text of a book page by page so each chunk can remember
/// where it came from.

use anyhow::{Context, Result};
use lopdf::Document;
use std::path::Path;

/// Text of a single PDF page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDocument {
    /// Path of the PDF the page was read from
    pub source: String,
    /// Zero-based page index
    pub page: u32,
    pub text: String,
}

/// Load every page of a PDF that has extractable text
pub fn load_pdf(path: impl AsRef<Path>) -> Result<Vec<PageDocument>> {
    let path = path.as_ref();
    let source = path.display().to_string();

    let document = Document::load(path)
        .with_context(|| format!("Failed to open PDF '{}'", source))?;

    let mut pages = Vec::new();
    for (page_number, _object_id) in document.get_pages() {
        let raw = match document.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Skipping page {} of {}: {}", page_number, source, e);
                continue;
            }
        };

        let text = normalize_page_text(&raw);
        if text.is_empty() {
            log::warn!("Page {} of {} has no extractable text", page_number, source);
            continue;
        }

        pages.push(PageDocument {
            source: source.clone(),
            page: page_number.saturating_sub(1),
            text,
        });
    }

    log::info!("Loaded {} pages from {}", pages.len(), source);
    Ok(pages)
}

/// Strip control characters and trailing spaces that PDF extraction leaves behind
pub fn normalize_page_text(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            line.chars()
                .filter(|c| !c.is_control() || *c == '\t')
                .collect::<String>()
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_control_chars_and_padding() {
        let raw = "  Aconite\u{0}   \nFear of death.  \n\n";
        assert_eq!(normalize_page_text(raw), "Aconite\nFear of death.");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_pdf("/definitely/not/here/book.pdf").unwrap_err();
        assert!(err.to_string().contains("Failed to open PDF"));
    }
}
