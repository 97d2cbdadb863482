/// Text splitting for book ingestion
///
/// Splits page text into overlapping chunks, preferring paragraph breaks,
/// then line breaks, then spaces, and only cutting inside a word when a
/// single word is longer than a chunk. Sizes are counted in characters.

use anyhow::{bail, Result};
use std::collections::VecDeque;
use tiktoken_rs::CoreBPE;

use crate::loader::PageDocument;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A piece of a page ready to be embedded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
    pub source: String,
    pub page: u32,
    /// Character offset of the chunk inside its page text
    pub start_index: usize,
}

#[derive(Debug, Clone)]
pub struct RecursiveCharacterSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Default for RecursiveCharacterSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn byte_offset(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

/// Split on `separator`, keeping it at the start of every piece after the first
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut parts = text.split(separator);
    let mut pieces = Vec::new();
    if let Some(first) = parts.next() {
        if !first.is_empty() {
            pieces.push(first.to_string());
        }
    }
    pieces.extend(parts.map(|p| format!("{}{}", separator, p)));
    pieces
}

impl RecursiveCharacterSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk size must be greater than zero");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                chunk_overlap,
                chunk_size
            );
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            ..Self::default()
        })
    }

    /// Split raw text into chunks of at most `chunk_size` characters
    /// (a single unbreakable piece may only exceed that when no separator applies)
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];

        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut fitting: Vec<String> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge_splits(&fitting));
                fitting.clear();
            }

            if finer.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, finer));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge_splits(&fitting));
        }

        chunks
    }

    /// Greedily join small pieces, carrying trailing pieces over as overlap
    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(split);

            if total + len > self.chunk_size && !current.is_empty() {
                let doc = current.iter().copied().collect::<String>();
                let doc = doc.trim();
                if !doc.is_empty() {
                    docs.push(doc.to_string());
                }

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(removed) => total -= char_len(removed),
                        None => break,
                    }
                }
            }

            current.push_back(split);
            total += len;
        }

        let doc = current.iter().copied().collect::<String>();
        let doc = doc.trim();
        if !doc.is_empty() {
            docs.push(doc.to_string());
        }

        docs
    }

    /// Split every page, recording where each chunk starts in its page
    pub fn split_documents(&self, pages: &[PageDocument]) -> Vec<TextChunk> {
        let mut chunks = Vec::new();

        for page in pages {
            let mut search_from = 0usize;
            let mut previous_len = 0usize;

            for content in self.split_text(&page.text) {
                let offset = (search_from + previous_len).saturating_sub(self.chunk_overlap);
                let tail = &page.text[byte_offset(&page.text, offset)..];
                let start_index = tail
                    .find(&content)
                    .map(|b| offset + char_len(&tail[..b]))
                    .unwrap_or(offset);

                search_from = start_index;
                previous_len = char_len(&content);

                chunks.push(TextChunk {
                    content,
                    source: page.source.clone(),
                    page: page.page,
                    start_index,
                });
            }
        }

        chunks
    }
}

/// Counts tokens the way OpenAI-family tokenizers do (cl100k_base)
pub struct TokenCounter {
    bpe: CoreBPE,
}

impl TokenCounter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::cl100k_base()?,
        })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let splitter = RecursiveCharacterSplitter::default();
        assert_eq!(splitter.split_text("  Arnica for bruises.  "), vec!["Arnica for bruises."]);
    }

    #[test]
    fn words_are_merged_with_overlap() {
        let splitter = RecursiveCharacterSplitter::new(10, 4).unwrap();
        let chunks = splitter.split_text("aaa bbb ccc ddd eee");
        assert_eq!(chunks, vec!["aaa bbb", "bbb ccc", "ccc ddd", "ddd eee"]);
    }

    #[test]
    fn paragraph_breaks_are_preferred() {
        let splitter = RecursiveCharacterSplitter::new(12, 0).unwrap();
        let chunks = splitter.split_text("para one.\n\npara two.");
        assert_eq!(chunks, vec!["para one.", "para two."]);
    }

    #[test]
    fn multibyte_text_never_panics() {
        let splitter = RecursiveCharacterSplitter::new(5, 1).unwrap();
        let chunks = splitter.split_text("ééééééééé");
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
    }

    #[test]
    fn long_text_respects_chunk_size() {
        let splitter = RecursiveCharacterSplitter::default();
        let paragraph = "Belladonna suits sudden violent fevers with a red hot face. ".repeat(40);
        let text = format!("{}\n\n{}", paragraph, paragraph);

        let chunks = splitter.split_text(&text);
        assert!(chunks.len() > 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= DEFAULT_CHUNK_SIZE));
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        assert!(RecursiveCharacterSplitter::new(100, 100).is_err());
        assert!(RecursiveCharacterSplitter::new(0, 0).is_err());
    }

    #[test]
    fn documents_keep_page_and_start_index() {
        let splitter = RecursiveCharacterSplitter::new(10, 4).unwrap();
        let pages = vec![PageDocument {
            source: "book.pdf".to_string(),
            page: 3,
            text: "aaa bbb ccc ddd eee".to_string(),
        }];

        let chunks = splitter.split_documents(&pages);
        let starts: Vec<_> = chunks.iter().map(|c| c.start_index).collect();
        assert_eq!(starts, vec![0, 4, 8, 12]);
        assert!(chunks.iter().all(|c| c.page == 3 && c.source == "book.pdf"));
    }
}
