//! Section-bounded chunking of extracted paper text

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use super::{Document, DocumentMetadata};

/// Words per stored passage
pub const DEFAULT_WORD_LIMIT: usize = 2000;

/// Section category used when no header is recognized
pub const FULL_DOCUMENT: &str = "Full Document";

/// Section titles recognized by default
pub const DEFAULT_SECTIONS: &[&str] = &[
    "Abstract",
    "Introduction",
    "Motivation",
    "Study Design and Execution",
    "Results",
    "Discussion",
    "Related Work",
    "Conclusion",
    "Future Work",
    "Conclusion And Future Work",
    "References",
    "Background",
    "Literature Review",
    "Methodology",
    "Problem Description",
    "Experiments",
    "Acknowledgments",
    "System Overview",
    "Implementation and Evaluation",
    "Evaluation",
];

/// Splits paper text at recognized section headers.
///
/// A header is a line holding only a known title, optionally numbered
/// (`2`, `3.1`, `IV.`, `B`), matched case-insensitively. Each title opens at
/// most one section; text before the first header is dropped. Sections are
/// cut into passages of at most `word_limit` words.
#[derive(Debug, Clone)]
pub struct SectionChunker {
    sections: Vec<String>,
    header: Option<Regex>,
    word_limit: usize,
}

impl Default for SectionChunker {
    fn default() -> Self {
        Self::new(DEFAULT_SECTIONS.iter().map(|s| s.to_string()), DEFAULT_WORD_LIMIT)
    }
}

impl SectionChunker {
    pub fn new(sections: impl IntoIterator<Item = String>, word_limit: usize) -> Self {
        let sections: Vec<String> = sections
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            header: header_regex(&sections),
            sections,
            word_limit: word_limit.max(1),
        }
    }

    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    fn canonical_title(&self, matched: &str) -> Option<&str> {
        let matched = matched.to_lowercase();
        self.sections
            .iter()
            .find(|s| s.to_lowercase() == matched)
            .map(String::as_str)
    }

    /// Chunk one paper given its text page by page (pages numbered from 1)
    pub fn chunk(&self, paper_id: &str, pages: &[&str]) -> Vec<Document> {
        let lines: Vec<(usize, &str)> = pages
            .iter()
            .enumerate()
            .flat_map(|(index, page)| page.lines().map(move |line| (index + 1, line)))
            .collect();

        let mut seen = HashSet::new();
        let mut boundaries: Vec<(usize, String, usize)> = Vec::new();
        if let Some(header) = &self.header {
            for (index, (page, line)) in lines.iter().enumerate() {
                let Some(captures) = header.captures(line.trim()) else {
                    continue;
                };
                let Some(title) = captures.name("title").and_then(|m| self.canonical_title(m.as_str())) else {
                    continue;
                };
                if seen.insert(title.to_lowercase()) {
                    boundaries.push((index, title.to_string(), *page));
                }
            }
        }

        if boundaries.is_empty() {
            let full_text = pages.join("\n").trim().to_string();
            if full_text.is_empty() {
                return Vec::new();
            }
            debug!(paper_id, "No section headers found, storing full document");
            return vec![Document::new(
                full_text,
                DocumentMetadata {
                    paper_id: Some(paper_id.to_string()),
                    section_category: Some(FULL_DOCUMENT.to_string()),
                    page_number: Some(1),
                    sub_chunk_index: None,
                },
            )];
        }

        let mut documents = Vec::new();
        for (i, (start, section, page)) in boundaries.iter().enumerate() {
            let end = boundaries.get(i + 1).map_or(lines.len(), |b| b.0);
            let words: Vec<&str> = lines[*start..end]
                .iter()
                .flat_map(|(_, line)| line.split_whitespace())
                .collect();

            for (index, passage) in words.chunks(self.word_limit).enumerate() {
                documents.push(Document::new(
                    passage.join(" "),
                    DocumentMetadata {
                        paper_id: Some(paper_id.to_string()),
                        section_category: Some(section.clone()),
                        page_number: Some(*page),
                        sub_chunk_index: Some(index + 1),
                    },
                ));
            }
        }
        documents
    }
}

fn header_regex(sections: &[String]) -> Option<Regex> {
    if sections.is_empty() {
        return None;
    }

    let mut titles: Vec<String> = sections.iter().map(|s| regex::escape(s)).collect();
    // Longest first so specific titles win over their prefixes
    titles.sort_by(|a, b| b.len().cmp(&a.len()));

    let pattern = format!(
        r"^\s*(\s*(\d+(\.\d+)*\.?|[IVXLCDM]+\.?|[A-Z]\.?)\s+)?(?P<title>{})\s*$",
        titles.join("|")
    );
    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(error = %e, "Failed to build section header pattern");
            None
        }
    }
}
