//! Deterministic H2 chunking of generated markdown
//!
//! No LLM. Each `## ` heading opens a section that runs to the next H2 or
//! end of document; sections over the word limit split at paragraph
//! boundaries into `(i/k)`-suffixed pieces. Chunk IDs are `{video_id}_{NNN}`
//! in discovery order, so re-running on the same input yields identical
//! output byte for byte.

use crate::markdown::word_count;
use crate::types::{TranscriptChunk, TranscriptChunks};

/// Sections above this many words are split.
pub const MAX_SECTION_WORDS: usize = 600;

/// Characters per token for the total-token estimate.
#[must_use]
pub fn chars_per_token(language: &str) -> f64 {
    match language {
        "ru" | "uk" | "be" => 3.0,
        _ => 4.0,
    }
}

struct Section {
    title: String,
    content: String,
}

/// Split the markdown body into H2 sections. Frontmatter and any prose
/// before the first H2 are not chunk material.
fn collect_sections(markdown: &str) -> Vec<Section> {
    let body = strip_frontmatter(markdown);

    let mut sections: Vec<Section> = Vec::new();
    let mut current: Option<Section> = None;

    for line in body.lines() {
        if let Some(title) = line.strip_prefix("## ") {
            if let Some(section) = current.take() {
                sections.push(section);
            }
            current = Some(Section {
                title: title.trim().to_string(),
                content: String::new(),
            });
        } else if let Some(section) = current.as_mut() {
            section.content.push_str(line);
            section.content.push('\n');
        }
    }
    if let Some(section) = current.take() {
        sections.push(section);
    }

    for section in &mut sections {
        section.content = section.content.trim().to_string();
    }
    sections
}

fn strip_frontmatter(markdown: &str) -> &str {
    let Some(rest) = markdown.strip_prefix("---\n") else {
        return markdown;
    };
    match rest.find("\n---\n") {
        Some(end) => &rest[end + 5..],
        None => markdown,
    }
}

/// Split an oversized section at paragraph boundaries into pieces of at
/// most `MAX_SECTION_WORDS` words (a single oversized paragraph stays
/// whole).
fn split_section(content: &str) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_words = 0usize;

    for paragraph in content.split("\n\n") {
        let words = word_count(paragraph);
        if current_words + words > MAX_SECTION_WORDS && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            current_words = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
        current_words += words;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Chunk `markdown` for retrieval.
///
/// `preamble` (title/speaker/date context) is prepended to every chunk's
/// content; `language` drives the chars-per-token estimate.
#[must_use]
pub fn chunk_markdown(
    markdown: &str,
    video_id: &str,
    preamble: &str,
    language: &str,
) -> TranscriptChunks {
    let mut chunks: Vec<TranscriptChunk> = Vec::new();

    for section in collect_sections(markdown) {
        if word_count(&section.content) <= MAX_SECTION_WORDS {
            push_chunk(&mut chunks, video_id, preamble, section.title, &section.content);
            continue;
        }
        let pieces = split_section(&section.content);
        let total = pieces.len();
        for (i, piece) in pieces.iter().enumerate() {
            let title = format!("{} ({}/{})", section.title, i + 1, total);
            push_chunk(&mut chunks, video_id, preamble, title, piece);
        }
    }

    let ratio = chars_per_token(language);
    let total_chars: usize = chunks.iter().map(|c| c.content.chars().count()).sum();
    let total_tokens = ((total_chars as f64) / ratio).ceil() as u64;

    TranscriptChunks {
        chunks,
        total_tokens,
    }
}

fn push_chunk(
    chunks: &mut Vec<TranscriptChunk>,
    video_id: &str,
    preamble: &str,
    title: String,
    text: &str,
) {
    let index = chunks.len() + 1;
    let content = if preamble.is_empty() {
        text.to_string()
    } else {
        format!("{preamble}\n\n{text}")
    };
    chunks.push(TranscriptChunk {
        id: format!("{video_id}_{index:03}"),
        index,
        word_count: word_count(text),
        title,
        content,
    });
}

/// Context line attached to every chunk.
#[must_use]
pub fn chunk_preamble(title: &str, speaker: &str, date: &str) -> String {
    format!("Видео: {title}. Спикер: {speaker}. Дата: {date}.")
}
