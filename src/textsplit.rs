//! Text splitting for LLM context windows
//!
//! Splitting prefers paragraph boundaries, then sentence boundaries, and
//! only falls back to a hard cut for pathological inputs. Adjacent chunks
//! carry an overlap so the cleaner sees continuous context; the merge step
//! removes the duplicated region by the longest suffix/prefix match within
//! the overlap window.

/// Split `text` into chunks of roughly `chunk_chars`, each (except the
/// first) prefixed with up to `overlap_chars` of trailing context from the
/// previous chunk.
#[must_use]
pub fn split_with_overlap(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    let parts = split_at_boundaries(text, chunk_chars);
    if parts.len() <= 1 || overlap_chars == 0 {
        return parts;
    }

    let mut out = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            out.push(part.clone());
        } else {
            let tail = char_tail(&parts[i - 1], overlap_chars);
            out.push(format!("{tail}{part}"));
        }
    }
    out
}

/// Split into parts of roughly `chunk_chars` at paragraph or sentence
/// boundaries, preserving all content in order.
#[must_use]
pub fn split_at_boundaries(text: &str, chunk_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= chunk_chars {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for paragraph in text.split_inclusive("\n\n") {
        let para_len = paragraph.chars().count();

        if para_len > chunk_chars {
            // oversized paragraph: flush, then split by sentences
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
                current_len = 0;
            }
            for sentence in split_sentences(paragraph) {
                let sent_len = sentence.chars().count();
                if current_len + sent_len > chunk_chars && !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                current.push_str(sentence);
                current_len += sent_len;
            }
            continue;
        }

        if current_len + para_len > chunk_chars && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(paragraph);
        current_len += para_len;
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Group already-split parts into sections of `parts_per_section`.
#[must_use]
pub fn group_parts(parts: Vec<String>, parts_per_section: usize) -> Vec<String> {
    let per_section = parts_per_section.max(1);
    parts
        .chunks(per_section)
        .map(|group| group.join(""))
        .collect()
}

/// Merge chunk outputs back into one text, deduplicating the overlap region
/// between each adjacent pair by the longest suffix/prefix match bounded by
/// `overlap_window` characters.
#[must_use]
pub fn merge_overlapping(parts: &[String], overlap_window: usize) -> String {
    let mut merged = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            merged.push_str(part);
            continue;
        }
        let dedup = longest_overlap(&merged, part, overlap_window);
        merged.push_str(&skip_chars(part, dedup));
    }
    merged
}

/// Longest k ≤ window such that the last k chars of `left` equal the first
/// k chars of `right`.
fn longest_overlap(left: &str, right: &str, window: usize) -> usize {
    let left_chars: Vec<char> = left.chars().collect();
    let right_chars: Vec<char> = right.chars().collect();
    let max_k = window.min(left_chars.len()).min(right_chars.len());

    for k in (1..=max_k).rev() {
        if left_chars[left_chars.len() - k..] == right_chars[..k] {
            return k;
        }
    }
    0
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let end = idx + ch.len_utf8();
            out.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn char_tail(text: &str, chars: usize) -> String {
    let total = text.chars().count();
    text.chars().skip(total.saturating_sub(chars)).collect()
}

fn skip_chars(text: &str, chars: usize) -> String {
    text.chars().skip(chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_single_part() {
        let parts = split_at_boundaries("короткий текст", 1000);
        assert_eq!(parts, vec!["короткий текст".to_string()]);
    }

    #[test]
    fn test_split_preserves_all_content() {
        let text = (0..50)
            .map(|i| format!("Абзац номер {i} с некоторым содержимым.\n\n"))
            .collect::<String>();
        let parts = split_at_boundaries(&text, 200);
        assert!(parts.len() > 1);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_respects_paragraph_boundaries() {
        let text = "Первый абзац.\n\nВторой абзац.\n\nТретий абзац.";
        let parts = split_at_boundaries(text, 20);
        for part in &parts[..parts.len() - 1] {
            assert!(part.ends_with("\n\n"), "part does not end at boundary: {part:?}");
        }
    }

    #[test]
    fn test_overlap_prefixes_subsequent_parts() {
        let text = "Первый абзац текста.\n\nВторой абзац текста.\n\nТретий абзац текста.";
        let plain = split_at_boundaries(text, 25);
        let overlapped = split_with_overlap(text, 25, 10);
        assert!(plain.len() > 1);
        assert_eq!(plain.len(), overlapped.len());
        assert_eq!(plain[0], overlapped[0]);
        for i in 1..plain.len() {
            let expected = format!("{}{}", char_tail(&plain[i - 1], 10), plain[i]);
            assert_eq!(overlapped[i], expected);
        }
    }

    #[test]
    fn test_merge_removes_duplicated_overlap() {
        let parts = vec![
            "Начало текста. Общий кусок.".to_string(),
            " Общий кусок. Конец текста.".to_string(),
        ];
        let merged = merge_overlapping(&parts, 20);
        assert_eq!(merged, "Начало текста. Общий кусок. Конец текста.");
    }

    #[test]
    fn test_merge_without_overlap_concatenates() {
        let parts = vec!["Один.".to_string(), " Два.".to_string()];
        assert_eq!(merge_overlapping(&parts, 10), "Один. Два.");
    }

    #[test]
    fn test_group_parts_pairs() {
        let parts = vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "d".to_string(),
            "e".to_string(),
        ];
        let sections = group_parts(parts, 2);
        assert_eq!(sections, vec!["ab", "cd", "e"]);
    }

    #[test]
    fn test_longest_overlap_bounded_by_window() {
        let left = "ааааабббб";
        let right = "ббббввввв";
        assert_eq!(longest_overlap(left, right, 10), 4);
        assert_eq!(longest_overlap(left, right, 2), 2);
    }
}
