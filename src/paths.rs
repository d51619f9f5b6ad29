//! Archive layout and identifier conventions
//!
//! The archive path is a pure function of the parsed metadata, so a re-run
//! over the same filename always lands in the same directory:
//!
//! - regular events: `<root>/<year>/<MM.DD event_type>/<title> (<speaker>)/`
//! - offsite events: `<root>/<year>/Выездные/<event_name>/<title> (<speaker>)/`

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Datelike, NaiveDate};

/// Directory name collecting all offsite events for a year.
pub const OFFSITE_DIR: &str = "Выездные";

/// Media suffixes the inbox recognizes as candidate inputs.
pub const RECOGNIZED_SUFFIXES: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "webm", "mp3", "wav", "m4a", "flac", "aac", "ogg",
];

/// Whether a path looks like a pipeline input based on its extension.
#[must_use]
pub fn is_recognized_media(path: &Utf8Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_lowercase();
            RECOGNIZED_SUFFIXES.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Archive directory for a regular event.
#[must_use]
pub fn regular_archive_path(
    root: &Utf8Path,
    date: NaiveDate,
    event_type: &str,
    title: &str,
    speaker: &str,
) -> Utf8PathBuf {
    root.join(date.year().to_string())
        .join(format!(
            "{:02}.{:02} {event_type}",
            date.month(),
            date.day()
        ))
        .join(format!("{title} ({speaker})"))
}

/// Archive directory for an offsite event.
#[must_use]
pub fn offsite_archive_path(
    root: &Utf8Path,
    date: NaiveDate,
    event_name: &str,
    title: &str,
    speaker: &str,
) -> Utf8PathBuf {
    root.join(date.year().to_string())
        .join(OFFSITE_DIR)
        .join(event_name)
        .join(format!("{title} ({speaker})"))
}

/// Lowercased, hyphen-joined identifier fragment.
///
/// Keeps Unicode letters and digits (titles are mostly Cyrillic), folds any
/// run of other characters into a single hyphen.
#[must_use]
pub fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    out
}

/// Stable video identifier: `date_eventType[-stream]_slug(title)`.
#[must_use]
pub fn video_id(date: NaiveDate, event_type: &str, stream: Option<&str>, title: &str) -> String {
    let event = event_type.replace(char::is_whitespace, "-");
    match stream {
        Some(stream) => format!("{date}_{event}-{stream}_{}", slug(title)),
        None => format!("{date}_{event}_{}", slug(title)),
    }
}
