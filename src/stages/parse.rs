//! Parse stage: filename grammars plus media probe
//!
//! An ordered set of grammars maps the inbox filename to metadata; the
//! first match wins and no grammar matching is a fatal `parse_failure`.
//! Filenames are NFC-normalized first so macOS-style decomposed Cyrillic
//! matches the same way everywhere.

use crate::error::StageError;
use crate::paths;
use crate::progress::StageStatus;
use crate::stage::{Stage, StageContext, StageOutput};
use crate::types::{ContentType, EventCategory, VideoMetadata};
use async_trait::async_trait;
use camino::Utf8Path;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// 1. `YYYY.MM.DD EVENT.STREAM TITLE (SPEAKER)` → regular, educational.
static REGULAR_EDUCATIONAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})\.(\d{2})\.(\d{2})\s+([^.\s]+)\.([^.\s]+)\s+(.+?)\s*\((.+)\)$").unwrap()
});

/// 2. `YYYY.MM EVENT. # TITLE (SPEAKER)` → offsite, leadership.
static OFFSITE_LEADERSHIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})\.(\d{2})\s+(.+?)\.\s*#\s*(.+?)\s*\((.+)\)$").unwrap());

/// 3. `YYYY.MM EVENT. TITLE (SPEAKER)` → offsite, educational.
static OFFSITE_EDUCATIONAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})\.(\d{2})\s+(.+?)\.\s+(.+?)\s*\((.+)\)$").unwrap());

/// 4. `SURNAME (NAMES)` inside an offsite folder → offsite, leadership.
static FOLDER_LEADERSHIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\p{Lu}[\p{L}\-]*)\s*\((.+)\)$").unwrap());

/// 5. `SPEAKER — TITLE` inside an offsite folder → offsite, educational.
static FOLDER_EDUCATIONAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?)\s+—\s+(.+)$").unwrap());

/// Offsite folder names look like `YYYY.MM EVENT`.
static OFFSITE_FOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})\.(\d{2})\s+(.+)$").unwrap());

#[derive(Debug, PartialEq)]
struct ParsedName {
    date: NaiveDate,
    event_type: String,
    stream: Option<String>,
    title: String,
    speaker: String,
    event_name: Option<String>,
    content_type: ContentType,
    event_category: EventCategory,
}

fn date_from(year: &str, month: &str, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day)
}

/// Offsite folder context for grammars 4 and 5: `(date, event_name)`.
fn offsite_folder(path: &Utf8Path) -> Option<(NaiveDate, String)> {
    let parent: String = path.parent()?.file_name()?.nfc().collect();
    let caps = OFFSITE_FOLDER.captures(&parent)?;
    let date = date_from(&caps[1], &caps[2], 1)?;
    Some((date, caps[3].trim().to_string()))
}

/// Apply the grammars in order; the first match wins.
fn parse_filename(path: &Utf8Path) -> Option<ParsedName> {
    let stem: String = path.file_stem()?.nfc().collect();

    if let Some(caps) = REGULAR_EDUCATIONAL.captures(&stem) {
        let date = date_from(&caps[1], &caps[2], caps[3].parse().ok()?)?;
        return Some(ParsedName {
            date,
            event_type: caps[4].to_string(),
            stream: Some(caps[5].to_string()),
            title: caps[6].trim().to_string(),
            speaker: caps[7].trim().to_string(),
            event_name: None,
            content_type: ContentType::Educational,
            event_category: EventCategory::Regular,
        });
    }

    if let Some(caps) = OFFSITE_LEADERSHIP.captures(&stem) {
        let date = date_from(&caps[1], &caps[2], 1)?;
        let event_name = caps[3].trim().to_string();
        return Some(ParsedName {
            date,
            event_type: event_name.clone(),
            stream: None,
            title: caps[4].trim().to_string(),
            speaker: caps[5].trim().to_string(),
            event_name: Some(event_name),
            content_type: ContentType::Leadership,
            event_category: EventCategory::Offsite,
        });
    }

    if let Some(caps) = OFFSITE_EDUCATIONAL.captures(&stem) {
        let date = date_from(&caps[1], &caps[2], 1)?;
        let event_name = caps[3].trim().to_string();
        return Some(ParsedName {
            date,
            event_type: event_name.clone(),
            stream: None,
            title: caps[4].trim().to_string(),
            speaker: caps[5].trim().to_string(),
            event_name: Some(event_name),
            content_type: ContentType::Educational,
            event_category: EventCategory::Offsite,
        });
    }

    // grammars 4 and 5 only apply inside an offsite folder
    let (date, event_name) = offsite_folder(path)?;

    if let Some(caps) = FOLDER_LEADERSHIP.captures(&stem) {
        return Some(ParsedName {
            date,
            event_type: event_name.clone(),
            stream: None,
            title: caps[1].trim().to_string(),
            speaker: caps[2].trim().to_string(),
            event_name: Some(event_name),
            content_type: ContentType::Leadership,
            event_category: EventCategory::Offsite,
        });
    }

    if let Some(caps) = FOLDER_EDUCATIONAL.captures(&stem) {
        return Some(ParsedName {
            date,
            event_type: event_name.clone(),
            stream: None,
            title: caps[2].trim().to_string(),
            speaker: caps[1].trim().to_string(),
            event_name: Some(event_name),
            content_type: ContentType::Educational,
            event_category: EventCategory::Offsite,
        });
    }

    None
}

pub struct ParseStage;

#[async_trait]
impl Stage for ParseStage {
    fn name(&self) -> &'static str {
        "parse"
    }

    fn depends_on(&self) -> &'static [&'static str] {
        &[]
    }

    fn status(&self) -> StageStatus {
        StageStatus::Parsing
    }

    fn input_size(&self, _ctx: &StageContext) -> u64 {
        1
    }

    fn estimate_seconds(&self, _input_size: u64) -> f64 {
        5.0
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let path = &ctx.video_path;
        let filename = path
            .file_name()
            .ok_or_else(|| StageError::parse_failure(format!("input has no filename: {path}")))?
            .to_string();

        let parsed = parse_filename(path).ok_or_else(|| {
            StageError::parse_failure(format!("no filename pattern matches '{filename}'"))
        })?;

        let event_type = match parsed.event_category {
            EventCategory::Regular => ctx.events.normalize_event(&parsed.event_type),
            EventCategory::Offsite => parsed.event_type.clone(),
        };

        let video_id = paths::video_id(
            parsed.date,
            &event_type,
            parsed.stream.as_deref(),
            &parsed.title,
        );

        let archive_path = match parsed.event_category {
            EventCategory::Regular => paths::regular_archive_path(
                &ctx.settings.archive_dir,
                parsed.date,
                &event_type,
                &parsed.title,
                &parsed.speaker,
            ),
            EventCategory::Offsite => paths::offsite_archive_path(
                &ctx.settings.archive_dir,
                parsed.date,
                parsed.event_name.as_deref().unwrap_or(&event_type),
                &parsed.title,
                &parsed.speaker,
            ),
        };

        let duration_seconds = ctx
            .services
            .media
            .duration_seconds(path)
            .await
            .map_err(|e| {
                StageError::parse_failure(format!("media probe failed for '{filename}': {e}"))
            })?;

        debug!(video_id = %video_id, archive_path = %archive_path, duration_seconds, "parsed input");

        Ok(StageOutput::Metadata(VideoMetadata {
            date: parsed.date,
            event_type,
            stream: parsed.stream,
            title: parsed.title,
            speaker: parsed.speaker,
            event_name: parsed.event_name,
            content_type: parsed.content_type,
            event_category: parsed.event_category,
            original_filename: filename,
            video_id,
            source_path: path.clone(),
            archive_path,
            duration_seconds,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn parse(path: &str) -> Option<ParsedName> {
        parse_filename(Utf8Path::new(path))
    }

    #[test]
    fn test_regular_educational_grammar() {
        let parsed = parse("inbox/2025.04.07 ПШ.SV Группа поддержки (Светлана Дмитрук).mp4")
            .expect("grammar 1 must match");
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2025, 4, 7).unwrap());
        assert_eq!(parsed.event_type, "ПШ");
        assert_eq!(parsed.stream.as_deref(), Some("SV"));
        assert_eq!(parsed.title, "Группа поддержки");
        assert_eq!(parsed.speaker, "Светлана Дмитрук");
        assert_eq!(parsed.content_type, ContentType::Educational);
        assert_eq!(parsed.event_category, EventCategory::Regular);
    }

    #[test]
    fn test_offsite_leadership_grammar() {
        let parsed = parse("inbox/2026.01 Форум Табтим. # Антоновы (Дмитрий и Юлия).mp3")
            .expect("grammar 2 must match");
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert_eq!(parsed.event_name.as_deref(), Some("Форум Табтим"));
        assert_eq!(parsed.title, "Антоновы");
        assert_eq!(parsed.speaker, "Дмитрий и Юлия");
        assert_eq!(parsed.content_type, ContentType::Leadership);
        assert_eq!(parsed.event_category, EventCategory::Offsite);
    }

    #[test]
    fn test_offsite_educational_grammar() {
        let parsed = parse("inbox/2026.01 Форум Табтим. Планирование года (Ирина Волкова).mp4")
            .expect("grammar 3 must match");
        assert_eq!(parsed.content_type, ContentType::Educational);
        assert_eq!(parsed.event_category, EventCategory::Offsite);
        assert_eq!(parsed.title, "Планирование года");
    }

    #[test]
    fn test_marker_decides_between_grammars_2_and_3() {
        let leadership = parse("inbox/2026.01 Форум. # Иванов (Пётр).mp4").unwrap();
        let educational = parse("inbox/2026.01 Форум. Иванов (Пётр).mp4").unwrap();
        assert_eq!(leadership.content_type, ContentType::Leadership);
        assert_eq!(educational.content_type, ContentType::Educational);
    }

    #[test]
    fn test_folder_leadership_grammar() {
        let parsed = parse("archive/2026.01 Форум Табтим/Антоновы (Дмитрий и Юлия).mp4")
            .expect("grammar 4 must match inside offsite folder");
        assert_eq!(parsed.content_type, ContentType::Leadership);
        assert_eq!(parsed.title, "Антоновы");
        assert_eq!(parsed.speaker, "Дмитрий и Юлия");
        assert_eq!(parsed.event_name.as_deref(), Some("Форум Табтим"));
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }

    #[test]
    fn test_folder_educational_grammar() {
        let parsed = parse("archive/2026.01 Форум Табтим/Волкова — Планирование.mp4")
            .expect("grammar 5 must match inside offsite folder");
        assert_eq!(parsed.content_type, ContentType::Educational);
        assert_eq!(parsed.speaker, "Волкова");
        assert_eq!(parsed.title, "Планирование");
    }

    #[test]
    fn test_folder_grammars_require_offsite_parent() {
        assert!(parse("inbox/Антоновы (Дмитрий и Юлия).mp4").is_none());
        assert!(parse("inbox/Волкова — Планирование.mp4").is_none());
    }

    #[test]
    fn test_unmatched_filename_yields_none() {
        assert!(parse("inbox/random-recording.mp4").is_none());
        assert!(parse("inbox/2025 без точки (Кто-то).mp4").is_none());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let path = "inbox/2025.04.07 ПШ.SV Группа поддержки (Светлана Дмитрук).mp4";
        let a = parse(path).unwrap();
        let b = parse(path).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_nfc_normalization_applied() {
        // decomposed "й" (и + combining breve) in the title
        let decomposed = "inbox/2025.04.07 ПШ.SV Презентации\u{0306} (Анна).mp4";
        let parsed = parse(decomposed);
        assert!(parsed.is_some());
    }

    #[test]
    fn test_video_id_from_scenario_one() {
        let parsed = parse("inbox/2025.04.07 ПШ.SV Группа поддержки (Светлана Дмитрук).mp4").unwrap();
        let id = crate::paths::video_id(
            parsed.date,
            &parsed.event_type,
            parsed.stream.as_deref(),
            &parsed.title,
        );
        assert_eq!(id, "2025-04-07_ПШ-SV_группа-поддержки");
    }

    #[test]
    fn test_archive_path_from_scenario_one() {
        let parsed = parse("inbox/2025.04.07 ПШ.SV Группа поддержки (Светлана Дмитрук).mp4").unwrap();
        let archive = crate::paths::regular_archive_path(
            Utf8Path::new("archive"),
            parsed.date,
            &parsed.event_type,
            &parsed.title,
            &parsed.speaker,
        );
        assert_eq!(
            archive,
            Utf8PathBuf::from("archive/2025/04.07 ПШ/Группа поддержки (Светлана Дмитрук)")
        );
    }
}
