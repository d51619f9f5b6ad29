//! Markdown rendering for generated artifacts
//!
//! All three artifact kinds (longread, summary, story) share the frontmatter
//! convention: YAML between `---` fences carrying title, speaker, date and
//! the classification fields.

use crate::types::{Classification, LongreadSection, Story, Summary, VideoMetadata};
use serde::Serialize;

/// Number of whitespace-separated words.
#[must_use]
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Serialize)]
struct Frontmatter<'a> {
    title: &'a str,
    speaker: &'a str,
    date: String,
    #[serde(rename = "type")]
    doc_type: &'a str,
    topic_area: &'a [String],
    tags: &'a [String],
    access_level: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    word_count: Option<usize>,
}

fn access_level_str(classification: &Classification) -> &'static str {
    match classification.access_level {
        crate::types::AccessLevel::Consultant => "consultant",
        crate::types::AccessLevel::Leader => "leader",
        crate::types::AccessLevel::Personal => "personal",
    }
}

fn render_frontmatter(
    meta: &VideoMetadata,
    doc_type: &str,
    classification: &Classification,
    words: Option<usize>,
) -> String {
    let fm = Frontmatter {
        title: &meta.title,
        speaker: &meta.speaker,
        date: meta.date.to_string(),
        doc_type,
        topic_area: &classification.topic_area,
        tags: &classification.tags,
        access_level: access_level_str(classification),
        word_count: words,
    };
    // serde_yaml only fails on non-string keys; this struct has none
    let yaml = serde_yaml::to_string(&fm).unwrap_or_default();
    format!("---\n{yaml}---\n")
}

/// Longread: frontmatter, title, introduction, H2 sections, conclusion.
#[must_use]
pub fn render_longread(
    meta: &VideoMetadata,
    sections: &[LongreadSection],
    introduction: &str,
    conclusion: &str,
    classification: &Classification,
) -> String {
    let mut body = String::new();
    body.push_str(&format!("# {}\n\n", meta.title));
    body.push_str(introduction.trim());
    body.push_str("\n\n");
    for section in sections {
        body.push_str(&format!("## {}\n\n{}\n\n", section.title, section.content.trim()));
    }
    body.push_str("## Заключение\n\n");
    body.push_str(conclusion.trim());
    body.push('\n');

    let words = word_count(&body);
    format!(
        "{}\n{body}",
        render_frontmatter(meta, "longread", classification, Some(words))
    )
}

/// Summary: frontmatter plus callout blocks per field.
#[must_use]
pub fn render_summary(meta: &VideoMetadata, summary: &Summary) -> String {
    let mut body = String::new();
    body.push_str(&format!("# {} — выжимка\n\n", meta.title));

    body.push_str("> [!abstract] Суть\n");
    for line in summary.essence.trim().lines() {
        body.push_str(&format!("> {line}\n"));
    }
    body.push('\n');

    body.push_str("## Ключевые понятия\n\n");
    for concept in &summary.key_concepts {
        body.push_str(&format!("- {concept}\n"));
    }
    body.push('\n');

    body.push_str("## Практические инструменты\n\n");
    for tool in &summary.practical_tools {
        body.push_str(&format!("- {tool}\n"));
    }
    body.push('\n');

    if !summary.quotes.is_empty() {
        body.push_str("## Цитаты\n\n");
        for quote in &summary.quotes {
            body.push_str(&format!("> {quote}\n\n"));
        }
    }

    body.push_str("> [!tip] Инсайт\n");
    for line in summary.insight.trim().lines() {
        body.push_str(&format!("> {line}\n"));
    }
    body.push('\n');

    body.push_str("## Действия\n\n");
    for action in &summary.actions {
        body.push_str(&format!("- [ ] {action}\n"));
    }

    format!(
        "{}\n{body}",
        render_frontmatter(meta, "summary", &summary.classification, None)
    )
}

/// Story: frontmatter, numbered H2 blocks, facts list.
#[must_use]
pub fn render_story(meta: &VideoMetadata, story: &Story) -> String {
    let mut body = String::new();
    body.push_str(&format!("# {}\n\n", story.names));
    body.push_str(&format!("**Статус:** {}\n\n", story.current_status));
    body.push_str(&format!("**Главный инсайт:** {}\n\n", story.main_insight));

    for block in &story.blocks {
        body.push_str(&format!(
            "## {}. {}\n\n{}\n\n",
            block.number,
            block.title,
            block.content.trim()
        ));
    }

    let facts = &story.facts;
    let mut fact_lines: Vec<String> = Vec::new();
    let mut push_fact = |label: &str, value: Option<String>| {
        if let Some(value) = value {
            fact_lines.push(format!("- **{label}:** {value}"));
        }
    };
    push_fact("Лет в бизнесе", facts.time_in_business.clone());
    push_fact("Путь до статуса", facts.time_to_status.clone());
    push_fact("Темп", facts.speed.clone());
    push_fact("Формат", facts.business_format.clone());
    push_fact(
        "Семейный бизнес",
        facts.is_family.map(|v| if v { "да" } else { "нет" }.to_string()),
    );
    push_fact(
        "Был застой",
        facts
            .had_stagnation
            .map(|v| if v { "да" } else { "нет" }.to_string()),
    );
    push_fact(
        "Лет застоя",
        facts.stagnation_years.map(|v| v.to_string()),
    );
    push_fact(
        "Был перезапуск",
        facts
            .had_restart
            .map(|v| if v { "да" } else { "нет" }.to_string()),
    );
    push_fact("Ключевой паттерн", facts.key_pattern.clone());
    push_fact("Наставник", facts.mentor.clone());

    if !fact_lines.is_empty() {
        body.push_str("## Факты\n\n");
        body.push_str(&fact_lines.join("\n"));
        body.push('\n');
    }

    format!(
        "{}\n{body}",
        render_frontmatter(meta, "story", &story.classification, None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessLevel, ContentType, EventCategory};
    use camino::Utf8PathBuf;
    use chrono::NaiveDate;

    fn meta() -> VideoMetadata {
        VideoMetadata {
            date: NaiveDate::from_ymd_opt(2025, 4, 7).unwrap(),
            event_type: "ПШ".to_string(),
            stream: Some("SV".to_string()),
            title: "Группа поддержки".to_string(),
            speaker: "Светлана Дмитрук".to_string(),
            event_name: None,
            content_type: ContentType::Educational,
            event_category: EventCategory::Regular,
            original_filename: String::new(),
            video_id: "2025-04-07_ПШ-SV_группа-поддержки".to_string(),
            source_path: Utf8PathBuf::from("in.mp4"),
            archive_path: Utf8PathBuf::from("archive"),
            duration_seconds: 100.0,
        }
    }

    fn classification() -> Classification {
        Classification {
            topic_area: vec!["работа с командой".to_string()],
            tags: vec!["поддержка".to_string()],
            access_level: AccessLevel::Consultant,
        }
    }

    #[test]
    fn test_longread_has_frontmatter_and_sections() {
        let sections = vec![
            LongreadSection {
                title: "Зачем нужна группа поддержки".to_string(),
                content: "Текст раздела.".to_string(),
            },
            LongreadSection {
                title: "Как её собрать".to_string(),
                content: "Ещё текст.".to_string(),
            },
        ];
        let md = render_longread(&meta(), &sections, "Введение.", "Вывод.", &classification());
        assert!(md.starts_with("---\n"));
        assert!(md.contains("access_level: consultant"));
        assert!(md.contains("## Зачем нужна группа поддержки"));
        assert!(md.contains("## Как её собрать"));
        assert!(md.contains("## Заключение"));
        assert!(md.contains("word_count:"));
    }

    #[test]
    fn test_story_renders_numbered_blocks() {
        let story = Story {
            markdown: String::new(),
            blocks: (1..=8)
                .map(|n| crate::types::StoryBlock {
                    number: n,
                    title: format!("Блок {n}"),
                    content: "Содержимое.".to_string(),
                })
                .collect(),
            names: "Антоновы".to_string(),
            current_status: "Директор".to_string(),
            main_insight: "Системность".to_string(),
            facts: crate::types::StoryFacts {
                is_family: Some(true),
                ..Default::default()
            },
            classification: classification(),
            metrics: None,
        };
        let md = render_story(&meta(), &story);
        for n in 1..=8 {
            assert!(md.contains(&format!("## {n}. Блок {n}")));
        }
        assert!(md.contains("**Семейный бизнес:** да"));
    }

    #[test]
    fn test_summary_renders_callouts() {
        let summary = Summary {
            markdown: String::new(),
            essence: "О чём видео.".to_string(),
            key_concepts: vec!["Понятие — смысл".to_string()],
            practical_tools: vec!["Скрипт звонка".to_string()],
            quotes: vec!["Цитата".to_string()],
            insight: "Инсайт.".to_string(),
            actions: vec!["Сделать список".to_string()],
            classification: classification(),
            metrics: None,
        };
        let md = render_summary(&meta(), &summary);
        assert!(md.contains("> [!abstract] Суть"));
        assert!(md.contains("> [!tip] Инсайт"));
        assert!(md.contains("- [ ] Сделать список"));
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("одно два  три\nчетыре"), 4);
        assert_eq!(word_count(""), 0);
    }
}
