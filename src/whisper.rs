//! Transcription service client
//!
//! Uploads a media file as multipart and parses the segment response into a
//! [`RawTranscript`]. Multipart bodies cannot be cloned by the shared retry
//! helper, so this client rebuilds the form per attempt under the same
//! policy: connection failures and 5xx retry 3× with 4..60 s backoff, 4xx
//! never retries, a timeout is final.

use crate::llm::LlmError;
use crate::types::{RawTranscript, TranscriptSegment};
use async_trait::async_trait;
use camino::Utf8Path;
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(4);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Transcription boundary, mockable in tests.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        media_path: &Utf8Path,
        model: &str,
        timeout: Duration,
    ) -> Result<RawTranscript, LlmError>;
}

pub struct WhisperClient {
    client: reqwest::Client,
    base_url: String,
}

impl WhisperClient {
    /// # Errors
    ///
    /// `Misconfiguration` if the HTTP client cannot be constructed.
    pub fn new(base_url: String) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .use_rustls_tls()
            .build()
            .map_err(|e| LlmError::Misconfiguration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn build_form(bytes: Vec<u8>, filename: String, model: &str) -> multipart::Form {
        multipart::Form::new()
            .part("file", multipart::Part::bytes(bytes).file_name(filename))
            .text("model", model.to_string())
    }
}

#[async_trait]
impl Transcriber for WhisperClient {
    async fn transcribe(
        &self,
        media_path: &Utf8Path,
        model: &str,
        timeout: Duration,
    ) -> Result<RawTranscript, LlmError> {
        let bytes = tokio::fs::read(media_path)
            .await
            .map_err(|e| LlmError::Transport(format!("failed to read {media_path}: {e}")))?;
        let filename = media_path
            .file_name()
            .unwrap_or("upload.bin")
            .to_string();
        let url = format!("{}/transcribe", self.base_url);

        debug!(%media_path, model, bytes = bytes.len(), "uploading to transcription service");

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            let form = Self::build_form(bytes.clone(), filename.clone(), model);
            let result = self
                .client
                .post(&url)
                .multipart(form)
                .timeout(timeout)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_client_error() => {
                    return Err(LlmError::Provider(format!(
                        "transcription service rejected the request: {}",
                        response.status()
                    )));
                }
                Ok(response) if response.status().is_server_error() => {
                    if attempt <= MAX_RETRIES {
                        let backoff = backoff_for_attempt(attempt);
                        warn!(attempt, status = %response.status(), "transcription server error, retrying");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(LlmError::Transport(format!(
                        "transcription service returned server error: {}",
                        response.status()
                    )));
                }
                Ok(response) => break response,
                Err(e) if e.is_timeout() => {
                    return Err(LlmError::Timeout { duration: timeout });
                }
                Err(e) => {
                    if attempt <= MAX_RETRIES {
                        let backoff = backoff_for_attempt(attempt);
                        warn!(attempt, error = %e, "transcription upload failed, retrying");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Err(LlmError::Transport(format!(
                        "transcription upload failed: {e}"
                    )));
                }
            }
        };

        let body: TranscriptionResponse = response.json().await.map_err(|e| {
            LlmError::Transport(format!("failed to parse transcription response: {e}"))
        })?;

        Ok(assemble_transcript(body))
    }
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    (INITIAL_BACKOFF * factor).min(MAX_BACKOFF)
}

#[derive(Debug, Deserialize)]
struct ResponseSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    segments: Vec<ResponseSegment>,
    language: String,
    duration: f64,
    model: String,
}

/// Build a [`RawTranscript`]: `full_text` is the trimmed concatenation of
/// the segments in time order.
fn assemble_transcript(body: TranscriptionResponse) -> RawTranscript {
    let segments: Vec<TranscriptSegment> = body
        .segments
        .into_iter()
        .map(|s| TranscriptSegment {
            start: s.start,
            end: s.end,
            text: s.text.trim().to_string(),
        })
        .collect();

    let full_text = segments
        .iter()
        .map(|s| s.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    RawTranscript {
        segments,
        full_text,
        duration_seconds: body.duration,
        language: body.language,
        model_name: body.model,
        timestamped_text: None,
    }
}

/// `[MM:SS → MM:SS] text` view for backup storage.
#[must_use]
pub fn timestamped_view(segments: &[TranscriptSegment]) -> String {
    fn stamp(seconds: f64) -> String {
        let total = seconds.max(0.0) as u64;
        format!("{:02}:{:02}", total / 60, total % 60)
    }
    segments
        .iter()
        .map(|s| format!("[{} → {}] {}", stamp(s.start), stamp(s.end), s.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_concatenates_segments() {
        let body = TranscriptionResponse {
            segments: vec![
                ResponseSegment {
                    start: 0.0,
                    end: 2.5,
                    text: " Добрый день. ".to_string(),
                },
                ResponseSegment {
                    start: 2.5,
                    end: 5.0,
                    text: "Начнём занятие.".to_string(),
                },
            ],
            language: "ru".to_string(),
            duration: 5.0,
            model: "whisper-large-v3".to_string(),
        };
        let transcript = assemble_transcript(body);
        assert_eq!(transcript.full_text, "Добрый день. Начнём занятие.");
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.language, "ru");
    }

    #[test]
    fn test_empty_segments_yield_empty_full_text() {
        let body = TranscriptionResponse {
            segments: vec![],
            language: "ru".to_string(),
            duration: 0.0,
            model: "whisper-large-v3".to_string(),
        };
        let transcript = assemble_transcript(body);
        assert!(transcript.full_text.is_empty());
        assert!(transcript.segments.is_empty());
    }

    #[test]
    fn test_timestamped_view_format() {
        let segments = vec![
            TranscriptSegment {
                start: 0.0,
                end: 65.4,
                text: "Первый фрагмент".to_string(),
            },
            TranscriptSegment {
                start: 65.4,
                end: 130.0,
                text: "Второй фрагмент".to_string(),
            },
        ];
        let view = timestamped_view(&segments);
        assert_eq!(
            view,
            "[00:00 → 01:05] Первый фрагмент\n[01:05 → 02:10] Второй фрагмент"
        );
    }

    #[test]
    fn test_backoff_caps_at_sixty_seconds() {
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(4));
        assert_eq!(backoff_for_attempt(4), Duration::from_secs(32));
        assert_eq!(backoff_for_attempt(6), Duration::from_secs(60));
    }
}
