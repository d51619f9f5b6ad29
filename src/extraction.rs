//! JSON extraction from LLM responses
//!
//! Models are instructed to answer with bare JSON but routinely wrap it in
//! code fences or preamble text. Extraction strips fences, then takes the
//! outermost object. Anything that still fails to parse is a schema error —
//! there is no fallback.

use crate::error::StageError;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Extract and deserialize the JSON object from a raw model response.
///
/// # Errors
///
/// `schema` when no object can be located or deserialization fails. The raw
/// response is logged at debug level for diagnosis.
pub fn extract_json<T: DeserializeOwned>(raw: &str) -> Result<T, StageError> {
    let candidate = locate_object(raw).ok_or_else(|| {
        debug!(raw, "response carried no JSON object");
        StageError::schema("response carried no JSON object")
    })?;

    serde_json::from_str(candidate).map_err(|e| {
        debug!(raw, error = %e, "JSON extraction failed");
        StageError::schema(format!("response failed JSON extraction: {e}")).with_source(e)
    })
}

/// Locate the outermost `{...}` span, tolerating code fences and prose
/// around it.
fn locate_object(raw: &str) -> Option<&str> {
    let trimmed = strip_code_fence(raw.trim());
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&trimmed[start..=end])
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the info string ("json") on the fence line
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.strip_suffix("```").map_or(rest, str::trim_end)
}
