use serde::de::DeserializeOwned;

/// Extracts and parses a JSON object embedded in free-form model output.
///
/// Tries the whole string first, then falls back to the substring between
/// the first `{` and the last `}` — the same brace-scan the attack loop's
/// ancestor used to pull verification verdicts out of a chatty LLM
/// response that didn't confine itself to bare JSON.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    if let Ok(value) = serde_json::from_str::<T>(text.trim()) {
        return Some(value);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<T>(&text[start..=end]).ok()
}
