//! Small text and clock helpers shared by config, the REST transport and sync.

/// Trimmed value, or `None` when nothing but whitespace was given
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Remote base URLs must carry an explicit HTTP(S) scheme
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Response bodies quoted in errors are cut to this many characters
const ERROR_BODY_LIMIT: usize = 180;

/// Trim a response body down to something fit for an error message
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(ERROR_BODY_LIMIT).collect()
}

/// Wall clock in Unix milliseconds, the unit of every stored timestamp
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
