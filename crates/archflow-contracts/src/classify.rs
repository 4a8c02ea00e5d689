//! Maps raw remote error text onto [`ErrorCategory`].
//!
//! The table is ordered and the first matching row wins. Quota rows come
//! first so a `429` anywhere in the text is always a quota error.

use crate::errors::{ErrorCategory, JobError};

const KEYWORD_TABLE: &[(&str, ErrorCategory)] = &[
    ("429", ErrorCategory::Quota),
    ("quota", ErrorCategory::Quota),
    ("resource_exhausted", ErrorCategory::Quota),
    ("rate limit", ErrorCategory::Quota),
    ("503", ErrorCategory::Overloaded),
    ("overloaded", ErrorCategory::Overloaded),
    ("service unavailable", ErrorCategory::Overloaded),
    ("unauthenticated", ErrorCategory::Auth),
    ("permission_denied", ErrorCategory::Auth),
    ("invalid authentication", ErrorCategory::Auth),
    ("captcha", ErrorCategory::Captcha),
    ("safety", ErrorCategory::Safety),
    ("prohibited", ErrorCategory::Safety),
    ("unsafe", ErrorCategory::Safety),
    ("timeout", ErrorCategory::Timeout),
    ("timed out", ErrorCategory::Timeout),
    ("deadline_exceeded", ErrorCategory::Timeout),
    ("system_error", ErrorCategory::System),
    ("internal server error", ErrorCategory::System),
    ("network_error", ErrorCategory::Network),
    ("failed to fetch", ErrorCategory::Network),
];

const MAX_DETAIL_CHARS: usize = 512;

pub fn classify_message(text: &str) -> Option<ErrorCategory> {
    let lowered = text.to_ascii_lowercase();
    KEYWORD_TABLE
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|(_, category)| *category)
}

pub fn looks_like_html(body: &str) -> bool {
    let trimmed = body.trim_start();
    trimmed.starts_with('<') || trimmed.to_ascii_lowercase().contains("<!doctype")
}

/// HTML error pages never carry a usable message: 404/500 pages are the
/// backend falling over, anything else is treated as a network problem.
pub fn classify_html(status: u16, body: &str) -> Option<ErrorCategory> {
    if !looks_like_html(body) {
        return None;
    }
    if matches!(status, 404 | 500) {
        Some(ErrorCategory::System)
    } else {
        Some(ErrorCategory::Network)
    }
}

pub fn classify_status_code(status: u16) -> Option<ErrorCategory> {
    match status {
        401 | 403 => Some(ErrorCategory::Auth),
        408 | 504 => Some(ErrorCategory::Timeout),
        429 => Some(ErrorCategory::Quota),
        503 => Some(ErrorCategory::Overloaded),
        404 | 500 | 502 => Some(ErrorCategory::System),
        _ => None,
    }
}

impl JobError {
    /// Turns a remote failure message into a categorized error when a keyword
    /// matches; otherwise the message is passed through untouched.
    pub fn from_remote_text(text: &str) -> Self {
        let trimmed = text.trim();
        if let Some(category) = classify_message(trimmed) {
            return Self::categorized(category, truncate_detail(trimmed));
        }
        if trimmed.is_empty() {
            return Self::RemoteFailure {
                message: "Tạo nội dung thất bại.".to_string(),
            };
        }
        Self::RemoteFailure {
            message: trimmed.to_string(),
        }
    }

    /// Non-2xx response. Keyword text wins over the bare status code.
    pub fn from_http_failure(status: u16, message: &str) -> Self {
        let detail = truncate_detail(&format!("HTTP {status}: {}", message.trim()));
        if let Some(category) = classify_message(message) {
            return Self::categorized(category, detail);
        }
        if let Some(category) = classify_status_code(status) {
            return Self::categorized(category, detail);
        }
        Self::RemoteFailure {
            message: if message.trim().is_empty() {
                format!("Máy chủ trả về lỗi HTTP {status}.")
            } else {
                message.trim().to_string()
            },
        }
    }
}

fn truncate_detail(value: &str) -> String {
    if value.chars().count() <= MAX_DETAIL_CHARS {
        return value.to_string();
    }
    value.chars().take(MAX_DETAIL_CHARS).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::{classify_html, classify_message, looks_like_html};
    use crate::errors::{ErrorCategory, JobError};

    #[test]
    fn status_429_always_maps_to_quota() {
        for text in [
            "429",
            "Request failed with status 429",
            "SAFETY block? no: 429 too many requests",
            "upstream overloaded (503) after 429 retry",
            "UNAUTHENTICATED 429",
        ] {
            assert_eq!(classify_message(text), Some(ErrorCategory::Quota), "{text}");
        }
    }

    #[test]
    fn doctype_with_500_is_system_error() {
        let body = "<!DOCTYPE html><html><body>Internal error</body></html>";
        assert_eq!(classify_html(500, body), Some(ErrorCategory::System));
        assert_eq!(classify_html(404, body), Some(ErrorCategory::System));
        assert_eq!(classify_html(502, body), Some(ErrorCategory::Network));
        assert_eq!(
            classify_html(500, "  \n<!doctype html>"),
            Some(ErrorCategory::System)
        );
        assert_eq!(classify_html(500, r#"{"error":"boom"}"#), None);
    }

    #[test]
    fn keyword_table_covers_known_markers() {
        assert_eq!(
            classify_message("finishReason: SAFETY"),
            Some(ErrorCategory::Safety)
        );
        assert_eq!(
            classify_message("The model is overloaded"),
            Some(ErrorCategory::Overloaded)
        );
        assert_eq!(
            classify_message("Request had invalid credentials: UNAUTHENTICATED"),
            Some(ErrorCategory::Auth)
        );
        assert_eq!(
            classify_message("reCAPTCHA evaluation failed"),
            Some(ErrorCategory::Captcha)
        );
        assert_eq!(
            classify_message("operation timed out"),
            Some(ErrorCategory::Timeout)
        );
        assert_eq!(classify_message("something odd"), None);
    }

    #[test]
    fn classification_is_deterministic() {
        let text = "quota exceeded for project";
        let first = classify_message(text);
        for _ in 0..10 {
            assert_eq!(classify_message(text), first);
        }
    }

    #[test]
    fn remote_text_passes_through_unknown_messages() {
        assert_eq!(
            JobError::from_remote_text("  prompt rejected by reviewer "),
            JobError::RemoteFailure {
                message: "prompt rejected by reviewer".to_string()
            }
        );
        assert_eq!(
            JobError::from_remote_text("PUBLIC_ERROR_UNSAFE_GENERATION").category(),
            Some(ErrorCategory::Safety)
        );
    }

    #[test]
    fn http_failure_falls_back_to_status_code() {
        assert_eq!(
            JobError::from_http_failure(401, "").category(),
            Some(ErrorCategory::Auth)
        );
        assert_eq!(
            JobError::from_http_failure(400, "quota exceeded").category(),
            Some(ErrorCategory::Quota)
        );
        assert!(matches!(
            JobError::from_http_failure(418, "teapot"),
            JobError::RemoteFailure { .. }
        ));
    }

    #[test]
    fn html_sniffing_ignores_json() {
        assert!(looks_like_html("<html>"));
        assert!(!looks_like_html(r#"{"code":"processing"}"#));
    }
}
