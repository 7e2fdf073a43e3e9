//! Soft-block detector (§4.4.5): a pure function over response bytes.
//!
//! New module (no teacher counterpart); structurally mirrors the
//! "pure state struct + pure step function" shape used throughout
//! `resilience` (e.g. `classify.rs`) rather than any stateful service.

use regex::RegexSet;
use std::sync::LazyLock;

const CAPTCHA_PATTERNS: &[&str] = &[
    r"(?i)captcha",
    r"(?i)recaptcha",
    r"(?i)hcaptcha",
    r"(?i)challenge-platform",
    r"(?i)verify.*human",
    r"(?i)security.*check",
];

const BLOCK_PATTERNS: &[&str] = &[
    r"(?i)access.*denied",
    r"(?i)blocked",
    r"(?i)rate.*limit",
    r"(?i)too.*many.*requests",
    r"(?i)please.*try.*again.*later",
];

static CAPTCHA_SET: LazyLock<RegexSet> = LazyLock::new(|| RegexSet::new(CAPTCHA_PATTERNS).expect("static patterns"));
static BLOCK_SET: LazyLock<RegexSet> = LazyLock::new(|| RegexSet::new(BLOCK_PATTERNS).expect("static patterns"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftBlockVerdict {
    pub blocked: bool,
    pub reason: String,
}

fn not_blocked() -> SoftBlockVerdict {
    SoftBlockVerdict { blocked: false, reason: String::new() }
}

/// Flags a response as soft-blocked when the body contains a captcha/
/// challenge signature, a block signature, or is under `min_size_bytes`
/// (§4.4.5).
pub fn detect(body: &[u8], min_size_bytes: usize) -> SoftBlockVerdict {
    if body.len() < min_size_bytes {
        return SoftBlockVerdict {
            blocked: true,
            reason: format!("response body ({} bytes) below minimum size {}", body.len(), min_size_bytes),
        };
    }

    let text = String::from_utf8_lossy(body);

    if CAPTCHA_SET.is_match(&text) {
        return SoftBlockVerdict { blocked: true, reason: "captcha/challenge signature detected".to_string() };
    }
    if BLOCK_SET.is_match(&text) {
        return SoftBlockVerdict { blocked: true, reason: "block signature detected".to_string() };
    }

    not_blocked()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_response_is_blocked() {
        let verdict = detect(b"tiny", 1000);
        assert!(verdict.blocked);
    }

    #[test]
    fn captcha_keyword_is_blocked() {
        let body = format!("<html>{}please solve this reCAPTCHA challenge</html>", "padding".repeat(200));
        let verdict = detect(body.as_bytes(), 1000);
        assert!(verdict.blocked);
        assert!(verdict.reason.contains("captcha"));
    }

    #[test]
    fn block_keyword_is_blocked() {
        let body = format!("<html>{}Too Many Requests, please try again later</html>", "padding".repeat(200));
        let verdict = detect(body.as_bytes(), 1000);
        assert!(verdict.blocked);
    }

    #[test]
    fn normal_large_page_is_not_blocked() {
        let body = format!("<html><body>{}<h1>3-room apartment in Lozenets</h1></body></html>", "x".repeat(2000));
        let verdict = detect(body.as_bytes(), 1000);
        assert!(!verdict.blocked);
    }
}
