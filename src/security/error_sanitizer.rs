//! Relay error message sanitizing.
//!
//! Messages reported by the relay are forwarded to an untrusted page, so stack
//! frames, filesystem paths, extension URLs and long hex strings are scrubbed
//! before they leave the provider.

use once_cell::sync::Lazy;
use regex::Regex;

/// Upper bound on a forwarded message.
const MAX_MESSAGE_LEN: usize = 200;

static SENSITIVE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        // 32-byte hex blobs (private keys, seeds)
        (r"0x[0-9a-fA-F]{64}", "[REDACTED_HEX]"),
        // mnemonic-looking word runs
        (r"\b([a-z]{3,8}\s+){11,23}[a-z]{3,8}\b", "[REDACTED_MNEMONIC]"),
        // extension-internal URLs
        (r"(?i)(?:chrome|moz|safari-web)-extension://[^\s)]+", "[REDACTED_URL]"),
        // filesystem paths
        (r"(?i)[a-z]:\\[^\s]+|/home/[^\s]+|/root/[^\s]+|/Users/[^\s]+", "[REDACTED_PATH]"),
        // password assignments
        (r#"(?i)password['"]?\s*[:=]\s*['"]?[^\s'"]{1,}"#, "password=[REDACTED]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Lines that look like a JS or Rust stack frame.
static STACK_FRAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s*(at\s|\d+:\s|stack backtrace:)").ok());

/// Sanitizes a relay-supplied message for display in the host page.
///
/// Keeps only the first non-frame line, scrubs sensitive fragments and caps
/// the length.
pub fn sanitize_relay_message(message: &str) -> String {
    let first_line = message
        .lines()
        .map(str::trim)
        .find(|line| {
            !line.is_empty()
                && !STACK_FRAME.as_ref().map(|re| re.is_match(line)).unwrap_or(false)
        })
        .unwrap_or("");

    let mut sanitized = first_line.to_string();
    for (pattern, replacement) in SENSITIVE_PATTERNS.iter() {
        sanitized = pattern.replace_all(&sanitized, *replacement).to_string();
    }

    if sanitized.chars().count() > MAX_MESSAGE_LEN {
        sanitized = sanitized.chars().take(MAX_MESSAGE_LEN).collect();
    }
    sanitized
}

/// Log-side scrubbing; keeps more context than the page-facing variant.
pub fn sanitize_for_logging(message: &str) -> String {
    let mut sanitized = message.to_string();
    if let Some((pattern, _)) = SENSITIVE_PATTERNS.first() {
        sanitized = pattern.replace_all(&sanitized, "0x[REDACTED_64_CHARS]").to_string();
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_stack_frames() {
        let msg = "Something failed\n    at handleRequest (background.js:120:7)\n    at next";
        assert_eq!(sanitize_relay_message(msg), "Something failed");
    }

    #[test]
    fn test_redacts_hex_secret() {
        let msg = "bad key 0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
        let sanitized = sanitize_relay_message(msg);
        assert!(sanitized.contains("[REDACTED_HEX]"));
        assert!(!sanitized.contains("1234567890abcdef"));
    }

    #[test]
    fn test_redacts_extension_url() {
        let msg = "failed to load chrome-extension://abcdef/popup.html";
        assert_eq!(sanitize_relay_message(msg), "failed to load [REDACTED_URL]");
    }

    #[test]
    fn test_caps_length() {
        let msg = "x".repeat(1000);
        assert_eq!(sanitize_relay_message(&msg).len(), MAX_MESSAGE_LEN);
    }

    #[test]
    fn test_logging_keeps_context() {
        let msg = "nonce too low for 0xabc";
        assert_eq!(sanitize_for_logging(msg), msg);
    }
}
