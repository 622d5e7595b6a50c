//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Archive URLs frequently carry signed query strings or basic-auth
//! credentials, and staging paths reveal the user's home directory. These
//! helpers keep both out of logs.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Strips userinfo, query string and fragment from a download URL.
///
/// - `https://user:pw@cdn.example.com/App.ipa?sig=abc` → `https://****@cdn.example.com/App.ipa`
/// - `https://cdn.example.com/App.ipa` → unchanged
pub fn redact_url(url: &str) -> String {
    let without_query = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url);

    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        let authority = &after_scheme[..authority_end];
        if let Some(at_pos) = authority.rfind('@') {
            let scheme = &without_query[..scheme_end + 3];
            let after_at = &after_scheme[at_pos + 1..];
            return format!("{}****@{}", scheme, after_at);
        }
    }

    without_query.to_string()
}
