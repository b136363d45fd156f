//! Filesystem-safe identifiers derived from user-facing backup names.

/// Used when a name normalizes to nothing.
pub const DEFAULT_SLUG: &str = "backup";

/// Lowercase, hyphen-separated, `[a-z0-9-]` only, never empty.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for ch in name.to_lowercase().chars() {
        if ch.is_whitespace() || ch == '_' || ch == '-' {
            pending_hyphen = true;
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(ch);
        }
        // anything else is dropped without breaking the current run
    }
    if out.is_empty() {
        DEFAULT_SLUG.to_string()
    } else {
        out
    }
}
