//! Proof image URL resolution

/// Resolve a proof image reference against the asset server.
///
/// Absolute `http(s)://` URLs pass through unchanged. Relative paths are
/// joined to `base` with exactly one `/` between them. Empty input is `None`.
pub fn resolve_image_url(raw: Option<&str>, base: &str) -> Option<String> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(raw.to_string());
    }
    let base = base.trim_end_matches('/');
    let path = raw.trim_start_matches('/');
    Some(format!("{}/{}", base, path))
}
