//! Absolute path canonicalization
//!
//! Paths reach the service from URLs, browser file pickers and engine output.
//! Everything is funnelled through [`normalize_absolute_path`] before any path
//! arithmetic happens, so the rest of the crate can rely on a single shape:
//! one leading `/`, no `.` or `..` segments, no empty segments, no trailing `/`.

use percent_encoding::percent_decode_str;

/// The root path
pub const ROOT: &str = "/";

/// Canonicalize an arbitrary path string into a safe absolute path.
///
/// Blank or missing input yields `/`. The input is percent-decoded (the raw
/// string is kept when the decoded bytes are not UTF-8) and backslashes are
/// treated as separators. A `..` segment removes the previous segment and is
/// dropped at the root, so the result can never climb above `/`.
pub fn normalize_absolute_path(value: Option<&str>) -> String {
    let trimmed = match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return ROOT.to_string(),
    };

    let decoded = match percent_decode_str(trimmed).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => trimmed.to_string(),
    };
    let unified = decoded.replace('\\', "/");

    let mut stack: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    if stack.is_empty() {
        return ROOT.to_string();
    }

    format!("/{}", stack.join("/"))
}

/// Split a normalized path into its segments (root has none)
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Compute the POSIX relative path leading from `from` to `to`.
///
/// Both inputs are expected to be normalized absolute paths. Equal paths give
/// an empty string; a target outside `from` starts with `..`.
pub fn relative_path(from: &str, to: &str) -> String {
    let from = segments(from);
    let to = segments(to);

    let shared = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = Vec::with_capacity(from.len() - shared + to.len() - shared);
    parts.extend(std::iter::repeat("..").take(from.len() - shared));
    parts.extend(&to[shared..]);
    parts.join("/")
}

/// Final segment of a path after normalization (empty for the root)
pub fn file_name(path: &str) -> String {
    let normalized = normalize_absolute_path(Some(path));
    segments(&normalized)
        .last()
        .map(|s| s.to_string())
        .unwrap_or_default()
}
