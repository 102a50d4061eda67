//! Common ancestor of a snapshot's recorded paths
//!
//! The backup engine records the absolute host paths it was pointed at. The
//! deepest directory they share becomes the stable root that users browse
//! and download from.

use crate::path::{normalize_absolute_path, segments, ROOT};

/// Return the deepest directory shared by all `paths`.
///
/// Comparison is segment-wise, so `/foo` and `/foobar` only share `/`.
/// A single path yields that path (normalized); an empty list yields `/`.
pub fn find_common_ancestor<S: AsRef<str>>(paths: &[S]) -> String {
    let normalized: Vec<String> = paths
        .iter()
        .map(|p| normalize_absolute_path(Some(p.as_ref())))
        .collect();

    let Some((first, rest)) = normalized.split_first() else {
        return ROOT.to_string();
    };

    let mut shared = segments(first);
    for path in rest {
        let other = segments(path);
        let len = shared
            .iter()
            .zip(other.iter())
            .take_while(|(a, b)| a == b)
            .count();
        shared.truncate(len);
        if shared.is_empty() {
            break;
        }
    }

    if shared.is_empty() {
        return ROOT.to_string();
    }

    format!("/{}", shared.join("/"))
}
