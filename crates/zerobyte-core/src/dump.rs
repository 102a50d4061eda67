//! Snapshot dump planning
//!
//! Translates a user-facing path (relative to the snapshot's common ancestor)
//! into the reference and path the backup engine understands, refusing
//! anything that would reach outside the recorded content.

use serde::{Deserialize, Serialize};

use crate::ancestor::find_common_ancestor;
use crate::error::{Error, Result};
use crate::path::{normalize_absolute_path, relative_path, ROOT};

/// Placeholder used when a snapshot id sanitizes to nothing
const FILENAME_PLACEHOLDER: &str = "snapshot";

/// What the caller expects at the requested path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    /// Stream a single file raw
    File,
    /// Archive a directory
    Dir,
}

impl PathKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKind::File => "file",
            PathKind::Dir => "dir",
        }
    }
}

impl std::str::FromStr for PathKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(PathKind::File),
            "dir" => Ok(PathKind::Dir),
            other => Err(Error::InvalidConfig(format!("unknown path kind: {}", other))),
        }
    }
}

/// Engine-facing translation of a dump request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpPlan {
    /// `<snapshotId>` or `<snapshotId>:<basePath>`
    pub snapshot_ref: String,
    /// Path inside the referenced tree, always absolute
    pub path: String,
    /// Archive filename offered to the client
    pub filename: String,
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_` and trim
/// surrounding underscores.
pub fn sanitize_filename_part(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() {
        FILENAME_PLACEHOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Plan a dump of `requested_path` from a snapshot that recorded `snapshot_paths`.
pub fn prepare_snapshot_dump<S: AsRef<str>>(
    snapshot_id: &str,
    snapshot_paths: &[S],
    requested_path: Option<&str>,
) -> Result<DumpPlan> {
    let filename = format!("snapshot-{}.tar", sanitize_filename_part(snapshot_id));
    let requested = normalize_absolute_path(requested_path);
    let base = normalize_absolute_path(Some(&find_common_ancestor(snapshot_paths)));

    if base == ROOT {
        return Ok(DumpPlan {
            snapshot_ref: snapshot_id.to_string(),
            path: requested,
            filename,
        });
    }

    let snapshot_ref = format!("{}:{}", snapshot_id, base);

    if requested == ROOT || requested == base {
        return Ok(DumpPlan {
            snapshot_ref,
            path: ROOT.to_string(),
            filename,
        });
    }

    let relative = relative_path(&base, &requested);
    if relative == ".." || relative.starts_with("../") {
        return Err(Error::PathOutsideSnapshot {
            requested,
            base,
        });
    }

    let path = if relative.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", relative)
    };

    Ok(DumpPlan {
        snapshot_ref,
        path,
        filename,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "/var/lib/zerobyte/volumes/vol123/_data";

    #[test]
    fn test_sanitize_filename_part() {
        assert_eq!(sanitize_filename_part("abc123"), "abc123");
        assert_eq!(sanitize_filename_part("a b/c"), "a_b_c");
        assert_eq!(sanitize_filename_part("__x__"), "x");
        assert_eq!(sanitize_filename_part("///"), "snapshot");
        assert_eq!(sanitize_filename_part(""), "snapshot");
    }

    #[test]
    fn test_root_base_passes_path_through() {
        let plan = prepare_snapshot_dump("abc", &["/etc", "/var"], Some("/var/log/../lib")).unwrap();
        assert_eq!(plan.snapshot_ref, "abc");
        assert_eq!(plan.path, "/var/lib");
        assert_eq!(plan.filename, "snapshot-abc.tar");
    }

    #[test]
    fn test_requesting_base_path_yields_root() {
        let plan = prepare_snapshot_dump("snap", &[BASE], Some(BASE)).unwrap();
        assert_eq!(plan.snapshot_ref, format!("snap:{}", BASE));
        assert_eq!(plan.path, "/");
    }

    #[test]
    fn test_missing_path_yields_whole_snapshot() {
        let plan = prepare_snapshot_dump("snap", &[BASE], None).unwrap();
        assert_eq!(plan.snapshot_ref, format!("snap:{}", BASE));
        assert_eq!(plan.path, "/");
    }

    #[test]
    fn test_path_is_rewritten_relative_to_base() {
        let requested = format!("{}/documents/report.txt", BASE);
        let plan = prepare_snapshot_dump("snap", &[BASE], Some(&requested)).unwrap();
        assert_eq!(plan.snapshot_ref, format!("snap:{}", BASE));
        assert_eq!(plan.path, "/documents/report.txt");
    }

    #[test]
    fn test_path_outside_base_is_rejected() {
        let err = prepare_snapshot_dump("snap", &[BASE], Some("/etc/shadow")).unwrap_err();
        assert!(matches!(err, Error::PathOutsideSnapshot { .. }));
        assert_eq!(
            err.to_string(),
            "Requested path is outside the snapshot base path"
        );
    }

    #[test]
    fn test_sibling_with_shared_name_prefix_is_rejected() {
        let requested = format!("{}-other/file", BASE);
        assert!(prepare_snapshot_dump("snap", &[BASE], Some(&requested)).is_err());
    }

    #[test]
    fn test_traversal_cannot_escape_base() {
        let requested = format!("{}/../../../../etc", BASE);
        assert!(prepare_snapshot_dump("snap", &[BASE], Some(&requested)).is_err());
    }

    #[test]
    fn test_path_kind_parse() {
        assert_eq!("file".parse::<PathKind>().unwrap(), PathKind::File);
        assert_eq!("dir".parse::<PathKind>().unwrap(), PathKind::Dir);
        assert!("folder".parse::<PathKind>().is_err());
    }
}
