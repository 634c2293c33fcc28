use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;

pub const MODIFIED_FLAG: &str = "[MODIFIED ";
pub const DELETED_FLAG: &str = "[DELETED ";
pub const STAGING_FLAG: &str = "[PARTIAL ";
pub const FLAG_END: &str = "]";
const EMPTY_PLACEHOLDER_EXT: &str = ".empty";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("remote path contains unsupported component")]
    UnsupportedComponent,
}

/// Maps a remote path (`/container/dir/a.txt`) to the `/`-separated name it is
/// stored under, relative to the local root.
pub fn local_name_for(remote_path: &str) -> Result<String, PathError> {
    let mut parts = Vec::new();
    for part in remote_path.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(PathError::UnsupportedComponent),
            other => parts.push(escape_invalid_chars(other)),
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(parts.join("/"))
}

pub fn local_path_for(root: &Path, local_name: &str) -> Result<PathBuf, PathError> {
    if local_name.is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = root.to_path_buf();
    for component in Path::new(local_name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir => continue,
            Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    Ok(out)
}

/// Inverse of [`local_path_for`] for files found while walking the tree.
pub fn local_name_from_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn char_replacement(c: char) -> Option<&'static str> {
    match c {
        '"' => Some("QUOTE"),
        '<' => Some("LT"),
        '>' => Some("GT"),
        '|' => Some("PIPE"),
        ':' => Some("COLON"),
        '*' => Some("STAR"),
        '?' => Some("QUESTIONMARK"),
        _ => None,
    }
}

/// Replaces characters that some filesystems reject with `--NAME--` tokens.
/// There is no decoder: the mapping only runs remote → local.
pub fn escape_invalid_chars(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match char_replacement(c) {
            Some(token) => {
                out.push_str("--");
                out.push_str(token);
                out.push_str("--");
            }
            None => out.push(c),
        }
    }
    out
}

/// `yyyyMMddHHmm` in UTC.
pub fn marker_stamp(unix_secs: i64) -> String {
    let at = OffsetDateTime::from_unix_timestamp(unix_secs).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    at.format(format_description!("[year][month][day][hour][minute]"))
        .unwrap_or_else(|_| "000000000000".to_string())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = OsString::from(path.as_os_str());
    raw.push(suffix);
    PathBuf::from(raw)
}

pub fn modified_marker_path(path: &Path, unix_secs: i64) -> PathBuf {
    with_suffix(
        path,
        &format!("{MODIFIED_FLAG}{}{FLAG_END}", marker_stamp(unix_secs)),
    )
}

pub fn deleted_marker_path(path: &Path, unix_secs: i64) -> PathBuf {
    with_suffix(
        path,
        &format!("{DELETED_FLAG}{}{FLAG_END}", marker_stamp(unix_secs)),
    )
}

/// Zero-byte stand-in written when a tombstoned file is already gone.
pub fn empty_placeholder_path(marker: &Path) -> PathBuf {
    with_suffix(marker, EMPTY_PLACEHOLDER_EXT)
}

/// Names carrying a marker belong to the mirror itself, not to a remote object.
pub fn has_marker(file_name: &str) -> bool {
    file_name.contains(MODIFIED_FLAG)
        || file_name.contains(DELETED_FLAG)
        || file_name.contains(STAGING_FLAG)
}

/// Prefix for the staging file of a download into `target`. The staging name
/// is `<file name>[PARTIAL <random>]`, next to the target.
pub fn staging_prefix(target: &Path) -> OsString {
    let mut prefix = target
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    prefix.push(STAGING_FLAG);
    prefix
}
