pub mod inspect;
pub mod storage;
pub mod units;

use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("path escapes root")]
pub struct Rejected;

/// Joins `relative` onto `root` and admits the result only if it resolves
/// (symlinks included) to `root` itself or somewhere beneath it.
///
/// The target does not have to exist: the longest existing ancestor is
/// resolved and the missing components are appended literally, so callers
/// can confine a path and then create it. A dangling symlink is judged by
/// where it points.
pub fn confine(root: &Path, relative: &str) -> Result<PathBuf, Rejected> {
    let joined = root.join(relative);
    let canon_root = dunce::canonicalize(root).map_err(|_| Rejected)?;
    let canon_path = canonicalize_lenient(&joined).ok_or(Rejected)?;
    if is_within(&canon_root, &canon_path) {
        Ok(canon_path)
    } else {
        Err(Rejected)
    }
}

/// Like [`confine`], but the final component is not resolved: a symlink
/// names the link itself rather than its target. Used where the entry, not
/// what it points at, is acted on.
pub fn confine_entry(root: &Path, relative: &str) -> Result<PathBuf, Rejected> {
    let rel = Path::new(relative);
    match rel.components().next_back() {
        Some(Component::Normal(name)) => {
            let parent = rel.parent().unwrap_or(Path::new(""));
            let dir = confine(root, &parent.to_string_lossy())?;
            Ok(dir.join(name))
        }
        _ => confine(root, relative),
    }
}

const MAX_LINK_HOPS: usize = 40;

/// Canonicalizes the longest existing ancestor of `path` and re-applies the
/// rest of it component by component. Symlinks met on the way are followed
/// even when their target is missing. `None` when not even the filesystem
/// root resolves, or on a symlink loop.
pub fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    resolve(path, MAX_LINK_HOPS)
}

fn resolve(path: &Path, hops: usize) -> Option<PathBuf> {
    let mut tail = Vec::new();
    let mut cursor = path;
    let mut resolved = loop {
        if let Ok(base) = dunce::canonicalize(cursor) {
            break base;
        }
        tail.push(cursor.components().next_back()?);
        cursor = cursor.parent()?;
    };
    while let Some(component) = tail.pop() {
        match component {
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            other => {
                let next = resolved.join(other.as_os_str());
                let is_link = fs::symlink_metadata(&next).is_ok_and(|m| m.file_type().is_symlink());
                if is_link {
                    let target = fs::read_link(&next).ok()?;
                    let mut rest = resolved.join(target);
                    for c in tail.iter().rev() {
                        rest.push(c.as_os_str());
                    }
                    return resolve(&rest, hops.checked_sub(1)?);
                }
                resolved = next;
            }
        }
    }
    Some(resolved)
}

/// Whole-component prefix test, so `/data/foobar` is not inside `/data/foo`.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}

/// Client-facing identifier of `path`: relative to `root`, `/`-separated,
/// empty for the root itself.
pub fn relative_of(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
