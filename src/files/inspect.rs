//! Directory listings with recursive size rollups.
//!
//! Every listing re-walks the filesystem. Errors below the requested
//! directory are absorbed: an entry that vanishes mid-walk is skipped and a
//! subtree that cannot be read lists as empty.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::units::{format_size, natural_key, SizeUnits};
use super::{is_within, relative_of};
use crate::config::Listing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    /// Relative to the user root, `/`-separated.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    pub size_display: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub symlink: bool,
    /// Present only for directories expanded by a recursive listing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<DirEntry>>,
}

impl DirEntry {
    /// Flattens a tree into the paths of every file and every directory
    /// that holds at least one file somewhere below it, in plain string
    /// order.
    pub fn file_paths(entries: &[DirEntry]) -> Vec<String> {
        let mut out = Vec::new();
        collect_paths(entries, &mut out);
        out.sort();
        out
    }
}

fn collect_paths(entries: &[DirEntry], out: &mut Vec<String>) -> bool {
    let mut any = false;
    for entry in entries {
        match entry.kind {
            EntryKind::File => {
                out.push(entry.path.clone());
                any = true;
            }
            EntryKind::Directory => {
                let children = entry.children.as_deref().unwrap_or(&[]);
                if collect_paths(children, out) {
                    out.push(entry.path.clone());
                    any = true;
                }
            }
        }
    }
    any
}

/// Lists directories beneath one user root.
#[derive(Debug, Clone)]
pub struct Inspector {
    root: PathBuf,
    units: SizeUnits,
    decimal_places: usize,
    max_depth: usize,
}

impl Inspector {
    pub fn new(root: &Path, listing: &Listing, units: SizeUnits) -> Self {
        let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        Self {
            root,
            units,
            decimal_places: listing.decimal_places,
            max_depth: listing.max_depth.max(1),
        }
    }

    /// Immediate children of `path`. `Ok(None)` when `path` is missing or not
    /// a directory.
    pub fn list_one_level(&self, path: &Path) -> io::Result<Option<Vec<DirEntry>>> {
        let Some(read) = open_dir(path)? else { return Ok(None) };
        let mut entries: Vec<DirEntry> = read
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let child = self.classify(path, &e.file_name().to_string_lossy())?;
                Some(self.finish_flat(child, 0))
            })
            .collect();
        sort_entries(&mut entries);
        Ok(Some(entries))
    }

    /// Full subtree of `path`, each directory carrying its children.
    pub fn list_all(&self, path: &Path) -> io::Result<Option<Vec<DirEntry>>> {
        let Some(read) = open_dir(path)? else { return Ok(None) };
        let mut ancestors = HashSet::new();
        if let Ok(meta) = fs::metadata(path) {
            ancestors.insert((meta.dev(), meta.ino()));
        }
        Ok(Some(self.walk_tree(read, path, 0, &mut ancestors)))
    }

    /// Bytes under `path`: the file size for a file, otherwise the sum over
    /// every regular file below it. Symlinks below `path` are neither counted
    /// nor followed.
    pub fn size_of(&self, path: &Path) -> u64 {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => self.dir_size(path, 0),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        }
    }

    fn dir_size(&self, dir: &Path, depth: usize) -> u64 {
        let Ok(read) = fs::read_dir(dir) else { return 0 };
        let mut total = 0;
        for entry in read.filter_map(|e| e.ok()) {
            let Ok(file_type) = entry.file_type() else { continue };
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                if depth + 1 < self.max_depth {
                    total += self.dir_size(&entry.path(), depth + 1);
                }
            } else if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
        total
    }

    fn walk_tree(
        &self,
        read: fs::ReadDir,
        dir: &Path,
        depth: usize,
        ancestors: &mut HashSet<(u64, u64)>,
    ) -> Vec<DirEntry> {
        let mut entries = Vec::new();
        for e in read.filter_map(|e| e.ok()) {
            let Some(child) = self.classify(dir, &e.file_name().to_string_lossy()) else { continue };
            let entry = match child.kind {
                EntryKind::File => self.finish(child.entry(), child.size, None),
                EntryKind::Directory => self.expand(child, depth, ancestors),
            };
            entries.push(entry);
        }
        sort_entries(&mut entries);
        entries
    }

    fn expand(&self, child: Child, depth: usize, ancestors: &mut HashSet<(u64, u64)>) -> DirEntry {
        if child.escapes {
            tracing::debug!(path = %child.full.display(), "not descending into symlink outside root");
            return self.finish(child.entry(), 0, None);
        }
        if depth + 1 >= self.max_depth {
            tracing::warn!(path = %child.full.display(), max_depth = self.max_depth, "listing depth limit reached");
            return self.finish(child.entry(), 0, None);
        }
        if !ancestors.insert(child.id) {
            tracing::debug!(path = %child.full.display(), "symlink cycle");
            return self.finish(child.entry(), 0, Some(Vec::new()));
        }
        let children = match fs::read_dir(&child.full) {
            Ok(read) => self.walk_tree(read, &child.full, depth + 1, ancestors),
            Err(_) => Vec::new(),
        };
        ancestors.remove(&child.id);
        let size = children.iter().filter(|c| !c.symlink).map(|c| c.size).sum();
        self.finish(child.entry(), size, Some(children))
    }

    fn finish_flat(&self, child: Child, depth: usize) -> DirEntry {
        let size = match child.kind {
            EntryKind::File => child.size,
            EntryKind::Directory if child.escapes => 0,
            EntryKind::Directory if depth + 1 < self.max_depth => self.dir_size(&child.full, depth + 1),
            EntryKind::Directory => 0,
        };
        self.finish(child.entry(), size, None)
    }

    fn finish(&self, mut entry: DirEntry, size: u64, children: Option<Vec<DirEntry>>) -> DirEntry {
        entry.size = size;
        entry.size_display = format_size(size, self.decimal_places, self.units);
        entry.children = children;
        entry
    }

    /// Stats one child of `dir`, following symlinks for the type test.
    /// `None` if it vanished.
    fn classify(&self, dir: &Path, name: &str) -> Option<Child> {
        let full = dir.join(name);
        let link_meta = fs::symlink_metadata(&full).ok()?;
        let symlink = link_meta.file_type().is_symlink();
        // a dangling symlink lists as an empty file
        let meta = fs::metadata(&full).unwrap_or(link_meta);
        let kind = if meta.is_dir() { EntryKind::Directory } else { EntryKind::File };
        let escapes = symlink
            && kind == EntryKind::Directory
            && !dunce::canonicalize(&full).map(|c| is_within(&self.root, &c)).unwrap_or(false);
        Some(Child {
            name: name.to_string(),
            path: relative_of(&self.root, &full),
            kind,
            size: if kind == EntryKind::File { meta.len() } else { 0 },
            symlink,
            escapes,
            id: (meta.dev(), meta.ino()),
            full,
        })
    }
}

struct Child {
    name: String,
    path: String,
    full: PathBuf,
    kind: EntryKind,
    size: u64,
    symlink: bool,
    escapes: bool,
    id: (u64, u64),
}

impl Child {
    fn entry(&self) -> DirEntry {
        DirEntry {
            name: self.name.clone(),
            path: self.path.clone(),
            kind: self.kind,
            size: 0,
            size_display: String::new(),
            symlink: self.symlink,
            children: None,
        }
    }
}

fn open_dir(path: &Path) -> io::Result<Option<fs::ReadDir>> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }
    match fs::read_dir(path) {
        Ok(read) => Ok(Some(read)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Natural order over `"{type}-{name}"`, the raw name breaking ties.
fn sort_entries(entries: &mut [DirEntry]) {
    entries.sort_by_cached_key(|e| (natural_key(&format!("{}-{}", e.kind.as_str(), e.name)), e.name.clone()));
}
