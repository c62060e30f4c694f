//! Filesystem walk producing a tree of file and directory entries.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::ReportError;

/// Files larger than this are listed without their lines.
const MAX_FILE_BYTES: u64 = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Line {
    pub number: u32,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub extension: Option<String>,
    pub lines: Vec<Line>,
}

impl FileEntry {
    /// Read `path` into numbered lines. Unreadable or oversized files keep
    /// an empty line list.
    pub fn load(path: &Path) -> Self {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned());
        let lines = match std::fs::metadata(path) {
            Ok(meta) if meta.len() > MAX_FILE_BYTES => {
                debug!(?path, size = meta.len(), "file too large, skipping contents");
                Vec::new()
            }
            Ok(_) => match std::fs::read(path) {
                Ok(bytes) => split_lines(&String::from_utf8_lossy(&bytes)),
                Err(err) => {
                    warn!(?path, error = %err, "cannot read file");
                    Vec::new()
                }
            },
            Err(err) => {
                warn!(?path, error = %err, "cannot stat file");
                Vec::new()
            }
        };
        Self {
            path: path.to_path_buf(),
            extension,
            lines,
        }
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn split_lines(text: &str) -> Vec<Line> {
    text.replace("\r\n", "\n")
        .lines()
        .zip(1..)
        .map(|(content, number)| Line {
            number,
            content: content.to_string(),
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub path: PathBuf,
    pub children: Vec<Entry>,
}

impl DirectoryEntry {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            children: Vec::new(),
        }
    }

    /// Every entry below this directory, breadth-first.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            queue: self.children.iter().collect(),
        }
    }

    pub fn find(&self, path: &Path) -> Option<&Entry> {
        self.walk().find(|entry| entry.path() == path)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.walk().filter_map(|entry| match entry {
            Entry::File(file) => Some(file),
            Entry::Directory(_) => None,
        })
    }

    pub fn directories(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.walk().filter_map(|entry| match entry {
            Entry::Directory(dir) => Some(dir),
            Entry::File(_) => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entry {
    File(FileEntry),
    Directory(DirectoryEntry),
}

impl Entry {
    pub fn path(&self) -> &Path {
        match self {
            Entry::File(file) => &file.path,
            Entry::Directory(dir) => &dir.path,
        }
    }
}

/// Breadth-first iterator over a directory tree.
pub struct Walk<'a> {
    queue: VecDeque<&'a Entry>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Entry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.queue.pop_front()?;
        if let Entry::Directory(dir) = entry {
            self.queue.extend(dir.children.iter());
        }
        Some(entry)
    }
}

/// Walks a project directory, skipping excluded directories and files.
///
/// Exclude patterns are globs matched against both the full path and the
/// basename.
pub struct FsWalker {
    root: PathBuf,
    exclude_dir: Vec<GlobMatcher>,
    exclude_file: Vec<GlobMatcher>,
}

impl FsWalker {
    pub fn new<S: AsRef<str>>(
        root: &Path,
        exclude_dir: &[S],
        exclude_file: &[S],
    ) -> Result<Self, ReportError> {
        Ok(Self {
            root: root.to_path_buf(),
            exclude_dir: compile(exclude_dir)?,
            exclude_file: compile(exclude_file)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_excluded(&self, entry: &walkdir::DirEntry) -> bool {
        let matchers = if entry.file_type().is_dir() {
            &self.exclude_dir
        } else {
            &self.exclude_file
        };
        let path = entry.path();
        matchers.iter().any(|m| {
            m.is_match(path) || path.file_name().is_some_and(|name| m.is_match(Path::new(name)))
        })
    }

    /// Build the tree. Unreadable directories are logged and skipped.
    pub fn build(&self) -> Result<DirectoryEntry, ReportError> {
        if !self.root.is_dir() {
            return Err(ReportError::NotADirectory(self.root.clone()));
        }
        let mut stack = vec![DirectoryEntry::new(self.root.clone())];
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry));

        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(path = ?err.path(), error = %err, "cannot walk path");
                    continue;
                }
            };
            // The parent of an entry at depth d sits at stack index d - 1.
            while stack.len() > entry.depth() {
                close_top(&mut stack);
            }
            if entry.file_type().is_dir() {
                stack.push(DirectoryEntry::new(entry.into_path()));
            } else if entry.file_type().is_file() {
                let file = FileEntry::load(entry.path());
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Entry::File(file));
                }
            }
        }
        while stack.len() > 1 {
            close_top(&mut stack);
        }
        stack
            .pop()
            .ok_or_else(|| ReportError::NotADirectory(self.root.clone()))
    }
}

fn close_top(stack: &mut Vec<DirectoryEntry>) {
    if stack.len() < 2 {
        return;
    }
    if let Some(done) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(Entry::Directory(done));
        }
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<GlobMatcher>, ReportError> {
    patterns
        .iter()
        .map(|p| {
            let pattern = p.as_ref();
            GlobBuilder::new(pattern)
                .literal_separator(false)
                .build()
                .map(|glob| glob.compile_matcher())
                .map_err(|source| ReportError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("app.ds"), "let a = 1;\r\nprint(a);\n").unwrap();
        fs::write(root.join("src/lib.ds"), "fn f() {}\n").unwrap();
        fs::write(root.join("src/nested/deep.ds"), "x").unwrap();
        fs::write(root.join("src/Cargo.lock"), "lock").unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        dir
    }

    #[test]
    fn builds_tree_breadth_first() {
        let dir = project();
        let walker = FsWalker::new::<&str>(dir.path(), &[], &[]).unwrap();
        let tree = walker.build().unwrap();

        let order: Vec<PathBuf> = tree
            .walk()
            .map(|e| e.path().strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        let expected: Vec<PathBuf> = [
            ".git",
            "app.ds",
            "src",
            ".git/HEAD",
            "src/Cargo.lock",
            "src/lib.ds",
            "src/nested",
            "src/nested/deep.ds",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn excludes_match_basename_and_full_path() {
        let dir = project();
        let walker = FsWalker::new(dir.path(), &[".git", "**/nested"], &["*.lock"]).unwrap();
        let tree = walker.build().unwrap();
        let names: Vec<String> = tree.files().map(FileEntry::name).collect();
        assert_eq!(names, vec!["app.ds", "lib.ds"]);
        assert_eq!(tree.directories().count(), 1);
    }

    #[test]
    fn files_have_numbered_lines_and_extension() {
        let dir = project();
        let walker = FsWalker::new::<&str>(dir.path(), &[], &[]).unwrap();
        let tree = walker.build().unwrap();
        let Some(Entry::File(app)) = tree.find(&dir.path().join("app.ds")) else {
            panic!("app.ds not found");
        };
        assert_eq!(app.extension.as_deref(), Some("ds"));
        assert_eq!(
            app.lines,
            vec![
                Line {
                    number: 1,
                    content: "let a = 1;".into()
                },
                Line {
                    number: 2,
                    content: "print(a);".into()
                },
            ]
        );
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bin.dat"), [b'o', b'k', 0xff, b'\n']).unwrap();
        let file = FileEntry::load(&dir.path().join("bin.dat"));
        assert_eq!(file.lines.len(), 1);
        assert!(file.lines[0].content.starts_with("ok"));
        assert!(file.lines[0].content.contains('\u{fffd}'));
    }

    #[test]
    fn root_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "").unwrap();
        let walker = FsWalker::new::<&str>(&file, &[], &[]).unwrap();
        assert!(matches!(walker.build(), Err(ReportError::NotADirectory(_))));
    }

    #[test]
    fn bad_pattern_is_reported() {
        let err = FsWalker::new(Path::new("."), &["a[".to_string()], &[]).err().unwrap();
        assert!(matches!(err, ReportError::Pattern { ref pattern, .. } if pattern == "a["));
    }

    #[test]
    fn find_missing_path() {
        let dir = project();
        let tree = FsWalker::new::<&str>(dir.path(), &[], &[])
            .unwrap()
            .build()
            .unwrap();
        assert!(tree.find(&dir.path().join("nope")).is_none());
        assert!(matches!(
            tree.find(&dir.path().join("src")),
            Some(Entry::Directory(_))
        ));
    }
}
