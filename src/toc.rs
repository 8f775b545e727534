//! Table of contents: the tree of entries describing an archive.
//!
//! The TOC fixes two things at once. Its serialized bytes are the payload
//! of the archive's first block, and its depth-first entry order is the
//! order in which file bodies appear in the data block. Nothing else
//! records file boundaries, so a reader reconstructs them from each
//! file's size in traversal order.
//!
//! The on-wire encoding is the bincode serialization of [`Toc`], wrapped
//! in a compressed block. Every archive is validated before any of its
//! data is touched:
//!
//! - entry names are single path components: non-empty, not `.` or `..`,
//!   free of `<>:"/\|?*` and control characters
//! - sibling names are unique, case-insensitively so when `case_safe`
//! - symlink targets may climb with `..` but never past the archive root

use std::collections::HashSet;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::block::{block_reader, BlockWriter};
use crate::buf::drain;
use crate::compression::CompressionScheme;
use crate::error::ArchiveError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toc {
    /// When set, sibling names must also be unique after lowercasing, so
    /// the tree unpacks cleanly on case-insensitive filesystems.
    pub case_safe: bool,
    pub root: Tree,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// A single path component, not a path.
    pub name: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File(FileEntry),
    Symlink(Symlink),
    Tree(Tree),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Uncompressed length of this file's slice of the data block.
    pub size: u64,
    pub common_mode: Option<CommonMode>,
    pub posix_mode: Option<PosixMode>,
    pub win_mode: Option<WinMode>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonMode {
    pub readonly: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosixMode {
    pub executable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinMode {
    pub system: bool,
    pub hidden: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symlink {
    /// Target path as ordered components. `..` is allowed under the
    /// escape-root counting rule, `.` and empty components never are.
    pub target: Vec<String>,
}

fn invalid(reason: String, path: &str) -> ArchiveError {
    ArchiveError::TocInvalid {
        reason,
        path: path.to_string(),
    }
}

fn in_entry(err: ArchiveError, name: &str) -> ArchiveError {
    match err {
        ArchiveError::TocInvalid { reason, path } => ArchiveError::TocInvalid {
            reason,
            path: if path.is_empty() {
                name.to_string()
            } else {
                format!("{name}/{path}")
            },
        },
        other => other,
    }
}

fn check_path_piece(piece: &str, allow_rel: bool) -> Result<(), String> {
    if piece.is_empty() {
        return Err("empty path component".to_string());
    }
    if piece == "." {
        return Err("'.' path component".to_string());
    }
    if let Some(c) = piece.chars().find(|c| {
        matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '\u{0}'..='\u{1f}')
    }) {
        return Err(format!("bad char {c:?} in path component"));
    }
    if !allow_rel && piece == ".." {
        return Err(format!("relative path segment {piece:?} not allowed"));
    }
    Ok(())
}

impl Toc {
    /// Check every invariant of the tree. Errors name the path of the
    /// offending entry.
    pub fn validate(&self) -> Result<(), ArchiveError> {
        // -1 so the root's own entries sit at depth 0
        self.root.validate(self.case_safe, -1)
    }

    /// Depth-first pre-order visit of every entry.
    ///
    /// Trees are visited before their children and siblings in declared
    /// order, which is exactly the order of file bodies in the data
    /// block. The walk keeps an explicit stack rather than recursing, so
    /// arbitrarily deep archives cannot overflow the call stack. An error
    /// from the callback stops the walk and becomes its return value.
    pub fn walk<F>(&self, mut cb: F) -> Result<(), ArchiveError>
    where
        F: FnMut(&[String], &Entry) -> Result<(), ArchiveError>,
    {
        let mut path: Vec<String> = Vec::new();
        // each frame is a tree plus the index to resume from
        let mut stack: Vec<(&Tree, usize)> = vec![(&self.root, 0)];

        while let Some((tree, resume)) = stack.pop() {
            for i in resume..tree.entries.len() {
                let entry = &tree.entries[i];

                path.truncate(stack.len());
                path.push(entry.name.clone());
                cb(&path, entry)?;

                if let EntryKind::Tree(subtree) = &entry.kind {
                    stack.push((tree, i + 1));
                    stack.push((subtree, 0));
                    break;
                }
            }
        }
        Ok(())
    }
}

impl Tree {
    pub fn validate(&self, case_safe: bool, depth: i64) -> Result<(), ArchiveError> {
        let mut names: HashSet<&str> = HashSet::with_capacity(self.entries.len());
        let mut lower_names: HashSet<String> = HashSet::new();

        for entry in &self.entries {
            if !names.insert(entry.name.as_str()) {
                return Err(invalid(
                    format!("duplicate entry {:?}", entry.name),
                    &entry.name,
                ));
            }
            if case_safe && !lower_names.insert(entry.name.to_lowercase()) {
                return Err(invalid(
                    format!("case-sensitive entry {:?}", entry.name),
                    &entry.name,
                ));
            }
            entry.validate(case_safe, depth + 1)?;
        }
        Ok(())
    }
}

impl Entry {
    pub fn validate(&self, case_safe: bool, depth: i64) -> Result<(), ArchiveError> {
        check_path_piece(&self.name, false).map_err(|reason| invalid(reason, &self.name))?;

        let kind_result = match &self.kind {
            EntryKind::File(_) => Ok(()),
            EntryKind::Symlink(link) => link.validate(depth),
            EntryKind::Tree(tree) => tree.validate(case_safe, depth),
        };
        kind_result.map_err(|e| in_entry(e, &self.name))
    }
}

impl Symlink {
    /// `depth` is how many trees deep the symlink sits, with the archive
    /// root at depth 0.
    pub fn validate(&self, depth: i64) -> Result<(), ArchiveError> {
        if self.target.is_empty() {
            return Err(invalid("empty symlink target".to_string(), ""));
        }

        let mut level: i64 = 0;
        for (i, piece) in self.target.iter().enumerate() {
            check_path_piece(piece, true)
                .map_err(|reason| invalid(format!("symlink target piece {i}: {reason}"), ""))?;
            if piece == ".." {
                level += 1;
                if level > depth {
                    return Err(invalid(
                        format!("symlink target {:?} escapes root", self.target),
                        "",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Serialize `toc` and write it as a compressed block.
pub fn write_toc<W: Write>(
    sink: &mut W,
    toc: &Toc,
    scheme: CompressionScheme,
    level: i32,
) -> Result<(), ArchiveError> {
    let buf = bincode::serialize(toc).map_err(ArchiveError::TocEncode)?;

    let mut bw = BlockWriter::new(sink, scheme, level)?;
    bw.write_all(&buf)?;
    bw.close()?;
    Ok(())
}

/// Read one compressed block, decode the TOC inside it, and validate it.
/// The source is left positioned at the byte after the block.
pub fn read_toc<R: Read>(source: &mut R) -> Result<Toc, ArchiveError> {
    let mut dec = block_reader(&mut *source)?;
    let mut buf = Vec::new();
    dec.read_to_end(&mut buf)?;
    drain(&mut dec.into_inner())?;

    let toc: Toc = bincode::deserialize(&buf).map_err(ArchiveError::TocDecode)?;
    toc.validate()?;
    Ok(toc)
}

#[cfg(test)]
mod test_validate {
    use super::*;
    use crate::error::ArchiveError;

    fn file(name: &str) -> Entry {
        Entry {
            name: name.to_string(),
            kind: EntryKind::File(FileEntry::default()),
        }
    }

    fn symlink(name: &str, target: &[&str]) -> Entry {
        Entry {
            name: name.to_string(),
            kind: EntryKind::Symlink(Symlink {
                target: target.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    fn tree(name: &str, entries: Vec<Entry>) -> Entry {
        Entry {
            name: name.to_string(),
            kind: EntryKind::Tree(Tree { entries }),
        }
    }

    fn link(target: &[&str]) -> Symlink {
        Symlink {
            target: target.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn reason_of(err: ArchiveError) -> String {
        match err {
            ArchiveError::TocInvalid { reason, .. } => reason,
            other => panic!("expected TocInvalid, got {other:?}"),
        }
    }

    #[test]
    fn symlink_non_rel() {
        assert!(link(&["some", "path", "file.ext"]).validate(0).is_ok());
    }

    #[test]
    fn symlink_relative() {
        assert!(link(&["some", "..", "file.ext"]).validate(1).is_ok());
    }

    #[test]
    fn symlink_empty() {
        let reason = reason_of(link(&[]).validate(0).unwrap_err());
        assert!(reason.contains("empty symlink target"));
    }

    #[test]
    fn symlink_bad_pieces() {
        let reason = reason_of(link(&["path", "to", "some|invalid"]).validate(0).unwrap_err());
        assert!(reason.contains("bad char '|'"));

        let reason = reason_of(link(&["path", "", "x"]).validate(0).unwrap_err());
        assert!(reason.contains("empty path component"));

        let reason = reason_of(link(&[".", "buh", "something"]).validate(0).unwrap_err());
        assert!(reason.contains("'.' path component"));
    }

    #[test]
    fn symlink_escape_counting() {
        let s = link(&["..", "..", "file"]);
        assert!(reason_of(s.validate(0).unwrap_err()).contains("escapes root"));
        assert!(reason_of(s.validate(1).unwrap_err()).contains("escapes root"));
        assert!(s.validate(2).is_ok());
    }

    #[test]
    fn tree_case_safe_ok() {
        let t = Tree {
            entries: vec![
                file("someFile"),
                symlink("someSymlink", &["someFile"]),
                tree(
                    "someTree",
                    vec![
                        file("subFile"),
                        symlink("subSymlink", &["..", "someSymlink"]),
                    ],
                ),
            ],
        };
        assert!(t.validate(true, 0).is_ok());
    }

    #[test]
    fn tree_case_clash_allowed_when_not_case_safe() {
        let t = Tree {
            entries: vec![file("someFile"), file("SOMEFILE")],
        };
        assert!(t.validate(false, 0).is_ok());
    }

    #[test]
    fn tree_duplicate() {
        let t = Tree {
            entries: vec![file("someFile"), file("someFile")],
        };
        let reason = reason_of(t.validate(true, 0).unwrap_err());
        assert!(reason.contains("duplicate entry"));
    }

    #[test]
    fn tree_case_clash() {
        let t = Tree {
            entries: vec![file("someFile"), file("SOMEFILE")],
        };
        let reason = reason_of(t.validate(true, 0).unwrap_err());
        assert!(reason.contains("case-sensitive entry \"SOMEFILE\""));
    }

    #[test]
    fn bad_entry_names() {
        for (name, fragment) in [
            ("invalid:file", "bad char ':'"),
            ("..", "relative path segment"),
            (".", "'.' path component"),
            ("", "empty path component"),
            ("ctrl\u{7}char", "bad char"),
            ("star*name", "bad char '*'"),
        ] {
            let t = Tree {
                entries: vec![file(name)],
            };
            let reason = reason_of(t.validate(true, 0).unwrap_err());
            assert!(reason.contains(fragment), "{name:?}: {reason}");
        }
    }

    #[test]
    fn error_path_names_the_entry() {
        let toc = Toc {
            case_safe: true,
            root: Tree {
                entries: vec![tree(
                    "outer",
                    vec![tree("inner", vec![symlink("esc", &["..", "..", ".."])])],
                )],
            },
        };

        match toc.validate().unwrap_err() {
            ArchiveError::TocInvalid { path, reason } => {
                assert_eq!(path, "outer/inner/esc");
                assert!(reason.contains("escapes root"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn root_symlink_cannot_climb() {
        let toc = Toc {
            case_safe: false,
            root: Tree {
                entries: vec![symlink("up", &["..", "x"])],
            },
        };
        assert!(toc.validate().is_err());

        let toc = Toc {
            case_safe: false,
            root: Tree {
                entries: vec![tree("d", vec![symlink("up", &["..", "x"])])],
            },
        };
        assert!(toc.validate().is_ok());
    }
}
