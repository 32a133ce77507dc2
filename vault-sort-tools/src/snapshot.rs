//! Bounded, deterministic observations of vault paths.
//!
//! Every listing is sorted and capped, and file reads never go past the
//! configured excerpt size, so the same filesystem state always serializes
//! to the same bytes.

use crate::classify::{classify, extension_of, png_asset_hint, MediaGroup};
use crate::vault::MOVED_TODAY_DIR;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotLimits {
    /// Subdirectories named in a directory observation.
    pub max_dirs: usize,
    /// Files named in a directory observation.
    pub max_files: usize,
    /// Bytes read from a file for its excerpt.
    pub max_excerpt_bytes: usize,
    /// Entries counted per directory before counts are reported as capped.
    pub max_count: usize,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_dirs: 20,
            max_files: 40,
            max_excerpt_bytes: 1024,
            max_count: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildFile {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSummary {
    pub dirs: usize,
    pub files: usize,
    pub counts_capped: bool,
    pub listed_dirs: Vec<String>,
    pub listed_files: Vec<ChildFile>,
    pub dirs_truncated: bool,
    pub files_truncated: bool,
    /// Extension counts, most frequent first.
    pub ext_hist: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub ext: String,
    pub group: MediaGroup,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    pub excerpt_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<ChildSummary>,
    /// Set for asset-like PNGs, and for directories made mostly of them.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub png_asset_hint: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Directory-only tree of an existing destination root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub dirs: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Excerpt {
    pub text: String,
    pub truncated: bool,
}

/// Seam for content extraction. OCR and document parsers plug in here.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path, size: u64, max_bytes: usize) -> io::Result<Option<Excerpt>>;
}

const TEXT_EXTS: &[&str] = &[
    "txt", "md", "csv", "tsv", "json", "yaml", "yml", "toml", "xml", "html", "htm", "log", "ini",
    "cfg", "conf", "rtf", "tex", "srt",
];

/// Reads the head of plain text files and refuses anything binary.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path, size: u64, max_bytes: usize) -> io::Result<Option<Excerpt>> {
        let ext = extension_of(path);
        if !TEXT_EXTS.contains(&ext.as_str()) || max_bytes == 0 {
            return Ok(None);
        }

        let mut buf = Vec::with_capacity(max_bytes.min(size as usize));
        File::open(path)?
            .take(max_bytes as u64)
            .read_to_end(&mut buf)?;

        if buf.contains(&0) {
            return Ok(None);
        }

        let text: String = String::from_utf8_lossy(&buf)
            .chars()
            .map(|c| if c.is_control() && c != '\n' && c != '\t' { ' ' } else { c })
            .collect();

        Ok(Some(Excerpt {
            text,
            truncated: size > max_bytes as u64,
        }))
    }
}

/// Sort key shared by every listing: case-insensitive, then raw bytes.
pub fn name_order(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name == MOVED_TODAY_DIR
}

pub struct SnapshotBuilder {
    limits: SnapshotLimits,
    extractor: Arc<dyn TextExtractor>,
}

impl SnapshotBuilder {
    pub fn new(limits: SnapshotLimits) -> Self {
        Self {
            limits,
            extractor: Arc::new(PlainTextExtractor),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn limits(&self) -> &SnapshotLimits {
        &self.limits
    }

    /// Builds a fresh observation. Never fails; problems land in `error`.
    pub fn observe(&self, path: &Path) -> Observation {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut obs = Observation {
            path: path.to_string_lossy().into_owned(),
            name,
            kind: EntryKind::Missing,
            size: 0,
            ext: extension_of(path),
            group: MediaGroup::Other,
            excerpt: None,
            excerpt_truncated: false,
            children: None,
            png_asset_hint: false,
            error: None,
        };

        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                obs.error = Some(format!("stat: {}", e.kind()));
                return obs;
            }
        };

        let file_type = meta.file_type();
        if file_type.is_symlink() {
            obs.kind = EntryKind::Symlink;
        } else if file_type.is_dir() {
            obs.kind = EntryKind::Dir;
            obs.ext.clear();
            self.fill_dir(path, &mut obs);
        } else if file_type.is_file() {
            obs.kind = EntryKind::File;
            obs.size = meta.len();
            obs.group = classify(path);
            obs.png_asset_hint = png_asset_hint(path);
            self.fill_file(path, &mut obs);
        } else {
            obs.kind = EntryKind::Other;
        }
        obs
    }

    fn fill_file(&self, path: &Path, obs: &mut Observation) {
        match self
            .extractor
            .extract(path, obs.size, self.limits.max_excerpt_bytes)
        {
            Ok(Some(excerpt)) => {
                obs.excerpt = Some(excerpt.text);
                obs.excerpt_truncated = excerpt.truncated;
            }
            Ok(None) => {}
            Err(e) => obs.error = Some(format!("read: {}", e.kind())),
        }
    }

    fn fill_dir(&self, path: &Path, obs: &mut Observation) {
        let mut summary = ChildSummary::default();
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                obs.error = Some(format!("read_dir: {}", e.kind()));
                obs.children = Some(summary);
                return;
            }
        };

        let mut visible: Vec<(String, fs::DirEntry)> = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    obs.error = Some(format!("read_dir: {}", e.kind()));
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_hidden(&name) {
                visible.push((name, entry));
            }
        }

        // The counted subset is always the first names in listing order
        visible.sort_by(|a, b| name_order(&a.0, &b.0));
        if visible.len() > self.limits.max_count {
            summary.counts_capped = true;
            visible.truncate(self.limits.max_count);
        }

        let mut dirs: Vec<String> = Vec::new();
        let mut files: Vec<ChildFile> = Vec::new();
        let mut hist: BTreeMap<String, usize> = BTreeMap::new();
        for (name, entry) in visible {
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => dirs.push(name),
                Ok(ft) if ft.is_file() => {
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    *hist.entry(extension_of(Path::new(&name))).or_insert(0) += 1;
                    files.push(ChildFile { name, size });
                }
                _ => {}
            }
        }

        summary.dirs = dirs.len();
        summary.files = files.len();
        summary.dirs_truncated = dirs.len() > self.limits.max_dirs;
        summary.files_truncated = files.len() > self.limits.max_files;
        dirs.truncate(self.limits.max_dirs);
        files.truncate(self.limits.max_files);

        let pngs = hist.get("png").copied().unwrap_or(0);
        if pngs * 2 > summary.files {
            let listed: Vec<&ChildFile> =
                files.iter().filter(|f| extension_of(Path::new(&f.name)) == "png").collect();
            let assets = listed
                .iter()
                .filter(|f| png_asset_hint(&path.join(&f.name)))
                .count();
            obs.png_asset_hint = !listed.is_empty() && assets * 2 >= listed.len();
        }

        summary.listed_dirs = dirs;
        summary.listed_files = files;

        let mut ext_hist: Vec<(String, usize)> = hist.into_iter().collect();
        ext_hist.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        summary.ext_hist = ext_hist;

        obs.children = Some(summary);
    }

    /// Visible children of a directory in listing order, capped at `max_count`.
    /// Symlinks and the breadcrumb area are left out. The flag reports truncation.
    pub fn visible_children(&self, dir: &Path) -> io::Result<(Vec<PathBuf>, bool)> {
        let mut names: Vec<String> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_hidden(&name) {
                continue;
            }
            if entry.file_type().map(|ft| ft.is_symlink()).unwrap_or(true) {
                continue;
            }
            names.push(name);
        }
        names.sort_by(|a, b| name_order(a, b));
        let truncated = names.len() > self.limits.max_count;
        names.truncate(self.limits.max_count);
        Ok((names.into_iter().map(|n| dir.join(n)).collect(), truncated))
    }

    /// Directory tree below `base`, `depth` levels deep, at most `cap` children per node.
    pub fn destination_tree(&self, base: &Path, depth: usize, cap: usize) -> TreeNode {
        let name = base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let subdirs = list_subdirs(base);
        let mut node = TreeNode {
            name,
            dirs: subdirs.len(),
            children: Vec::new(),
        };
        if depth == 0 {
            return node;
        }
        node.children = subdirs
            .iter()
            .take(cap)
            .map(|d| self.destination_tree(&base.join(d), depth - 1, cap))
            .collect();
        node
    }
}

fn list_subdirs(dir: &Path) -> Vec<String> {
    let mut out: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| !is_hidden(n))
            .collect(),
        Err(_) => Vec::new(),
    };
    out.sort_by(|a, b| name_order(a, b));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn limits() -> SnapshotLimits {
        SnapshotLimits {
            max_dirs: 2,
            max_files: 3,
            max_excerpt_bytes: 8,
            max_count: 100,
        }
    }

    #[test]
    fn test_file_excerpt_capped() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("notes.txt");
        fs::write(&file, "0123456789abcdef").unwrap();

        let obs = SnapshotBuilder::new(limits()).observe(&file);
        assert_eq!(obs.kind, EntryKind::File);
        assert_eq!(obs.size, 16);
        assert_eq!(obs.ext, "txt");
        assert_eq!(obs.group, MediaGroup::Document);
        assert_eq!(obs.excerpt.as_deref(), Some("01234567"));
        assert!(obs.excerpt_truncated);
    }

    #[test]
    fn test_binary_has_no_excerpt() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("blob.txt");
        fs::write(&file, [0u8, 1, 2, 3]).unwrap();

        let obs = SnapshotBuilder::new(limits()).observe(&file);
        assert!(obs.excerpt.is_none());
        assert!(obs.error.is_none());
    }

    #[test]
    fn test_dir_summary_sorted_and_capped() {
        let temp = TempDir::new().unwrap();
        for name in ["b.pdf", "A.pdf", "c.jpg", "d.pdf", ".hidden"] {
            fs::write(temp.path().join(name), "x").unwrap();
        }
        for name in ["zeta", "Alpha", "beta"] {
            fs::create_dir(temp.path().join(name)).unwrap();
        }

        let obs = SnapshotBuilder::new(limits()).observe(temp.path());
        let children = obs.children.unwrap();
        assert_eq!(children.dirs, 3);
        assert_eq!(children.files, 4);
        assert_eq!(children.listed_dirs, vec!["Alpha", "beta"]);
        assert!(children.dirs_truncated);
        let names: Vec<_> = children.listed_files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["A.pdf", "b.pdf", "c.jpg"]);
        assert!(children.files_truncated);
        assert_eq!(
            children.ext_hist,
            vec![("pdf".to_string(), 3), ("jpg".to_string(), 1)]
        );
    }

    #[test]
    fn test_same_state_same_bytes() {
        let temp = TempDir::new().unwrap();
        for i in 0..10 {
            fs::write(temp.path().join(format!("f{}.txt", i)), "hello").unwrap();
        }
        let builder = SnapshotBuilder::new(SnapshotLimits::default());

        let first = serde_json::to_string(&builder.observe(temp.path())).unwrap();
        let second = serde_json::to_string(&builder.observe(temp.path())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_path_flags_error() {
        let temp = TempDir::new().unwrap();
        let obs = SnapshotBuilder::new(limits()).observe(&temp.path().join("gone"));
        assert_eq!(obs.kind, EntryKind::Missing);
        assert!(obs.error.is_some());
    }

    #[test]
    fn test_count_cap_keeps_first_names() {
        let temp = TempDir::new().unwrap();
        for name in ["m.pdf", "c.pdf", "x.jpg", "a.pdf", "q.jpg", "B.pdf"] {
            fs::write(temp.path().join(name), "x").unwrap();
        }
        let capped = SnapshotLimits {
            max_count: 4,
            ..limits()
        };

        let children = SnapshotBuilder::new(capped)
            .observe(temp.path())
            .children
            .unwrap();
        assert!(children.counts_capped);
        assert_eq!(children.files, 4);
        let names: Vec<_> = children.listed_files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "B.pdf", "c.pdf"]);
        assert_eq!(children.ext_hist, vec![("pdf".to_string(), 4)]);
    }

    fn png_header(width: u32, height: u32, color_type: u8) -> Vec<u8> {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, color_type, 0, 0, 0, 0, 0, 0, 0]);
        bytes
    }

    #[test]
    fn test_png_asset_hint_on_icon_folder() {
        let temp = TempDir::new().unwrap();
        let icons = temp.path().join("icons");
        fs::create_dir(&icons).unwrap();
        for name in ["add.png", "close.png", "menu.png"] {
            fs::write(icons.join(name), png_header(32, 32, 6)).unwrap();
        }
        fs::write(icons.join("LICENSE.txt"), "MIT").unwrap();

        let shots = temp.path().join("shots");
        fs::create_dir(&shots).unwrap();
        for name in ["one.png", "two.png"] {
            fs::write(shots.join(name), png_header(1920, 1080, 2)).unwrap();
        }

        let builder = SnapshotBuilder::new(SnapshotLimits::default());
        assert!(builder.observe(&icons).png_asset_hint);
        assert!(builder.observe(&icons.join("add.png")).png_asset_hint);
        assert!(!builder.observe(&shots).png_asset_hint);
        assert!(!builder.observe(&icons.join("LICENSE.txt")).png_asset_hint);

        let json = serde_json::to_string(&builder.observe(&shots)).unwrap();
        assert!(!json.contains("png_asset_hint"));
    }

    #[test]
    fn test_visible_children_skip_breadcrumbs() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(MOVED_TODAY_DIR)).unwrap();
        fs::write(temp.path().join("b.txt"), "x").unwrap();
        fs::write(temp.path().join("a.txt"), "x").unwrap();

        let (children, truncated) = SnapshotBuilder::new(limits())
            .visible_children(temp.path())
            .unwrap();
        assert!(!truncated);
        assert_eq!(
            children,
            vec![temp.path().join("a.txt"), temp.path().join("b.txt")]
        );
    }

    #[test]
    fn test_destination_tree_depth() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Finance/Bank/2023")).unwrap();
        fs::create_dir_all(temp.path().join("Health")).unwrap();

        let tree = SnapshotBuilder::new(limits()).destination_tree(temp.path(), 2, 40);
        assert_eq!(tree.dirs, 2);
        assert_eq!(tree.children[0].name, "Finance");
        assert_eq!(tree.children[0].children[0].name, "Bank");
        assert_eq!(tree.children[0].children[0].dirs, 1);
        assert!(tree.children[0].children[0].children.is_empty());
    }
    struct FixedText;

    impl TextExtractor for FixedText {
        fn extract(&self, _path: &Path, _size: u64, max_bytes: usize) -> io::Result<Option<Excerpt>> {
            let text: String = "scanned invoice from ACME".chars().take(max_bytes).collect();
            Ok(Some(Excerpt {
                text,
                truncated: true,
            }))
        }
    }

    #[test]
    fn test_custom_extractor_feeds_excerpt() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("scan.pdf");
        fs::write(&file, b"%PDF-1.4").unwrap();

        let plain = SnapshotBuilder::new(limits()).observe(&file);
        assert_eq!(plain.excerpt, None);

        let obs = SnapshotBuilder::new(limits())
            .with_extractor(Arc::new(FixedText))
            .observe(&file);
        assert_eq!(obs.excerpt.as_deref(), Some("scanned "));
        assert!(obs.excerpt_truncated);
    }
}
