// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Locating image assets inside an extracted export.
//!
//! Exports store uploaded and generated images next to `conversations.json`,
//! in `dalle-generations/`, or in per-user `user-*` directories. File names
//! start with the asset id (`file-abc123-photo.png`), so lookup is by prefix.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Relative directory, from the Markdown files, that assets are copied to.
pub const ASSETS_DIR: &str = "assets";

/// Index of the files in an export directory, by file name, plus the copy
/// target assigned to each referenced asset.
#[derive(Debug, Default)]
pub struct AssetIndex {
    files: BTreeMap<String, PathBuf>,
    /// Asset id to file name under [`ASSETS_DIR`].
    targets: HashMap<String, String>,
    /// Lowercased target file name to the asset id that claimed it.
    claimed: HashMap<String, String>,
}

impl AssetIndex {
    /// Scans `root` and its immediate subdirectories.
    ///
    /// When two directories hold the same file name the first one in sorted
    /// path order wins.
    pub fn scan(root: &Path) -> Self {
        let mut files = BTreeMap::new();
        for entry in WalkDir::new(root)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if is_export_metadata(name) {
                continue;
            }
            files
                .entry(name.to_owned())
                .or_insert_with(|| entry.path().to_path_buf());
        }
        tracing::info!(root = %root.display(), files = files.len(), "indexed assets");
        Self {
            files,
            ..Self::default()
        }
    }

    /// Finds the file of an asset: an exact name match, else the first name
    /// starting with the id.
    pub fn find(&self, asset_id: &str) -> Option<&Path> {
        if asset_id.is_empty() || asset_id.contains(['/', '\\']) || asset_id.contains("..") {
            return None;
        }
        if let Some(path) = self.files.get(asset_id) {
            return Some(path);
        }
        self.files
            .range(asset_id.to_owned()..)
            .next()
            .filter(|(name, _)| name.starts_with(asset_id))
            .map(|(_, path)| path.as_path())
    }

    /// Assigns the file name an asset is copied to, if the asset exists.
    ///
    /// The display name is preferred; the source file name is the fallback.
    /// An asset keeps the name it was first assigned. When another asset
    /// already holds the name with different contents, ` (n)` is added
    /// before the extension; identical files share one copy.
    pub fn assign(&mut self, asset_id: &str, name: Option<&str>) -> Option<String> {
        if let Some(target) = self.targets.get(asset_id) {
            return Some(target.clone());
        }
        let source = self.find(asset_id)?.to_path_buf();
        let base = name
            .map(crate::sanitize)
            .filter(|n| n != "untitled")
            .or_else(|| source.file_name()?.to_str().map(str::to_owned))?;

        let (stem, ext) = split_extension(&base);
        let mut target = base.clone();
        let mut counter = 0;
        while let Some(owner) = self.claimed.get(&target.to_lowercase()) {
            if owner == asset_id || self.find(owner).is_some_and(|p| same_contents(p, &source)) {
                break;
            }
            counter += 1;
            target = format!("{stem} ({counter}){ext}");
        }

        if counter > 0 {
            tracing::debug!(
                asset = asset_id,
                name = %base,
                target = %target,
                "renamed clashing asset"
            );
        }
        self.claimed
            .entry(target.to_lowercase())
            .or_insert_with(|| asset_id.to_owned());
        self.targets.insert(asset_id.to_owned(), target.clone());
        Some(target)
    }

    /// Returns the file name assigned to an asset.
    pub fn target(&self, asset_id: &str) -> Option<&str> {
        self.targets.get(asset_id).map(String::as_str)
    }

    /// Returns the link target for an assigned asset, relative to the
    /// Markdown file.
    pub fn link(&self, asset_id: &str) -> Option<String> {
        self.target(asset_id)
            .map(|file| format!("{ASSETS_DIR}/{file}"))
    }
}

/// Splits `name.ext` into `("name", ".ext")`. Dot files have no extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    }
}

fn same_contents(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::read(a), std::fs::read(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn is_export_metadata(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext == "json" || ext == "html")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn export_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("conversations.json"), "[]").unwrap();
        fs::write(dir.path().join("file-abc123-cat.png"), b"png").unwrap();
        fs::create_dir(dir.path().join("dalle-generations")).unwrap();
        fs::write(
            dir.path().join("dalle-generations").join("file-dalle9-webp.webp"),
            b"webp",
        )
        .unwrap();
        fs::create_dir(dir.path().join("user-42")).unwrap();
        fs::write(dir.path().join("user-42").join("file_0000xyz-upload.jpg"), b"jpg").unwrap();
        dir
    }

    #[test]
    fn finds_assets_by_prefix_in_subdirectories() {
        let dir = export_dir();
        let index = AssetIndex::scan(dir.path());

        assert_eq!(index.files.len(), 3);
        assert_eq!(
            index.find("file-abc123"),
            Some(dir.path().join("file-abc123-cat.png").as_path())
        );
        assert!(index.find("file-dalle9").is_some());
        assert!(index.find("file_0000xyz").is_some());
        assert!(index.find("file-missing").is_none());
        assert!(index.find("conversations").is_none());
    }

    #[test]
    fn rejects_path_like_ids() {
        let dir = export_dir();
        let index = AssetIndex::scan(dir.path());

        assert!(index.find("../file-abc123").is_none());
        assert!(index.find("user-42/file_0000xyz").is_none());
        assert!(index.find("").is_none());
    }

    #[test]
    fn links_assigned_assets_under_assets_directory() {
        let dir = export_dir();
        let mut index = AssetIndex::scan(dir.path());

        assert_eq!(index.assign("file-abc123", None).as_deref(), Some("file-abc123-cat.png"));
        assert_eq!(index.link("file-abc123").as_deref(), Some("assets/file-abc123-cat.png"));

        assert_eq!(
            index.assign("file-dalle9", Some("My Cat.webp")).as_deref(),
            Some("My Cat.webp")
        );
        assert_eq!(index.link("file-dalle9").as_deref(), Some("assets/My Cat.webp"));

        assert_eq!(index.assign("file-missing", Some("x.png")), None);
        assert_eq!(index.link("file-missing"), None);
        assert_eq!(index.link("file_0000xyz"), None);
    }

    #[test]
    fn clashing_names_get_numbered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file-AAA-image.png"), b"AAAA").unwrap();
        fs::write(dir.path().join("file-BBB-image.png"), b"BBBB").unwrap();
        fs::write(dir.path().join("file-CCC-image.png"), b"CCCC").unwrap();
        let mut index = AssetIndex::scan(dir.path());

        assert_eq!(index.assign("file-AAA", Some("image.png")).as_deref(), Some("image.png"));
        assert_eq!(
            index.assign("file-BBB", Some("image.png")).as_deref(),
            Some("image (1).png")
        );
        assert_eq!(
            index.assign("file-CCC", Some("IMAGE.png")).as_deref(),
            Some("IMAGE (2).png")
        );
        // Assignment is stable per asset.
        assert_eq!(
            index.assign("file-BBB", Some("other.png")).as_deref(),
            Some("image (1).png")
        );
        assert_eq!(index.target("file-AAA"), Some("image.png"));
    }

    #[test]
    fn identical_files_share_a_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("file-AAA-image.png"), b"same").unwrap();
        fs::write(dir.path().join("file-BBB-image.png"), b"same").unwrap();
        let mut index = AssetIndex::scan(dir.path());

        assert_eq!(index.assign("file-AAA", Some("image.png")).as_deref(), Some("image.png"));
        assert_eq!(index.assign("file-BBB", Some("image.png")).as_deref(), Some("image.png"));
    }

    #[test]
    fn splits_extensions() {
        assert_eq!(split_extension("image.png"), ("image", ".png"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
    }
}
