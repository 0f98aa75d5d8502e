//! Folder enumeration: which images a configured folder currently holds.

use std::ffi::OsStr;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::error::SourceError;

/// Lowercase extensions (without dot) the slideshow displays.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Return `true` if `path` has a supported image extension (case-insensitive).
#[must_use]
pub fn is_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if IMAGE_EXTENSIONS.contains(&e.as_str())
    )
}

/// Stable key for one image file.
///
/// Equal iff path, modification time and size all match, so a file rewritten
/// in place gets a new identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageIdentity {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

impl ImageIdentity {
    pub fn new(path: impl Into<PathBuf>, modified: SystemTime, size: u64) -> Self {
        Self {
            path: path.into(),
            modified,
            size,
        }
    }

    fn from_metadata(path: PathBuf, meta: &Metadata) -> Self {
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        Self::new(path, modified, meta.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// One configured folder and the identities currently believed present.
///
/// Entries are alphabetical by path unless the playlist shuffles, in which
/// case they hold the fixed permutation chosen at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    folder: PathBuf,
    entries: Vec<ImageIdentity>,
}

impl ImageSource {
    pub fn new(folder: impl Into<PathBuf>, entries: Vec<ImageIdentity>) -> Self {
        Self {
            folder: folder.into(),
            entries,
        }
    }

    pub fn empty(folder: impl Into<PathBuf>) -> Self {
        Self::new(folder, Vec::new())
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn entries(&self) -> &[ImageIdentity] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn replace_entries(&mut self, entries: Vec<ImageIdentity>) -> Vec<ImageIdentity> {
        std::mem::replace(&mut self.entries, entries)
    }
}

/// Enumerate the images directly inside `folder`, sorted alphabetically by path.
///
/// # Errors
/// Returns [`SourceError::FolderUnavailable`] when the folder is missing, is
/// not a directory, or cannot be listed. Unreadable individual entries are
/// skipped.
#[instrument(level = "debug", fields(folder = %folder.display()))]
pub fn rebuild(folder: &Path) -> Result<Vec<ImageIdentity>, SourceError> {
    let unavailable = |source: io::Error| SourceError::FolderUnavailable {
        folder: folder.to_path_buf(),
        source,
    };

    let meta = fs::metadata(folder).map_err(unavailable)?;
    if !meta.is_dir() {
        return Err(unavailable(io::Error::new(
            io::ErrorKind::NotADirectory,
            "not a directory",
        )));
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(folder)
        .follow_links(true)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("directory walk failed"));
                return Err(unavailable(source));
            }
            Err(err) => {
                debug!("skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_image(entry.path()) {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => out.push(ImageIdentity::from_metadata(entry.into_path(), &meta)),
            Err(err) => debug!(path = %entry.path().display(), "skipping entry without metadata: {err}"),
        }
    }

    out.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(count = out.len(), "folder enumerated");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn recognizes_supported_extensions_case_insensitively() {
        for name in ["a.jpg", "b.JPEG", "c.Png", "d.gif", "e.BMP", "f.webp"] {
            assert!(is_image(Path::new(name)), "{name} should be an image");
        }
        for name in ["a.txt", "b.tiff", "noext", ".jpg"] {
            assert!(!is_image(Path::new(name)), "{name} should not be an image");
        }
    }

    #[test]
    fn identity_tracks_modification_and_size() {
        let t0 = UNIX_EPOCH + Duration::from_secs(100);
        let a = ImageIdentity::new("/p/a.jpg", t0, 10);
        assert_eq!(a, ImageIdentity::new("/p/a.jpg", t0, 10));
        assert_ne!(a, ImageIdentity::new("/p/a.jpg", t0 + Duration::from_secs(1), 10));
        assert_ne!(a, ImageIdentity::new("/p/a.jpg", t0, 11));
        assert_ne!(a, ImageIdentity::new("/p/b.jpg", t0, 10));
    }

    #[test]
    fn rebuild_lists_only_direct_images_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("c.png"), b"x").unwrap();
        fs::write(root.join("a.JPG"), b"x").unwrap();
        fs::write(root.join("b.txt"), b"x").unwrap();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("nested").join("d.jpg"), b"x").unwrap();

        let found = rebuild(root).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|id| id.path().file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.JPG", "c.png"]);
        assert_eq!(found[0].size(), 1);
    }

    #[test]
    fn missing_folder_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("gone");
        let err = rebuild(&missing).unwrap_err();
        assert_eq!(err.folder(), &missing);
    }

    #[test]
    fn file_in_place_of_folder_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain.jpg");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            rebuild(&file),
            Err(SourceError::FolderUnavailable { .. })
        ));
    }
}
