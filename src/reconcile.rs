//! Keeps playlist segments in step with what the folders actually contain.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::playlist::{CursorRepair, Playlist};
use crate::scan::{self, ImageIdentity, ImageSource};

/// Identities gained and lost by one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentDiff {
    pub added: Vec<ImageIdentity>,
    pub removed: Vec<ImageIdentity>,
}

impl SegmentDiff {
    pub fn between(previous: &[ImageIdentity], current: &[ImageIdentity]) -> Self {
        let before: HashSet<&ImageIdentity> = previous.iter().collect();
        let after: HashSet<&ImageIdentity> = current.iter().collect();
        Self {
            added: current
                .iter()
                .filter(|id| !before.contains(id))
                .cloned()
                .collect(),
            removed: previous
                .iter()
                .filter(|id| !after.contains(id))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Outcome of reconciling one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub folder: PathBuf,
    pub diff: SegmentDiff,
    pub repair: CursorRepair,
    /// `false` when the folder could not be enumerated and now contributes nothing.
    pub available: bool,
}

/// Rebuilds segments and repairs the playlist cursor.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    shuffle: bool,
}

impl Reconciler {
    pub fn new(shuffle: bool) -> Self {
        Self { shuffle }
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    /// Enumerate every folder and build the startup playlist.
    ///
    /// Unavailable folders yield empty segments. With shuffle on, each
    /// segment gets one random permutation here that later reconciliations
    /// only patch.
    pub fn build_playlist<R: Rng + ?Sized>(&self, folders: &[PathBuf], rng: &mut R) -> Playlist {
        let sources = folders
            .iter()
            .map(|folder| {
                let mut entries = enumerate_or_empty(folder);
                if self.shuffle {
                    entries.shuffle(rng);
                }
                info!(folder = %folder.display(), images = entries.len(), "folder scanned");
                ImageSource::new(folder.clone(), entries)
            })
            .collect();
        let playlist = Playlist::from_sources(sources);
        info!(
            images = playlist.len(),
            folders = folders.len(),
            shuffle = self.shuffle,
            "playlist built"
        );
        playlist
    }

    /// Re-enumerate `folder` and splice the result into `playlist`.
    ///
    /// Returns `None` if `folder` is not a playlist segment.
    pub fn on_folder_changed(
        &self,
        playlist: &mut Playlist,
        folder: &Path,
    ) -> Option<Reconciliation> {
        let scanned = scan::rebuild(folder);
        self.apply(playlist, folder, scanned)
    }

    /// Splice an already enumerated folder listing into `playlist`.
    pub fn apply(
        &self,
        playlist: &mut Playlist,
        folder: &Path,
        scanned: Result<Vec<ImageIdentity>, SourceError>,
    ) -> Option<Reconciliation> {
        let Some(segment) = playlist.segment(folder) else {
            debug!(folder = %folder.display(), "change for unconfigured folder ignored");
            return None;
        };
        let previous = segment.entries().to_vec();

        let (rebuilt, available) = match scanned {
            Ok(entries) => (entries, true),
            Err(err) => {
                warn!("{err}; contributing zero images");
                (Vec::new(), false)
            }
        };

        let diff = SegmentDiff::between(&previous, &rebuilt);
        let merged = if self.shuffle {
            merge_keeping_order(&previous, rebuilt)
        } else {
            rebuilt
        };
        let repair = playlist.replace_segment(folder, merged)?;

        info!(
            folder = %folder.display(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            images = playlist.len(),
            generation = playlist.generation(),
            repair = ?repair,
            "folder reconciled"
        );
        Some(Reconciliation {
            folder: folder.to_path_buf(),
            diff,
            repair,
            available,
        })
    }
}

fn enumerate_or_empty(folder: &Path) -> Vec<ImageIdentity> {
    scan::rebuild(folder).unwrap_or_else(|err| {
        warn!("{err}; contributing zero images");
        Vec::new()
    })
}

/// Patch a fixed ordering with a fresh alphabetical listing.
///
/// Survivors keep their relative order, a file rewritten in place keeps its
/// slot under its new identity, and new arrivals are appended alphabetically.
fn merge_keeping_order(previous: &[ImageIdentity], rebuilt: Vec<ImageIdentity>) -> Vec<ImageIdentity> {
    let mut by_path: HashMap<PathBuf, ImageIdentity> = rebuilt
        .iter()
        .map(|id| (id.path().to_path_buf(), id.clone()))
        .collect();

    let mut merged = Vec::with_capacity(rebuilt.len());
    for old in previous {
        if let Some(current) = by_path.remove(old.path()) {
            merged.push(current);
        }
    }
    for id in rebuilt {
        if by_path.remove(id.path()).is_some() {
            merged.push(id);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::UNIX_EPOCH;

    fn id(path: &str) -> ImageIdentity {
        ImageIdentity::new(path, UNIX_EPOCH, 1)
    }

    fn ids(paths: &[&str]) -> Vec<ImageIdentity> {
        paths.iter().map(|p| id(p)).collect()
    }

    #[test]
    fn diff_reports_added_and_removed() {
        let diff = SegmentDiff::between(&ids(&["/a", "/b"]), &ids(&["/b", "/c"]));
        assert_eq!(diff.added, ids(&["/c"]));
        assert_eq!(diff.removed, ids(&["/a"]));
        assert!(SegmentDiff::between(&ids(&["/a"]), &ids(&["/a"])).is_empty());
    }

    #[test]
    fn diff_treats_rewrite_as_remove_plus_add() {
        let rewritten = ImageIdentity::new("/a", UNIX_EPOCH, 2);
        let diff = SegmentDiff::between(&ids(&["/a"]), &[rewritten.clone()]);
        assert_eq!(diff.added, vec![rewritten]);
        assert_eq!(diff.removed, ids(&["/a"]));
    }

    #[test]
    fn shuffled_order_is_patched_not_regenerated() {
        let previous = ids(&["/f/c", "/f/a", "/f/d", "/f/b"]);
        let rewritten = ImageIdentity::new("/f/d", UNIX_EPOCH, 7);
        let rebuilt = vec![id("/f/a"), id("/f/b"), rewritten.clone(), id("/f/e"), id("/f/z")];

        let merged = merge_keeping_order(&previous, rebuilt);
        assert_eq!(
            merged,
            vec![id("/f/a"), rewritten, id("/f/b"), id("/f/e"), id("/f/z")]
        );
    }

    #[test]
    fn unavailable_folder_contributes_nothing() {
        let reconciler = Reconciler::new(false);
        let mut playlist = Playlist::from_sources(vec![
            ImageSource::new("/A", ids(&["/A/1.jpg"])),
            ImageSource::new("/B", ids(&["/B/3.png"])),
        ]);
        let err = SourceError::FolderUnavailable {
            folder: PathBuf::from("/A"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let outcome = reconciler
            .apply(&mut playlist, Path::new("/A"), Err(err))
            .unwrap();
        assert!(!outcome.available);
        assert_eq!(outcome.diff.removed, ids(&["/A/1.jpg"]));
        assert_eq!(playlist.len(), 1);
        assert_eq!(playlist.current().unwrap().path(), Path::new("/B/3.png"));
    }

    #[test]
    fn unconfigured_folder_is_ignored() {
        let reconciler = Reconciler::new(false);
        let mut playlist = Playlist::from_sources(vec![ImageSource::new("/A", ids(&["/A/1.jpg"]))]);
        assert!(
            reconciler
                .apply(&mut playlist, Path::new("/Z"), Ok(ids(&["/Z/1.jpg"])))
                .is_none()
        );
    }

    #[test]
    fn shuffle_is_stable_across_reconciliations() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path().to_path_buf();
        for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg", "f.jpg"] {
            std::fs::write(folder.join(name), b"x").unwrap();
        }
        let reconciler = Reconciler::new(true);
        let mut rng = StdRng::seed_from_u64(42);
        let mut playlist = reconciler.build_playlist(&[folder.clone()], &mut rng);
        let before: Vec<_> = playlist.iter().cloned().collect();

        std::fs::remove_file(folder.join("c.jpg")).unwrap();
        std::fs::write(folder.join("0-new.jpg"), b"x").unwrap();
        reconciler.on_folder_changed(&mut playlist, &folder).unwrap();

        let after: Vec<_> = playlist.iter().cloned().collect();
        let expected_prefix: Vec<_> = before
            .iter()
            .filter(|id| id.path() != folder.join("c.jpg"))
            .cloned()
            .collect();
        assert_eq!(&after[..5], expected_prefix.as_slice());
        assert_eq!(after[5].path(), folder.join("0-new.jpg"));
    }
}
