//! Ordered concatenation of folder segments with a single playback cursor.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::scan::{ImageIdentity, ImageSource};

/// Where playback stands in the concatenated sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// No entries at all.
    Empty,
    At(usize),
}

/// How the cursor was carried across a segment replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorRepair {
    /// The current identity survived; the cursor follows it.
    Retained { index: usize },
    /// The current identity disappeared. The cursor moved to the file's
    /// rewritten identity if the path is still listed, otherwise to the next
    /// surviving entry after the old position, wrapping to 0.
    Relocated {
        removed: ImageIdentity,
        index: usize,
    },
    /// The last entry disappeared.
    Emptied,
    /// Entries appeared while empty; the cursor is at 0.
    Resumed,
    StillEmpty,
}

/// Invariant: `cursor` is `At(i)` with `i < len()` whenever `len() > 0`,
/// and `Empty` otherwise.
#[derive(Debug, Clone)]
pub struct Playlist {
    segments: Vec<ImageSource>,
    cursor: Cursor,
    generation: u64,
}

impl Playlist {
    /// Concatenate `segments` in the given order; the cursor starts at 0.
    pub fn from_sources(segments: Vec<ImageSource>) -> Self {
        let mut playlist = Self {
            segments,
            cursor: Cursor::Empty,
            generation: 1,
        };
        if !playlist.is_empty() {
            playlist.cursor = Cursor::At(0);
        }
        playlist
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(ImageSource::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(ImageSource::is_empty)
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn index(&self) -> Option<usize> {
        match self.cursor {
            Cursor::At(i) => Some(i),
            Cursor::Empty => None,
        }
    }

    /// Incremented on every structural mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn segments(&self) -> &[ImageSource] {
        &self.segments
    }

    pub fn segment(&self, folder: &Path) -> Option<&ImageSource> {
        self.segments.iter().find(|s| s.folder() == folder)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageIdentity> {
        self.segments.iter().flat_map(|s| s.entries().iter())
    }

    pub fn get(&self, index: usize) -> Option<&ImageIdentity> {
        self.iter().nth(index)
    }

    pub fn current(&self) -> Option<&ImageIdentity> {
        self.index().and_then(|i| self.get(i))
    }

    pub fn position(&self, identity: &ImageIdentity) -> Option<usize> {
        self.iter().position(|id| id == identity)
    }

    /// Entry after the cursor, wrapping; `None` when empty.
    pub fn peek_next(&self) -> Option<&ImageIdentity> {
        let len = self.len();
        self.index().and_then(|i| self.get((i + 1) % len))
    }

    /// Move forward one entry, wrapping to 0 at the end.
    pub fn advance(&mut self) -> Option<&ImageIdentity> {
        let len = self.len();
        let i = self.index()?;
        self.cursor = Cursor::At((i + 1) % len);
        self.current()
    }

    /// Move back one entry, wrapping to the end at 0.
    pub fn retreat(&mut self) -> Option<&ImageIdentity> {
        let len = self.len();
        let i = self.index()?;
        self.cursor = Cursor::At((i + len - 1) % len);
        self.current()
    }

    /// Replace the entries contributed by `folder` and repair the cursor.
    ///
    /// Returns `None` if `folder` is not one of the playlist's segments.
    pub fn replace_segment(
        &mut self,
        folder: &Path,
        entries: Vec<ImageIdentity>,
    ) -> Option<CursorRepair> {
        let seg = self.segments.iter().position(|s| s.folder() == folder)?;

        let before: Vec<ImageIdentity> = self.iter().cloned().collect();
        let old_index = self.index();
        self.segments[seg].replace_entries(entries);
        self.generation += 1;

        let positions: HashMap<&ImageIdentity, usize> =
            self.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let len = positions.len();

        let repair = match old_index {
            _ if len == 0 => {
                if old_index.is_some() {
                    CursorRepair::Emptied
                } else {
                    CursorRepair::StillEmpty
                }
            }
            None => CursorRepair::Resumed,
            Some(old) => match positions.get(&before[old]) {
                Some(&index) => CursorRepair::Retained { index },
                None => {
                    let removed = before[old].clone();
                    let index = self
                        .iter()
                        .position(|id| id.path() == removed.path())
                        .or_else(|| {
                            before[old + 1..]
                                .iter()
                                .find_map(|id| positions.get(id).copied())
                        })
                        .unwrap_or(0);
                    CursorRepair::Relocated { removed, index }
                }
            },
        };

        self.cursor = match &repair {
            CursorRepair::Retained { index } | CursorRepair::Relocated { index, .. } => {
                Cursor::At(*index)
            }
            CursorRepair::Resumed => Cursor::At(0),
            CursorRepair::Emptied | CursorRepair::StillEmpty => Cursor::Empty,
        };
        debug!(
            folder = %folder.display(),
            generation = self.generation,
            len,
            cursor = ?self.cursor,
            "segment replaced"
        );
        Some(repair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::UNIX_EPOCH;

    fn id(path: &str) -> ImageIdentity {
        ImageIdentity::new(path, UNIX_EPOCH, 1)
    }

    fn ids(paths: &[&str]) -> Vec<ImageIdentity> {
        paths.iter().map(|p| id(p)).collect()
    }

    fn two_folders() -> Playlist {
        Playlist::from_sources(vec![
            ImageSource::new("/A", ids(&["/A/1.jpg", "/A/2.jpg"])),
            ImageSource::new("/B", ids(&["/B/3.png"])),
        ])
    }

    fn paths(p: &Playlist) -> Vec<PathBuf> {
        p.iter().map(|id| id.path().to_path_buf()).collect()
    }

    #[test]
    fn concatenates_in_folder_order_and_starts_at_zero() {
        let p = two_folders();
        assert_eq!(
            paths(&p),
            vec![
                PathBuf::from("/A/1.jpg"),
                PathBuf::from("/A/2.jpg"),
                PathBuf::from("/B/3.png")
            ]
        );
        assert_eq!(p.cursor(), Cursor::At(0));
    }

    #[test]
    fn empty_playlist_has_sentinel_cursor() {
        let mut p = Playlist::from_sources(vec![ImageSource::empty("/A")]);
        assert_eq!(p.cursor(), Cursor::Empty);
        assert!(p.advance().is_none());
        assert!(p.retreat().is_none());
        assert!(p.current().is_none());
    }

    #[test]
    fn navigation_wraps_both_ways() {
        let mut p = two_folders();
        assert_eq!(p.retreat().unwrap().path(), Path::new("/B/3.png"));
        assert_eq!(p.advance().unwrap().path(), Path::new("/A/1.jpg"));
        p.advance();
        assert_eq!(p.peek_next().unwrap().path(), Path::new("/B/3.png"));
    }

    #[test]
    fn retained_current_follows_its_new_index() {
        let mut p = two_folders();
        p.advance();
        p.advance(); // B/3.png
        let repair = p
            .replace_segment(Path::new("/A"), ids(&["/A/0.jpg", "/A/1.jpg", "/A/2.jpg"]))
            .unwrap();
        assert_eq!(repair, CursorRepair::Retained { index: 3 });
        assert_eq!(p.current().unwrap().path(), Path::new("/B/3.png"));
    }

    #[test]
    fn removed_current_moves_to_next_survivor() {
        let mut p = two_folders();
        p.advance(); // A/2.jpg
        let repair = p
            .replace_segment(Path::new("/A"), ids(&["/A/1.jpg"]))
            .unwrap();
        assert!(matches!(repair, CursorRepair::Relocated { index: 1, .. }));
        assert_eq!(p.current().unwrap().path(), Path::new("/B/3.png"));
    }

    #[test]
    fn removed_last_entry_wraps_to_zero() {
        let mut p = two_folders();
        p.retreat(); // B/3.png
        let repair = p.replace_segment(Path::new("/B"), Vec::new()).unwrap();
        assert!(matches!(repair, CursorRepair::Relocated { index: 0, .. }));
        assert_eq!(p.current().unwrap().path(), Path::new("/A/1.jpg"));
    }

    #[test]
    fn removed_current_skips_new_arrivals() {
        let mut p = two_folders();
        p.advance(); // A/2.jpg
        let repair = p
            .replace_segment(Path::new("/A"), ids(&["/A/1.jpg", "/A/1b.jpg"]))
            .unwrap();
        assert!(matches!(repair, CursorRepair::Relocated { index: 2, .. }));
        assert_eq!(p.current().unwrap().path(), Path::new("/B/3.png"));
    }

    #[test]
    fn modified_current_stays_in_its_slot() {
        let mut p = two_folders();
        p.advance(); // A/2.jpg
        let rewritten = ImageIdentity::new("/A/2.jpg", UNIX_EPOCH, 99);
        let repair = p
            .replace_segment(Path::new("/A"), vec![id("/A/1.jpg"), rewritten.clone()])
            .unwrap();
        assert!(matches!(repair, CursorRepair::Relocated { index: 1, .. }));
        assert_eq!(p.current(), Some(&rewritten));
    }

    #[test]
    fn emptied_then_resumed() {
        let mut p = Playlist::from_sources(vec![ImageSource::new("/A", ids(&["/A/1.jpg"]))]);
        let g0 = p.generation();
        assert_eq!(
            p.replace_segment(Path::new("/A"), Vec::new()),
            Some(CursorRepair::Emptied)
        );
        assert_eq!(p.cursor(), Cursor::Empty);
        assert_eq!(
            p.replace_segment(Path::new("/A"), Vec::new()),
            Some(CursorRepair::StillEmpty)
        );
        assert_eq!(
            p.replace_segment(Path::new("/A"), ids(&["/A/5.jpg", "/A/6.jpg"])),
            Some(CursorRepair::Resumed)
        );
        assert_eq!(p.cursor(), Cursor::At(0));
        assert_eq!(p.generation(), g0 + 3);
    }

    #[test]
    fn unknown_folder_is_ignored() {
        let mut p = two_folders();
        let g = p.generation();
        assert!(p.replace_segment(Path::new("/C"), ids(&["/C/x.jpg"])).is_none());
        assert_eq!(p.generation(), g);
        assert_eq!(p.len(), 3);
    }
}
