use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::controller::StopReason;
use crate::transition::TransitionKind;

/// Settled notification from the files task: `folder` stopped changing for
/// a full debounce window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderChanged(pub PathBuf);

/// Size of the display surface that decoded buffers are scaled to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// RGBA8 pixels ready for the renderer.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Approximate resident size, used for the cache byte budget.
    pub fn byte_size(&self) -> u64 {
        self.pixels.len() as u64
    }
}

/// External playback input (keyboard, mouse, signals, display layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackCommand {
    Next,
    Previous,
    Pause,
    Resume,
    TogglePause,
    Resize(SurfaceSize),
}

/// A request for the renderer to show `next`, optionally animating from
/// `previous`.
#[derive(Debug, Clone)]
pub struct Presentation {
    pub previous: Option<Arc<DecodedImage>>,
    pub next: Arc<DecodedImage>,
    /// `None` means an immediate cut.
    pub transition: Option<TransitionKind>,
    pub transition_duration: Duration,
}

/// Status surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Playing,
    Paused,
    /// No images remain; the last frame stays on screen.
    Empty,
    /// Images appeared after the playlist was empty.
    Resumed,
    Showing {
        index: usize,
        total: usize,
        path: PathBuf,
    },
    DecodeFailed {
        path: PathBuf,
    },
    Stopped(StopReason),
}

/// Everything the manager hands to the viewer.
#[derive(Debug, Clone)]
pub enum ViewerEvent {
    Present(Presentation),
    Notice(Notice),
}
