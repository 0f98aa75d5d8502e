//! Playback state machine.
//!
//! [`PlaybackController`] performs no I/O of its own. Each input (a command,
//! a timer fire, a decode completion, a settled folder change) returns the
//! [`Effect`]s the caller has to carry out: decodes to run, frames to
//! present, notices to surface and timer changes. The manager task is the
//! only caller, so the playlist, the cache and the playback state are never
//! shared.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::cache::{CacheLimits, DecodeCache, DecodeJob, JobId, Lookup, Ticket};
use crate::error::{DecodeFailure, SourceError};
use crate::events::{DecodedImage, Notice, PlaybackCommand, Presentation, SurfaceSize};
use crate::playlist::{CursorRepair, Playlist};
use crate::reconcile::Reconciler;
use crate::scan::{self, ImageIdentity};
use crate::transition::TransitionSelection;

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TooManyFailures,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyFailures => f.write_str("too many consecutive decode failures"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Playing,
    Paused,
    /// Terminal. Nothing advances again.
    Stopped(StopReason),
}

/// Consecutive display decode failures.
#[derive(Debug, Clone, Copy)]
pub struct FailureCounter {
    consecutive: u32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive += 1;
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }

    pub fn is_exhausted(&self) -> bool {
        self.consecutive >= self.threshold
    }
}

/// Work requested by the controller.
#[derive(Debug)]
pub enum Effect {
    /// Decode `job` scaled to `surface` off the manager task, then report
    /// back through [`PlaybackController::on_decode_complete`].
    Decode {
        job: DecodeJob,
        surface: SurfaceSize,
    },
    Present(Presentation),
    Notify(Notice),
    /// (Re)start the advance timer so it fires once after the duration.
    ArmTimer(Duration),
    DisarmTimer,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub duration: Duration,
    pub transition: TransitionSelection,
    pub transition_duration: Duration,
    pub max_failures: u32,
    pub prefetch: bool,
    pub cache: CacheLimits,
    pub surface: SurfaceSize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            transition: TransitionSelection::default(),
            transition_duration: Duration::from_millis(500),
            max_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            prefetch: true,
            cache: CacheLimits::default(),
            surface: SurfaceSize::new(800, 600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// The identity whose decode should drive the next presentation.
#[derive(Debug)]
struct Target {
    identity: ImageIdentity,
    ticket: Ticket,
    direction: Direction,
    cut: bool,
}

#[derive(Debug)]
struct Displayed {
    identity: ImageIdentity,
    image: Arc<DecodedImage>,
}

pub struct PlaybackController {
    settings: ControllerSettings,
    playlist: Playlist,
    cache: DecodeCache,
    reconciler: Reconciler,
    rng: StdRng,
    state: PlaybackState,
    failures: FailureCounter,
    displayed: Option<Displayed>,
    /// The displayed identity was removed from disk; the next forward
    /// advance shows the repaired cursor entry instead of skipping it.
    stale: bool,
    target: Option<Target>,
    surface: SurfaceSize,
}

impl PlaybackController {
    pub fn new(
        settings: ControllerSettings,
        playlist: Playlist,
        reconciler: Reconciler,
        rng: StdRng,
    ) -> Self {
        Self {
            cache: DecodeCache::new(settings.cache),
            failures: FailureCounter::new(settings.max_failures),
            surface: settings.surface,
            settings,
            playlist,
            reconciler,
            rng,
            state: PlaybackState::Playing,
            displayed: None,
            stale: false,
            target: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn cache(&self) -> &DecodeCache {
        &self.cache
    }

    pub fn surface(&self) -> SurfaceSize {
        self.surface
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.count()
    }

    /// Identity of the frame currently on screen, if any.
    pub fn displayed(&self) -> Option<&ImageIdentity> {
        self.displayed.as_ref().map(|shown| &shown.identity)
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Request the first frame and arm the timer.
    pub fn start(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::Notify(Notice::Playing)];
        if self.playlist.is_empty() {
            info!("no images yet; waiting for folders to fill");
            effects.push(Effect::Notify(Notice::Empty));
        } else {
            self.show_current(Direction::Forward, false, &mut effects);
        }
        effects.push(Effect::ArmTimer(self.settings.duration));
        effects
    }

    pub fn handle(&mut self, command: PlaybackCommand) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let PlaybackState::Stopped(reason) = self.state {
            debug!(?command, %reason, "playback stopped; command ignored");
            return effects;
        }
        match command {
            PlaybackCommand::Next => self.step(Direction::Forward, &mut effects),
            PlaybackCommand::Previous => self.step(Direction::Backward, &mut effects),
            PlaybackCommand::Pause => self.pause(&mut effects),
            PlaybackCommand::Resume => self.resume(&mut effects),
            PlaybackCommand::TogglePause => match self.state {
                PlaybackState::Playing => self.pause(&mut effects),
                _ => self.resume(&mut effects),
            },
            PlaybackCommand::Resize(surface) => self.resize(surface, &mut effects),
        }
        effects
    }

    /// The advance timer fired. The cursor is read now, never cached.
    pub fn on_timer(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state != PlaybackState::Playing {
            return effects;
        }
        effects.push(Effect::ArmTimer(self.settings.duration));
        if self.playlist.is_empty() {
            return effects;
        }
        if let Some(target) = &self.target {
            debug!(path = %target.identity.path().display(), "still decoding; advance deferred");
            return effects;
        }
        if !self.stale && self.displayed.is_some() {
            self.playlist.advance();
        }
        self.show_current(Direction::Forward, false, &mut effects);
        effects
    }

    pub fn on_decode_complete(
        &mut self,
        job: JobId,
        identity: ImageIdentity,
        result: Result<DecodedImage, DecodeFailure>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(done) = self.cache.complete(job, identity, result) else {
            return effects;
        };
        let Some(target) = self
            .target
            .take_if(|target| done.tickets.contains(&target.ticket))
        else {
            match &done.result {
                Ok(_) => debug!(path = %done.identity.path().display(), "decoded ahead of display"),
                Err(failure) => debug!(
                    path = %failure.path.display(),
                    reason = %failure.reason,
                    "background decode failed"
                ),
            }
            return effects;
        };
        match done.result {
            Ok(image) => self.present(target.identity, image, target.cut, &mut effects),
            Err(failure) => self.on_display_failure(target, failure, &mut effects),
        }
        effects
    }

    /// Re-enumerate `folder` and reconcile the playlist with it.
    pub fn on_folder_changed(&mut self, folder: &Path) -> Vec<Effect> {
        let scanned = scan::rebuild(folder);
        self.on_folder_listing(folder, scanned)
    }

    /// Reconcile the playlist with an already enumerated listing of `folder`.
    pub fn on_folder_listing(
        &mut self,
        folder: &Path,
        scanned: Result<Vec<ImageIdentity>, SourceError>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let Some(outcome) = self.reconciler.apply(&mut self.playlist, folder, scanned) else {
            return effects;
        };
        if matches!(self.state, PlaybackState::Stopped(_)) {
            return effects;
        }
        match outcome.repair {
            CursorRepair::Retained { .. } | CursorRepair::StillEmpty => {}
            CursorRepair::Relocated { removed, .. } => {
                if let Some(target) = self.target.take_if(|target| target.identity == removed) {
                    self.show_current(target.direction, target.cut, &mut effects);
                } else if self.displayed() == Some(&removed) {
                    debug!(path = %removed.path().display(), "displayed image removed; kept until next advance");
                    self.stale = true;
                }
            }
            CursorRepair::Emptied => {
                info!("playlist empty; keeping last frame");
                self.target = None;
                self.stale = self.displayed.is_some();
                effects.push(Effect::Notify(Notice::Empty));
            }
            CursorRepair::Resumed => {
                info!(images = self.playlist.len(), "images available again");
                effects.push(Effect::Notify(Notice::Resumed));
                self.show_current(Direction::Forward, false, &mut effects);
                if self.state == PlaybackState::Playing {
                    effects.push(Effect::ArmTimer(self.settings.duration));
                }
            }
        }
        effects
    }

    /// Release every buffer, including the retained frame.
    pub fn shutdown(&mut self) -> Vec<Effect> {
        let released = self.cache.release_buffers();
        self.target = None;
        self.displayed = None;
        info!(released, "controller shut down");
        vec![Effect::DisarmTimer]
    }

    fn step(&mut self, direction: Direction, effects: &mut Vec<Effect>) {
        if self.playlist.is_empty() {
            debug!("navigation ignored; playlist empty");
            return;
        }
        if !(direction == Direction::Forward && self.stale) {
            self.move_cursor(direction);
        }
        self.show_current(direction, false, effects);
        if self.state == PlaybackState::Playing {
            effects.push(Effect::ArmTimer(self.settings.duration));
        }
    }

    fn move_cursor(&mut self, direction: Direction) {
        match direction {
            Direction::Forward => self.playlist.advance(),
            Direction::Backward => self.playlist.retreat(),
        };
    }

    fn show_current(&mut self, direction: Direction, cut: bool, effects: &mut Vec<Effect>) {
        let Some(identity) = self.playlist.current().cloned() else {
            self.target = None;
            return;
        };
        match self.cache.get_or_decode(&identity) {
            Lookup::Ready(image) => {
                self.target = None;
                self.present(identity, image, cut, effects);
            }
            Lookup::Pending(ticket) => {
                self.target = Some(Target {
                    identity,
                    ticket,
                    direction,
                    cut,
                });
            }
            Lookup::Dispatch(ticket, job) => {
                effects.push(Effect::Decode {
                    job,
                    surface: self.surface,
                });
                self.target = Some(Target {
                    identity,
                    ticket,
                    direction,
                    cut,
                });
            }
        }
    }

    fn present(
        &mut self,
        identity: ImageIdentity,
        image: Arc<DecodedImage>,
        cut: bool,
        effects: &mut Vec<Effect>,
    ) {
        self.failures.reset();
        let previous = self.displayed.take().map(|shown| shown.image);
        let transition = if cut || previous.is_none() || self.playlist.len() == 1 {
            None
        } else {
            self.settings.transition.resolve(&mut self.rng)
        };
        let index = self.playlist.index().unwrap_or_default();
        let total = self.playlist.len();
        info!(
            path = %identity.path().display(),
            index,
            total,
            transition = ?transition,
            "presenting"
        );
        effects.push(Effect::Present(Presentation {
            previous,
            next: Arc::clone(&image),
            transition,
            transition_duration: self.settings.transition_duration,
        }));
        effects.push(Effect::Notify(Notice::Showing {
            index,
            total,
            path: identity.path().to_path_buf(),
        }));
        self.displayed = Some(Displayed { identity, image });
        self.stale = false;
        if self.settings.prefetch && self.state == PlaybackState::Playing {
            self.prefetch_next(effects);
        }
    }

    fn prefetch_next(&mut self, effects: &mut Vec<Effect>) {
        let Some(next) = self.playlist.peek_next().cloned() else {
            return;
        };
        if self.displayed() == Some(&next) {
            return;
        }
        if let Lookup::Dispatch(_, job) = self.cache.get_or_decode(&next) {
            debug!(path = %next.path().display(), "prefetching");
            effects.push(Effect::Decode {
                job,
                surface: self.surface,
            });
        }
    }

    fn on_display_failure(
        &mut self,
        target: Target,
        failure: DecodeFailure,
        effects: &mut Vec<Effect>,
    ) {
        let consecutive = self.failures.record_failure();
        warn!(
            path = %failure.path.display(),
            reason = %failure.reason,
            consecutive,
            "decode failed; skipping"
        );
        effects.push(Effect::Notify(Notice::DecodeFailed { path: failure.path }));
        if self.failures.is_exhausted() {
            self.stop(StopReason::TooManyFailures, effects);
            return;
        }
        if self.playlist.current() == Some(&target.identity) {
            self.move_cursor(target.direction);
        }
        self.show_current(target.direction, target.cut, effects);
    }

    fn stop(&mut self, reason: StopReason, effects: &mut Vec<Effect>) {
        warn!(%reason, "playback stopped");
        self.state = PlaybackState::Stopped(reason);
        self.target = None;
        effects.push(Effect::DisarmTimer);
        effects.push(Effect::Notify(Notice::Stopped(reason)));
    }

    fn pause(&mut self, effects: &mut Vec<Effect>) {
        if self.state != PlaybackState::Playing {
            return;
        }
        self.state = PlaybackState::Paused;
        // in-flight decodes stay tracked; a pending target still presents
        let released = self.cache.release_buffers();
        info!(released, "paused");
        effects.push(Effect::DisarmTimer);
        effects.push(Effect::Notify(Notice::Paused));
    }

    fn resume(&mut self, effects: &mut Vec<Effect>) {
        if self.state != PlaybackState::Paused {
            return;
        }
        self.state = PlaybackState::Playing;
        info!("resumed");
        effects.push(Effect::Notify(Notice::Playing));
        effects.push(Effect::ArmTimer(self.settings.duration));
        if self.target.is_some() {
            return;
        }
        let Some(current) = self.playlist.current().cloned() else {
            return;
        };
        if self.displayed() == Some(&current) {
            if let Lookup::Dispatch(_, job) = self.cache.get_or_decode(&current) {
                debug!(path = %current.path().display(), "re-decoding current image");
                effects.push(Effect::Decode {
                    job,
                    surface: self.surface,
                });
            }
        } else {
            self.show_current(Direction::Forward, false, effects);
        }
    }

    fn resize(&mut self, surface: SurfaceSize, effects: &mut Vec<Effect>) {
        if surface == self.surface {
            debug!(width = surface.width, height = surface.height, "surface unchanged");
            return;
        }
        self.surface = surface;
        let released = self.cache.clear();
        info!(width = surface.width, height = surface.height, released, "surface resized");
        match self.target.take() {
            Some(target) => self.show_current(target.direction, target.cut, effects),
            None if self.stale || self.playlist.is_empty() => {}
            None => self.show_current(Direction::Forward, true, effects),
        }
    }
}
