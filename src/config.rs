use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use tracing::warn;

use crate::cache::{CacheLimits, DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES};
use crate::controller::{ControllerSettings, DEFAULT_MAX_CONSECUTIVE_FAILURES};
use crate::events::SurfaceSize;
use crate::transition::TransitionSelection;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Folders to show, in playback order. Each contributes one segment.
    pub folders: Vec<PathBuf>,
    /// How long each image stays up. Plain numbers are seconds.
    #[serde(deserialize_with = "seconds_or_humantime")]
    pub duration: Duration,
    /// Display index handed to the presentation layer, which falls back to
    /// the primary display when the index does not exist.
    pub monitor: Option<usize>,
    pub transition: TransitionSelection,
    #[serde(with = "humantime_serde")]
    pub transition_duration: Duration,
    pub shuffle: bool,
    /// Optional deterministic seed for the shuffle and random transitions.
    pub shuffle_seed: Option<u64>,
    /// Quiet period a folder must observe before it is reconciled.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
    /// How often pending folder changes are checked.
    #[serde(with = "humantime_serde")]
    pub debounce_tick: Duration,
    pub cache: CacheOptions,
    pub max_consecutive_failures: u32,
    /// Decode the upcoming image while the current one is on screen.
    pub prefetch: bool,
    /// Surface size used until the display layer reports one.
    pub initial_surface: [u32; 2],
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CacheOptions {
    pub max_entries: usize,
    pub max_bytes: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    ///
    /// Folders are made absolute and deduplicated (first occurrence wins).
    pub fn validated(mut self) -> Result<Self> {
        ensure!(!self.folders.is_empty(), "folders must list at least one folder");
        ensure!(
            self.duration > Duration::ZERO,
            "duration must be greater than zero"
        );
        ensure!(
            self.debounce > Duration::ZERO,
            "debounce must be greater than zero"
        );
        ensure!(
            self.debounce_tick > Duration::ZERO,
            "debounce-tick must be greater than zero"
        );
        ensure!(
            self.debounce_tick <= self.debounce,
            "debounce-tick must not exceed debounce"
        );
        ensure!(
            self.cache.max_entries > 0,
            "cache.max-entries must be greater than zero"
        );
        ensure!(
            self.cache.max_bytes > 0,
            "cache.max-bytes must be greater than zero"
        );
        ensure!(
            self.max_consecutive_failures >= 1,
            "max-consecutive-failures must be >= 1"
        );
        ensure!(
            self.initial_surface.iter().all(|d| *d > 0),
            "initial-surface dimensions must be positive"
        );

        let mut seen = HashSet::new();
        let mut folders = Vec::with_capacity(self.folders.len());
        for folder in self.folders {
            let absolute = std::path::absolute(&folder)
                .with_context(|| format!("failed to resolve folder {}", folder.display()))?;
            if seen.insert(absolute.clone()) {
                folders.push(absolute);
            } else {
                warn!(folder = %absolute.display(), "folder listed more than once; ignoring repeat");
            }
        }
        self.folders = folders;
        Ok(self)
    }

    pub fn surface(&self) -> SurfaceSize {
        let [width, height] = self.initial_surface;
        SurfaceSize::new(width, height)
    }

    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_entries: self.cache.max_entries,
            max_bytes: self.cache.max_bytes,
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            duration: self.duration,
            transition: self.transition,
            transition_duration: self.transition_duration,
            max_failures: self.max_consecutive_failures,
            prefetch: self.prefetch,
            cache: self.cache_limits(),
            surface: self.surface(),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            folders: vec![PathBuf::from(".")],
            duration: Duration::from_secs(5),
            monitor: None,
            transition: TransitionSelection::default(),
            transition_duration: Duration::from_millis(500),
            shuffle: false,
            shuffle_seed: None,
            debounce: Duration::from_millis(500),
            debounce_tick: Duration::from_millis(250),
            cache: CacheOptions::default(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            prefetch: true,
            initial_surface: [800, 600],
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(f64),
    Text(String),
}

fn seconds_or_humantime<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Duration::try_from_secs_f64(secs).map_err(|err| {
            de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {secs}: {err}"
            ))
        }),
        RawDuration::Text(text) => humantime::parse_duration(&text).map_err(de::Error::custom),
    }
}
