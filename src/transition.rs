use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Deserializer};
use tracing::warn;

/// Animation the renderer plays between two frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Fade,
    SlideLeft,
    SlideRight,
    SlideUp,
    SlideDown,
    Blinds,
}

impl TransitionKind {
    const SLIDES: &'static [Self] = &[
        Self::SlideLeft,
        Self::SlideRight,
        Self::SlideUp,
        Self::SlideDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fade => "fade",
            Self::SlideLeft => "slide-left",
            Self::SlideRight => "slide-right",
            Self::SlideUp => "slide-up",
            Self::SlideDown => "slide-down",
            Self::Blinds => "blinds",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured transition choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSelection {
    /// Frames are swapped without animation.
    Off,
    Fixed(TransitionKind),
    /// A slide in a random direction, drawn per transition.
    RandomSlide,
}

impl TransitionSelection {
    pub const NAMES: &'static [&'static str] = &[
        "none",
        "fade",
        "slide-left",
        "slide-right",
        "slide-up",
        "slide-down",
        "slide-random",
        "blinds",
    ];

    /// Parse `raw`, falling back to `fade` for unrecognized names.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|err: UnknownTransition| {
            warn!("{err}; falling back to fade");
            Self::Fixed(TransitionKind::Fade)
        })
    }

    /// Concrete kind for the next transition; `None` means a cut.
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<TransitionKind> {
        match self {
            Self::Off => None,
            Self::Fixed(kind) => Some(*kind),
            Self::RandomSlide => TransitionKind::SLIDES.choose(rng).copied(),
        }
    }
}

impl Default for TransitionSelection {
    fn default() -> Self {
        Self::Fixed(TransitionKind::Fade)
    }
}

impl fmt::Display for TransitionSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("none"),
            Self::Fixed(kind) => kind.fmt(f),
            Self::RandomSlide => f.write_str("slide-random"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transition `{0}` (expected one of: {names})", names = TransitionSelection::NAMES.join(", "))]
pub struct UnknownTransition(pub String);

impl FromStr for TransitionSelection {
    type Err = UnknownTransition;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        let selection = match normalized.as_str() {
            "none" => Self::Off,
            "fade" => Self::Fixed(TransitionKind::Fade),
            "slide-left" => Self::Fixed(TransitionKind::SlideLeft),
            "slide-right" => Self::Fixed(TransitionKind::SlideRight),
            "slide-up" => Self::Fixed(TransitionKind::SlideUp),
            "slide-down" => Self::Fixed(TransitionKind::SlideDown),
            "slide-random" => Self::RandomSlide,
            "blinds" => Self::Fixed(TransitionKind::Blinds),
            _ => return Err(UnknownTransition(raw.to_string())),
        };
        Ok(selection)
    }
}

impl<'de> Deserialize<'de> for TransitionSelection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&raw))
    }
}
