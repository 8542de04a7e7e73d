use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TimeNs
// ---------------------------------------------------------------------------

/// Timeline time in nanoseconds.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct TimeNs(pub i64);

impl TimeNs {
    pub const ZERO: Self = Self(0);
    /// Duration of a gap with no right neighbor.
    pub const INFINITY: Self = Self(i64::MAX);
    pub const NS_PER_SECOND: i64 = 1_000_000_000;

    pub fn from_seconds(s: f64) -> Self {
        Self((s * Self::NS_PER_SECOND as f64) as i64)
    }

    pub const fn seconds(s: i64) -> Self {
        Self(s * Self::NS_PER_SECOND)
    }

    pub fn as_seconds(&self) -> f64 {
        self.0 as f64 / Self::NS_PER_SECOND as f64
    }

    pub fn is_infinite(&self) -> bool {
        *self == Self::INFINITY
    }

    pub fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }
}

impl Add for TimeNs {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for TimeNs {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign for TimeNs {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for TimeNs {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for TimeNs {
    type Output = Self;
    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl Mul<i64> for TimeNs {
    type Output = Self;
    fn mul(self, rhs: i64) -> Self {
        Self(self.0.saturating_mul(rhs))
    }
}

impl fmt::Display for TimeNs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            return write!(f, "inf");
        }
        let total_ns = self.0.unsigned_abs();
        let total_ms = total_ns / 1_000_000;
        let ms = total_ms % 1_000;
        let total_secs = total_ms / 1_000;
        let secs = total_secs % 60;
        let total_mins = total_secs / 60;
        let mins = total_mins % 60;
        let hours = total_mins / 60;
        if self.0 < 0 {
            write!(f, "-{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        } else {
            write!(f, "{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
        }
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackId(pub u64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

/// Handle of a timeline object (a logical clip).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClipId(pub u64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip#{}", self.0)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
}

/// A media kind plus an opaque capability descriptor passed through to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stream {
    pub kind: StreamKind,
    pub caps: String,
}

impl Stream {
    pub fn new(kind: StreamKind, caps: impl Into<String>) -> Self {
        Self {
            kind,
            caps: caps.into(),
        }
    }

    pub fn audio() -> Self {
        Self::new(StreamKind::Audio, "audio/x-raw")
    }

    pub fn video() -> Self {
        Self::new(StreamKind::Video, "video/x-raw")
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// A piece of source media that can be placed on the timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub duration: TimeNs,
    pub streams: Vec<Stream>,
}

impl Source {
    pub fn new(name: impl Into<String>, duration: TimeNs, streams: Vec<Stream>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            duration,
            streams,
        }
    }
}

// ---------------------------------------------------------------------------
// ClipState
// ---------------------------------------------------------------------------

/// The five properties a timeline object keeps synchronized across its track objects.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipState {
    pub start: TimeNs,
    pub duration: TimeNs,
    pub in_point: TimeNs,
    pub media_duration: TimeNs,
    pub priority: u32,
}

impl ClipState {
    pub fn end(&self) -> TimeNs {
        self.start + self.duration
    }
}

// ---------------------------------------------------------------------------
// Editing enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EditMode {
    #[default]
    Default,
    Ripple,
    Roll,
}

/// Which boundary of the focus is dragged. `None` moves the whole object.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    #[default]
    None,
    Start,
    End,
}

/// Lane restriction for previous/next neighbor queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityFilter {
    Same,
    Exact(u32),
    Any,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
