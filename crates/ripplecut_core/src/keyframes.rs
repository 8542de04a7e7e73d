use crate::types::TimeNs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property whose curve decides whether an object needs an alpha channel.
pub const ALPHA_PROPERTY: &str = "alpha";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Linear,
    Step,
}

/// A control point. `time` is local to the source media, not the timeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Keyframe {
    pub time: TimeNs,
    pub value: f64,
    pub mode: Interpolation,
}

/// A keyframe curve for one animatable property of a track object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interpolator {
    default: f64,
    keyframes: BTreeMap<TimeNs, Keyframe>,
}

impl Interpolator {
    pub fn new(default: f64) -> Self {
        Self {
            default,
            keyframes: BTreeMap::new(),
        }
    }

    pub fn default_value(&self) -> f64 {
        self.default
    }

    /// Insert or replace the keyframe at `time`.
    pub fn set_keyframe(&mut self, time: TimeNs, value: f64, mode: Interpolation) {
        self.keyframes.insert(time, Keyframe { time, value, mode });
    }

    pub fn remove_keyframe(&mut self, time: TimeNs) -> Option<Keyframe> {
        self.keyframes.remove(&time)
    }

    pub fn keyframes(&self) -> impl Iterator<Item = &Keyframe> {
        self.keyframes.values()
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn any_below(&self, threshold: f64) -> bool {
        self.keyframes.values().any(|kf| kf.value < threshold)
    }

    /// Value of the curve at local time `t`.
    pub fn value_at(&self, t: TimeNs) -> f64 {
        let before = self.keyframes.range(..=t).next_back().map(|(_, kf)| kf);
        let after = self.keyframes.range(t..).next().map(|(_, kf)| kf);
        match (before, after) {
            (None, None) => self.default,
            (Some(kf), None) | (None, Some(kf)) => kf.value,
            (Some(a), Some(b)) => {
                if a.time == b.time || a.mode == Interpolation::Step {
                    return a.value;
                }
                let span = (b.time - a.time).0 as f64;
                let offset = (t - a.time).0 as f64;
                a.value + (b.value - a.value) * offset / span
            }
        }
    }
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new(1.0)
    }
}
