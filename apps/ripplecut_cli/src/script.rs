use anyhow::Context;
use ripplecut_core::types::{EditMode, StreamKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// An edit session described as JSON: the tracks and media to lay out, then
/// the edits to replay. Times are in seconds; clips are referred to by
/// their creation index (sources first, then split halves as they appear).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    #[serde(default = "default_tracks")]
    pub tracks: Vec<StreamKind>,
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub duration: f64,
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamKind>,
    #[serde(default)]
    pub start: f64,
    /// Shorten the clip after placing it.
    #[serde(default)]
    pub length: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Move {
        clip: usize,
        to: f64,
        /// Intermediate drag positions, applied before `to`.
        #[serde(default)]
        via: Vec<f64>,
        #[serde(default)]
        priority: Option<u32>,
        #[serde(default)]
        mode: EditMode,
        #[serde(default)]
        other: Vec<usize>,
    },
    TrimStart {
        clip: usize,
        to: f64,
        #[serde(default)]
        via: Vec<f64>,
        #[serde(default)]
        mode: EditMode,
        #[serde(default)]
        other: Vec<usize>,
    },
    TrimEnd {
        clip: usize,
        to: f64,
        #[serde(default)]
        via: Vec<f64>,
        #[serde(default)]
        mode: EditMode,
        #[serde(default)]
        other: Vec<usize>,
    },
    Split {
        at: f64,
        #[serde(default)]
        clips: Option<Vec<usize>>,
    },
    Link {
        clips: Vec<usize>,
    },
    Keyframe {
        clip: usize,
        time: f64,
        value: f64,
        #[serde(default)]
        step: bool,
    },
    Undo,
    Redo,
}

fn default_tracks() -> Vec<StreamKind> {
    vec![StreamKind::Video, StreamKind::Audio]
}

fn default_streams() -> Vec<StreamKind> {
    vec![StreamKind::Video]
}

impl Script {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid edit script")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        Self::from_json(&data)
    }
}
