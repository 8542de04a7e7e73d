use crate::script::{Script, SourceSpec, Step};
use anyhow::{bail, Context};
use ripplecut_core::editing::{EditResult, EditingContext};
use ripplecut_core::history::{History, SplitCommand};
use ripplecut_core::keyframes::{Interpolation, ALPHA_PROPERTY};
use ripplecut_core::settings::EditorSettings;
use ripplecut_core::types::*;
use ripplecut_core::Timeline;
use ripplecut_mixer::{PixelFormat, SmartMixer};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

/// A timeline with its undo history and an attached mixer.
pub struct Session {
    pub timeline: Timeline,
    pub history: History,
    pub mixer: Rc<RefCell<SmartMixer>>,
    settings: EditorSettings,
    /// Clips in creation order; script indices point here.
    clips: Vec<ClipId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub duration: f64,
    pub clips: Vec<ClipReport>,
    pub transitions: Vec<TransitionReport>,
    pub lanes: Vec<LaneReport>,
    pub can_undo: bool,
    pub can_redo: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClipReport {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub in_point: f64,
    pub priority: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    pub track: TrackId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaneReport {
    pub track: TrackId,
    pub format: Option<PixelFormat>,
    pub generation: u64,
    pub pads: usize,
}

impl Session {
    pub fn new(settings: EditorSettings) -> Self {
        let mut timeline = Timeline::new();
        timeline.set_snap_distance(settings.snap_distance);
        let mixer = Rc::new(RefCell::new(SmartMixer::new()));
        timeline.set_sink(Box::new(mixer.clone()));
        Self {
            timeline,
            history: History::new(settings.history_limit),
            mixer,
            settings,
            clips: Vec::new(),
        }
    }

    /// Lay out the script's tracks and sources.
    pub fn build(script: &Script, settings: EditorSettings) -> anyhow::Result<Self> {
        let mut session = Self::new(settings);
        for kind in &script.tracks {
            let stream = match kind {
                StreamKind::Video => Stream::video(),
                StreamKind::Audio => Stream::audio(),
            };
            session.timeline.add_track(stream);
        }
        for spec in &script.sources {
            session
                .place(spec)
                .with_context(|| format!("failed to place source {}", spec.name))?;
        }
        Ok(session)
    }

    fn place(&mut self, spec: &SourceSpec) -> anyhow::Result<()> {
        let streams = spec
            .streams
            .iter()
            .map(|kind| match kind {
                StreamKind::Video => Stream::video(),
                StreamKind::Audio => Stream::audio(),
            })
            .collect();
        let source = Source::new(&spec.name, TimeNs::from_seconds(spec.duration), streams);
        let clip = self
            .timeline
            .add_source(&source, TimeNs::from_seconds(spec.start))?;
        if let Some(length) = spec.length {
            self.timeline
                .set_clip_duration(clip, TimeNs::from_seconds(length))?;
        }
        self.clips.push(clip);
        Ok(())
    }

    pub fn clip(&self, index: usize) -> anyhow::Result<ClipId> {
        match self.clips.get(index) {
            Some(clip) if self.timeline.clip(*clip).is_some() => Ok(*clip),
            Some(_) => bail!("clip {index} no longer exists"),
            None => bail!("no clip with index {index}"),
        }
    }

    fn clip_ids(&self, indices: &[usize]) -> anyhow::Result<Vec<ClipId>> {
        indices.iter().map(|i| self.clip(*i)).collect()
    }

    pub fn apply(&mut self, step: &Step) -> anyhow::Result<()> {
        match step {
            Step::Move {
                clip,
                to,
                via,
                priority,
                mode,
                other,
            } => {
                let priority = priority.map(i64::from);
                self.drag(Edge::None, *clip, via, *to, priority, *mode, other)?;
            }
            Step::TrimStart {
                clip,
                to,
                via,
                mode,
                other,
            } => {
                self.drag(Edge::Start, *clip, via, *to, None, *mode, other)?;
            }
            Step::TrimEnd {
                clip,
                to,
                via,
                mode,
                other,
            } => {
                self.drag(Edge::End, *clip, via, *to, None, *mode, other)?;
            }
            Step::Split { at, clips } => {
                let selection = clips.as_deref().map(|c| self.clip_ids(c)).transpose()?;
                let command = SplitCommand::new(TimeNs::from_seconds(*at), selection);
                self.history.execute(Box::new(command), &mut self.timeline)?;
            }
            Step::Link { clips } => {
                let ids = self.clip_ids(clips)?;
                self.timeline.link_clips(&ids)?;
            }
            Step::Keyframe {
                clip,
                time,
                value,
                step,
            } => {
                let clip = self.clip(*clip)?;
                let object = self
                    .timeline
                    .clip(clip)
                    .and_then(|c| {
                        c.objects().iter().copied().find(|o| {
                            self.timeline
                                .object(*o)
                                .is_some_and(|obj| obj.stream() == StreamKind::Video)
                        })
                    })
                    .with_context(|| format!("clip {clip} has no video object"))?;
                let mode = if *step {
                    Interpolation::Step
                } else {
                    Interpolation::Linear
                };
                self.timeline.set_keyframe(
                    object,
                    ALPHA_PROPERTY,
                    TimeNs::from_seconds(*time),
                    *value,
                    mode,
                )?;
            }
            Step::Undo => self.history.undo(&mut self.timeline)?,
            Step::Redo => self.history.redo(&mut self.timeline)?,
        }
        self.track_new_clips();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn drag(
        &mut self,
        edge: Edge,
        clip: usize,
        via: &[f64],
        to: f64,
        priority: Option<i64>,
        mode: EditMode,
        other: &[usize],
    ) -> anyhow::Result<EditResult> {
        let focus = self.clip(clip)?;
        let other = self.clip_ids(other)?;
        let mut ctx =
            EditingContext::new(&mut self.timeline, focus, edge, mode, &other, &self.settings)?;
        let priority = priority.unwrap_or_else(|| i64::from(ctx.old_priority()));

        let mut last = None;
        for position in via.iter().chain(std::iter::once(&to)) {
            match ctx.edit_to(&mut self.timeline, TimeNs::from_seconds(*position), priority) {
                Ok(result) => last = Some(result),
                Err(err) => {
                    self.timeline.rollback_transaction()?;
                    return Err(err.into());
                }
            }
        }
        let command = ctx.finish(&mut self.timeline)?;
        if !command.is_empty() {
            self.history.push(Box::new(command));
        }
        let result = last.context("drag produced no edit")?;
        debug!(
            clip = %focus,
            position = %result.position,
            truncated = result.truncated,
            "drag finished"
        );
        Ok(result)
    }

    fn track_new_clips(&mut self) {
        let mut fresh: Vec<ClipId> = self
            .timeline
            .clips()
            .map(|c| c.id())
            .filter(|id| !self.clips.contains(id))
            .collect();
        fresh.sort();
        self.clips.extend(fresh);
    }

    pub fn run_script(&mut self, script: &Script) -> anyhow::Result<()> {
        for (index, step) in script.steps.iter().enumerate() {
            self.apply(step)
                .with_context(|| format!("step {index} failed"))?;
            info!(step = index, op = ?step, "step applied");
        }
        Ok(())
    }

    pub fn report(&self) -> Report {
        let clips = self
            .clips
            .iter()
            .enumerate()
            .filter_map(|(index, id)| {
                let clip = self.timeline.clip(*id)?;
                Some(ClipReport {
                    index,
                    start: clip.start().as_seconds(),
                    end: clip.end().as_seconds(),
                    in_point: clip.in_point().as_seconds(),
                    priority: clip.priority(),
                })
            })
            .collect();
        let transitions = self
            .timeline
            .tracks()
            .iter()
            .flat_map(|track| {
                track.transitions().into_iter().map(move |t| TransitionReport {
                    track: track.id(),
                    start: t.start.as_seconds(),
                    duration: t.duration.as_seconds(),
                })
            })
            .collect();
        let lanes = self
            .mixer
            .borrow()
            .lanes()
            .map(|(track, lane)| LaneReport {
                track,
                format: lane.format,
                generation: lane.generation,
                pads: lane.pads.len(),
            })
            .collect();
        Report {
            duration: self.timeline.duration().as_seconds(),
            clips,
            transitions,
            lanes,
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        }
    }
}
