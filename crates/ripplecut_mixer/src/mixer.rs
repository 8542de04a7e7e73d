use crate::alpha::{AlphaCompositingPolicy, AlphaTransition};
use crate::error::{MixerError, Result};
use ripplecut_core::pipeline::{ObjectProperties, PadHandle, TrackObjectSink};
use ripplecut_core::types::{ObjectId, StreamKind, TrackId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, trace, warn};

/// Pixel format negotiated on a video lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    I420,
    /// Alpha-capable.
    Ayuv,
}

impl PixelFormat {
    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Ayuv)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::I420 => write!(f, "I420"),
            PixelFormat::Ayuv => write!(f, "AYUV"),
        }
    }
}

/// One input of a lane's mixing element.
#[derive(Debug, Clone, Serialize)]
pub struct MixerPad {
    pub object: ObjectId,
    pub zorder: u32,
    pub blocked: bool,
    /// Graph generation this pad is linked into.
    pub generation: u64,
}

/// The mixing element graph of one track.
#[derive(Debug, Clone, Serialize)]
pub struct Lane {
    pub stream: StreamKind,
    /// `None` for audio lanes.
    pub format: Option<PixelFormat>,
    pub generation: u64,
    pub pads: BTreeMap<PadHandle, MixerPad>,
    #[serde(skip)]
    policy: AlphaCompositingPolicy,
}

impl Lane {
    fn new(stream: StreamKind) -> Self {
        let format = match stream {
            StreamKind::Video => Some(PixelFormat::I420),
            StreamKind::Audio => None,
        };
        Self {
            stream,
            format,
            generation: 0,
            pads: BTreeMap::new(),
            policy: AlphaCompositingPolicy::new(),
        }
    }

    pub fn alpha_count(&self) -> usize {
        self.policy.alpha_count()
    }
}

/// Pipeline side of the timeline: one mixing lane per track. Video lanes
/// switch between I420 and AYUV as their alpha requirement comes and goes.
#[derive(Debug, Default)]
pub struct SmartMixer {
    lanes: BTreeMap<TrackId, Lane>,
    pad_lanes: BTreeMap<PadHandle, TrackId>,
    properties: BTreeMap<ObjectId, ObjectProperties>,
    next_pad: u64,
}

impl SmartMixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lane(&self, track: TrackId) -> Result<&Lane> {
        self.lanes.get(&track).ok_or(MixerError::UnknownLane(track))
    }

    pub fn lanes(&self) -> impl Iterator<Item = (TrackId, &Lane)> {
        self.lanes.iter().map(|(id, lane)| (*id, lane))
    }

    pub fn pad(&self, pad: PadHandle) -> Result<&MixerPad> {
        self.pad_lanes
            .get(&pad)
            .and_then(|track| self.lanes.get(track))
            .and_then(|lane| lane.pads.get(&pad))
            .ok_or(MixerError::UnknownPad(pad))
    }

    /// Last properties pushed for `object`.
    pub fn properties(&self, object: ObjectId) -> Option<ObjectProperties> {
        self.properties.get(&object).copied()
    }

    pub fn format(&self, track: TrackId) -> Result<PixelFormat> {
        self.lane(track)?
            .format
            .ok_or(MixerError::NotVideoLane(track))
    }

    /// Rebuild a video lane's graph in `format`. Every pad is blocked before
    /// the swap and relinked with its z-order afterwards, so no buffer
    /// crosses the graph while it is half built.
    pub fn rebuild(&mut self, track: TrackId, format: PixelFormat) -> Result<()> {
        let lane = self
            .lanes
            .get_mut(&track)
            .ok_or(MixerError::UnknownLane(track))?;
        if lane.format.is_none() {
            warn!(track = %track, "rebuild rejected: audio lane");
            return Err(MixerError::NotVideoLane(track));
        }

        for pad in lane.pads.values_mut() {
            pad.blocked = true;
        }
        trace!(track = %track, pads = lane.pads.len(), "lane blocked and flushed");

        lane.generation += 1;
        lane.format = Some(format);
        let generation = lane.generation;
        for (handle, pad) in lane.pads.iter_mut() {
            pad.generation = generation;
            trace!(pad = %handle, zorder = pad.zorder, "pad relinked");
        }

        for pad in lane.pads.values_mut() {
            pad.blocked = false;
        }
        info!(
            track = %track,
            format = %format,
            generation,
            pads = lane.pads.len(),
            "mixer graph rebuilt"
        );
        Ok(())
    }

    fn apply_alpha(&mut self, track: TrackId, change: Option<AlphaTransition>) {
        let format = match change {
            Some(AlphaTransition::Enabled) => PixelFormat::Ayuv,
            Some(AlphaTransition::Disabled) => PixelFormat::I420,
            None => return,
        };
        if let Err(err) = self.rebuild(track, format) {
            warn!(track = %track, error = %err, "alpha change not applied");
        }
    }

    fn video_policy(&mut self, track: TrackId) -> Option<&mut AlphaCompositingPolicy> {
        match self.lanes.get_mut(&track) {
            Some(lane) if lane.format.is_some() => Some(&mut lane.policy),
            Some(_) => None,
            None => {
                debug!(track = %track, "alpha report for a track without pads");
                None
            }
        }
    }
}

impl TrackObjectSink for SmartMixer {
    fn request_mixer_pad(
        &mut self,
        track: TrackId,
        object: ObjectId,
        stream: StreamKind,
        priority: u32,
    ) -> PadHandle {
        self.next_pad += 1;
        let handle = PadHandle(self.next_pad);
        let lane = self.lanes.entry(track).or_insert_with(|| Lane::new(stream));
        lane.pads.insert(
            handle,
            MixerPad {
                object,
                zorder: priority,
                blocked: false,
                generation: lane.generation,
            },
        );
        self.pad_lanes.insert(handle, track);
        debug!(track = %track, object = %object, pad = %handle, zorder = priority, "mixer pad requested");
        handle
    }

    fn release_mixer_pad(&mut self, pad: PadHandle) {
        let Some(track) = self.pad_lanes.remove(&pad) else {
            warn!(pad = %pad, "release of unknown mixer pad");
            return;
        };
        let Some(lane) = self.lanes.get_mut(&track) else {
            return;
        };
        let Some(released) = lane.pads.remove(&pad) else {
            return;
        };
        self.properties.remove(&released.object);
        let change = lane.policy.object_removed(released.object);
        debug!(track = %track, pad = %pad, "mixer pad released");
        self.apply_alpha(track, change);
    }

    fn set_pad_zorder(&mut self, pad: PadHandle, zorder: u32) {
        let entry = self
            .pad_lanes
            .get(&pad)
            .and_then(|track| self.lanes.get_mut(track))
            .and_then(|lane| lane.pads.get_mut(&pad));
        match entry {
            Some(entry) => entry.zorder = zorder,
            None => warn!(pad = %pad, "zorder for unknown mixer pad"),
        }
    }

    fn push_properties(&mut self, object: ObjectId, properties: ObjectProperties) {
        self.properties.insert(object, properties);
    }

    fn transition_activated(&mut self, track: TrackId, a: ObjectId, b: ObjectId) {
        let change = self
            .video_policy(track)
            .and_then(|policy| policy.transition_activated(a, b));
        self.apply_alpha(track, change);
    }

    fn transition_deactivated(&mut self, track: TrackId, a: ObjectId, b: ObjectId) {
        let change = self
            .video_policy(track)
            .and_then(|policy| policy.transition_deactivated(a, b));
        self.apply_alpha(track, change);
    }

    fn alpha_requirement_changed(&mut self, track: TrackId, object: ObjectId, required: bool) {
        let change = self
            .video_policy(track)
            .and_then(|policy| policy.set_object_alpha(object, required));
        self.apply_alpha(track, change);
    }
}
