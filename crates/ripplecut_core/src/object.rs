use crate::keyframes::{Interpolation, Interpolator, ALPHA_PROPERTY};
use crate::types::*;
use std::collections::BTreeMap;
use uuid::Uuid;

/// What a track object plays.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackObjectKind {
    /// Media from a [`Source`]; `max_duration` bounds trims.
    Source {
        source: Uuid,
        max_duration: Option<TimeNs>,
    },
    /// An effect stacked `lane_offset` lanes above its clip.
    Effect { name: String, lane_offset: u32 },
}

/// The atomic placed unit on a [`Track`](crate::track::Track).
#[derive(Debug, Clone, PartialEq)]
pub struct TrackObject {
    id: ObjectId,
    kind: TrackObjectKind,
    stream: StreamKind,
    start: TimeNs,
    duration: TimeNs,
    in_point: TimeNs,
    media_duration: TimeNs,
    priority: u32,
    pub(crate) track: Option<TrackId>,
    pub(crate) clip: Option<ClipId>,
    keyframes: BTreeMap<String, Interpolator>,
}

impl TrackObject {
    pub fn new(id: ObjectId, kind: TrackObjectKind, stream: StreamKind) -> Self {
        Self {
            id,
            kind,
            stream,
            start: TimeNs::ZERO,
            duration: TimeNs::ZERO,
            in_point: TimeNs::ZERO,
            media_duration: TimeNs::ZERO,
            priority: 0,
            track: None,
            clip: None,
            keyframes: BTreeMap::new(),
        }
    }

    /// An object playing the whole of `source` from the beginning.
    pub fn from_source(id: ObjectId, source: &Source, stream: StreamKind) -> Self {
        let mut obj = Self::new(
            id,
            TrackObjectKind::Source {
                source: source.id,
                max_duration: Some(source.duration),
            },
            stream,
        );
        obj.set_duration(source.duration);
        obj.set_media_duration(source.duration);
        obj
    }

    pub fn effect(id: ObjectId, name: impl Into<String>, stream: StreamKind, lane_offset: u32) -> Self {
        Self::new(
            id,
            TrackObjectKind::Effect {
                name: name.into(),
                lane_offset,
            },
            stream,
        )
    }

    /// Builder used when placing an object before it joins a track.
    pub fn with_timing(mut self, start: TimeNs, duration: TimeNs, in_point: TimeNs) -> Self {
        self.set_start(start);
        self.set_in_point(in_point);
        self.set_duration(duration);
        self.set_media_duration(duration);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> &TrackObjectKind {
        &self.kind
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub fn start(&self) -> TimeNs {
        self.start
    }

    pub fn duration(&self) -> TimeNs {
        self.duration
    }

    pub fn end(&self) -> TimeNs {
        self.start + self.duration
    }

    pub fn in_point(&self) -> TimeNs {
        self.in_point
    }

    pub fn media_duration(&self) -> TimeNs {
        self.media_duration
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn track(&self) -> Option<TrackId> {
        self.track
    }

    pub fn clip(&self) -> Option<ClipId> {
        self.clip
    }

    pub fn is_source(&self) -> bool {
        matches!(self.kind, TrackObjectKind::Source { .. })
    }

    /// Total media available to this object, `None` when unbounded.
    pub fn max_duration(&self) -> Option<TimeNs> {
        match &self.kind {
            TrackObjectKind::Source { max_duration, .. } => *max_duration,
            TrackObjectKind::Effect { .. } => None,
        }
    }

    pub fn lane_offset(&self) -> u32 {
        match &self.kind {
            TrackObjectKind::Source { .. } => 0,
            TrackObjectKind::Effect { lane_offset, .. } => *lane_offset,
        }
    }

    pub fn contains(&self, t: TimeNs) -> bool {
        self.start <= t && t < self.end()
    }

    pub fn overlaps(&self, other: &TrackObject) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    pub fn set_start(&mut self, start: TimeNs) -> TimeNs {
        self.start = start.max(TimeNs::ZERO);
        self.start
    }

    /// Clamped to `[0, max_duration - in_point]`.
    pub fn set_duration(&mut self, duration: TimeNs) -> TimeNs {
        self.duration = self.clamp_to_media(duration);
        self.duration
    }

    /// Clamped to `[0, max_duration]`.
    pub fn set_in_point(&mut self, in_point: TimeNs) -> TimeNs {
        let upper = self.max_duration().unwrap_or(TimeNs::INFINITY);
        self.in_point = in_point.clamp(TimeNs::ZERO, upper);
        self.in_point
    }

    /// Clamped to `[0, max_duration - in_point]`.
    pub fn set_media_duration(&mut self, media_duration: TimeNs) -> TimeNs {
        self.media_duration = self.clamp_to_media(media_duration);
        self.media_duration
    }

    pub fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    /// Mirror a clip's shared properties, offsetting effects by their lane.
    pub fn apply_clip_state(&mut self, state: &ClipState) {
        self.set_start(state.start);
        self.set_in_point(state.in_point);
        self.set_duration(state.duration);
        self.set_media_duration(state.media_duration);
        self.priority = state.priority + self.lane_offset();
    }

    pub fn clip_state(&self) -> ClipState {
        ClipState {
            start: self.start,
            duration: self.duration,
            in_point: self.in_point,
            media_duration: self.media_duration,
            priority: self.priority.saturating_sub(self.lane_offset()),
        }
    }

    pub fn interpolator(&self, property: &str) -> Option<&Interpolator> {
        self.keyframes.get(property)
    }

    pub fn interpolators(&self) -> impl Iterator<Item = (&str, &Interpolator)> {
        self.keyframes.iter().map(|(name, interp)| (name.as_str(), interp))
    }

    pub fn set_keyframe(&mut self, property: &str, time: TimeNs, value: f64, mode: Interpolation) {
        self.keyframes
            .entry(property.to_string())
            .or_default()
            .set_keyframe(time, value, mode);
    }

    pub fn remove_keyframe(&mut self, property: &str, time: TimeNs) -> bool {
        self.keyframes
            .get_mut(property)
            .and_then(|interp| interp.remove_keyframe(time))
            .is_some()
    }

    /// True while any alpha keyframe is below full opacity.
    pub fn needs_alpha(&self) -> bool {
        self.interpolator(ALPHA_PROPERTY)
            .is_some_and(|interp| interp.any_below(1.0))
    }

    /// Timeline-absolute times of every visible keyframe on every property.
    pub fn absolute_keyframe_times(&self) -> impl Iterator<Item = TimeNs> + '_ {
        let origin = self.start - self.in_point;
        let (start, end) = (self.start, self.end());
        self.keyframes
            .values()
            .flat_map(|interp| interp.keyframes())
            .map(move |kf| origin + kf.time)
            .filter(move |t| *t >= start && *t <= end)
    }

    /// Copy of this object for the right-hand side of a split at `at`.
    pub(crate) fn split_right(&self, id: ObjectId, at: TimeNs) -> TrackObject {
        let offset = at - self.start;
        let mut right = self.clone();
        right.id = id;
        right.track = None;
        right.clip = None;
        right.start = at;
        right.in_point = self.in_point + offset;
        right.duration = self.duration - offset;
        right.media_duration = (self.media_duration - offset).max(TimeNs::ZERO);
        right
    }

    fn clamp_to_media(&self, value: TimeNs) -> TimeNs {
        let upper = self
            .max_duration()
            .map_or(TimeNs::INFINITY, |max| (max - self.in_point).max(TimeNs::ZERO));
        value.clamp(TimeNs::ZERO, upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(duration_s: i64) -> Source {
        Source::new("clip.mp4", TimeNs::seconds(duration_s), vec![Stream::video()])
    }

    #[test]
    fn from_source_uses_full_media() {
        let obj = TrackObject::from_source(ObjectId(1), &source(10), StreamKind::Video);
        assert_eq!(obj.duration(), TimeNs::seconds(10));
        assert_eq!(obj.media_duration(), TimeNs::seconds(10));
        assert_eq!(obj.max_duration(), Some(TimeNs::seconds(10)));
        assert!(obj.track().is_none());
    }

    #[test]
    fn trims_clamp_to_media() {
        let mut obj = TrackObject::from_source(ObjectId(1), &source(10), StreamKind::Video);
        assert_eq!(obj.set_in_point(TimeNs::seconds(12)), TimeNs::seconds(10));
        assert_eq!(obj.set_in_point(TimeNs::seconds(4)), TimeNs::seconds(4));
        assert_eq!(obj.set_duration(TimeNs::seconds(9)), TimeNs::seconds(6));
        assert_eq!(obj.set_duration(TimeNs::seconds(-1)), TimeNs::ZERO);
        assert_eq!(obj.set_start(TimeNs::seconds(-3)), TimeNs::ZERO);
    }

    #[test]
    fn effects_are_unbounded() {
        let mut fx = TrackObject::effect(ObjectId(2), "blur", StreamKind::Video, 1);
        assert_eq!(fx.set_duration(TimeNs::seconds(100)), TimeNs::seconds(100));
        fx.apply_clip_state(&ClipState {
            priority: 3,
            ..ClipState::default()
        });
        assert_eq!(fx.priority(), 4);
        assert_eq!(fx.clip_state().priority, 3);
    }

    #[test]
    fn keyframe_projection_uses_in_point() {
        let mut obj = TrackObject::from_source(ObjectId(1), &source(10), StreamKind::Video)
            .with_timing(TimeNs::seconds(20), TimeNs::seconds(5), TimeNs::seconds(2));
        obj.set_keyframe(ALPHA_PROPERTY, TimeNs::seconds(3), 0.5, Interpolation::Linear);
        obj.set_keyframe(ALPHA_PROPERTY, TimeNs::seconds(9), 0.5, Interpolation::Linear);
        let times: Vec<_> = obj.absolute_keyframe_times().collect();
        // local 3s -> 20 - 2 + 3; local 9s falls past the visible end
        assert_eq!(times, vec![TimeNs::seconds(21)]);
        assert!(obj.needs_alpha());
    }

    #[test]
    fn split_right_takes_the_tail() {
        let obj = TrackObject::from_source(ObjectId(1), &source(10), StreamKind::Video)
            .with_timing(TimeNs::seconds(5), TimeNs::seconds(8), TimeNs::seconds(1));
        let right = obj.split_right(ObjectId(2), TimeNs::seconds(8));
        assert_eq!(obj.end(), TimeNs::seconds(13));
        assert_eq!(right.start(), TimeNs::seconds(8));
        assert_eq!(right.in_point(), TimeNs::seconds(4));
        assert_eq!(right.duration(), TimeNs::seconds(5));
    }
}
