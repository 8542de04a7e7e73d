use crate::error::{CoreError, Result};
use crate::events::TimelineEvent;
use crate::gap::{lane_gaps, Gap, Span};
use crate::keyframes::Interpolation;
use crate::object::{TrackObject, TrackObjectKind};
use crate::types::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{trace, warn};

/// Overlap region between two same-priority source objects of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// The object that starts first.
    pub a: ObjectId,
    pub b: ObjectId,
    pub start: TimeNs,
    pub duration: TimeNs,
    pub priority: u32,
}

/// A priority-laned collection of track objects sharing one stream.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    stream: Stream,
    objects: BTreeMap<ObjectId, TrackObject>,
    /// Unordered pairs, stored as (lower id, higher id).
    transitions: BTreeSet<(ObjectId, ObjectId)>,
    updates_enabled: bool,
    dirty: bool,
    outbox: Vec<TimelineEvent>,
}

impl Track {
    pub fn new(id: TrackId, stream: Stream) -> Self {
        Self {
            id,
            stream,
            objects: BTreeMap::new(),
            transitions: BTreeSet::new(),
            updates_enabled: true,
            dirty: false,
            outbox: Vec::new(),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn kind(&self) -> StreamKind {
        self.stream.kind
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn object(&self, id: ObjectId) -> Option<&TrackObject> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Objects in insertion order.
    pub fn objects(&self) -> impl Iterator<Item = &TrackObject> {
        self.objects.values()
    }

    /// Source objects of one lane, ordered by start.
    pub fn lane(&self, priority: u32) -> Vec<&TrackObject> {
        let mut lane: Vec<&TrackObject> = self
            .objects
            .values()
            .filter(|o| o.is_source() && o.priority() == priority)
            .collect();
        lane.sort_by_key(|o| (o.start(), o.id()));
        lane
    }

    /// The gap graph of one lane.
    pub fn gaps(&self, priority: u32) -> Vec<Gap> {
        let spans: Vec<Span> = self
            .lane(priority)
            .into_iter()
            .map(|o| Span::new(o.id(), o.start(), o.end()))
            .collect();
        lane_gaps(&spans)
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    pub fn add_track_object(&mut self, mut obj: TrackObject) -> Result<ObjectId> {
        if let Some(track) = obj.track() {
            warn!(object = %obj.id(), %track, "add rejected: object already in a track");
            return Err(CoreError::AlreadyInTrack {
                object: obj.id(),
                track,
            });
        }
        if obj.stream() != self.stream.kind {
            warn!(object = %obj.id(), track = %self.id, "add rejected: stream mismatch");
            return Err(CoreError::StreamMismatch {
                object: obj.id(),
                object_stream: obj.stream(),
                track: self.id,
                track_stream: self.stream.kind,
            });
        }

        let id = obj.id();
        obj.track = Some(self.id);
        self.outbox.push(TimelineEvent::ObjectAdded {
            track: self.id,
            object: id,
            stream: obj.stream(),
            priority: obj.priority(),
        });
        self.objects.insert(id, obj);
        self.invalidate();
        Ok(id)
    }

    pub fn remove_track_object(&mut self, id: ObjectId) -> Result<TrackObject> {
        let Some(mut obj) = self.objects.remove(&id) else {
            warn!(object = %id, track = %self.id, "remove rejected: object not in track");
            return Err(CoreError::NotInTrack {
                object: id,
                track: self.id,
            });
        };

        let stale: Vec<_> = self
            .transitions
            .iter()
            .copied()
            .filter(|(a, b)| *a == id || *b == id)
            .collect();
        for pair in stale {
            self.transitions.remove(&pair);
            self.outbox.push(TimelineEvent::TransitionRemoved {
                track: self.id,
                a: pair.0,
                b: pair.1,
            });
        }

        obj.track = None;
        self.outbox.push(TimelineEvent::ObjectRemoved {
            track: self.id,
            object: id,
        });
        self.invalidate();
        Ok(obj)
    }

    // -----------------------------------------------------------------------
    // Property changes
    // -----------------------------------------------------------------------

    pub fn set_start(&mut self, id: ObjectId, start: TimeNs) -> Result<TimeNs> {
        self.change(id, |o| {
            o.set_start(start);
        })
        .map(|o| o.start())
    }

    pub fn set_duration(&mut self, id: ObjectId, duration: TimeNs) -> Result<TimeNs> {
        self.change(id, |o| {
            o.set_duration(duration);
        })
        .map(|o| o.duration())
    }

    pub fn set_in_point(&mut self, id: ObjectId, in_point: TimeNs) -> Result<TimeNs> {
        self.change(id, |o| {
            o.set_in_point(in_point);
        })
        .map(|o| o.in_point())
    }

    pub fn set_media_duration(&mut self, id: ObjectId, media_duration: TimeNs) -> Result<TimeNs> {
        self.change(id, |o| {
            o.set_media_duration(media_duration);
        })
        .map(|o| o.media_duration())
    }

    pub fn set_priority(&mut self, id: ObjectId, priority: u32) -> Result<u32> {
        self.change(id, |o| o.set_priority(priority))
            .map(|o| o.priority())
    }

    /// Apply all synchronized clip properties at once.
    pub fn apply_clip_state(&mut self, id: ObjectId, state: &ClipState) -> Result<()> {
        self.change(id, |o| o.apply_clip_state(state)).map(|_| ())
    }

    pub fn set_keyframe(
        &mut self,
        id: ObjectId,
        property: &str,
        time: TimeNs,
        value: f64,
        mode: Interpolation,
    ) -> Result<()> {
        let obj = self.get_mut(id)?;
        obj.set_keyframe(property, time, value, mode);
        self.outbox.push(TimelineEvent::KeyframesChanged {
            object: id,
            property: property.to_string(),
        });
        Ok(())
    }

    pub fn remove_keyframe(&mut self, id: ObjectId, property: &str, time: TimeNs) -> Result<bool> {
        let removed = self.get_mut(id)?.remove_keyframe(property, time);
        if removed {
            self.outbox.push(TimelineEvent::KeyframesChanged {
                object: id,
                property: property.to_string(),
            });
        }
        Ok(removed)
    }

    fn get_mut(&mut self, id: ObjectId) -> Result<&mut TrackObject> {
        let track = self.id;
        self.objects
            .get_mut(&id)
            .ok_or(CoreError::NotInTrack { object: id, track })
    }

    fn change(&mut self, id: ObjectId, f: impl FnOnce(&mut TrackObject)) -> Result<&TrackObject> {
        let obj = self.get_mut(id)?;
        let before = (obj.start(), obj.duration(), obj.in_point(), obj.priority());
        f(obj);
        let after = (obj.start(), obj.duration(), obj.in_point(), obj.priority());

        if before.0 != after.0 {
            self.outbox.push(TimelineEvent::StartChanged {
                object: id,
                old: before.0,
                new: after.0,
            });
        }
        if before.1 != after.1 {
            self.outbox.push(TimelineEvent::DurationChanged {
                object: id,
                old: before.1,
                new: after.1,
            });
        }
        if before.2 != after.2 {
            self.outbox.push(TimelineEvent::InPointChanged {
                object: id,
                old: before.2,
                new: after.2,
            });
        }
        if before.3 != after.3 {
            self.outbox.push(TimelineEvent::PriorityChanged {
                object: id,
                old: before.3,
                new: after.3,
            });
        }
        if before != after {
            self.invalidate();
        }
        self.get_mut(id).map(|o| &*o)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Suspend transition maintenance for a batch of moves. Re-enabling runs
    /// the pending update once.
    pub fn enable_update(&mut self, enabled: bool) {
        self.updates_enabled = enabled;
        if enabled && self.dirty {
            self.update_transitions();
        }
    }

    pub fn updates_enabled(&self) -> bool {
        self.updates_enabled
    }

    pub fn has_transition(&self, a: ObjectId, b: ObjectId) -> bool {
        self.transitions.contains(&pair_key(a, b))
    }

    /// Current transitions with their geometry.
    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions
            .iter()
            .filter_map(|(x, y)| {
                let (x, y) = (self.objects.get(x)?, self.objects.get(y)?);
                let (a, b) = if (x.start(), x.id()) <= (y.start(), y.id()) {
                    (x, y)
                } else {
                    (y, x)
                };
                let start = b.start();
                Some(Transition {
                    a: a.id(),
                    b: b.id(),
                    start,
                    duration: a.end().min(b.end()) - start,
                    priority: a.priority(),
                })
            })
            .collect()
    }

    /// Bring the transition set in line with current overlaps.
    pub fn update_transitions(&mut self) {
        self.dirty = false;
        let desired = self.overlapping_pairs();

        let removed: Vec<_> = self.transitions.difference(&desired).copied().collect();
        let added: Vec<_> = desired.difference(&self.transitions).copied().collect();
        for (a, b) in removed {
            self.transitions.remove(&(a, b));
            self.outbox
                .push(TimelineEvent::TransitionRemoved { track: self.id, a, b });
        }
        for (a, b) in added {
            self.transitions.insert((a, b));
            self.outbox
                .push(TimelineEvent::TransitionAdded { track: self.id, a, b });
        }
        trace!(track = %self.id, transitions = self.transitions.len(), "transitions updated");
    }

    pub fn drain_events(&mut self) -> Vec<TimelineEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn invalidate(&mut self) {
        self.dirty = true;
        if self.updates_enabled {
            self.update_transitions();
        }
    }

    /// Sweep each lane in start order; a later object can only overlap an
    /// earlier one while it starts before that one ends.
    fn overlapping_pairs(&self) -> BTreeSet<(ObjectId, ObjectId)> {
        let mut lanes: BTreeMap<u32, Vec<&TrackObject>> = BTreeMap::new();
        for obj in self.objects.values() {
            let transitions_allowed = match obj.kind() {
                TrackObjectKind::Source { .. } => true,
                TrackObjectKind::Effect { .. } => false,
            };
            if transitions_allowed && obj.duration() > TimeNs::ZERO {
                lanes.entry(obj.priority()).or_default().push(obj);
            }
        }

        let mut pairs = BTreeSet::new();
        for lane in lanes.values_mut() {
            lane.sort_by_key(|o| (o.start(), o.id()));
            for (i, a) in lane.iter().enumerate() {
                for b in &lane[i + 1..] {
                    if b.start() >= a.end() {
                        break;
                    }
                    pairs.insert(pair_key(a.id(), b.id()));
                }
            }
        }
        pairs
    }
}

fn pair_key(a: ObjectId, b: ObjectId) -> (ObjectId, ObjectId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    fn s(n: i64) -> TimeNs {
        TimeNs::seconds(n)
    }

    fn video_track() -> Track {
        Track::new(TrackId(1), Stream::video())
    }

    fn clip(id: u64, start: i64, duration: i64) -> TrackObject {
        let source = Source::new("a.mp4", s(100), vec![Stream::video()]);
        TrackObject::from_source(ObjectId(id), &source, StreamKind::Video).with_timing(
            s(start),
            s(duration),
            TimeNs::ZERO,
        )
    }

    fn kinds(track: &mut Track) -> Vec<EventKind> {
        track.drain_events().iter().map(|e| e.kind()).collect()
    }

    // -----------------------------------------------------------------------
    // membership
    // -----------------------------------------------------------------------

    #[test]
    fn add_sets_track_and_emits() {
        let mut track = video_track();
        let id = track.add_track_object(clip(1, 0, 5)).unwrap();
        assert_eq!(track.object(id).unwrap().track(), Some(TrackId(1)));
        assert_eq!(kinds(&mut track), vec![EventKind::ObjectAdded]);
    }

    #[test]
    fn double_add_fails() {
        let mut track = video_track();
        let mut other = Track::new(TrackId(2), Stream::video());
        track.add_track_object(clip(1, 0, 5)).unwrap();
        let obj = track.object(ObjectId(1)).unwrap().clone();
        let result = other.add_track_object(obj);
        assert!(matches!(result, Err(CoreError::AlreadyInTrack { .. })));
    }

    #[test]
    fn stream_mismatch_fails() {
        let mut track = Track::new(TrackId(2), Stream::audio());
        let result = track.add_track_object(clip(1, 0, 5));
        assert!(matches!(result, Err(CoreError::StreamMismatch { .. })));
    }

    #[test]
    fn remove_clears_track() {
        let mut track = video_track();
        track.add_track_object(clip(1, 0, 5)).unwrap();
        let obj = track.remove_track_object(ObjectId(1)).unwrap();
        assert!(obj.track().is_none());
        assert!(track.is_empty());
        assert!(matches!(
            track.remove_track_object(ObjectId(1)),
            Err(CoreError::NotInTrack { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // transitions
    // -----------------------------------------------------------------------

    #[test]
    fn overlap_creates_transition() {
        let mut track = video_track();
        track.add_track_object(clip(1, 0, 10)).unwrap();
        track.add_track_object(clip(2, 8, 10)).unwrap();
        let transitions = track.transitions();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].a, ObjectId(1));
        assert_eq!(transitions[0].start, s(8));
        assert_eq!(transitions[0].duration, s(2));
    }

    #[test]
    fn adjacent_objects_have_no_transition() {
        let mut track = video_track();
        track.add_track_object(clip(1, 0, 10)).unwrap();
        track.add_track_object(clip(2, 10, 10)).unwrap();
        assert!(track.transitions().is_empty());
    }

    #[test]
    fn moving_apart_removes_transition() {
        let mut track = video_track();
        track.add_track_object(clip(1, 0, 10)).unwrap();
        track.add_track_object(clip(2, 8, 10)).unwrap();
        track.drain_events();

        track.set_start(ObjectId(2), s(12)).unwrap();
        assert!(!track.has_transition(ObjectId(1), ObjectId(2)));
        assert_eq!(
            kinds(&mut track),
            vec![EventKind::StartChanged, EventKind::TransitionRemoved]
        );
    }

    #[test]
    fn priority_divergence_removes_transition() {
        let mut track = video_track();
        track.add_track_object(clip(1, 0, 10)).unwrap();
        track.add_track_object(clip(2, 8, 10)).unwrap();
        track.set_priority(ObjectId(2), 1).unwrap();
        assert!(track.transitions().is_empty());
        track.set_priority(ObjectId(2), 0).unwrap();
        assert!(track.has_transition(ObjectId(2), ObjectId(1)));
    }

    #[test]
    fn removal_drops_transitions() {
        let mut track = video_track();
        track.add_track_object(clip(1, 0, 10)).unwrap();
        track.add_track_object(clip(2, 8, 10)).unwrap();
        track.drain_events();
        track.remove_track_object(ObjectId(1)).unwrap();
        assert_eq!(
            kinds(&mut track),
            vec![EventKind::TransitionRemoved, EventKind::ObjectRemoved]
        );
    }

    #[test]
    fn effects_never_form_transitions() {
        let mut track = video_track();
        track.add_track_object(clip(1, 0, 10)).unwrap();
        let fx = TrackObject::effect(ObjectId(2), "blur", StreamKind::Video, 0)
            .with_timing(s(2), s(5), TimeNs::ZERO);
        track.add_track_object(fx).unwrap();
        assert!(track.transitions().is_empty());
    }

    #[test]
    fn batch_defers_transition_update() {
        let mut track = video_track();
        track.add_track_object(clip(1, 0, 10)).unwrap();
        track.add_track_object(clip(2, 20, 10)).unwrap();

        track.enable_update(false);
        track.set_start(ObjectId(2), s(5)).unwrap();
        assert!(track.transitions().is_empty());
        track.enable_update(true);
        assert_eq!(track.transitions().len(), 1);
    }

    #[test]
    fn three_way_overlap_pairs() {
        let mut track = video_track();
        track.add_track_object(clip(1, 0, 10)).unwrap();
        track.add_track_object(clip(2, 5, 10)).unwrap();
        track.add_track_object(clip(3, 8, 10)).unwrap();
        assert_eq!(track.transitions().len(), 3);
    }

    // -----------------------------------------------------------------------
    // gaps and property changes
    // -----------------------------------------------------------------------

    #[test]
    fn gap_graph_lists_lane_gaps() {
        let mut track = video_track();
        track.add_track_object(clip(1, 2, 3)).unwrap();
        track.add_track_object(clip(2, 10, 3)).unwrap();
        let gaps = track.gaps(0);
        assert_eq!(gaps.len(), 3);
        assert_eq!(gaps[1].duration, s(5));
        assert!(track.gaps(1)[0].is_infinite());
    }

    #[test]
    fn unchanged_value_emits_nothing() {
        let mut track = video_track();
        track.add_track_object(clip(1, 2, 3)).unwrap();
        track.drain_events();
        track.set_start(ObjectId(1), s(2)).unwrap();
        assert!(track.drain_events().is_empty());
    }

    #[test]
    fn keyframe_change_emits() {
        let mut track = video_track();
        track.add_track_object(clip(1, 0, 3)).unwrap();
        track.drain_events();
        track
            .set_keyframe(ObjectId(1), "alpha", s(1), 0.5, Interpolation::Linear)
            .unwrap();
        assert!(track.remove_keyframe(ObjectId(1), "alpha", s(1)).unwrap());
        assert!(!track.remove_keyframe(ObjectId(1), "alpha", s(1)).unwrap());
        assert_eq!(
            kinds(&mut track),
            vec![EventKind::KeyframesChanged, EventKind::KeyframesChanged]
        );
    }
}
