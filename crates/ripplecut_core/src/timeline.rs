use crate::clip::{Link, TimelineObject};
use crate::edges::TimelineEdgeIndex;
use crate::error::{CoreError, Result};
use crate::events::{EventBus, EventKind, SubscriptionId, TimelineEvent};
use crate::history::{ClipChange, EditCommand, Transaction};
use crate::keyframes::Interpolation;
use crate::object::{TrackObject, TrackObjectKind};
use crate::pipeline::{ObjectProperties, PadHandle, TrackObjectSink};
use crate::track::Track;
use crate::types::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Root of the arrangement: tracks, clips, links and the bookkeeping that
/// connects them to subscribers and the media pipeline.
pub struct Timeline {
    pub(crate) tracks: Vec<Track>,
    pub(crate) clips: BTreeMap<ClipId, TimelineObject>,
    links: BTreeMap<LinkId, Link>,
    locations: HashMap<ObjectId, TrackId>,
    edges: TimelineEdgeIndex,
    events: EventBus,
    outbox: Vec<TimelineEvent>,
    sink: Option<Box<dyn TrackObjectSink>>,
    pads: HashMap<ObjectId, PadHandle>,
    alpha_required: HashSet<ObjectId>,
    pending_zorder: BTreeSet<ObjectId>,
    transaction: Option<Transaction>,
    updates_enabled: bool,
    next_id: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            clips: BTreeMap::new(),
            links: BTreeMap::new(),
            locations: HashMap::new(),
            edges: TimelineEdgeIndex::default(),
            events: EventBus::new(),
            outbox: Vec::new(),
            sink: None,
            pads: HashMap::new(),
            alpha_required: HashSet::new(),
            pending_zorder: BTreeSet::new(),
            transaction: None,
            updates_enabled: true,
            next_id: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    pub fn clip(&self, id: ClipId) -> Option<&TimelineObject> {
        self.clips.get(&id)
    }

    /// Clips in id (insertion) order.
    pub fn clips(&self) -> impl Iterator<Item = &TimelineObject> {
        self.clips.values()
    }

    pub fn object(&self, id: ObjectId) -> Option<&TrackObject> {
        find_object(&self.tracks, &self.locations, id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// The clip itself plus every clip sharing its link.
    pub fn linked_clips(&self, clip: ClipId) -> Vec<ClipId> {
        match self
            .clips
            .get(&clip)
            .and_then(|c| c.link())
            .and_then(|l| self.links.get(&l))
        {
            Some(link) => link.members().collect(),
            None => vec![clip],
        }
    }

    pub fn edges(&self) -> &TimelineEdgeIndex {
        &self.edges
    }

    pub fn set_snap_distance(&mut self, deadband: TimeNs) {
        self.edges.set_deadband(deadband);
    }

    /// End of the last clip.
    pub fn duration(&self) -> TimeNs {
        self.clips
            .values()
            .map(|c| c.end())
            .max()
            .unwrap_or(TimeNs::ZERO)
    }

    pub fn pad(&self, object: ObjectId) -> Option<PadHandle> {
        self.pads.get(&object).copied()
    }

    // -----------------------------------------------------------------------
    // Subscribers and pipeline
    // -----------------------------------------------------------------------

    pub fn subscribe(&mut self, callback: impl FnMut(&TimelineEvent) + 'static) -> SubscriptionId {
        self.events.subscribe(callback)
    }

    pub fn subscribe_kinds(
        &mut self,
        kinds: &[EventKind],
        callback: impl FnMut(&TimelineEvent) + 'static,
    ) -> SubscriptionId {
        self.events.subscribe_kinds(kinds, callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Attach the pipeline. Existing source objects get pads immediately.
    pub fn set_sink(&mut self, mut sink: Box<dyn TrackObjectSink>) {
        self.take_sink();
        for track in &self.tracks {
            for obj in track.objects().filter(|o| o.is_source()) {
                let pad = sink.request_mixer_pad(track.id(), obj.id(), obj.stream(), obj.priority());
                self.pads.insert(obj.id(), pad);
                if obj.needs_alpha() {
                    self.alpha_required.insert(obj.id());
                    sink.alpha_requirement_changed(track.id(), obj.id(), true);
                }
            }
            for transition in track.transitions() {
                sink.transition_activated(track.id(), transition.a, transition.b);
            }
        }
        self.sink = Some(sink);
    }

    /// Detach the pipeline, releasing every pad it handed out.
    pub fn take_sink(&mut self) -> Option<Box<dyn TrackObjectSink>> {
        let mut sink = self.sink.take()?;
        for track in &self.tracks {
            for transition in track.transitions() {
                sink.transition_deactivated(track.id(), transition.a, transition.b);
            }
            for obj in track.objects() {
                if self.alpha_required.remove(&obj.id()) {
                    sink.alpha_requirement_changed(track.id(), obj.id(), false);
                }
            }
        }
        for (_, pad) in self.pads.drain() {
            sink.release_mixer_pad(pad);
        }
        self.alpha_required.clear();
        self.pending_zorder.clear();
        Some(sink)
    }

    // -----------------------------------------------------------------------
    // Batching and event delivery
    // -----------------------------------------------------------------------

    /// Suspend transition maintenance and event delivery on every track.
    /// Re-enabling recomputes transitions once and delivers everything queued
    /// as a single dispatch.
    pub fn enable_update(&mut self, enabled: bool) {
        self.updates_enabled = enabled;
        for track in &mut self.tracks {
            track.enable_update(enabled);
        }
        self.flush();
    }

    pub fn updates_enabled(&self) -> bool {
        self.updates_enabled
    }

    fn collect_track_events(&mut self) {
        for track in &mut self.tracks {
            self.outbox.extend(track.drain_events());
        }
    }

    fn flush(&mut self) {
        if !self.updates_enabled {
            return;
        }
        self.collect_track_events();
        if self.outbox.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.outbox);
        trace!(count = events.len(), "dispatching timeline events");
        self.forward_to_sink(&events);
        self.events.dispatch(&events);
    }

    fn forward_to_sink(&mut self, events: &[TimelineEvent]) {
        let Self {
            sink,
            tracks,
            locations,
            pads,
            alpha_required,
            pending_zorder,
            transaction,
            ..
        } = self;
        let Some(sink) = sink.as_mut() else {
            return;
        };
        let (tracks, locations): (&[Track], &HashMap<ObjectId, TrackId>) = (tracks, locations);
        let lookup = |id: &ObjectId| find_object(tracks, locations, *id);

        for event in events {
            match event {
                TimelineEvent::ObjectAdded {
                    track,
                    object,
                    stream,
                    priority,
                } => {
                    let Some(obj) = lookup(object) else {
                        continue;
                    };
                    if obj.is_source() {
                        let pad = sink.request_mixer_pad(*track, *object, *stream, *priority);
                        pads.insert(*object, pad);
                    }
                    if obj.needs_alpha() && alpha_required.insert(*object) {
                        sink.alpha_requirement_changed(*track, *object, true);
                    }
                }
                TimelineEvent::ObjectRemoved { track, object } => {
                    if alpha_required.remove(object) {
                        sink.alpha_requirement_changed(*track, *object, false);
                    }
                    pending_zorder.remove(object);
                    if let Some(pad) = pads.remove(object) {
                        sink.release_mixer_pad(pad);
                    }
                }
                TimelineEvent::StartChanged { object, .. }
                | TimelineEvent::DurationChanged { object, .. }
                | TimelineEvent::InPointChanged { object, .. } => {
                    if let Some(obj) = lookup(object) {
                        sink.push_properties(*object, properties_of(obj));
                    }
                }
                TimelineEvent::PriorityChanged { object, new, .. } => {
                    if transaction.is_some() {
                        pending_zorder.insert(*object);
                    } else if let Some(pad) = pads.get(object) {
                        sink.set_pad_zorder(*pad, *new);
                    }
                }
                TimelineEvent::TransitionAdded { track, a, b } => {
                    sink.transition_activated(*track, *a, *b);
                }
                TimelineEvent::TransitionRemoved { track, a, b } => {
                    sink.transition_deactivated(*track, *a, *b);
                }
                TimelineEvent::KeyframesChanged { object, .. } => {
                    let Some(obj) = lookup(object) else {
                        continue;
                    };
                    let needed = obj.needs_alpha();
                    let changed = if needed {
                        alpha_required.insert(*object)
                    } else {
                        alpha_required.remove(object)
                    };
                    if changed {
                        if let Some(track) = obj.track() {
                            sink.alpha_requirement_changed(track, *object, needed);
                        }
                    }
                }
                TimelineEvent::TrackAdded { .. } | TimelineEvent::TrackRemoved { .. } => {}
            }
        }
    }

    /// Push the final z-order of every object whose priority changed while
    /// a transaction was open.
    fn resync_pads(&mut self) {
        let pending = std::mem::take(&mut self.pending_zorder);
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        for object in pending {
            let Some(pad) = self.pads.get(&object) else {
                continue;
            };
            if let Some(priority) = find_object(&self.tracks, &self.locations, object).map(|o| o.priority()) {
                sink.set_pad_zorder(*pad, priority);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    pub fn begin_transaction(&mut self, name: &str) -> Result<()> {
        if let Some(open) = &self.transaction {
            warn!(open = %open.name(), requested = name, "transaction rejected: one is already open");
            return Err(CoreError::TransactionInProgress(open.name().to_string()));
        }
        debug!(name, "transaction opened");
        self.transaction = Some(Transaction::new(name));
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn transaction_name(&self) -> Option<&str> {
        self.transaction.as_ref().map(|t| t.name())
    }

    /// Close the open transaction, returning the before/after state of every
    /// clip it touched.
    pub fn commit_transaction(&mut self) -> Result<EditCommand> {
        let transaction = self.transaction.take().ok_or(CoreError::NoTransaction)?;
        self.flush();
        let changes: Vec<ClipChange> = transaction
            .before()
            .iter()
            .filter_map(|(clip, before)| {
                let after = self.clips.get(clip)?.state();
                (after != *before).then_some(ClipChange {
                    clip: *clip,
                    before: *before,
                    after,
                })
            })
            .collect();
        self.resync_pads();
        debug!(name = %transaction.name(), changes = changes.len(), "transaction committed");
        Ok(EditCommand::new(transaction.name(), changes))
    }

    /// Close the open transaction, restoring every clip it touched.
    pub fn rollback_transaction(&mut self) -> Result<()> {
        let transaction = self.transaction.take().ok_or(CoreError::NoTransaction)?;
        let states: Vec<(ClipId, ClipState)> = transaction
            .before()
            .iter()
            .filter(|(clip, _)| self.clips.contains_key(clip))
            .map(|(clip, state)| (*clip, *state))
            .collect();
        self.apply_clip_states(&states)?;
        self.resync_pads();
        debug!(name = %transaction.name(), restored = states.len(), "transaction rolled back");
        Ok(())
    }

    /// Write several clip states as one batch.
    pub fn apply_clip_states(&mut self, states: &[(ClipId, ClipState)]) -> Result<()> {
        let was_enabled = self.updates_enabled;
        self.enable_update(false);
        let result = states
            .iter()
            .try_for_each(|(clip, state)| self.write_clip_state(*clip, *state).map(|_| ()));
        if was_enabled {
            self.enable_update(true);
        }
        result
    }

    /// Synchronize every track object of `clip` to `state`, returning the
    /// state actually applied after media clamping.
    pub(crate) fn write_clip_state(&mut self, clip: ClipId, state: ClipState) -> Result<ClipState> {
        let entry = self.clips.get(&clip).ok_or(CoreError::ClipNotFound(clip))?;
        let before = entry.state();
        let objects = entry.objects().to_vec();
        if let Some(transaction) = &mut self.transaction {
            transaction.capture(clip, before);
        }

        self.apply_to_objects(&objects, &state)?;
        let actual = objects
            .iter()
            .filter_map(|id| self.object(*id))
            .find(|o| o.is_source())
            .map(|o| o.clip_state())
            .unwrap_or(state);
        if actual != state {
            self.apply_to_objects(&objects, &actual)?;
        }
        if let Some(entry) = self.clips.get_mut(&clip) {
            entry.set_state(actual);
        }
        self.flush();
        Ok(actual)
    }

    fn apply_to_objects(&mut self, objects: &[ObjectId], state: &ClipState) -> Result<()> {
        for object in objects {
            let track_id = *self
                .locations
                .get(object)
                .ok_or(CoreError::ObjectNotFound(*object))?;
            let track = self
                .tracks
                .iter_mut()
                .find(|t| t.id() == track_id)
                .ok_or(CoreError::TrackNotFound(track_id))?;
            track.apply_clip_state(*object, state)?;
            if let Some(obj) = track.object(*object) {
                self.edges.add_track_object(obj);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tracks
    // -----------------------------------------------------------------------

    pub fn add_track(&mut self, stream: Stream) -> TrackId {
        let id = TrackId(self.alloc());
        let mut track = Track::new(id, stream);
        track.enable_update(self.updates_enabled);
        debug!(track = %id, kind = ?track.kind(), "track added");
        self.outbox.push(TimelineEvent::TrackAdded {
            track: id,
            stream: track.kind(),
        });
        self.tracks.push(track);
        self.flush();
        id
    }

    /// Remove a track and every object on it. Clips left without objects
    /// are removed too.
    pub fn remove_track(&mut self, id: TrackId) -> Result<()> {
        let index = self.track_index(id)?;
        let objects: Vec<ObjectId> = self.tracks[index].objects().map(|o| o.id()).collect();
        for object in objects {
            self.detach_object(object)?;
        }
        self.collect_track_events();
        self.tracks.remove(index);
        self.outbox.push(TimelineEvent::TrackRemoved { track: id });
        self.prune_empty_clips();
        debug!(track = %id, "track removed");
        self.flush();
        Ok(())
    }

    fn track_index(&self, id: TrackId) -> Result<usize> {
        self.tracks
            .iter()
            .position(|t| t.id() == id)
            .ok_or(CoreError::TrackNotFound(id))
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut Track> {
        let index = self.track_index(id)?;
        Ok(&mut self.tracks[index])
    }

    // -----------------------------------------------------------------------
    // Clips, sources and effects
    // -----------------------------------------------------------------------

    /// Place `source` at `start`: one track object per stream kind, each on
    /// the first track of that kind, at priority 0.
    pub fn add_source(&mut self, source: &Source, start: TimeNs) -> Result<ClipId> {
        let mut placements: Vec<(TrackId, StreamKind)> = Vec::new();
        for stream in &source.streams {
            if placements.iter().any(|(_, kind)| *kind == stream.kind) {
                continue;
            }
            if let Some(track) = self.tracks.iter().find(|t| t.kind() == stream.kind) {
                placements.push((track.id(), stream.kind));
            }
        }
        if placements.is_empty() {
            warn!(source = %source.name, "add rejected: no track for any stream");
            return Err(CoreError::NoTrackForSource(source.name.clone()));
        }

        let clip_id = ClipId(self.alloc());
        let mut clip = TimelineObject::new(clip_id);
        for (track, kind) in placements {
            let mut obj = TrackObject::from_source(ObjectId(self.alloc()), source, kind);
            obj.set_start(start);
            clip.add_track_object(&mut obj)?;
            self.insert_object(track, obj)?;
        }
        debug!(clip = %clip_id, source = %source.name, %start, "source placed");
        self.clips.insert(clip_id, clip);
        self.flush();
        Ok(clip_id)
    }

    pub fn remove_clip(&mut self, clip: ClipId) -> Result<()> {
        let entry = self.clips.get(&clip).ok_or(CoreError::ClipNotFound(clip))?;
        let objects = entry.objects().to_vec();
        for object in objects {
            self.detach_object(object)?;
        }
        self.drop_clip(clip);
        debug!(%clip, "clip removed");
        self.flush();
        Ok(())
    }

    /// Remove every clip playing `source`. Returns how many were removed.
    pub fn remove_source(&mut self, source: Uuid) -> Result<usize> {
        let doomed: Vec<ClipId> = self
            .clips
            .values()
            .filter(|clip| {
                clip.objects().iter().any(|id| {
                    self.object(*id).is_some_and(|o| {
                        matches!(o.kind(), TrackObjectKind::Source { source: s, .. } if *s == source)
                    })
                })
            })
            .map(|c| c.id())
            .collect();
        for clip in &doomed {
            self.remove_clip(*clip)?;
        }
        Ok(doomed.len())
    }

    /// Stack an effect on `clip`, one lane above the previous effect.
    pub fn add_effect(&mut self, clip: ClipId, name: &str, stream: StreamKind) -> Result<ObjectId> {
        let entry = self.clips.get(&clip).ok_or(CoreError::ClipNotFound(clip))?;
        let owned: Vec<&TrackObject> = entry.objects().iter().filter_map(|id| self.object(*id)).collect();
        let lane_offset = owned.iter().filter(|o| !o.is_source()).count() as u32 + 1;
        let track = owned
            .iter()
            .filter(|o| o.stream() == stream)
            .find_map(|o| o.track())
            .or_else(|| self.tracks.iter().find(|t| t.kind() == stream).map(|t| t.id()));
        let Some(track) = track else {
            warn!(%clip, effect = name, "effect rejected: no track for stream");
            return Err(CoreError::NoTrackForSource(name.to_string()));
        };

        let mut obj = TrackObject::effect(ObjectId(self.alloc()), name, stream, lane_offset);
        if let Some(entry) = self.clips.get_mut(&clip) {
            entry.add_track_object(&mut obj)?;
        }
        let id = self.insert_object(track, obj)?;
        debug!(%clip, object = %id, effect = name, lane_offset, "effect added");
        self.flush();
        Ok(id)
    }

    pub fn remove_effect(&mut self, object: ObjectId) -> Result<()> {
        match self.object(object) {
            Some(obj) if !obj.is_source() => {}
            _ => {
                warn!(%object, "remove rejected: not an effect");
                return Err(CoreError::ObjectNotFound(object));
            }
        }
        self.detach_object(object)?;
        self.prune_empty_clips();
        self.flush();
        Ok(())
    }

    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_object(&mut self, track: TrackId, obj: TrackObject) -> Result<ObjectId> {
        let index = self.track_index(track)?;
        let id = self.tracks[index].add_track_object(obj)?;
        if let Some(obj) = self.tracks[index].object(id) {
            self.edges.add_track_object(obj);
        }
        self.locations.insert(id, track);
        Ok(id)
    }

    /// Take an object off its track and out of its clip.
    fn detach_object(&mut self, object: ObjectId) -> Result<TrackObject> {
        let track = *self
            .locations
            .get(&object)
            .ok_or(CoreError::ObjectNotFound(object))?;
        let obj = self.track_mut(track)?.remove_track_object(object)?;
        self.locations.remove(&object);
        self.edges.remove_track_object(object);
        if let Some(clip) = obj.clip().and_then(|c| self.clips.get_mut(&c)) {
            clip.detach(object);
        }
        Ok(obj)
    }

    fn drop_clip(&mut self, clip: ClipId) {
        let Some(entry) = self.clips.remove(&clip) else {
            return;
        };
        if let Some(link_id) = entry.link() {
            if let Some(link) = self.links.get_mut(&link_id) {
                link.forget(clip);
                if link.is_empty() {
                    self.links.remove(&link_id);
                }
            }
        }
        if let Some(transaction) = &mut self.transaction {
            transaction.forget(clip);
        }
    }

    fn prune_empty_clips(&mut self) {
        let empty: Vec<ClipId> = self
            .clips
            .values()
            .filter(|c| c.is_empty())
            .map(|c| c.id())
            .collect();
        for clip in empty {
            self.drop_clip(clip);
        }
    }

    // -----------------------------------------------------------------------
    // Clip properties
    // -----------------------------------------------------------------------

    /// Move a clip and every clip linked to it by the same delta. The delta
    /// is reduced for the whole group so no member starts before zero.
    pub fn set_clip_start(&mut self, clip: ClipId, start: TimeNs) -> Result<TimeNs> {
        let current = self.clip_state(clip)?;
        let members = self.linked_clips(clip);
        let earliest = members
            .iter()
            .filter_map(|c| self.clips.get(c))
            .map(|c| c.start())
            .min()
            .unwrap_or(current.start);
        let delta = (start.max(TimeNs::ZERO) - current.start).max(-earliest);
        if delta == TimeNs::ZERO {
            return Ok(current.start);
        }

        let states: Vec<(ClipId, ClipState)> = members
            .iter()
            .filter_map(|c| self.clips.get(c))
            .map(|c| {
                let mut state = c.state();
                state.start += delta;
                (c.id(), state)
            })
            .collect();
        self.apply_clip_states(&states)?;
        Ok(self.clip_state(clip)?.start)
    }

    pub fn set_clip_duration(&mut self, clip: ClipId, duration: TimeNs) -> Result<TimeNs> {
        let mut state = self.clip_state(clip)?;
        state.duration = duration;
        self.write_clip_state(clip, state).map(|s| s.duration)
    }

    pub fn set_clip_in_point(&mut self, clip: ClipId, in_point: TimeNs) -> Result<TimeNs> {
        let mut state = self.clip_state(clip)?;
        state.in_point = in_point;
        self.write_clip_state(clip, state).map(|s| s.in_point)
    }

    pub fn set_clip_media_duration(&mut self, clip: ClipId, media_duration: TimeNs) -> Result<TimeNs> {
        let mut state = self.clip_state(clip)?;
        state.media_duration = media_duration;
        self.write_clip_state(clip, state).map(|s| s.media_duration)
    }

    pub fn set_clip_priority(&mut self, clip: ClipId, priority: u32) -> Result<u32> {
        let mut state = self.clip_state(clip)?;
        state.priority = priority;
        self.write_clip_state(clip, state).map(|s| s.priority)
    }

    fn clip_state(&self, clip: ClipId) -> Result<ClipState> {
        self.clips
            .get(&clip)
            .map(|c| c.state())
            .ok_or(CoreError::ClipNotFound(clip))
    }

    // -----------------------------------------------------------------------
    // Keyframes
    // -----------------------------------------------------------------------

    pub fn set_keyframe(
        &mut self,
        object: ObjectId,
        property: &str,
        time: TimeNs,
        value: f64,
        mode: Interpolation,
    ) -> Result<()> {
        let track = *self
            .locations
            .get(&object)
            .ok_or(CoreError::ObjectNotFound(object))?;
        self.track_mut(track)?
            .set_keyframe(object, property, time, value, mode)?;
        self.flush();
        Ok(())
    }

    pub fn remove_keyframe(&mut self, object: ObjectId, property: &str, time: TimeNs) -> Result<bool> {
        let track = *self
            .locations
            .get(&object)
            .ok_or(CoreError::ObjectNotFound(object))?;
        let removed = self.track_mut(track)?.remove_keyframe(object, property, time)?;
        self.flush();
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    /// Create a link holding `clips`. Fails without changes if any of them
    /// is already linked.
    pub fn link_clips(&mut self, clips: &[ClipId]) -> Result<LinkId> {
        for clip in clips {
            let entry = self.clips.get(clip).ok_or(CoreError::ClipNotFound(*clip))?;
            if let Some(link) = entry.link() {
                warn!(%clip, %link, "link rejected: already linked");
                return Err(CoreError::AlreadyLinked { clip: *clip, link });
            }
        }
        let id = LinkId(self.alloc());
        let mut link = Link::new(id);
        for clip in clips {
            if let Some(entry) = self.clips.get_mut(clip) {
                link.add_timeline_object(entry)?;
            }
        }
        debug!(link = %id, members = link.len(), "link created");
        self.links.insert(id, link);
        Ok(id)
    }

    pub fn add_to_link(&mut self, link: LinkId, clip: ClipId) -> Result<()> {
        let entry = self.clips.get_mut(&clip).ok_or(CoreError::ClipNotFound(clip))?;
        let target = self.links.get_mut(&link).ok_or(CoreError::LinkNotFound(link))?;
        target.add_timeline_object(entry)
    }

    /// Merge `other` into `into`; `other` ceases to exist.
    pub fn join_links(&mut self, into: LinkId, other: LinkId) -> Result<LinkId> {
        if into == other {
            return Ok(into);
        }
        if !self.links.contains_key(&into) {
            return Err(CoreError::LinkNotFound(into));
        }
        let absorbed = self.links.remove(&other).ok_or(CoreError::LinkNotFound(other))?;
        let Some(target) = self.links.get_mut(&into) else {
            return Err(CoreError::LinkNotFound(into));
        };
        for clip in target.join(absorbed) {
            if let Some(entry) = self.clips.get_mut(&clip) {
                entry.link = Some(into);
            }
        }
        debug!(link = %into, absorbed = %other, "links joined");
        Ok(into)
    }

    /// Take `clip` out of its link. Returns false when it was not linked.
    pub fn unlink(&mut self, clip: ClipId) -> Result<bool> {
        let entry = self.clips.get_mut(&clip).ok_or(CoreError::ClipNotFound(clip))?;
        let Some(link_id) = entry.link() else {
            return Ok(false);
        };
        let link = self
            .links
            .get_mut(&link_id)
            .ok_or(CoreError::LinkNotFound(link_id))?;
        link.remove_timeline_object(entry)?;
        if link.is_empty() {
            self.links.remove(&link_id);
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Split
    // -----------------------------------------------------------------------

    /// Split one clip at `at`. The original keeps the left part (only its
    /// duration changes); the returned clip holds the right part.
    pub fn split_clip(&mut self, clip: ClipId, at: TimeNs) -> Result<ClipId> {
        let entry = self.clips.get(&clip).ok_or(CoreError::ClipNotFound(clip))?;
        let objects = entry.objects().to_vec();
        let inside = !objects.is_empty()
            && objects.iter().all(|id| {
                self.object(*id)
                    .is_some_and(|o| o.start() < at && at < o.end())
            });
        if !inside {
            warn!(%clip, %at, "split rejected: time not strictly inside clip");
            return Err(CoreError::SplitOutsideClip { clip, at });
        }

        let new_clip = ClipId(self.alloc());
        let mut right_clip = TimelineObject::new(new_clip);
        for id in &objects {
            let (track, left) = match (self.locations.get(id), self.object(*id)) {
                (Some(track), Some(obj)) => (*track, obj.clone()),
                _ => return Err(CoreError::ObjectNotFound(*id)),
            };
            let mut right = left.split_right(ObjectId(self.alloc()), at);
            right_clip.add_track_object(&mut right)?;
            self.insert_object(track, right)?;

            let keep = at - left.start();
            let index = self.track_index(track)?;
            self.tracks[index].set_media_duration(*id, left.media_duration().min(keep))?;
            self.tracks[index].set_duration(*id, keep)?;
            if let Some(obj) = self.tracks[index].object(*id) {
                self.edges.add_track_object(obj);
            }
        }

        let left_state = objects
            .iter()
            .filter_map(|id| self.object(*id))
            .find(|o| o.is_source())
            .map(|o| o.clip_state());
        if let (Some(state), Some(entry)) = (left_state, self.clips.get_mut(&clip)) {
            entry.set_state(state);
        }
        debug!(%clip, right = %new_clip, %at, "clip split");
        self.clips.insert(new_clip, right_clip);
        self.flush();
        Ok(new_clip)
    }

    /// Split every clip (or every clip of `selection`) whose interval strictly
    /// contains `at`. Returns `(original, right part)` pairs. Splitting twice
    /// at the same time is a no-op the second time.
    pub fn split(&mut self, at: TimeNs, selection: Option<&[ClipId]>) -> Result<Vec<(ClipId, ClipId)>> {
        let targets: Vec<ClipId> = self
            .clips
            .values()
            .filter(|c| selection.map_or(true, |s| s.contains(&c.id())))
            .filter(|c| c.start() < at && at < c.end())
            .map(|c| c.id())
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let was_enabled = self.updates_enabled;
        self.enable_update(false);
        let result = targets
            .into_iter()
            .map(|clip| self.split_clip(clip, at).map(|right| (clip, right)))
            .collect();
        if was_enabled {
            self.enable_update(true);
        }
        result
    }
}

fn find_object<'a>(
    tracks: &'a [Track],
    locations: &HashMap<ObjectId, TrackId>,
    id: ObjectId,
) -> Option<&'a TrackObject> {
    let track = locations.get(&id)?;
    tracks.iter().find(|t| t.id() == *track)?.object(id)
}

fn properties_of(obj: &TrackObject) -> ObjectProperties {
    ObjectProperties {
        start: obj.start(),
        duration: obj.duration(),
        in_point: obj.in_point(),
        priority: obj.priority(),
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("tracks", &self.tracks.len())
            .field("clips", &self.clips.len())
            .field("links", &self.links.len())
            .field("transaction", &self.transaction_name())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn s(n: i64) -> TimeNs {
        TimeNs::seconds(n)
    }

    pub fn video_source(duration: i64) -> Source {
        Source::new("video.mp4", s(duration), vec![Stream::video()])
    }

    pub fn av_source(duration: i64) -> Source {
        Source::new("av.mp4", s(duration), vec![Stream::video(), Stream::audio()])
    }

    /// A one-track video timeline with clips placed at `(start, duration)`;
    /// every clip has 100s of media with in-point 0.
    pub fn video_timeline(clips: &[(i64, i64)]) -> (Timeline, Vec<ClipId>) {
        let mut tl = Timeline::new();
        tl.add_track(Stream::video());
        let ids = clips
            .iter()
            .map(|(start, duration)| place(&mut tl, *start, *duration))
            .collect();
        (tl, ids)
    }

    pub fn place(tl: &mut Timeline, start: i64, duration: i64) -> ClipId {
        let clip = tl.add_source(&video_source(100), s(start)).unwrap();
        tl.set_clip_duration(clip, s(duration)).unwrap();
        clip
    }

    pub fn first_object(tl: &Timeline, clip: ClipId) -> ObjectId {
        tl.clip(clip).unwrap().objects()[0]
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::keyframes::ALPHA_PROPERTY;
    use crate::pipeline::testing::RecordingSink;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(tl: &mut Timeline) -> Rc<RefCell<Vec<EventKind>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        tl.subscribe(move |e| sink.borrow_mut().push(e.kind()));
        seen
    }

    fn attach_sink(tl: &mut Timeline) -> Rc<RefCell<RecordingSink>> {
        let sink = Rc::new(RefCell::new(RecordingSink::default()));
        tl.set_sink(Box::new(sink.clone()));
        sink
    }

    // -----------------------------------------------------------------------
    // structure
    // -----------------------------------------------------------------------

    #[test]
    fn add_source_places_one_object_per_stream() {
        let mut tl = Timeline::new();
        let video = tl.add_track(Stream::video());
        let audio = tl.add_track(Stream::audio());
        let clip = tl.add_source(&av_source(10), s(5)).unwrap();

        let entry = tl.clip(clip).unwrap();
        assert_eq!(entry.objects().len(), 2);
        assert_eq!(entry.start(), s(5));
        assert_eq!(entry.duration(), s(10));
        assert_eq!(tl.track(video).unwrap().len(), 1);
        assert_eq!(tl.track(audio).unwrap().len(), 1);
    }

    #[test]
    fn add_source_without_matching_track_fails() {
        let mut tl = Timeline::new();
        tl.add_track(Stream::audio());
        let result = tl.add_source(&video_source(10), s(0));
        assert!(matches!(result, Err(CoreError::NoTrackForSource(_))));
        assert_eq!(tl.clips().count(), 0);
    }

    #[test]
    fn remove_clip_clears_everything() {
        let (mut tl, ids) = video_timeline(&[(0, 10), (8, 10)]);
        assert_eq!(tl.tracks()[0].transitions().len(), 1);
        tl.remove_clip(ids[0]).unwrap();
        assert!(tl.clip(ids[0]).is_none());
        assert!(tl.tracks()[0].transitions().is_empty());
        assert!(!tl.edges().contains_edge(s(0)));
        assert!(matches!(
            tl.remove_clip(ids[0]),
            Err(CoreError::ClipNotFound(_))
        ));
    }

    #[test]
    fn remove_source_removes_all_its_clips() {
        let mut tl = Timeline::new();
        tl.add_track(Stream::video());
        let source = video_source(10);
        tl.add_source(&source, s(0)).unwrap();
        tl.add_source(&source, s(20)).unwrap();
        let other = tl.add_source(&video_source(5), s(40)).unwrap();
        assert_eq!(tl.remove_source(source.id).unwrap(), 2);
        assert_eq!(tl.clips().map(|c| c.id()).collect::<Vec<_>>(), vec![other]);
    }

    #[test]
    fn remove_track_drops_orphaned_clips() {
        let mut tl = Timeline::new();
        let video = tl.add_track(Stream::video());
        tl.add_track(Stream::audio());
        let av = tl.add_source(&av_source(10), s(0)).unwrap();
        let v = tl.add_source(&video_source(10), s(20)).unwrap();
        let seen = recorder(&mut tl);

        tl.remove_track(video).unwrap();
        assert!(tl.clip(v).is_none());
        assert_eq!(tl.clip(av).unwrap().objects().len(), 1);
        assert_eq!(seen.borrow().last(), Some(&EventKind::TrackRemoved));
    }

    #[test]
    fn effects_stack_above_their_clip() {
        let (mut tl, ids) = video_timeline(&[(0, 10)]);
        let first = tl.add_effect(ids[0], "blur", StreamKind::Video).unwrap();
        let second = tl.add_effect(ids[0], "sharpen", StreamKind::Video).unwrap();
        assert_eq!(tl.object(first).unwrap().priority(), 1);
        assert_eq!(tl.object(second).unwrap().priority(), 2);

        tl.set_clip_priority(ids[0], 3).unwrap();
        assert_eq!(tl.object(second).unwrap().priority(), 5);

        tl.remove_effect(first).unwrap();
        assert!(tl.object(first).is_none());
        let source_object = first_object(&tl, ids[0]);
        assert!(matches!(
            tl.remove_effect(source_object),
            Err(CoreError::ObjectNotFound(_))
        ));
    }

    // -----------------------------------------------------------------------
    // clip properties and links
    // -----------------------------------------------------------------------

    #[test]
    fn clip_setters_keep_objects_synchronized() {
        let mut tl = Timeline::new();
        tl.add_track(Stream::video());
        tl.add_track(Stream::audio());
        let clip = tl.add_source(&av_source(10), s(0)).unwrap();

        tl.set_clip_start(clip, s(4)).unwrap();
        tl.set_clip_in_point(clip, s(2)).unwrap();
        // only 8s of media remain after the in-point
        assert_eq!(tl.set_clip_duration(clip, s(9)).unwrap(), s(8));
        for id in tl.clip(clip).unwrap().objects() {
            let obj = tl.object(*id).unwrap();
            assert_eq!(obj.start(), s(4));
            assert_eq!(obj.in_point(), s(2));
            assert_eq!(obj.duration(), s(8));
        }
    }

    #[test]
    fn linked_clips_move_rigidly() {
        let (mut tl, ids) = video_timeline(&[(10, 5), (30, 5), (50, 5)]);
        tl.link_clips(&[ids[0], ids[1]]).unwrap();

        assert_eq!(tl.set_clip_start(ids[1], s(25)).unwrap(), s(25));
        assert_eq!(tl.clip(ids[0]).unwrap().start(), s(5));
        assert_eq!(tl.clip(ids[2]).unwrap().start(), s(50));

        // the group can only travel until its earliest member hits zero
        assert_eq!(tl.set_clip_start(ids[1], s(0)).unwrap(), s(20));
        assert_eq!(tl.clip(ids[0]).unwrap().start(), s(0));
    }

    #[test]
    fn link_errors() {
        let (mut tl, ids) = video_timeline(&[(0, 5), (10, 5), (20, 5)]);
        let link = tl.link_clips(&[ids[0], ids[1]]).unwrap();
        assert!(matches!(
            tl.link_clips(&[ids[2], ids[1]]),
            Err(CoreError::AlreadyLinked { .. })
        ));
        assert_eq!(tl.clip(ids[2]).unwrap().link(), None);
        // re-adding a member of the same link changes nothing
        tl.add_to_link(link, ids[0]).unwrap();
        assert_eq!(tl.linked_clips(ids[0]).len(), 2);
        assert!(!tl.unlink(ids[2]).unwrap());
    }

    #[test]
    fn join_links_repoints_members() {
        let (mut tl, ids) = video_timeline(&[(0, 5), (10, 5), (20, 5), (30, 5)]);
        let a = tl.link_clips(&[ids[0], ids[1]]).unwrap();
        let b = tl.link_clips(&[ids[2], ids[3]]).unwrap();
        tl.join_links(a, b).unwrap();
        assert!(tl.link(b).is_none());
        assert_eq!(tl.clip(ids[3]).unwrap().link(), Some(a));
        assert_eq!(tl.linked_clips(ids[0]).len(), 4);

        assert!(tl.unlink(ids[3]).unwrap());
        assert_eq!(tl.linked_clips(ids[0]).len(), 3);
    }

    // -----------------------------------------------------------------------
    // split
    // -----------------------------------------------------------------------

    #[test]
    fn split_truncates_without_start_change() {
        let (mut tl, ids) = video_timeline(&[(10, 10)]);
        let seen = recorder(&mut tl);
        let right = tl.split_clip(ids[0], s(14)).unwrap();

        let left = tl.clip(ids[0]).unwrap();
        assert_eq!((left.start(), left.duration()), (s(10), s(4)));
        let right = tl.clip(right).unwrap();
        assert_eq!(right.start(), s(14));
        assert_eq!(right.in_point(), s(4));
        assert_eq!(right.duration(), s(6));

        let seen = seen.borrow();
        assert!(seen.contains(&EventKind::DurationChanged));
        assert!(!seen.contains(&EventKind::StartChanged));
        assert!(tl.tracks()[0].transitions().is_empty());
    }

    #[test]
    fn split_outside_clip_fails() {
        let (mut tl, ids) = video_timeline(&[(10, 10)]);
        for at in [s(10), s(20), s(25)] {
            assert!(matches!(
                tl.split_clip(ids[0], at),
                Err(CoreError::SplitOutsideClip { .. })
            ));
        }
    }

    #[test]
    fn split_twice_is_idempotent() {
        let (mut tl, _) = video_timeline(&[(0, 10), (5, 10), (30, 10)]);
        let first = tl.split(s(8), None).unwrap();
        assert_eq!(first.len(), 2);
        let count = tl.clips().count();
        assert!(tl.split(s(8), None).unwrap().is_empty());
        assert_eq!(tl.clips().count(), count);
    }

    #[test]
    fn split_respects_selection() {
        let (mut tl, ids) = video_timeline(&[(0, 10), (5, 10)]);
        let pairs = tl.split(s(8), Some(&[ids[1]])).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, ids[1]);
        assert_eq!(tl.clip(ids[0]).unwrap().duration(), s(10));
    }

    #[test]
    fn split_copies_keyframes() {
        let (mut tl, ids) = video_timeline(&[(0, 10)]);
        let object = first_object(&tl, ids[0]);
        tl.set_keyframe(object, ALPHA_PROPERTY, s(7), 0.5, Interpolation::Linear)
            .unwrap();
        let right = tl.split_clip(ids[0], s(5)).unwrap();
        let right_object = first_object(&tl, right);
        assert!(tl.object(right_object).unwrap().needs_alpha());
    }

    // -----------------------------------------------------------------------
    // events and pipeline
    // -----------------------------------------------------------------------

    #[test]
    fn batch_delivers_one_dispatch() {
        let (mut tl, ids) = video_timeline(&[(0, 10), (20, 10)]);
        let seen = recorder(&mut tl);
        tl.enable_update(false);
        tl.set_clip_start(ids[1], s(5)).unwrap();
        tl.set_clip_start(ids[1], s(6)).unwrap();
        assert!(seen.borrow().is_empty());
        tl.enable_update(true);
        assert_eq!(
            *seen.borrow(),
            vec![
                EventKind::StartChanged,
                EventKind::StartChanged,
                EventKind::TransitionAdded
            ]
        );
    }

    #[test]
    fn sink_receives_pads_and_properties() {
        let (mut tl, ids) = video_timeline(&[(0, 10)]);
        let sink = attach_sink(&mut tl);
        let object = first_object(&tl, ids[0]);
        assert!(tl.pad(object).is_some());

        tl.set_clip_start(ids[0], s(3)).unwrap();
        assert_eq!(sink.borrow().pushes.last().map(|(o, p)| (*o, p.start)), Some((object, s(3))));

        tl.set_clip_priority(ids[0], 2).unwrap();
        let pad = tl.pad(object).unwrap();
        assert_eq!(sink.borrow().zorder_calls, vec![(pad, 2)]);

        tl.remove_clip(ids[0]).unwrap();
        assert!(sink.borrow().pads.is_empty());
    }

    #[test]
    fn sink_sees_transitions() {
        let (mut tl, ids) = video_timeline(&[(0, 10), (20, 10)]);
        let sink = attach_sink(&mut tl);
        let (a, b) = (first_object(&tl, ids[0]), first_object(&tl, ids[1]));
        tl.set_clip_start(ids[1], s(8)).unwrap();
        tl.set_clip_start(ids[1], s(12)).unwrap();
        assert_eq!(sink.borrow().transitions, vec![(true, a, b), (false, a, b)]);
    }

    #[test]
    fn alpha_requirement_follows_keyframes() {
        let (mut tl, ids) = video_timeline(&[(0, 10)]);
        let sink = attach_sink(&mut tl);
        let object = first_object(&tl, ids[0]);

        tl.set_keyframe(object, ALPHA_PROPERTY, s(1), 0.5, Interpolation::Linear)
            .unwrap();
        tl.set_keyframe(object, ALPHA_PROPERTY, s(2), 0.2, Interpolation::Linear)
            .unwrap();
        tl.remove_keyframe(object, ALPHA_PROPERTY, s(1)).unwrap();
        tl.remove_keyframe(object, ALPHA_PROPERTY, s(2)).unwrap();
        assert_eq!(sink.borrow().alpha, vec![(object, true), (object, false)]);
    }

    #[test]
    fn removing_opaque_object_reports_no_alpha_change() {
        let (mut tl, ids) = video_timeline(&[(0, 10)]);
        let sink = attach_sink(&mut tl);
        let object = first_object(&tl, ids[0]);
        tl.set_keyframe(object, ALPHA_PROPERTY, s(1), 1.0, Interpolation::Linear)
            .unwrap();
        tl.remove_clip(ids[0]).unwrap();
        assert!(sink.borrow().alpha.is_empty());
    }

    // -----------------------------------------------------------------------
    // transactions
    // -----------------------------------------------------------------------

    #[test]
    fn rollback_restores_states() {
        let (mut tl, ids) = video_timeline(&[(0, 10), (20, 10)]);
        tl.begin_transaction("move object").unwrap();
        tl.set_clip_start(ids[0], s(40)).unwrap();
        tl.set_clip_duration(ids[1], s(2)).unwrap();
        tl.rollback_transaction().unwrap();
        assert_eq!(tl.clip(ids[0]).unwrap().start(), s(0));
        assert_eq!(tl.clip(ids[1]).unwrap().duration(), s(10));
        assert!(!tl.in_transaction());
    }

    #[test]
    fn commit_reports_changes_and_resyncs_pads() {
        let (mut tl, ids) = video_timeline(&[(0, 10), (20, 10)]);
        let sink = attach_sink(&mut tl);
        tl.begin_transaction("move object").unwrap();
        assert!(matches!(
            tl.begin_transaction("trim object"),
            Err(CoreError::TransactionInProgress(_))
        ));
        tl.set_clip_priority(ids[0], 1).unwrap();
        tl.set_clip_priority(ids[0], 2).unwrap();
        assert!(sink.borrow().zorder_calls.is_empty());

        let command = tl.commit_transaction().unwrap();
        assert_eq!(command.changes().len(), 1);
        assert_eq!(command.changes()[0].before.priority, 0);
        assert_eq!(command.changes()[0].after.priority, 2);
        let pad = tl.pad(first_object(&tl, ids[0])).unwrap();
        assert_eq!(sink.borrow().zorder_calls, vec![(pad, 2)]);
        assert!(matches!(tl.commit_transaction(), Err(CoreError::NoTransaction)));
    }
}
