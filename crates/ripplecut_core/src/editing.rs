use crate::edges::TimelineEdgeIndex;
use crate::error::{CoreError, Result};
use crate::gap::{Gap, Span};
use crate::history::EditCommand;
use crate::settings::EditorSettings;
use crate::timeline::Timeline;
use crate::types::*;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, trace};

/// What an `edit_to` call actually committed for the focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditResult {
    /// Focus start for moves and start trims, focus end for end trims.
    pub position: TimeNs,
    pub priority: u32,
    /// The request was clamped by a neighbor, the media, or time zero.
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Move,
    TrimStart,
    TrimEnd,
}

impl EditKind {
    pub fn for_edge(edge: Edge) -> Self {
        match edge {
            Edge::None => EditKind::Move,
            Edge::Start => EditKind::TrimStart,
            Edge::End => EditKind::TrimEnd,
        }
    }

    pub fn transaction_name(self) -> &'static str {
        match self {
            EditKind::Move => "move object",
            EditKind::TrimStart | EditKind::TrimEnd => "trim object",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Active,
    Finished,
}

/// Which edges of a clip travel with the edit delta.
#[derive(Debug, Clone, Copy)]
struct Motion {
    start: bool,
    end: bool,
}

const TRANSLATE: Motion = Motion {
    start: true,
    end: true,
};
const START_ONLY: Motion = Motion {
    start: true,
    end: false,
};
const END_ONLY: Motion = Motion {
    start: false,
    end: true,
};

/// Construction-time view of one clip.
#[derive(Debug, Clone)]
struct Entry {
    state: ClipState,
    /// Source object of this clip on each track it occupies.
    objects: BTreeMap<TrackId, ObjectId>,
    max_media: TimeNs,
}

/// Construction-time spans of each (track, priority) lane, sorted by start.
type Lanes = BTreeMap<(TrackId, u32), Vec<(ClipId, Span)>>;

/// Interactive edit of one focus clip, fed by a stream of `edit_to` calls.
///
/// Every call is computed from the snapshot taken at construction, never
/// from the previous call, so mode switches and repeated targets cannot
/// accumulate drift. Construction opens a transaction on the timeline;
/// [`finish`](Self::finish) commits it. An abandoned context is undone by
/// calling [`Timeline::rollback_transaction`].
#[derive(Debug)]
pub struct EditingContext {
    kind: EditKind,
    mode: EditMode,
    focus: ClipId,
    entries: BTreeMap<ClipId, Entry>,
    lanes: Lanes,
    /// Clips taking the full edit: the moved set, or the trimmed set.
    group: BTreeSet<ClipId>,
    /// Link partners of trimmed clips, translated with the start edge.
    partners: BTreeSet<ClipId>,
    /// Downstream clips shifted in ripple mode.
    ripple: BTreeSet<ClipId>,
    snap: TimelineEdgeIndex,
    old_position: TimeNs,
    old_priority: u32,
    last_target: Option<(TimeNs, i64)>,
    written: BTreeSet<ClipId>,
    state: ContextState,
}

impl EditingContext {
    pub fn new(
        timeline: &mut Timeline,
        focus: ClipId,
        edge: Edge,
        mode: EditMode,
        other: &[ClipId],
        settings: &EditorSettings,
    ) -> Result<Self> {
        let kind = EditKind::for_edge(edge);
        let focus_state = timeline
            .clip(focus)
            .map(|c| c.state())
            .ok_or(CoreError::ClipNotFound(focus))?;
        if let Some(missing) = other.iter().find(|c| timeline.clip(**c).is_none()) {
            return Err(CoreError::ClipNotFound(*missing));
        }

        let entries = snapshot(timeline);
        let mut selected: BTreeSet<ClipId> = other.iter().copied().collect();
        selected.insert(focus);
        let closed = link_closure(timeline, &selected);

        let (group, partners) = match kind {
            EditKind::Move => (closed, BTreeSet::new()),
            EditKind::TrimStart => {
                let partners = closed.difference(&selected).copied().collect();
                (selected, partners)
            }
            EditKind::TrimEnd => (selected, BTreeSet::new()),
        };
        let reference = match kind {
            EditKind::Move => group.iter().filter_map(|c| entries.get(c)).map(|e| e.state.start).min(),
            EditKind::TrimEnd => group.iter().filter_map(|c| entries.get(c)).map(|e| e.state.end()).min(),
            EditKind::TrimStart => None,
        };
        let ripple = match reference {
            Some(reference) => downstream(timeline, &entries, &group, reference),
            None => BTreeSet::new(),
        };

        timeline.begin_transaction(kind.transaction_name())?;

        let old_position = match kind {
            EditKind::TrimEnd => focus_state.end(),
            EditKind::Move | EditKind::TrimStart => focus_state.start,
        };
        let mut ctx = Self {
            kind,
            mode,
            focus,
            lanes: lane_index(&entries),
            entries,
            group,
            partners,
            ripple,
            snap: TimelineEdgeIndex::new(settings.snap_distance),
            old_position,
            old_priority: focus_state.priority,
            last_target: None,
            written: BTreeSet::new(),
            state: ContextState::Active,
        };
        ctx.rebuild_snap_index();
        debug!(
            focus = %focus,
            kind = ?kind,
            mode = ?mode,
            group = ctx.group.len(),
            ripple = ctx.ripple.len(),
            "editing context started"
        );
        Ok(ctx)
    }

    pub fn move_context(
        timeline: &mut Timeline,
        focus: ClipId,
        other: &[ClipId],
        mode: EditMode,
        settings: &EditorSettings,
    ) -> Result<Self> {
        Self::new(timeline, focus, Edge::None, mode, other, settings)
    }

    pub fn trim_start_context(
        timeline: &mut Timeline,
        focus: ClipId,
        other: &[ClipId],
        mode: EditMode,
        settings: &EditorSettings,
    ) -> Result<Self> {
        Self::new(timeline, focus, Edge::Start, mode, other, settings)
    }

    pub fn trim_end_context(
        timeline: &mut Timeline,
        focus: ClipId,
        other: &[ClipId],
        mode: EditMode,
        settings: &EditorSettings,
    ) -> Result<Self> {
        Self::new(timeline, focus, Edge::End, mode, other, settings)
    }

    pub fn kind(&self) -> EditKind {
        self.kind
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn focus(&self) -> ClipId {
        self.focus
    }

    pub fn old_position(&self) -> TimeNs {
        self.old_position
    }

    pub fn old_priority(&self) -> u32 {
        self.old_priority
    }

    pub fn is_finished(&self) -> bool {
        self.state == ContextState::Finished
    }

    /// Drag the focus to `position` (and, for moves, lane `priority`).
    /// Out-of-range requests are clamped; the only error is calling this
    /// after [`finish`](Self::finish).
    pub fn edit_to(&mut self, timeline: &mut Timeline, position: TimeNs, priority: i64) -> Result<EditResult> {
        self.ensure_active()?;
        self.last_target = Some((position, priority));
        self.apply(timeline, position, priority)
    }

    /// Switch mode and re-apply the last target under the new policy.
    pub fn set_mode(&mut self, timeline: &mut Timeline, mode: EditMode) -> Result<Option<EditResult>> {
        self.ensure_active()?;
        if mode == self.mode {
            return Ok(None);
        }
        debug!(focus = %self.focus, from = ?self.mode, to = ?mode, "edit mode switched");
        self.mode = mode;
        self.rebuild_snap_index();
        match self.last_target {
            Some((position, priority)) => self.apply(timeline, position, priority).map(Some),
            None => Ok(None),
        }
    }

    /// Commit the edit. The context cannot be used afterwards.
    pub fn finish(&mut self, timeline: &mut Timeline) -> Result<EditCommand> {
        self.ensure_active()?;
        self.state = ContextState::Finished;
        self.written.clear();
        let command = timeline.commit_transaction()?;
        debug!(focus = %self.focus, changes = command.changes().len(), "editing context finished");
        Ok(command)
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            ContextState::Active => Ok(()),
            ContextState::Finished => Err(CoreError::ContextFinished),
        }
    }

    fn apply(&mut self, timeline: &mut Timeline, position: TimeNs, priority: i64) -> Result<EditResult> {
        let (plan, result) = self.plan(position, priority);

        let restores = self
            .written
            .iter()
            .filter(|c| !plan.contains_key(*c))
            .filter_map(|c| self.entries.get(c).map(|e| (*c, e.state)));
        let writes: Vec<(ClipId, ClipState)> = restores
            .chain(plan.iter().map(|(c, s)| (*c, *s)))
            .filter(|(c, _)| timeline.clip(*c).is_some())
            .collect();
        timeline.apply_clip_states(&writes)?;
        self.written = plan.into_keys().collect();

        trace!(
            focus = %self.focus,
            requested = %position,
            position = %result.position,
            priority = result.priority,
            truncated = result.truncated,
            "edit applied"
        );
        Ok(result)
    }

    fn rebuild_snap_index(&mut self) {
        let mut index = TimelineEdgeIndex::new(self.snap.deadband());
        for (clip, entry) in &self.entries {
            if self.group.contains(clip) || self.partners.contains(clip) {
                continue;
            }
            if self.mode == EditMode::Ripple && self.ripple.contains(clip) {
                continue;
            }
            index.add_start_end(entry.state.start, entry.state.end());
        }
        self.snap = index;
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    fn entry_state(&self, clip: ClipId) -> ClipState {
        self.entries
            .get(&clip)
            .map(|e| e.state)
            .unwrap_or_default()
    }

    fn plan(&self, position: TimeNs, priority: i64) -> (BTreeMap<ClipId, ClipState>, EditResult) {
        let position = position.max(TimeNs::ZERO);
        match self.kind {
            EditKind::Move => self.plan_move(position, priority),
            EditKind::TrimStart => self.plan_trim_start(position),
            EditKind::TrimEnd => self.plan_trim_end(position),
        }
    }

    fn plan_move(&self, position: TimeNs, priority: i64) -> (BTreeMap<ClipId, ClipState>, EditResult) {
        let focus = self.entry_state(self.focus);
        let (snapped, _) = self.snap.snap_to_edge(position, Some(focus.duration));
        let wanted = snapped.max(TimeNs::ZERO) - focus.start;

        let earliest = self.min_over(&self.group, |s| s.start);
        let lowest = self
            .group
            .iter()
            .map(|c| i64::from(self.entry_state(*c).priority))
            .min()
            .unwrap_or(0);
        let wanted_dp = priority.max(0) - i64::from(focus.priority);
        let dp = wanted_dp.max(-lowest);

        let rippled: BTreeSet<ClipId> = if self.mode == EditMode::Ripple {
            self.ripple.clone()
        } else {
            BTreeSet::new()
        };
        let pinned: BTreeSet<ClipId> = self.group.union(&rippled).copied().collect();

        // A clip changing lane leaves its old neighbors behind and the bump
        // clears its new ones, but rippled clips stay in their lanes.
        let bounded = if dp == 0 { &pinned } else { &rippled };
        let movers: Vec<(ClipId, Motion)> = bounded.iter().map(|c| (*c, TRANSLATE)).collect();
        let (lo, hi) = self.gap_bounds(&movers, &pinned);
        let d = wanted.max(-earliest).max(lo).min(hi);

        let mut plan = BTreeMap::new();
        for clip in &self.group {
            let mut state = self.entry_state(*clip);
            state.start += d;
            state.priority = shift_priority(state.priority, dp);
            plan.insert(*clip, state);
        }
        for clip in &rippled {
            let mut state = self.entry_state(*clip);
            state.start += d;
            plan.insert(*clip, state);
        }
        if dp != 0 {
            self.bump_occupants(&mut plan, &pinned);
        }

        let result = EditResult {
            position: focus.start + d,
            priority: shift_priority(focus.priority, dp),
            truncated: d != wanted || dp != wanted_dp,
        };
        (plan, result)
    }

    fn plan_trim_start(&self, position: TimeNs) -> (BTreeMap<ClipId, ClipState>, EditResult) {
        let focus = self.entry_state(self.focus);
        let (snapped, _) = self.snap.snap_to_edge(position, None);
        let wanted = snapped.max(TimeNs::ZERO) - focus.start;

        let mut d = wanted;
        for clip in &self.group {
            let s = self.entry_state(*clip);
            d = d.max(-s.in_point).max(-s.start).min(s.duration);
        }
        for clip in &self.partners {
            d = d.max(-self.entry_state(*clip).start);
        }

        // Ripple and roll drag the right edge of the touching left neighbor.
        let followers = match self.mode {
            EditMode::Default => BTreeSet::new(),
            EditMode::Ripple | EditMode::Roll => self.adjacent(&self.group, Side::Left),
        };
        for clip in &followers {
            let s = self.entry_state(*clip);
            let room = self.max_media(*clip) - s.in_point - s.duration;
            d = d.max(-s.duration).min(room.max(TimeNs::ZERO));
        }

        let excluded: BTreeSet<ClipId> = self
            .group
            .iter()
            .chain(&self.partners)
            .chain(&followers)
            .copied()
            .collect();
        let movers: Vec<(ClipId, Motion)> = self
            .group
            .iter()
            .map(|c| (*c, START_ONLY))
            .chain(self.partners.iter().map(|c| (*c, TRANSLATE)))
            .collect();
        let (lo, hi) = self.gap_bounds(&movers, &excluded);
        d = d.max(lo).min(hi);

        let mut plan = BTreeMap::new();
        for clip in &self.group {
            let mut state = self.entry_state(*clip);
            state.start += d;
            state.in_point += d;
            state.duration -= d;
            state.media_duration = (state.media_duration - d).max(TimeNs::ZERO);
            plan.insert(*clip, state);
        }
        for clip in &self.partners {
            let mut state = self.entry_state(*clip);
            state.start += d;
            plan.insert(*clip, state);
        }
        for clip in &followers {
            let mut state = self.entry_state(*clip);
            state.duration += d;
            state.media_duration = (state.media_duration + d).max(TimeNs::ZERO);
            plan.insert(*clip, state);
        }

        let result = EditResult {
            position: focus.start + d,
            priority: focus.priority,
            truncated: d != wanted,
        };
        (plan, result)
    }

    fn plan_trim_end(&self, position: TimeNs) -> (BTreeMap<ClipId, ClipState>, EditResult) {
        let focus = self.entry_state(self.focus);
        let (snapped, _) = self.snap.snap_to_edge(position, None);
        let wanted = snapped.max(TimeNs::ZERO) - focus.end();

        let mut d = wanted;
        for clip in &self.group {
            let s = self.entry_state(*clip);
            let room = self.max_media(*clip) - s.in_point - s.duration;
            d = d.max(-s.duration).min(room.max(TimeNs::ZERO));
        }

        let (followers, rippled) = match self.mode {
            EditMode::Default => (BTreeSet::new(), BTreeSet::new()),
            EditMode::Ripple => (BTreeSet::new(), self.ripple.clone()),
            EditMode::Roll => (self.adjacent(&self.group, Side::Right), BTreeSet::new()),
        };
        for clip in &followers {
            let s = self.entry_state(*clip);
            d = d.max(-s.in_point).min(s.duration);
        }
        for clip in &rippled {
            d = d.max(-self.entry_state(*clip).start);
        }

        let excluded: BTreeSet<ClipId> = self
            .group
            .iter()
            .chain(&followers)
            .chain(&rippled)
            .copied()
            .collect();
        let movers: Vec<(ClipId, Motion)> = self
            .group
            .iter()
            .map(|c| (*c, END_ONLY))
            .chain(rippled.iter().map(|c| (*c, TRANSLATE)))
            .collect();
        let (lo, hi) = self.gap_bounds(&movers, &excluded);
        d = d.max(lo).min(hi);

        let mut plan = BTreeMap::new();
        for clip in &self.group {
            let mut state = self.entry_state(*clip);
            state.duration += d;
            state.media_duration = (state.media_duration + d).max(TimeNs::ZERO);
            plan.insert(*clip, state);
        }
        for clip in &followers {
            let mut state = self.entry_state(*clip);
            state.start += d;
            state.in_point += d;
            state.duration -= d;
            state.media_duration = (state.media_duration - d).max(TimeNs::ZERO);
            plan.insert(*clip, state);
        }
        for clip in &rippled {
            let mut state = self.entry_state(*clip);
            state.start += d;
            plan.insert(*clip, state);
        }

        let result = EditResult {
            position: focus.end() + d,
            priority: focus.priority,
            truncated: d != wanted,
        };
        (plan, result)
    }

    fn min_over(&self, clips: &BTreeSet<ClipId>, f: impl Fn(&ClipState) -> TimeNs) -> TimeNs {
        clips
            .iter()
            .filter_map(|c| self.entries.get(c))
            .map(|e| f(&e.state))
            .min()
            .unwrap_or(TimeNs::ZERO)
    }

    fn max_media(&self, clip: ClipId) -> TimeNs {
        self.entries
            .get(&clip)
            .map_or(TimeNs::INFINITY, |e| e.max_media)
    }

    // -----------------------------------------------------------------------
    // Lanes
    // -----------------------------------------------------------------------

    /// Range of deltas that keeps every moving edge inside the gaps around it.
    ///
    /// Each lane holding a mover is swept once in each direction, so the cost
    /// is linear in the lanes touched rather than in movers times clips.
    fn gap_bounds(&self, movers: &[(ClipId, Motion)], excluded: &BTreeSet<ClipId>) -> (TimeNs, TimeNs) {
        let motions: BTreeMap<ClipId, Motion> = movers.iter().copied().collect();
        let touched: BTreeSet<(TrackId, u32)> = movers
            .iter()
            .filter_map(|(clip, _)| self.entries.get(clip))
            .flat_map(|e| e.objects.keys().map(move |track| (*track, e.state.priority)))
            .collect();
        let fixed = |clip: &ClipId| !excluded.contains(clip) && !motions.contains_key(clip);

        let mut lo = -TimeNs::INFINITY;
        let mut hi = TimeNs::INFINITY;
        for lane in touched.iter().filter_map(|key| self.lanes.get(key)) {
            // Forward: the fixed span reaching furthest right among earlier starts.
            let mut left: Option<&Span> = None;
            for run in lane.chunk_by(|a, b| a.1.start == b.1.start) {
                for (clip, span) in run {
                    if motions.get(clip).is_some_and(|m| m.start) {
                        lo = lo.max(-Gap::left_of(span, left).room());
                    }
                }
                for (_, span) in run.iter().filter(|(clip, _)| fixed(clip)) {
                    if left.map_or(true, |l| span.end > l.end) {
                        left = Some(span);
                    }
                }
            }
            // Backward: the earliest fixed span starting at or after each mover.
            let mut right: Option<&Span> = None;
            for run in lane.chunk_by(|a, b| a.1.start == b.1.start).rev() {
                if let Some((_, span)) = run.iter().find(|(clip, _)| fixed(clip)) {
                    right = Some(span);
                }
                for (clip, span) in run {
                    if motions.get(clip).is_some_and(|m| m.end) {
                        hi = hi.min(Gap::right_of(span, right).room());
                    }
                }
            }
        }
        (lo, hi)
    }

    /// Clips outside `clips` that touch one of them on `side` in a shared lane.
    fn adjacent(&self, clips: &BTreeSet<ClipId>, side: Side) -> BTreeSet<ClipId> {
        let mut found = BTreeSet::new();
        for clip in clips {
            let Some(entry) = self.entries.get(clip) else {
                continue;
            };
            let (start, end) = (entry.state.start, entry.state.end());
            for track in entry.objects.keys() {
                let Some(lane) = self.lanes.get(&(*track, entry.state.priority)) else {
                    continue;
                };
                let touching = lane.iter().filter(|(other, span)| {
                    !clips.contains(other)
                        && match side {
                            Side::Left => span.end == start && span.start < start,
                            Side::Right => span.start == end && span.end > end,
                        }
                });
                found.extend(touching.map(|(other, _)| *other));
            }
        }
        found
    }

    /// Push clips overlapping a re-laned clip one lane up, cascading like a
    /// stable insertion so nothing is dropped.
    fn bump_occupants(&self, plan: &mut BTreeMap<ClipId, ClipState>, pinned: &BTreeSet<ClipId>) {
        let mut queue: VecDeque<ClipId> = self.group.iter().copied().collect();
        while let Some(clip) = queue.pop_front() {
            let Some(entry) = self.entries.get(&clip) else {
                continue;
            };
            let placed = plan.get(&clip).copied().unwrap_or(entry.state);
            let victims: Vec<ClipId> = self
                .entries
                .iter()
                .filter(|(other, _)| **other != clip && !pinned.contains(*other))
                .filter(|(_, e)| e.objects.keys().any(|t| entry.objects.contains_key(t)))
                .filter(|(other, e)| {
                    let state = plan.get(*other).copied().unwrap_or(e.state);
                    state.priority == placed.priority && overlaps(&state, &placed)
                })
                .map(|(other, _)| *other)
                .collect();
            for victim in victims {
                let state = plan.entry(victim).or_insert(self.entry_state(victim));
                state.priority += 1;
                queue.push_back(victim);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

fn overlaps(a: &ClipState, b: &ClipState) -> bool {
    a.start < b.end() && b.start < a.end()
}

fn shift_priority(priority: u32, dp: i64) -> u32 {
    u32::try_from((i64::from(priority) + dp).max(0)).unwrap_or(u32::MAX)
}

fn snapshot(timeline: &Timeline) -> BTreeMap<ClipId, Entry> {
    timeline
        .clips()
        .map(|clip| {
            let mut objects = BTreeMap::new();
            let mut max_media = TimeNs::INFINITY;
            for obj in clip.objects().iter().filter_map(|id| timeline.object(*id)) {
                if !obj.is_source() {
                    continue;
                }
                if let Some(track) = obj.track() {
                    objects.entry(track).or_insert(obj.id());
                }
                if let Some(max) = obj.max_duration() {
                    max_media = max_media.min(max);
                }
            }
            let entry = Entry {
                state: clip.state(),
                objects,
                max_media,
            };
            (clip.id(), entry)
        })
        .collect()
}

fn lane_index(entries: &BTreeMap<ClipId, Entry>) -> Lanes {
    let mut lanes: Lanes = BTreeMap::new();
    for (clip, entry) in entries {
        for (track, object) in &entry.objects {
            let span = Span::new(*object, entry.state.start, entry.state.end());
            lanes
                .entry((*track, entry.state.priority))
                .or_default()
                .push((*clip, span));
        }
    }
    for lane in lanes.values_mut() {
        lane.sort_by_key(|(_, span)| (span.start, span.object));
    }
    lanes
}

fn link_closure(timeline: &Timeline, clips: &BTreeSet<ClipId>) -> BTreeSet<ClipId> {
    clips
        .iter()
        .flat_map(|c| timeline.linked_clips(*c))
        .chain(clips.iter().copied())
        .collect()
}

/// Clips sharing a track with `group` that start at or after `reference`,
/// closed over links.
fn downstream(
    timeline: &Timeline,
    entries: &BTreeMap<ClipId, Entry>,
    group: &BTreeSet<ClipId>,
    reference: TimeNs,
) -> BTreeSet<ClipId> {
    let tracks: BTreeSet<TrackId> = group
        .iter()
        .filter_map(|c| entries.get(c))
        .flat_map(|e| e.objects.keys().copied())
        .collect();
    let direct: BTreeSet<ClipId> = entries
        .iter()
        .filter(|(clip, e)| {
            !group.contains(*clip)
                && e.state.start >= reference
                && e.objects.keys().any(|t| tracks.contains(t))
        })
        .map(|(clip, _)| *clip)
        .collect();
    link_closure(timeline, &direct)
        .difference(group)
        .copied()
        .collect()
}
