use crate::clip::TimelineObject;
use crate::error::{CoreError, Result};
use crate::timeline::Timeline;
use crate::types::*;
use std::cmp::Reverse;

impl Timeline {
    /// The clip with the latest start before `clip` starts. Equal starts
    /// resolve to the clip inserted first.
    pub fn previous_clip(&self, clip: ClipId, filter: PriorityFilter) -> Result<ClipId> {
        let target = self.clip(clip).ok_or(CoreError::ClipNotFound(clip))?;
        let in_lane = lane_filter(target, filter);
        self.clips()
            .filter(|c| in_lane(c) && c.start() < target.start())
            .max_by_key(|c| (c.start(), Reverse(c.id())))
            .map(|c| c.id())
            .ok_or(CoreError::NoNeighbor(clip))
    }

    /// The clip with the earliest start at or after the end of `clip`.
    pub fn next_clip(&self, clip: ClipId, filter: PriorityFilter) -> Result<ClipId> {
        let target = self.clip(clip).ok_or(CoreError::ClipNotFound(clip))?;
        let in_lane = lane_filter(target, filter);
        self.clips()
            .filter(|c| in_lane(c) && c.start() >= target.end())
            .min_by_key(|c| (c.start(), c.id()))
            .map(|c| c.id())
            .ok_or(CoreError::NoNeighbor(clip))
    }

    fn clips_where(&self, pred: impl Fn(&TimelineObject) -> bool) -> Vec<ClipId> {
        let mut hits: Vec<&TimelineObject> = self.clips().filter(|c| pred(c)).collect();
        hits.sort_by_key(|c| (c.start(), c.id()));
        hits.into_iter().map(|c| c.id()).collect()
    }

    /// Clips playing at `t`.
    pub fn clips_at_time(&self, t: TimeNs) -> Vec<ClipId> {
        self.clips_where(|c| c.start() <= t && t < c.end())
    }

    /// Clips that have ended by `t`.
    pub fn clips_before_time(&self, t: TimeNs) -> Vec<ClipId> {
        self.clips_where(|c| c.end() <= t)
    }

    /// Clips that have not started before `t`.
    pub fn clips_after_time(&self, t: TimeNs) -> Vec<ClipId> {
        self.clips_where(|c| c.start() >= t)
    }

    /// Clips intersecting `[t0, t1)` whose priority lies in `[min_priority, max_priority]`.
    pub fn clips_in_region(
        &self,
        t0: TimeNs,
        t1: TimeNs,
        min_priority: u32,
        max_priority: u32,
    ) -> Vec<ClipId> {
        self.clips_where(|c| {
            c.start() < t1
                && c.end() > t0
                && (min_priority..=max_priority).contains(&c.priority())
        })
    }

    fn keyframe_times(&self) -> impl Iterator<Item = TimeNs> + '_ {
        self.tracks()
            .iter()
            .flat_map(|track| track.objects())
            .flat_map(|obj| obj.absolute_keyframe_times())
    }

    /// Nearest keyframe strictly before `t`, in timeline time.
    pub fn prev_keyframe(&self, t: TimeNs) -> Option<TimeNs> {
        self.keyframe_times().filter(|k| *k < t).max()
    }

    /// Nearest keyframe at or after `t`, in timeline time.
    pub fn next_keyframe(&self, t: TimeNs) -> Option<TimeNs> {
        self.keyframe_times().filter(|k| *k >= t).min()
    }

    /// Track objects whose interval contains `t`, ordered by start.
    pub fn objects_at_time(&self, t: TimeNs) -> Vec<ObjectId> {
        self.edges().objects_incident_on_time(t)
    }

    /// Snap a proposed placement against every object edge on the timeline.
    pub fn snap_to_edge(&self, start: TimeNs, duration: Option<TimeNs>) -> (TimeNs, TimeNs) {
        self.edges().snap_to_edge(start, duration)
    }
}

fn lane_filter(clip: &TimelineObject, filter: PriorityFilter) -> impl Fn(&TimelineObject) -> bool {
    let wanted = match filter {
        PriorityFilter::Same => Some(clip.priority()),
        PriorityFilter::Exact(priority) => Some(priority),
        PriorityFilter::Any => None,
    };
    let id = clip.id();
    move |c: &TimelineObject| c.id() != id && wanted.map_or(true, |p| c.priority() == p)
}

#[cfg(test)]
mod tests {
    use crate::error::CoreError;
    use crate::keyframes::{Interpolation, ALPHA_PROPERTY};
    use crate::timeline::fixtures::*;
    use crate::types::*;

    // -----------------------------------------------------------------------
    // neighbors
    // -----------------------------------------------------------------------

    #[test]
    fn previous_and_next_in_same_lane() {
        let (mut tl, ids) = video_timeline(&[(0, 5), (10, 5), (20, 5), (30, 5)]);
        tl.set_clip_priority(ids[2], 1).unwrap();

        assert_eq!(tl.previous_clip(ids[3], PriorityFilter::Same).unwrap(), ids[1]);
        assert_eq!(tl.previous_clip(ids[3], PriorityFilter::Any).unwrap(), ids[2]);
        assert_eq!(tl.next_clip(ids[0], PriorityFilter::Same).unwrap(), ids[1]);
        assert_eq!(tl.next_clip(ids[0], PriorityFilter::Exact(1)).unwrap(), ids[2]);
    }

    #[test]
    fn missing_neighbor_is_an_error() {
        let (tl, ids) = video_timeline(&[(0, 5), (10, 5)]);
        assert!(matches!(
            tl.previous_clip(ids[0], PriorityFilter::Any),
            Err(CoreError::NoNeighbor(_))
        ));
        assert!(matches!(
            tl.next_clip(ids[1], PriorityFilter::Any),
            Err(CoreError::NoNeighbor(_))
        ));
    }

    #[test]
    fn next_skips_overlapping_clips() {
        let (tl, ids) = video_timeline(&[(0, 10), (5, 10), (10, 5)]);
        assert_eq!(tl.next_clip(ids[0], PriorityFilter::Same).unwrap(), ids[2]);
    }

    #[test]
    fn equal_starts_resolve_to_first_inserted() {
        let (tl, ids) = video_timeline(&[(10, 5), (10, 5), (0, 5), (20, 5)]);
        assert_eq!(tl.next_clip(ids[2], PriorityFilter::Same).unwrap(), ids[0]);
        assert_eq!(tl.previous_clip(ids[3], PriorityFilter::Same).unwrap(), ids[0]);
    }

    // -----------------------------------------------------------------------
    // interval filters
    // -----------------------------------------------------------------------

    #[test]
    fn time_filters() {
        let (tl, ids) = video_timeline(&[(10, 5), (0, 5), (5, 10)]);
        assert_eq!(tl.clips_at_time(s(5)), vec![ids[2]]);
        assert_eq!(tl.clips_at_time(s(12)), vec![ids[2], ids[0]]);
        assert_eq!(tl.clips_before_time(s(10)), vec![ids[1]]);
        assert_eq!(tl.clips_after_time(s(5)), vec![ids[2], ids[0]]);
    }

    #[test]
    fn region_filter_checks_priority() {
        let (mut tl, ids) = video_timeline(&[(0, 5), (3, 5), (20, 5)]);
        tl.set_clip_priority(ids[1], 2).unwrap();
        assert_eq!(tl.clips_in_region(s(4), s(21), 0, 1), vec![ids[0], ids[2]]);
        assert_eq!(tl.clips_in_region(s(4), s(21), 1, 3), vec![ids[1]]);
        assert!(tl.clips_in_region(s(5), s(20), 0, 0).is_empty());
    }

    #[test]
    fn objects_at_time_uses_edge_index() {
        let (tl, ids) = video_timeline(&[(0, 10), (5, 10)]);
        assert_eq!(
            tl.objects_at_time(s(7)),
            vec![first_object(&tl, ids[0]), first_object(&tl, ids[1])]
        );
    }

    // -----------------------------------------------------------------------
    // keyframes
    // -----------------------------------------------------------------------

    #[test]
    fn keyframes_project_into_timeline_time() {
        let (mut tl, ids) = video_timeline(&[(20, 10)]);
        tl.set_clip_in_point(ids[0], s(4)).unwrap();
        let object = first_object(&tl, ids[0]);
        tl.set_keyframe(object, ALPHA_PROPERTY, s(6), 0.5, Interpolation::Linear)
            .unwrap();
        // 20 - 4 + 6
        assert_eq!(tl.next_keyframe(s(0)), Some(s(22)));
        assert_eq!(tl.next_keyframe(s(22)), Some(s(22)));
        assert_eq!(tl.prev_keyframe(s(22)), None);
        assert_eq!(tl.prev_keyframe(s(23)), Some(s(22)));
    }

    #[test]
    fn keyframes_continue_across_a_split() {
        let (mut tl, ids) = video_timeline(&[(0, 10)]);
        let object = first_object(&tl, ids[0]);
        tl.set_keyframe(object, ALPHA_PROPERTY, s(3), 0.5, Interpolation::Linear)
            .unwrap();
        tl.set_keyframe(object, ALPHA_PROPERTY, s(7), 0.5, Interpolation::Linear)
            .unwrap();
        tl.split_clip(ids[0], s(5)).unwrap();

        assert_eq!(tl.prev_keyframe(s(5)), Some(s(3)));
        assert_eq!(tl.next_keyframe(s(5)), Some(s(7)));
        assert_eq!(tl.prev_keyframe(s(10)), Some(s(7)));
        assert_eq!(tl.next_keyframe(s(8)), None);
    }
}
