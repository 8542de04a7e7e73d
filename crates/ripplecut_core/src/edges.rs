use crate::object::TrackObject;
use crate::types::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Index of every object start/end edge, used for magnetic snapping and
/// adjacency queries.
#[derive(Debug, Clone, Default)]
pub struct TimelineEdgeIndex {
    /// Edge time to number of registrations.
    edges: BTreeMap<TimeNs, usize>,
    spans: HashMap<ObjectId, (TimeNs, TimeNs)>,
    by_start: BTreeMap<TimeNs, BTreeSet<ObjectId>>,
    by_end: BTreeMap<TimeNs, BTreeSet<ObjectId>>,
    deadband: TimeNs,
}

impl TimelineEdgeIndex {
    pub fn new(deadband: TimeNs) -> Self {
        Self {
            deadband,
            ..Self::default()
        }
    }

    pub fn deadband(&self) -> TimeNs {
        self.deadband
    }

    pub fn set_deadband(&mut self, deadband: TimeNs) {
        self.deadband = deadband.max(TimeNs::ZERO);
    }

    pub fn add_track_object(&mut self, obj: &TrackObject) {
        self.add_span(obj.id(), obj.start(), obj.end());
    }

    pub fn remove_track_object(&mut self, obj: ObjectId) -> bool {
        let Some((start, end)) = self.spans.remove(&obj) else {
            return false;
        };
        remove_member(&mut self.by_start, start, obj);
        remove_member(&mut self.by_end, end, obj);
        self.remove_start_end(start, end);
        true
    }

    /// Register `obj` at `[start, end)`, replacing any earlier registration.
    pub fn add_span(&mut self, obj: ObjectId, start: TimeNs, end: TimeNs) {
        self.remove_track_object(obj);
        self.spans.insert(obj, (start, end));
        self.by_start.entry(start).or_default().insert(obj);
        self.by_end.entry(end).or_default().insert(obj);
        self.add_start_end(start, end);
    }

    pub fn add_start_end(&mut self, start: TimeNs, end: TimeNs) {
        *self.edges.entry(start).or_insert(0) += 1;
        *self.edges.entry(end).or_insert(0) += 1;
    }

    /// An edge disappears only once every registration of it is removed.
    pub fn remove_start_end(&mut self, start: TimeNs, end: TimeNs) {
        for edge in [start, end] {
            if let Some(count) = self.edges.get_mut(&edge) {
                *count -= 1;
                if *count == 0 {
                    self.edges.remove(&edge);
                }
            }
        }
    }

    pub fn contains_edge(&self, t: TimeNs) -> bool {
        self.edges.contains_key(&t)
    }

    pub fn edges(&self) -> impl Iterator<Item = TimeNs> + '_ {
        self.edges.keys().copied()
    }

    /// The registered edge closest to `t`, earlier edge on a tie.
    pub fn nearest_edge(&self, t: TimeNs) -> Option<TimeNs> {
        let below = self.edges.range(..=t).next_back().map(|(e, _)| *e);
        let above = self.edges.range(t..).next().map(|(e, _)| *e);
        match (below, above) {
            (Some(b), Some(a)) => {
                if (t - b) <= (a - t) {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (edge, None) | (None, edge) => edge,
        }
    }

    /// Snap `start` (and the computed end when `duration` is given) to the
    /// nearest edge within the deadband. Returns the possibly-unchanged start
    /// and the applied delta.
    pub fn snap_to_edge(&self, start: TimeNs, duration: Option<TimeNs>) -> (TimeNs, TimeNs) {
        let start_candidate = self
            .nearest_edge(start)
            .map(|edge| (edge, (edge - start).abs()))
            .filter(|(_, dist)| *dist <= self.deadband);

        let end_candidate = duration.and_then(|duration| {
            let end = start + duration;
            self.nearest_edge(end)
                .map(|edge| (edge - duration, (edge - end).abs()))
                .filter(|(_, dist)| *dist <= self.deadband)
        });

        let snapped = match (start_candidate, end_candidate) {
            (Some((s, sd)), Some((e, ed))) => {
                if sd <= ed {
                    s
                } else {
                    e
                }
            }
            (Some((s, _)), None) => s,
            (None, Some((e, _))) => e,
            (None, None) => start,
        };
        (snapped, snapped - start)
    }

    /// Objects whose `[start, end)` contains `t`, ordered by start.
    pub fn objects_incident_on_time(&self, t: TimeNs) -> Vec<ObjectId> {
        let mut hits: Vec<(TimeNs, ObjectId)> = self
            .by_start
            .range(..=t)
            .flat_map(|(start, ids)| ids.iter().map(move |id| (*start, *id)))
            .filter(|(_, id)| self.spans.get(id).is_some_and(|(_, end)| t < *end))
            .collect();
        hits.sort();
        hits.into_iter().map(|(_, id)| id).collect()
    }

    /// Objects ending exactly where `obj` starts.
    pub fn objects_adjacent_to_start(&self, obj: ObjectId) -> Vec<ObjectId> {
        let Some((start, _)) = self.spans.get(&obj) else {
            return Vec::new();
        };
        self.by_end
            .get(start)
            .map(|ids| ids.iter().copied().filter(|id| *id != obj).collect())
            .unwrap_or_default()
    }

    /// Objects starting exactly where `obj` ends.
    pub fn objects_adjacent_to_end(&self, obj: ObjectId) -> Vec<ObjectId> {
        let Some((_, end)) = self.spans.get(&obj) else {
            return Vec::new();
        };
        self.by_start
            .get(end)
            .map(|ids| ids.iter().copied().filter(|id| *id != obj).collect())
            .unwrap_or_default()
    }
}

fn remove_member(map: &mut BTreeMap<TimeNs, BTreeSet<ObjectId>>, key: TimeNs, obj: ObjectId) {
    if let Some(ids) = map.get_mut(&key) {
        ids.remove(&obj);
        if ids.is_empty() {
            map.remove(&key);
        }
    }
}
