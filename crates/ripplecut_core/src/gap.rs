use crate::types::{ObjectId, TimeNs};

/// The interval an object occupies in one priority lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub object: ObjectId,
    pub start: TimeNs,
    pub end: TimeNs,
}

impl Span {
    pub fn new(object: ObjectId, start: TimeNs, end: TimeNs) -> Self {
        Self { object, start, end }
    }
}

/// Empty space between two objects of a lane. A negative duration means
/// the objects overlap; [`TimeNs::INFINITY`] means there is no right neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub left: Option<ObjectId>,
    pub right: Option<ObjectId>,
    pub start: TimeNs,
    pub duration: TimeNs,
}

impl Gap {
    pub fn is_infinite(&self) -> bool {
        self.duration.is_infinite()
    }

    pub fn is_valid(&self) -> bool {
        self.duration >= TimeNs::ZERO
    }

    /// Room available for an edit, overlaps count as none.
    pub fn room(&self) -> TimeNs {
        self.duration.max(TimeNs::ZERO)
    }

    /// Gap between `target` and the closest lane member that starts before it.
    pub fn left_of<'a>(target: &Span, lane: impl IntoIterator<Item = &'a Span>) -> Gap {
        let neighbor = lane
            .into_iter()
            .filter(|s| s.object != target.object && s.start < target.start)
            .max_by_key(|s| (s.end, std::cmp::Reverse(s.object)));
        match neighbor {
            Some(left) => Gap {
                left: Some(left.object),
                right: Some(target.object),
                start: left.end,
                duration: target.start - left.end,
            },
            None => Gap {
                left: None,
                right: Some(target.object),
                start: TimeNs::ZERO,
                duration: target.start,
            },
        }
    }

    /// Gap between `target` and the closest lane member that starts at or after it.
    pub fn right_of<'a>(target: &Span, lane: impl IntoIterator<Item = &'a Span>) -> Gap {
        let neighbor = lane
            .into_iter()
            .filter(|s| s.object != target.object && s.start >= target.start)
            .min_by_key(|s| (s.start, s.object));
        match neighbor {
            Some(right) => Gap {
                left: Some(target.object),
                right: Some(right.object),
                start: target.end,
                duration: right.start - target.end,
            },
            None => Gap {
                left: Some(target.object),
                right: None,
                start: target.end,
                duration: TimeNs::INFINITY,
            },
        }
    }

    /// The tightest of several gaps; overlaps win over any real gap.
    pub fn smallest(gaps: impl IntoIterator<Item = Gap>) -> Option<Gap> {
        gaps.into_iter().min_by_key(|g| g.duration)
    }
}

/// Every gap of a lane in time order: the leading gap from zero, the gaps
/// between consecutive members, and the trailing infinite gap.
pub fn lane_gaps(lane: &[Span]) -> Vec<Gap> {
    let mut sorted: Vec<&Span> = lane.iter().collect();
    sorted.sort_by_key(|s| (s.start, s.object));

    let mut gaps = Vec::with_capacity(sorted.len() + 1);
    let mut cursor = TimeNs::ZERO;
    let mut left = None;
    for span in sorted {
        gaps.push(Gap {
            left,
            right: Some(span.object),
            start: cursor,
            duration: span.start - cursor,
        });
        if span.end >= cursor {
            cursor = span.end;
            left = Some(span.object);
        }
    }
    gaps.push(Gap {
        left,
        right: None,
        start: cursor,
        duration: TimeNs::INFINITY,
    });
    gaps
}
