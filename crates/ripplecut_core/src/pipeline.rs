use crate::types::{ObjectId, StreamKind, TimeNs, TrackId};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Opaque handle of a mixer input pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PadHandle(pub u64);

impl fmt::Display for PadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pad#{}", self.0)
    }
}

/// Timing properties pushed to the pipeline for one track object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectProperties {
    pub start: TimeNs,
    pub duration: TimeNs,
    pub in_point: TimeNs,
    pub priority: u32,
}

/// The media pipeline as seen from the timeline. Property pushes are
/// fire-and-forget; the pipeline applies them at its own sync point.
pub trait TrackObjectSink {
    fn request_mixer_pad(
        &mut self,
        track: TrackId,
        object: ObjectId,
        stream: StreamKind,
        priority: u32,
    ) -> PadHandle;

    fn release_mixer_pad(&mut self, pad: PadHandle);

    fn set_pad_zorder(&mut self, pad: PadHandle, zorder: u32);

    fn push_properties(&mut self, object: ObjectId, properties: ObjectProperties);

    fn transition_activated(&mut self, _track: TrackId, _a: ObjectId, _b: ObjectId) {}

    fn transition_deactivated(&mut self, _track: TrackId, _a: ObjectId, _b: ObjectId) {}

    fn alpha_requirement_changed(&mut self, _track: TrackId, _object: ObjectId, _required: bool) {}
}

/// Lets a caller keep inspecting a sink after handing it to the timeline.
impl<T: TrackObjectSink> TrackObjectSink for Rc<RefCell<T>> {
    fn request_mixer_pad(
        &mut self,
        track: TrackId,
        object: ObjectId,
        stream: StreamKind,
        priority: u32,
    ) -> PadHandle {
        self.borrow_mut().request_mixer_pad(track, object, stream, priority)
    }

    fn release_mixer_pad(&mut self, pad: PadHandle) {
        self.borrow_mut().release_mixer_pad(pad)
    }

    fn set_pad_zorder(&mut self, pad: PadHandle, zorder: u32) {
        self.borrow_mut().set_pad_zorder(pad, zorder)
    }

    fn push_properties(&mut self, object: ObjectId, properties: ObjectProperties) {
        self.borrow_mut().push_properties(object, properties)
    }

    fn transition_activated(&mut self, track: TrackId, a: ObjectId, b: ObjectId) {
        self.borrow_mut().transition_activated(track, a, b)
    }

    fn transition_deactivated(&mut self, track: TrackId, a: ObjectId, b: ObjectId) {
        self.borrow_mut().transition_deactivated(track, a, b)
    }

    fn alpha_requirement_changed(&mut self, track: TrackId, object: ObjectId, required: bool) {
        self.borrow_mut().alpha_requirement_changed(track, object, required)
    }
}
