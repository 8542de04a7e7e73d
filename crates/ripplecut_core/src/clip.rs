use crate::error::{CoreError, Result};
use crate::object::TrackObject;
use crate::types::*;
use std::collections::BTreeSet;
use tracing::warn;

// ---------------------------------------------------------------------------
// TimelineObject
// ---------------------------------------------------------------------------

/// A logical clip: one or more track objects (typically a video and an audio
/// object of the same source) kept synchronized on their shared properties.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineObject {
    id: ClipId,
    objects: Vec<ObjectId>,
    state: ClipState,
    pub(crate) link: Option<LinkId>,
}

impl TimelineObject {
    pub fn new(id: ClipId) -> Self {
        Self {
            id,
            objects: Vec::new(),
            state: ClipState::default(),
            link: None,
        }
    }

    pub fn id(&self) -> ClipId {
        self.id
    }

    pub fn objects(&self) -> &[ObjectId] {
        &self.objects
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.objects.contains(&object)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn state(&self) -> ClipState {
        self.state
    }

    pub fn start(&self) -> TimeNs {
        self.state.start
    }

    pub fn duration(&self) -> TimeNs {
        self.state.duration
    }

    pub fn end(&self) -> TimeNs {
        self.state.end()
    }

    pub fn in_point(&self) -> TimeNs {
        self.state.in_point
    }

    pub fn media_duration(&self) -> TimeNs {
        self.state.media_duration
    }

    pub fn priority(&self) -> u32 {
        self.state.priority
    }

    pub fn link(&self) -> Option<LinkId> {
        self.link
    }

    /// Take ownership of `obj`. The first object defines the clip's state;
    /// later ones are synchronized to it.
    pub fn add_track_object(&mut self, obj: &mut TrackObject) -> Result<()> {
        if let Some(owner) = obj.clip() {
            warn!(object = %obj.id(), clip = %self.id, %owner, "add rejected: object already owned");
            return Err(CoreError::ObjectOwnedByOtherClip {
                object: obj.id(),
                clip: owner,
            });
        }
        if self.objects.is_empty() {
            self.state = obj.clip_state();
        } else {
            obj.apply_clip_state(&self.state);
        }
        obj.clip = Some(self.id);
        self.objects.push(obj.id());
        Ok(())
    }

    pub fn remove_track_object(&mut self, obj: &mut TrackObject) -> Result<()> {
        let Some(pos) = self.objects.iter().position(|id| *id == obj.id()) else {
            warn!(object = %obj.id(), clip = %self.id, "remove rejected: object not owned");
            return Err(CoreError::ObjectNotOwned {
                object: obj.id(),
                clip: self.id,
            });
        };
        self.objects.remove(pos);
        obj.clip = None;
        Ok(())
    }

    pub(crate) fn attach(&mut self, object: ObjectId) {
        if !self.objects.contains(&object) {
            self.objects.push(object);
        }
    }

    pub(crate) fn detach(&mut self, object: ObjectId) -> bool {
        let before = self.objects.len();
        self.objects.retain(|id| *id != object);
        before != self.objects.len()
    }

    pub(crate) fn set_state(&mut self, state: ClipState) {
        self.state = state;
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Timeline objects whose starts move together.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    id: LinkId,
    members: BTreeSet<ClipId>,
}

impl Link {
    pub fn new(id: LinkId) -> Self {
        Self {
            id,
            members: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn members(&self) -> impl Iterator<Item = ClipId> + '_ {
        self.members.iter().copied()
    }

    pub fn contains(&self, clip: ClipId) -> bool {
        self.members.contains(&clip)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Adding a clip that already belongs to this link is a no-op.
    pub fn add_timeline_object(&mut self, clip: &mut TimelineObject) -> Result<()> {
        if let Some(link) = clip.link().filter(|link| *link != self.id) {
            warn!(clip = %clip.id(), %link, "link rejected: already linked");
            return Err(CoreError::AlreadyLinked {
                clip: clip.id(),
                link,
            });
        }
        clip.link = Some(self.id);
        self.members.insert(clip.id());
        Ok(())
    }

    pub fn remove_timeline_object(&mut self, clip: &mut TimelineObject) -> Result<()> {
        if clip.link() != Some(self.id) || !self.members.remove(&clip.id()) {
            return Err(CoreError::NotLinked {
                clip: clip.id(),
                link: self.id,
            });
        }
        clip.link = None;
        Ok(())
    }

    /// Absorb every member of `other`. Returns the absorbed members, whose
    /// back-references the caller must repoint to this link.
    pub fn join(&mut self, other: Link) -> Vec<ClipId> {
        let absorbed: Vec<ClipId> = other.members.into_iter().collect();
        self.members.extend(absorbed.iter().copied());
        absorbed
    }

    pub(crate) fn forget(&mut self, clip: ClipId) -> bool {
        self.members.remove(&clip)
    }
}
