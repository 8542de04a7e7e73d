use crate::types::{ClipId, LinkId, ObjectId, StreamKind, TimeNs, TrackId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Track not found: {0}")]
    TrackNotFound(TrackId),

    #[error("Track object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Timeline object not found: {0}")]
    ClipNotFound(ClipId),

    #[error("Link not found: {0}")]
    LinkNotFound(LinkId),

    #[error("{object} already belongs to {track}")]
    AlreadyInTrack { object: ObjectId, track: TrackId },

    #[error("{object} is not in {track}")]
    NotInTrack { object: ObjectId, track: TrackId },

    #[error("{object} carries a {object_stream:?} stream but {track} is {track_stream:?}")]
    StreamMismatch {
        object: ObjectId,
        object_stream: StreamKind,
        track: TrackId,
        track_stream: StreamKind,
    },

    #[error("{object} already belongs to {clip}")]
    ObjectOwnedByOtherClip { object: ObjectId, clip: ClipId },

    #[error("{object} is not owned by {clip}")]
    ObjectNotOwned { object: ObjectId, clip: ClipId },

    #[error("{clip} is already in {link}")]
    AlreadyLinked { clip: ClipId, link: LinkId },

    #[error("{clip} is not in {link}")]
    NotLinked { clip: ClipId, link: LinkId },

    #[error("cannot split {clip} at {at}: not strictly inside every track object")]
    SplitOutsideClip { clip: ClipId, at: TimeNs },

    #[error("no track accepts any stream of source {0}")]
    NoTrackForSource(String),

    #[error("no neighboring timeline object for {0}")]
    NoNeighbor(ClipId),

    #[error("transaction '{0}' is already open")]
    TransactionInProgress(String),

    #[error("no transaction is open")]
    NoTransaction,

    #[error("editing context already finished")]
    ContextFinished,

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,
}

pub type Result<T> = std::result::Result<T, CoreError>;
