use ripplecut_core::pipeline::PadHandle;
use ripplecut_core::types::TrackId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixerError {
    #[error("unknown mixer pad: {0}")]
    UnknownPad(PadHandle),

    #[error("no mixer lane for track {0}")]
    UnknownLane(TrackId),

    #[error("track {0} is not a video lane")]
    NotVideoLane(TrackId),
}

pub type Result<T> = std::result::Result<T, MixerError>;
