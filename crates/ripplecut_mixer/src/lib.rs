pub mod alpha;
pub mod error;
pub mod mixer;

pub use alpha::{AlphaCompositingPolicy, AlphaTransition};
pub use error::{MixerError, Result};
pub use mixer::{PixelFormat, SmartMixer};
