pub mod clip;
pub mod edges;
pub mod editing;
pub mod error;
pub mod events;
pub mod gap;
pub mod history;
pub mod keyframes;
pub mod object;
pub mod pipeline;
mod queries;
pub mod settings;
pub mod timeline;
pub mod track;
pub mod types;

pub use editing::{EditKind, EditResult, EditingContext};
pub use error::{CoreError, Result};
pub use timeline::Timeline;
