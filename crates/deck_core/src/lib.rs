pub mod config;
pub mod error;
pub mod logging;

pub use config::{DeckConfig, EmptySectionPolicy};
pub use error::{PipelineError, Stage};
