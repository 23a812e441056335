//! `sheetdeck`: CSV in, narrated presentation out.

pub mod cli;
pub mod context;
pub mod doctor;
pub mod pipeline;

pub use context::{RunContext, RunReport};
pub use pipeline::Pipeline;
