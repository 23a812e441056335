//! Conversion of presentations through a headless office suite.

pub mod converter;

pub use converter::{DEFAULT_TIMEOUT, DocumentConverter};
