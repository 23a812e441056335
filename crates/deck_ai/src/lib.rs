pub mod narrative;
pub mod providers;
pub mod types;

pub use narrative::{NarrativeGenerator, NarrativePlan, NarrativeRequest};
pub use providers::ollama::OllamaProvider;
pub use providers::{ProviderError, TextProvider};
pub use types::*;
