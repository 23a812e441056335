use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The pipeline stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Render,
    Generate,
    Assemble,
    Convert,
}

impl Stage {
    /// Human-readable stage label used in user-facing reports.
    pub fn label(self) -> &'static str {
        match self {
            Self::Load => "Data loading",
            Self::Render => "Chart rendering",
            Self::Generate => "Narrative generation",
            Self::Assemble => "Deck assembly",
            Self::Convert => "Format conversion",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Every way a run can fail. Each variant belongs to exactly one [`Stage`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Column error: {0}")]
    Column(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Conversion error: {0}")]
    Conversion(String),
}

impl PipelineError {
    /// The stage that raised this error. A missing column is reported by the
    /// loader, so it maps to [`Stage::Load`].
    pub fn stage(&self) -> Stage {
        match self {
            Self::Parse(_) | Self::Column(_) => Stage::Load,
            Self::Render(_) => Stage::Render,
            Self::Generation(_) => Stage::Generate,
            Self::Assembly(_) => Stage::Assemble,
            Self::Conversion(_) => Stage::Convert,
        }
    }

    /// Short stable name of the error kind (`ParseError`, `ColumnError`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "ParseError",
            Self::Column(_) => "ColumnError",
            Self::Render(_) => "RenderError",
            Self::Generation(_) => "GenerationError",
            Self::Assembly(_) => "AssemblyError",
            Self::Conversion(_) => "ConversionError",
        }
    }

    /// The bare reason, without the kind prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::Parse(msg)
            | Self::Column(msg)
            | Self::Render(msg)
            | Self::Generation(msg)
            | Self::Assembly(msg)
            | Self::Conversion(msg) => msg,
        }
    }

    /// Message shown to the user: failing stage plus reason.
    pub fn user_message(&self) -> String {
        format!("{} failed ({}): {}", self.stage(), self.kind(), self.reason())
    }
}
