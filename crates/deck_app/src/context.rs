use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use deck_data::ChartKind;
use serde::Serialize;
use uuid::Uuid;

/// Everything one pipeline run needs, passed explicitly from the caller.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    /// Name of the uploaded file; used for log lines and output naming.
    pub file_name: String,
    pub input: Vec<u8>,
    pub column: String,
    pub chart_kind: ChartKind,
    /// Always at least 1.
    pub min_slides: usize,
    pub prompt: Option<String>,
    /// Where the converted file is copied once the run succeeds.
    pub output: PathBuf,
}

impl RunContext {
    pub fn new(
        file_name: impl Into<String>,
        input: Vec<u8>,
        column: impl Into<String>,
        chart_kind: ChartKind,
        min_slides: usize,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            file_name: file_name.into(),
            input,
            column: column.into(),
            chart_kind,
            min_slides: min_slides.max(1),
            prompt: None,
            output: output.into(),
        }
    }

    /// Read `path` into a context.
    pub fn from_path(
        path: &Path,
        column: impl Into<String>,
        chart_kind: ChartKind,
        min_slides: usize,
        output: impl Into<PathBuf>,
    ) -> Result<Self> {
        let input =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input.csv".into());
        Ok(Self::new(file_name, input, column, chart_kind, min_slides, output))
    }

    /// Blank prompts count as no prompt.
    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    /// File stem used for intermediate files; falls back to `deck`.
    pub fn stem(&self) -> String {
        let stem: String = Path::new(&self.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if stem.trim_matches('_').is_empty() {
            "deck".to_string()
        } else {
            stem
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub output: PathBuf,
    pub format: String,
    pub slide_count: usize,
    pub bytes: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
