//! Slide prose generation.
//!
//! One provider call per requested [`SectionRole`], in canonical order,
//! then one per compared column when column insights are enabled.
//! Responses are cleaned into short bullet lists; a role whose cleaned text
//! is empty is left out of the [`Narrative`] rather than padded with
//! invented text.

use std::sync::Arc;

use deck_core::PipelineError;
use deck_data::DatasetSummary;
use tracing::{debug, info, warn};

use crate::providers::TextProvider;
use crate::types::{
    ColumnInsight, GenerateRequest, Narrative, SectionRole, TextBlock, UnknownRole,
};

const SYSTEM_PROMPT: &str = "You write slide text for data analysis presentations. \
Provide only the concise, complete text or numbered list with no introductory \
phrases and no formatting. Derive everything solely from the provided CSV data \
analysis.";

const DEFAULT_FOCUS: &str = "default analysis of one column vs others";

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Which roles to generate for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrativePlan {
    roles: Vec<SectionRole>,
    always_summary: bool,
}

impl Default for NarrativePlan {
    fn default() -> Self {
        Self {
            roles: vec![
                SectionRole::Title,
                SectionRole::Introduction,
                SectionRole::Comparison,
                SectionRole::Analysis,
                SectionRole::Conclusion,
            ],
            always_summary: false,
        }
    }
}

impl NarrativePlan {
    /// Build a plan from configured role names. Unknown names are rejected.
    pub fn from_names(names: &[String], always_summary: bool) -> Result<Self, UnknownRole> {
        let mut roles = names
            .iter()
            .map(|n| n.parse::<SectionRole>())
            .collect::<Result<Vec<_>, _>>()?;
        roles.sort();
        roles.dedup();
        Ok(Self {
            roles,
            always_summary,
        })
    }

    /// Roles to generate for `prompt`, in canonical order. `Summary` is
    /// added when the prompt asks for one or the plan forces it.
    pub fn roles_for(&self, prompt: Option<&str>) -> Vec<SectionRole> {
        let mut roles = self.roles.clone();
        if self.always_summary || wants_summary(prompt) {
            roles.push(SectionRole::Summary);
        }
        roles.sort();
        roles.dedup();
        roles
    }
}

fn wants_summary(prompt: Option<&str>) -> bool {
    prompt.is_some_and(|p| p.to_lowercase().contains("summary"))
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Inputs for one narrative.
#[derive(Debug, Clone, Copy)]
pub struct NarrativeRequest<'a> {
    pub summary: &'a DatasetSummary,
    pub prompt: Option<&'a str>,
    pub min_slides: usize,
}

/// Drives a [`TextProvider`] through a [`NarrativePlan`].
pub struct NarrativeGenerator {
    provider: Arc<dyn TextProvider>,
    plan: NarrativePlan,
    model: String,
    temperature: Option<f32>,
    retries: u32,
    max_bullets: usize,
    insight_columns: usize,
}

impl NarrativeGenerator {
    pub fn new(provider: Arc<dyn TextProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            plan: NarrativePlan::default(),
            model: model.into(),
            temperature: None,
            retries: 1,
            max_bullets: 6,
            insight_columns: 0,
        }
    }

    pub fn with_plan(mut self, plan: NarrativePlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Extra attempts after a transient failure.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_max_bullets(mut self, max_bullets: usize) -> Self {
        self.max_bullets = max_bullets.max(1);
        self
    }

    /// Ask for detailed insights on the first `limit` other columns. Zero
    /// turns them off.
    pub fn with_column_insights(mut self, limit: usize) -> Self {
        self.insight_columns = limit;
        self
    }

    /// Generate every planned section. The first failure that survives the
    /// retries aborts the whole narrative.
    pub async fn generate(&self, request: NarrativeRequest<'_>) -> Result<Narrative, PipelineError> {
        let roles = self.plan.roles_for(request.prompt);
        let compared: Vec<String> = request
            .summary
            .other_columns()
            .into_iter()
            .take(self.insight_columns)
            .map(String::from)
            .collect();
        info!(
            provider = self.provider.name(),
            model = %self.model,
            sections = roles.len(),
            insights = compared.len(),
            "generating narrative"
        );

        let mut narrative = Narrative {
            requested: roles.clone(),
            blocks: Vec::with_capacity(roles.len()),
            compared: compared.clone(),
            insights: Vec::with_capacity(compared.len()),
        };

        for role in roles {
            let prompt = build_prompt(role, &request);
            let raw = self.call_with_retry(&format!("{role} section"), prompt).await?;
            let content = match role {
                SectionRole::Title => clean_title(&raw),
                _ => clean_lines(&raw, self.max_bullets).join("\n"),
            };
            if content.is_empty() {
                warn!(role = %role, "model returned no usable text; section omitted");
                continue;
            }
            debug!(role = %role, chars = content.len(), "section generated");
            narrative.blocks.push(TextBlock::new(role, content));
        }

        for other in compared {
            let prompt = build_insight_prompt(&other, &request);
            let raw = self
                .call_with_retry(&format!("insights for {other}"), prompt)
                .await?;
            let content = clean_lines(&raw, self.max_bullets).join("\n");
            if content.is_empty() {
                warn!(column = %other, "model returned no usable insights; slide omitted");
                continue;
            }
            debug!(column = %other, chars = content.len(), "column insights generated");
            narrative.insights.push(ColumnInsight::new(other, content));
        }

        let produced = narrative.section_count();
        if produced < request.min_slides {
            debug!(
                produced,
                min_slides = request.min_slides,
                "fewer sections than minimum slides; deck will be padded"
            );
        }
        Ok(narrative)
    }

    async fn call_with_retry(&self, what: &str, prompt: String) -> Result<String, PipelineError> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt,
            system: Some(SYSTEM_PROMPT.to_string()),
            temperature: self.temperature,
            max_tokens: None,
        };

        let attempts = self.retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.provider.generate(&request).await {
                Ok(resp) => return Ok(resp.text),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(what, attempt, error = %e, "generation failed, retrying");
                }
                Err(e) => {
                    return Err(PipelineError::Generation(format!(
                        "{what} failed after {attempt} attempt(s): {e}"
                    )));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn build_prompt(role: SectionRole, request: &NarrativeRequest<'_>) -> String {
    let summary = request.summary;
    let col = &summary.target;
    let focus = focus(request);

    let task = match role {
        SectionRole::Title => format!(
            "Generate a 5-word title for an analysis of the column {col}, based on the data and '{focus}'. Reply with the title only."
        ),
        SectionRole::Introduction => format!(
            "Introduce the analysis of {col} vs the other columns, focusing on {col}, in 5 to 6 bullet points based on '{focus}'."
        ),
        SectionRole::Comparison => format!(
            "Compare {col} with the other columns ({}) in 5 to 6 bullet points based on '{focus}'.",
            summary.other_columns().join(", ")
        ),
        SectionRole::Analysis => format!(
            "Provide detailed insights for {col} in 5 to 6 bullet points based on '{focus}'."
        ),
        SectionRole::Summary => format!(
            "Summarize the analysis of {col} vs the other columns in 5 to 6 bullet points based on '{focus}'."
        ),
        SectionRole::Bullets => format!(
            "Provide extra analysis for {col} vs the other columns in 5 to 6 bullet points based on '{focus}'."
        ),
        SectionRole::Conclusion => format!(
            "Conclude the analysis of {col} vs the other columns in 5 to 6 bullet points based on '{focus}'."
        ),
    };

    format!(
        "{}\n{task}\nEnsure complete bullet points ending with full sentences.",
        summary.prompt_context()
    )
}

fn build_insight_prompt(other: &str, request: &NarrativeRequest<'_>) -> String {
    let summary = request.summary;
    let col = &summary.target;
    let stats = summary.comparison_bullets(other).join(" ");
    format!(
        "{}\nProvide detailed insights for {col} vs {other} based on this data: '{stats}', in 5 to 6 bullet points based on '{}'.\nEnsure complete bullet points ending with full sentences.",
        summary.prompt_context(),
        focus(request)
    )
}

fn focus<'a>(request: &NarrativeRequest<'a>) -> &'a str {
    request
        .prompt
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_FOCUS)
}

// ---------------------------------------------------------------------------
// Cleaning
// ---------------------------------------------------------------------------

/// Split a response into bullet lines: markers and numbering removed, blank
/// lines and lead-in lines ending in `:` dropped, at most `max` kept.
pub fn clean_lines(raw: &str, max: usize) -> Vec<String> {
    raw.lines()
        .map(strip_marker)
        .map(|l| l.trim_matches('*').trim())
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .take(max)
        .map(String::from)
        .collect()
}

/// First non-empty line with quotes, a `Title:` prefix and a trailing
/// period removed.
pub fn clean_title(raw: &str) -> String {
    let Some(first) = raw.lines().map(strip_marker).find(|l| !l.is_empty()) else {
        return String::new();
    };
    let mut title = first.trim_matches('*').trim();
    if title.get(..6).is_some_and(|p| p.eq_ignore_ascii_case("title:")) {
        title = title[6..].trim();
    }
    title
        .trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim_end_matches('.')
        .trim()
        .to_string()
}

fn strip_marker(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
    {
        return rest.trim();
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    line
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
