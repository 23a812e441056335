use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Generation requests
// ---------------------------------------------------------------------------

/// A single non-streaming completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// What the provider returned for a [`GenerateRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

// ---------------------------------------------------------------------------
// Narrative blocks
// ---------------------------------------------------------------------------

/// The fixed set of roles a generated text block can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionRole {
    Title,
    Introduction,
    Comparison,
    Analysis,
    Summary,
    Bullets,
    Conclusion,
}

impl SectionRole {
    /// Canonical order, which is also the order slides appear in.
    pub const ORDERED: [SectionRole; 7] = [
        Self::Title,
        Self::Introduction,
        Self::Comparison,
        Self::Analysis,
        Self::Summary,
        Self::Bullets,
        Self::Conclusion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Introduction => "introduction",
            Self::Comparison => "comparison",
            Self::Analysis => "analysis",
            Self::Summary => "summary",
            Self::Bullets => "bullets",
            Self::Conclusion => "conclusion",
        }
    }

    /// Slide heading used for the role's slide.
    pub fn heading(self) -> &'static str {
        match self {
            Self::Title => "Title",
            Self::Introduction => "Introduction to Analysis",
            Self::Comparison => "Comparison with Other Columns",
            Self::Analysis => "Detailed Analysis",
            Self::Summary => "Summary of Findings",
            Self::Bullets => "Additional Analysis",
            Self::Conclusion => "Conclusion of Analysis",
        }
    }
}

impl std::fmt::Display for SectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role name that is not part of [`SectionRole`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown section role '{0}' (expected one of: title, introduction, comparison, analysis, summary, bullets, conclusion)")]
pub struct UnknownRole(pub String);

impl std::str::FromStr for SectionRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ORDERED
            .into_iter()
            .find(|r| r.as_str() == wanted)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// One generated piece of text tagged with its role. `content` holds
/// cleaned lines separated by `\n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    pub role: SectionRole,
    pub content: String,
}

impl TextBlock {
    pub fn new(role: SectionRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Build a block from an untyped role name, rejecting unknown roles.
    pub fn parse(role: &str, content: impl Into<String>) -> Result<Self, UnknownRole> {
        Ok(Self::new(role.parse()?, content))
    }

    pub fn lines(&self) -> Vec<String> {
        self.content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Generated prose about the target column against one other column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInsight {
    pub column: String,
    pub content: String,
}

impl ColumnInsight {
    pub fn new(column: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            content: content.into(),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Everything the generator produced for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narrative {
    /// Roles that were asked for, in request order.
    pub requested: Vec<SectionRole>,
    /// Non-empty blocks that came back, in canonical order.
    pub blocks: Vec<TextBlock>,
    /// Columns a per-column insight was asked for, in file order.
    #[serde(default)]
    pub compared: Vec<String>,
    /// Non-empty per-column insights, in the order of `compared`.
    #[serde(default)]
    pub insights: Vec<ColumnInsight>,
}

impl Narrative {
    pub fn get(&self, role: SectionRole) -> Option<&TextBlock> {
        self.blocks.iter().find(|b| b.role == role)
    }

    pub fn insight(&self, column: &str) -> Option<&ColumnInsight> {
        self.insights.iter().find(|i| i.column == column)
    }

    /// Generated deck title, if the model produced one.
    pub fn title(&self) -> Option<&str> {
        self.get(SectionRole::Title).map(|b| b.content.trim())
    }

    /// Roles that were requested but came back empty.
    pub fn missing(&self) -> Vec<SectionRole> {
        self.requested
            .iter()
            .copied()
            .filter(|r| self.get(*r).is_none())
            .collect()
    }

    /// Number of blocks that become body slides (everything but the title).
    pub fn section_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| b.role != SectionRole::Title)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!("Summary".parse::<SectionRole>(), Ok(SectionRole::Summary));
        assert_eq!(" conclusion ".parse::<SectionRole>(), Ok(SectionRole::Conclusion));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = "appendix".parse::<SectionRole>().unwrap_err();
        assert_eq!(err, UnknownRole("appendix".into()));
        assert!(TextBlock::parse("appendix", "x").is_err());
    }

    #[test]
    fn role_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&SectionRole::Introduction).unwrap();
        assert_eq!(json, "\"introduction\"");
        let block: TextBlock =
            serde_json::from_str(r#"{"role":"analysis","content":"a\nb"}"#).unwrap();
        assert_eq!(block.role, SectionRole::Analysis);
        assert_eq!(block.lines(), vec!["a", "b"]);
    }

    #[test]
    fn narrative_reports_missing_roles() {
        let narrative = Narrative {
            requested: vec![SectionRole::Title, SectionRole::Introduction, SectionRole::Summary],
            blocks: vec![
                TextBlock::new(SectionRole::Title, "Revenue Trends "),
                TextBlock::new(SectionRole::Introduction, "one\ntwo"),
            ],
            compared: vec!["units".into()],
            insights: vec![ColumnInsight::new("units", "a\n\n b ")],
        };
        assert_eq!(narrative.title(), Some("Revenue Trends"));
        assert_eq!(narrative.missing(), vec![SectionRole::Summary]);
        assert_eq!(narrative.section_count(), 1);
        assert_eq!(narrative.insight("units").unwrap().lines(), vec!["a", "b"]);
        assert!(narrative.insight("region").is_none());
    }

    #[test]
    fn narrative_without_insights_still_deserializes() {
        let narrative: Narrative =
            serde_json::from_str(r#"{"requested":["title"],"blocks":[]}"#).unwrap();
        assert!(narrative.compared.is_empty());
        assert!(narrative.insights.is_empty());
    }
}
