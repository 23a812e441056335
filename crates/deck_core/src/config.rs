use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Environment variable naming the inference service base URL.
pub const ENV_OLLAMA_URL: &str = "SHEETDECK_OLLAMA_URL";
/// Fallback variable understood by Ollama itself (`host:port` or a URL).
pub const ENV_OLLAMA_HOST: &str = "OLLAMA_HOST";
/// Environment variable naming the document converter binary.
pub const ENV_CONVERTER: &str = "SHEETDECK_CONVERTER";

/// Output formats the converter is allowed to produce.
pub const SUPPORTED_FORMATS: &[&str] = &["odp", "pdf", "pptx"];

/// Section names accepted in `sections`.
pub const KNOWN_SECTIONS: &[&str] = &[
    "title",
    "introduction",
    "comparison",
    "analysis",
    "summary",
    "bullets",
    "conclusion",
];

/// What to do when the model returns nothing usable for a requested section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptySectionPolicy {
    /// Leave the slide out; only the aggregate minimum is padded.
    #[default]
    Omit,
    /// Keep the slide with a generic placeholder body.
    Placeholder,
}

/// Run configuration.
///
/// Nothing is persisted: values come from the defaults, an optional JSON file
/// passed on the command line, and the two service-location env variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    // Inference service
    pub ollama_url: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub generation_timeout_secs: u64,
    pub generation_retries: u32,

    // Narrative shaping
    pub max_bullets: usize,
    pub always_summary: bool,
    pub sections: Vec<String>,
    pub empty_section_policy: EmptySectionPolicy,

    // Converter
    pub converter_bin: String,
    pub convert_format: String,
    pub conversion_timeout_secs: u64,

    // Chart
    pub chart_width: u32,
    pub chart_height: u32,
    pub max_bars: usize,

    // Deck layout
    pub overview_slide: bool,
    pub closing_slide: bool,
    pub comparison_insights: bool,
    /// One chart per other column, plotted against the target.
    pub comparison_plots: bool,
    /// One generated insight slide per other column.
    pub detailed_insights: bool,
    /// Index pages when `min_slides` exceeds twice the column count.
    pub index_slide: bool,
    /// Caps the other columns that get plots and insight slides.
    pub max_compared_columns: usize,

    // General
    pub log_level: String,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            temperature: None,
            generation_timeout_secs: 120,
            generation_retries: 1,
            max_bullets: 6,
            always_summary: false,
            sections: vec![
                "title".into(),
                "introduction".into(),
                "comparison".into(),
                "analysis".into(),
                "conclusion".into(),
            ],
            empty_section_policy: EmptySectionPolicy::Omit,
            converter_bin: "soffice".into(),
            convert_format: "odp".into(),
            conversion_timeout_secs: 120,
            chart_width: 800,
            chart_height: 500,
            max_bars: 20,
            overview_slide: true,
            closing_slide: true,
            comparison_insights: true,
            comparison_plots: true,
            detailed_insights: true,
            index_slide: true,
            max_compared_columns: 10,
            log_level: "info".into(),
        }
    }
}

impl DeckConfig {
    /// Load a config file. Missing keys fall back to their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config JSON: {}", path.display()))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Defaults, then the optional file, then environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply the service-location overrides using `lookup` to read variables.
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_OLLAMA_URL) {
            info!(url = %url, "inference service URL taken from {ENV_OLLAMA_URL}");
            self.ollama_url = url.trim().trim_end_matches('/').to_string();
        } else if let Some(host) = non_empty(ENV_OLLAMA_HOST) {
            self.ollama_url = normalize_ollama_host(&host);
            info!(url = %self.ollama_url, "inference service URL taken from {ENV_OLLAMA_HOST}");
        }

        if let Some(bin) = non_empty(ENV_CONVERTER) {
            info!(bin = %bin, "converter binary taken from {ENV_CONVERTER}");
            self.converter_bin = bin.trim().to_string();
        }
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.ollama_url.trim().is_empty() {
            bail!("ollama_url must not be empty");
        }
        if self.model.trim().is_empty() {
            bail!("model must not be empty");
        }
        if self.generation_timeout_secs == 0 {
            bail!("generation_timeout_secs must be greater than zero");
        }
        if self.conversion_timeout_secs == 0 {
            bail!("conversion_timeout_secs must be greater than zero");
        }
        if self.max_bullets == 0 {
            bail!("max_bullets must be at least 1");
        }
        if self.max_bars < 2 {
            bail!("max_bars must be at least 2");
        }
        if self.chart_width < 200 || self.chart_height < 150 {
            bail!(
                "chart size {}x{} is too small (minimum 200x150)",
                self.chart_width,
                self.chart_height
            );
        }
        if let Some(unknown) = self
            .sections
            .iter()
            .find(|s| !KNOWN_SECTIONS.contains(&s.trim().to_ascii_lowercase().as_str()))
        {
            bail!(
                "Unknown section '{unknown}' (expected one of: {})",
                KNOWN_SECTIONS.join(", ")
            );
        }
        if self.converter_bin.trim().is_empty() {
            bail!("converter_bin must not be empty");
        }
        if !SUPPORTED_FORMATS.contains(&self.convert_format.as_str()) {
            bail!(
                "Unsupported convert_format '{}' (expected one of: {})",
                self.convert_format,
                SUPPORTED_FORMATS.join(", ")
            );
        }
        Ok(())
    }

    pub fn generation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn conversion_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.conversion_timeout_secs)
    }
}

/// `OLLAMA_HOST` may be `0.0.0.0:11434`, `localhost` or a full URL.
fn normalize_ollama_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    let with_scheme = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };
    let authority = with_scheme
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    if authority.contains(':') {
        with_scheme
    } else {
        format!("{with_scheme}:11434")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = DeckConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.convert_format, "odp");
        assert_eq!(config.generation_retries, 1);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deck.json");
        std::fs::write(&path, r#"{"model":"mistral","max_bullets":4}"#).unwrap();

        let config = DeckConfig::load_from(&path).unwrap();
        assert_eq!(config.model, "mistral");
        assert_eq!(config.max_bullets, 4);
        assert_eq!(config.converter_bin, "soffice");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deck.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = DeckConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config JSON"), "got: {err}");
    }

    #[test]
    fn empty_section_policy_parses_lowercase() {
        let config: DeckConfig =
            serde_json::from_str(r#"{"empty_section_policy":"placeholder"}"#).unwrap();
        assert_eq!(config.empty_section_policy, EmptySectionPolicy::Placeholder);
    }

    #[test]
    fn env_url_override_wins_over_ollama_host() {
        let mut config = DeckConfig::default();
        config.apply_env_overrides_with(lookup_from(&[
            (ENV_OLLAMA_URL, "http://gpu-box:11434/"),
            (ENV_OLLAMA_HOST, "other:1"),
        ]));
        assert_eq!(config.ollama_url, "http://gpu-box:11434");
    }

    #[test]
    fn ollama_host_gets_scheme_and_default_port() {
        let mut config = DeckConfig::default();
        config.apply_env_overrides_with(lookup_from(&[(ENV_OLLAMA_HOST, "10.0.0.5")]));
        assert_eq!(config.ollama_url, "http://10.0.0.5:11434");

        let mut config = DeckConfig::default();
        config.apply_env_overrides_with(lookup_from(&[(ENV_OLLAMA_HOST, "0.0.0.0:9999")]));
        assert_eq!(config.ollama_url, "http://0.0.0.0:9999");
    }

    #[test]
    fn converter_override_and_blank_values_ignored() {
        let mut config = DeckConfig::default();
        config.apply_env_overrides_with(lookup_from(&[
            (ENV_CONVERTER, "/opt/libreoffice/program/soffice"),
            (ENV_OLLAMA_URL, "   "),
        ]));
        assert_eq!(config.converter_bin, "/opt/libreoffice/program/soffice");
        assert_eq!(config.ollama_url, "http://localhost:11434");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = DeckConfig::default();
        config.convert_format = "key".into();
        assert!(config.validate().unwrap_err().to_string().contains("Unsupported"));

        let mut config = DeckConfig::default();
        config.generation_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = DeckConfig::default();
        config.chart_width = 10;
        assert!(config.validate().is_err());

        let mut config = DeckConfig::default();
        config.max_bullets = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn per_column_slides_can_be_switched_off() {
        let config: DeckConfig = serde_json::from_str(
            r#"{"comparison_plots":false,"detailed_insights":false,"max_compared_columns":3}"#,
        )
        .unwrap();
        assert!(!config.comparison_plots);
        assert!(!config.detailed_insights);
        assert!(config.index_slide);
        assert_eq!(config.max_compared_columns, 3);
        assert_eq!(DeckConfig::default().max_compared_columns, 10);
    }

    #[test]
    fn validate_checks_section_names() {
        let mut config = DeckConfig::default();
        config.sections = vec!["Title".into(), "summary".into()];
        assert!(config.validate().is_ok());

        config.sections.push("appendix".into());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("appendix"), "{err}");
    }
}
