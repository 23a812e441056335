//! Environment health checks for `sheetdeck doctor`.

use deck_ai::TextProvider;
use deck_convert::DocumentConverter;
use deck_core::DeckConfig;
use serde::Serialize;
use tracing::debug;

/// Result status for a single health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Warn => write!(f, "WARN"),
            CheckStatus::Fail => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub fix_suggestion: Option<String>,
}

impl DoctorCheck {
    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            message: message.into(),
            fix_suggestion: None,
        }
    }

    fn problem(
        name: &str,
        status: CheckStatus,
        message: impl Into<String>,
        fix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            fix_suggestion: Some(fix.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DoctorSummary {
    pub pass: usize,
    pub warn: usize,
    pub fail: usize,
    pub total: usize,
}

impl DoctorSummary {
    pub fn of(checks: &[DoctorCheck]) -> Self {
        let count = |s: CheckStatus| checks.iter().filter(|c| c.status == s).count();
        Self {
            pass: count(CheckStatus::Pass),
            warn: count(CheckStatus::Warn),
            fail: count(CheckStatus::Fail),
            total: checks.len(),
        }
    }

    pub fn healthy(&self) -> bool {
        self.fail == 0
    }
}

/// Probe the inference service, the configured model and the converter.
pub async fn run_doctor(
    config: &DeckConfig,
    provider: &dyn TextProvider,
    converter: &DocumentConverter,
) -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    let reachable = provider.is_available().await;
    checks.push(if reachable {
        DoctorCheck::pass(
            "Inference service",
            format!("{} answering at {}", provider.name(), config.ollama_url),
        )
    } else {
        DoctorCheck::problem(
            "Inference service",
            CheckStatus::Fail,
            format!("nothing answering at {}", config.ollama_url),
            "Start Ollama with 'ollama serve' or set SHEETDECK_OLLAMA_URL",
        )
    });

    checks.push(if reachable {
        check_model(config, provider).await
    } else {
        DoctorCheck::problem(
            "Model",
            CheckStatus::Warn,
            format!("cannot check for '{}' while the service is down", config.model),
            format!("Run 'ollama pull {}' once the service is up", config.model),
        )
    });

    checks.push(match converter.locate() {
        Ok(path) => DoctorCheck::pass("Converter", format!("found {}", path.display())),
        Err(e) => DoctorCheck::problem(
            "Converter",
            CheckStatus::Fail,
            e.reason().to_string(),
            "Install LibreOffice or set SHEETDECK_CONVERTER to the soffice binary",
        ),
    });

    debug!(count = checks.len(), "doctor checks completed");
    checks
}

async fn check_model(config: &DeckConfig, provider: &dyn TextProvider) -> DoctorCheck {
    match provider.list_models().await {
        Ok(models) if has_model(&models, &config.model) => {
            DoctorCheck::pass("Model", format!("'{}' is available", config.model))
        }
        Ok(models) => DoctorCheck::problem(
            "Model",
            CheckStatus::Fail,
            format!(
                "'{}' is not pulled (available: {})",
                config.model,
                if models.is_empty() {
                    "none".to_string()
                } else {
                    models.join(", ")
                }
            ),
            format!("Run 'ollama pull {}'", config.model),
        ),
        Err(e) => DoctorCheck::problem(
            "Model",
            CheckStatus::Warn,
            format!("could not list models: {e}"),
            "Check the Ollama logs",
        ),
    }
}

/// `llama3.2` matches `llama3.2` and `llama3.2:latest`.
fn has_model(models: &[String], wanted: &str) -> bool {
    models.iter().any(|m| {
        m == wanted
            || m.split_once(':')
                .is_some_and(|(base, tag)| base == wanted && tag == "latest")
    })
}
