use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deck_ai::{GenerateRequest, GenerateResponse, ProviderError, TextProvider};
use deck_app::{Pipeline, RunContext};
use deck_core::{DeckConfig, PipelineError, Stage};
use deck_data::ChartKind;

const SALES: &str = "date,revenue\n2024-01,10\n2024-02,12\n2024-03,9\n2024-04,15\n2024-05,11\n";

/// Answers every prompt with canned bullets and counts calls.
struct CannedProvider {
    calls: AtomicUsize,
    failure: Option<ProviderError>,
}

impl CannedProvider {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failure: None,
        })
    }

    fn failing(err: ProviderError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failure: Some(err),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextProvider for CannedProvider {
    fn name(&self) -> &str {
        "canned"
    }

    async fn is_available(&self) -> bool {
        self.failure.is_none()
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["llama3.2:latest".into()])
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let text = if request.prompt.contains("5-word title") {
            "\"Monthly Revenue At A Glance\"".to_string()
        } else {
            "1. Revenue peaked in April.\n2. March was the weakest month.\n3. The trend is upward."
                .to_string()
        };
        Ok(GenerateResponse {
            text,
            model: request.model.clone(),
            prompt_tokens: 0,
            completion_tokens: 0,
        })
    }
}

fn context(dir: &Path, csv: &str, column: &str, kind: ChartKind, min_slides: usize) -> RunContext {
    RunContext::new(
        "sales.csv",
        csv.as_bytes().to_vec(),
        column,
        kind,
        min_slides,
        dir.join("out").join("sales.odp"),
    )
}

fn config_with_converter(bin: &Path) -> DeckConfig {
    DeckConfig {
        converter_bin: bin.to_string_lossy().into_owned(),
        conversion_timeout_secs: 30,
        ..DeckConfig::default()
    }
}

fn unusable_converter(dir: &Path) -> DeckConfig {
    config_with_converter(&dir.join("no-converter-here"))
}

// ---------------------------------------------------------------------------
// Failures before conversion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_column_is_a_column_error_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let provider = CannedProvider::ok();
    let pipeline = Pipeline::with_provider(unusable_converter(dir.path()), provider.clone());

    let ctx = context(dir.path(), SALES, "profit", ChartKind::Bar, 3);
    let err = pipeline.run(&ctx).await.unwrap_err();

    assert!(matches!(err, PipelineError::Column(_)), "got {err:?}");
    assert_eq!(err.stage(), Stage::Load);
    assert!(err.reason().contains("date, revenue"), "{}", err.reason());
    assert_eq!(provider.calls(), 0);
    assert!(!ctx.output.exists());
}

#[tokio::test]
async fn empty_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::with_provider(unusable_converter(dir.path()), CannedProvider::ok());

    let ctx = context(dir.path(), "", "revenue", ChartKind::Bar, 3);
    let err = pipeline.run(&ctx).await.unwrap_err();
    assert!(matches!(err, PipelineError::Parse(_)), "got {err:?}");
    assert!(err.user_message().starts_with("Data loading failed"));
}

#[tokio::test]
async fn numeric_chart_on_text_column_is_a_render_error() {
    let dir = tempfile::tempdir().unwrap();
    let provider = CannedProvider::ok();
    let pipeline = Pipeline::with_provider(unusable_converter(dir.path()), provider.clone());

    let ctx = context(dir.path(), SALES, "date", ChartKind::Box, 3);
    let err = pipeline.run(&ctx).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Render);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn unreachable_service_fails_after_one_retry() {
    let dir = tempfile::tempdir().unwrap();
    let provider = CannedProvider::failing(ProviderError::Unreachable("connection refused".into()));
    let pipeline = Pipeline::with_provider(unusable_converter(dir.path()), provider.clone());

    let ctx = context(dir.path(), SALES, "revenue", ChartKind::Bar, 3);
    let err = pipeline.run(&ctx).await.unwrap_err();

    assert!(matches!(err, PipelineError::Generation(_)), "got {err:?}");
    assert_eq!(provider.calls(), 2);
    assert!(!ctx.output.exists());
}

#[tokio::test]
async fn real_provider_against_closed_port_is_a_generation_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let config = DeckConfig {
        ollama_url: format!("http://{addr}"),
        generation_timeout_secs: 5,
        ..unusable_converter(dir.path())
    };
    let pipeline = Pipeline::new(config);

    let ctx = context(dir.path(), SALES, "revenue", ChartKind::Scatter, 2);
    let err = pipeline.run(&ctx).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Generate);
    assert!(err.reason().contains("unreachable"), "{}", err.reason());
    assert!(!ctx.output.exists());
}

#[tokio::test]
async fn missing_converter_is_a_conversion_error() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::with_provider(unusable_converter(dir.path()), CannedProvider::ok());

    let ctx = context(dir.path(), SALES, "revenue", ChartKind::Bar, 3);
    let err = pipeline.run(&ctx).await.unwrap_err();
    assert!(matches!(err, PipelineError::Conversion(_)), "got {err:?}");
    assert!(!ctx.output.exists());
}

// ---------------------------------------------------------------------------
// Full runs with a stand-in converter
// ---------------------------------------------------------------------------

#[cfg(unix)]
mod full_run {
    use super::*;
    use std::io::{Cursor, Read};
    use std::os::unix::fs::PermissionsExt;

    /// A converter that copies its input to `<outdir>/<stem>.<format>`.
    fn copying_converter(dir: &Path) -> PathBuf {
        script(
            dir,
            "fake-soffice",
            r#"name=$(basename "$6"); cp "$6" "$5/${name%.*}.$3""#,
        )
    }

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn slide_xml(bytes: &[u8]) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names: Vec<String> = archive
            .file_names()
            .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
            .map(String::from)
            .collect();
        names.sort_by_key(|n| {
            n.trim_start_matches("ppt/slides/slide")
                .trim_end_matches(".xml")
                .parse::<usize>()
                .unwrap()
        });
        names
            .iter()
            .map(|n| {
                let mut xml = String::new();
                archive.by_name(n).unwrap().read_to_string(&mut xml).unwrap();
                xml
            })
            .collect()
    }

    #[tokio::test]
    async fn bar_chart_run_produces_deck() {
        let dir = tempfile::tempdir().unwrap();
        let bin = copying_converter(dir.path());
        let provider = CannedProvider::ok();
        let pipeline = Pipeline::with_provider(config_with_converter(&bin), provider.clone());

        let ctx = context(dir.path(), SALES, "revenue", ChartKind::Bar, 3);
        let report = pipeline.run(&ctx).await.unwrap();

        assert_eq!(report.run_id, ctx.run_id);
        assert_eq!(report.format, "odp");
        assert!(report.slide_count >= 3);
        assert!(report.bytes > 0);
        assert_eq!(std::fs::metadata(&ctx.output).unwrap().len(), report.bytes);
        // Five sections plus insights for the one other column.
        assert_eq!(provider.calls(), 6);

        let slides = slide_xml(&std::fs::read(&ctx.output).unwrap());
        assert_eq!(slides.len(), report.slide_count);
        assert!(slides[0].contains("Monthly Revenue At A Glance"));
        let charts = slides.iter().filter(|s| s.contains("<p:pic>")).count();
        assert_eq!(charts, 2);
        assert!(slides.iter().any(|s| s.contains("Comparison Plot: revenue vs date")));
        assert!(slides.iter().any(|s| s.contains("Detailed Insights: revenue vs date")));
        assert!(slides.iter().any(|s| s.contains("Revenue peaked in April.")));
    }

    #[tokio::test]
    async fn per_column_slides_can_be_switched_off() {
        let dir = tempfile::tempdir().unwrap();
        let bin = copying_converter(dir.path());
        let provider = CannedProvider::ok();
        let config = DeckConfig {
            comparison_plots: false,
            detailed_insights: false,
            ..config_with_converter(&bin)
        };
        let pipeline = Pipeline::with_provider(config, provider.clone());

        let ctx = context(dir.path(), SALES, "revenue", ChartKind::Bar, 3);
        pipeline.run(&ctx).await.unwrap();

        assert_eq!(provider.calls(), 5);
        let slides = slide_xml(&std::fs::read(&ctx.output).unwrap());
        assert_eq!(slides.iter().filter(|s| s.contains("<p:pic>")).count(), 1);
        assert!(!slides.iter().any(|s| s.contains("Detailed Insights")));
    }

    #[tokio::test]
    async fn large_minimum_adds_an_index() {
        let dir = tempfile::tempdir().unwrap();
        let bin = copying_converter(dir.path());
        let pipeline = Pipeline::with_provider(config_with_converter(&bin), CannedProvider::ok());

        let ctx = context(dir.path(), SALES, "revenue", ChartKind::Bar, 12);
        let report = pipeline.run(&ctx).await.unwrap();
        assert!(report.slide_count >= 12);
        let slides = slide_xml(&std::fs::read(&ctx.output).unwrap());
        assert!(slides.iter().any(|s| s.contains("Index of Slides")));
    }

    #[tokio::test]
    async fn minimum_slide_count_is_always_met() {
        let dir = tempfile::tempdir().unwrap();
        let bin = copying_converter(dir.path());
        let pipeline = Pipeline::with_provider(config_with_converter(&bin), CannedProvider::ok());

        for min in [1, 4, 9, 16] {
            let ctx = context(dir.path(), SALES, "revenue", ChartKind::Scatter, min);
            let report = pipeline.run(&ctx).await.unwrap();
            assert!(report.slide_count >= min, "min={min} got {}", report.slide_count);
            let slides = slide_xml(&std::fs::read(&ctx.output).unwrap());
            assert_eq!(slides.len(), report.slide_count);
        }
    }

    #[tokio::test]
    async fn summary_prompt_adds_summary_slide() {
        let dir = tempfile::tempdir().unwrap();
        let bin = copying_converter(dir.path());
        let provider = CannedProvider::ok();
        let pipeline = Pipeline::with_provider(config_with_converter(&bin), provider.clone());

        let ctx = context(dir.path(), SALES, "revenue", ChartKind::Hexbin, 3)
            .with_prompt(Some("Please add a summary slide".into()));
        pipeline.run(&ctx).await.unwrap();

        assert_eq!(provider.calls(), 7);
        let slides = slide_xml(&std::fs::read(&ctx.output).unwrap());
        assert!(slides.iter().any(|s| s.contains("Summary of Findings")));
    }

    #[tokio::test]
    async fn converter_without_output_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "lazy-soffice", "exit 0");
        let pipeline = Pipeline::with_provider(config_with_converter(&bin), CannedProvider::ok());

        let ctx = context(dir.path(), SALES, "revenue", ChartKind::Bar, 3);
        let err = pipeline.run(&ctx).await.unwrap_err();
        assert_eq!(err.stage(), Stage::Convert);
        assert!(!ctx.output.exists());
    }

    #[tokio::test]
    async fn slow_converter_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "slow-soffice", "exec sleep 30");
        let mut config = config_with_converter(&bin);
        config.conversion_timeout_secs = 1;
        let pipeline = Pipeline::with_provider(config, CannedProvider::ok());

        let ctx = context(dir.path(), SALES, "revenue", ChartKind::Box, 2);
        let started = std::time::Instant::now();
        let err = pipeline.run(&ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Conversion(_)), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(15));
        assert!(!ctx.output.exists());
    }
}
