//! The end-to-end run: load, render, generate, assemble, convert.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use deck_ai::{NarrativeGenerator, NarrativePlan, NarrativeRequest, OllamaProvider, TextProvider};
use deck_convert::DocumentConverter;
use deck_core::{DeckConfig, PipelineError, Stage};
use deck_data::{
    ChartImage, ChartOptions, ChartRequest, Dataset, DatasetSummary, render_chart,
    render_comparison,
};
use deck_docs::{AssemblerOptions, DeckAssembler, DeckInputs, write_pptx};
use tempfile::TempDir;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::context::{RunContext, RunReport};

/// Owns the collaborators for a run. One pipeline can serve many runs; each
/// run gets its own working directory.
pub struct Pipeline {
    config: DeckConfig,
    provider: Arc<dyn TextProvider>,
    converter: DocumentConverter,
}

impl Pipeline {
    /// Build a pipeline talking to the Ollama endpoint from `config`.
    pub fn new(config: DeckConfig) -> Self {
        let provider = Arc::new(OllamaProvider::new(
            Some(config.ollama_url.clone()),
            config.generation_timeout(),
        ));
        Self::with_provider(config, provider)
    }

    pub fn with_provider(config: DeckConfig, provider: Arc<dyn TextProvider>) -> Self {
        let converter = DocumentConverter::new(
            config.converter_bin.clone(),
            config.convert_format.clone(),
            config.conversion_timeout(),
        );
        Self {
            config,
            provider,
            converter,
        }
    }

    pub fn config(&self) -> &DeckConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn TextProvider> {
        &self.provider
    }

    pub fn converter(&self) -> &DocumentConverter {
        &self.converter
    }

    /// Run every stage in order and stop at the first failure. The output
    /// file is only written when every stage succeeded.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunReport, PipelineError> {
        let span = info_span!("run", run_id = %ctx.run_id, file = %ctx.file_name);
        async {
            let result = self.run_stages(ctx).await;
            match &result {
                Ok(report) => info!(
                    output = %report.output.display(),
                    slides = report.slide_count,
                    bytes = report.bytes,
                    elapsed_ms = report.elapsed().num_milliseconds(),
                    "run finished"
                ),
                Err(e) => error!(stage = %e.stage(), kind = e.kind(), "{}", e.reason()),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(&self, ctx: &RunContext) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();

        // Load
        info!(stage = %Stage::Load, bytes = ctx.input.len(), "stage started");
        let workdir = create_workdir(&std::env::temp_dir(), ctx)?;
        let dataset = Dataset::from_bytes(&ctx.input)?;
        let summary = DatasetSummary::compute(&dataset, &ctx.column)?;
        debug!(
            rows = dataset.row_count(),
            columns = dataset.column_count(),
            "dataset loaded"
        );

        // Render
        info!(stage = %Stage::Render, kind = %ctx.chart_kind, column = %ctx.column, "stage started");
        let options = ChartOptions {
            width: self.config.chart_width,
            height: self.config.chart_height,
            max_bars: self.config.max_bars,
        };
        let chart = render_chart(
            &dataset,
            &ChartRequest::new(ctx.column.clone(), ctx.chart_kind),
            &options,
        )?;
        let comparisons = self.render_comparisons(&dataset, &summary, ctx, &options);

        // Generate
        info!(stage = %Stage::Generate, model = %self.config.model, "stage started");
        let plan = NarrativePlan::from_names(&self.config.sections, self.config.always_summary)
            .map_err(|e| PipelineError::Generation(e.to_string()))?;
        let generator = NarrativeGenerator::new(self.provider.clone(), self.config.model.clone())
            .with_plan(plan)
            .with_temperature(self.config.temperature)
            .with_retries(self.config.generation_retries)
            .with_max_bullets(self.config.max_bullets)
            .with_column_insights(if self.config.detailed_insights {
                self.config.max_compared_columns
            } else {
                0
            });
        let narrative = generator
            .generate(NarrativeRequest {
                summary: &summary,
                prompt: ctx.prompt.as_deref(),
                min_slides: ctx.min_slides,
            })
            .await?;

        // Assemble
        info!(stage = %Stage::Assemble, min_slides = ctx.min_slides, "stage started");
        let deck = DeckAssembler::new(AssemblerOptions::from_config(&self.config, ctx.min_slides))
            .assemble(DeckInputs {
                summary: &summary,
                narrative: &narrative,
                chart: &chart,
                comparisons: &comparisons,
            });
        let pptx_path = workdir.path().join(format!("{}.pptx", ctx.stem()));
        write_pptx(&deck, &pptx_path)?;

        // Convert
        info!(stage = %Stage::Convert, format = %self.converter.format(), "stage started");
        let converted = self.converter.convert(&pptx_path).await?;
        let bytes = deliver(&converted, &ctx.output)?;

        Ok(RunReport {
            run_id: ctx.run_id,
            output: ctx.output.clone(),
            format: self.converter.format().to_string(),
            slide_count: deck.len(),
            bytes,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// One chart per compared column. Only the target chart is required, so a
    /// pair that cannot be drawn is logged and left out.
    fn render_comparisons(
        &self,
        dataset: &Dataset,
        summary: &DatasetSummary,
        ctx: &RunContext,
        options: &ChartOptions,
    ) -> Vec<ChartImage> {
        if !self.config.comparison_plots {
            return Vec::new();
        }
        summary
            .other_columns()
            .into_iter()
            .take(self.config.max_compared_columns)
            .filter_map(|other| {
                match render_comparison(dataset, &ctx.column, other, ctx.chart_kind, options) {
                    Ok(image) => Some(image),
                    Err(e) => {
                        warn!(column = %other, "comparison plot skipped: {}", e.reason());
                        None
                    }
                }
            })
            .collect()
    }
}

/// Per-run scratch directory under `root`. Failing here means the input could
/// not be staged, so it is reported against the load stage.
fn create_workdir(root: &Path, ctx: &RunContext) -> Result<TempDir, PipelineError> {
    let workdir = tempfile::Builder::new()
        .prefix(&format!("sheetdeck-{}-", ctx.run_id))
        .tempdir_in(root)
        .map_err(|e| {
            PipelineError::Parse(format!(
                "cannot create working directory in {}: {e}",
                root.display()
            ))
        })?;
    debug!(workdir = %workdir.path().display(), "working directory created");
    Ok(workdir)
}

/// Copy the finished file to where the caller asked for it. The bytes go to a
/// hidden sibling first and are renamed into place, so `to` is either the old
/// file or the complete new one.
fn deliver(from: &Path, to: &Path) -> Result<u64, PipelineError> {
    let dir = match to.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::Conversion(format!("cannot create {}: {e}", parent.display()))
            })?;
            parent
        }
        None => Path::new("."),
    };
    let write_err = |e: std::io::Error| {
        PipelineError::Conversion(format!("cannot write result to {}: {e}", to.display()))
    };

    let mut source = File::open(from).map_err(|e| {
        PipelineError::Conversion(format!("cannot read {}: {e}", from.display()))
    })?;
    let permissions = source.metadata().map_err(write_err)?.permissions();
    let mut partial = tempfile::Builder::new()
        .prefix(".sheetdeck-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(write_err)?;
    let bytes = std::io::copy(&mut source, partial.as_file_mut()).map_err(write_err)?;
    partial.as_file().sync_all().map_err(write_err)?;
    std::fs::set_permissions(partial.path(), permissions).map_err(write_err)?;
    partial.persist(to).map_err(|e| write_err(e.error))?;
    debug!(to = %to.display(), bytes, "result delivered");
    Ok(bytes)
}
