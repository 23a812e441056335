//! Raster charts for the target column, encoded as PNG.
//!
//! Charts carry no text; axis ranges and category names travel in
//! [`ChartImage::caption`] so the slide can print them.

use std::collections::HashMap;
use std::io::Cursor;

use deck_core::PipelineError;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{Column, Dataset};
use crate::stats::{category_counts, mean, quantile};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([68, 68, 68]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const TEAL: Rgb<u8> = Rgb([0, 128, 128]);
const LIGHT_CORAL: Rgb<u8> = Rgb([240, 128, 128]);
const LIGHT_BLUE: Rgb<u8> = Rgb([173, 216, 230]);
const LIGHT_GREEN: Rgb<u8> = Rgb([144, 238, 144]);
const NAVY: Rgb<u8> = Rgb([0, 51, 102]);
const BLUES_LOW: [f64; 3] = [222.0, 235.0, 247.0];
const BLUES_HIGH: [f64; 3] = [8.0, 48.0, 107.0];
/// Qualitative palette for stacked segments.
const SET2: [Rgb<u8>; 8] = [
    Rgb([102, 194, 165]),
    Rgb([252, 141, 98]),
    Rgb([141, 160, 203]),
    Rgb([231, 138, 195]),
    Rgb([166, 216, 84]),
    Rgb([255, 217, 47]),
    Rgb([229, 196, 148]),
    Rgb([179, 179, 179]),
];

const MARGIN_LEFT: u32 = 56;
const MARGIN_RIGHT: u32 = 24;
const MARGIN_TOP: u32 = 24;
const MARGIN_BOTTOM: u32 = 40;
/// Smallest canvas that leaves a usable plot area inside the margins.
pub const MIN_WIDTH: u32 = 200;
pub const MIN_HEIGHT: u32 = 150;
const HEXBIN_GRID: f64 = 20.0;
/// Equal-width bins used when a numeric target groups another column.
const PAIR_BINS: usize = 3;
const OTHER_LABEL: &str = "Other";

/// Supported chart kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Scatter,
    Hexbin,
    Box,
    Bar,
}

impl ChartKind {
    pub const ALL: [ChartKind; 4] = [Self::Scatter, Self::Hexbin, Self::Box, Self::Bar];

    /// Whether the kind only makes sense for numeric data.
    pub fn requires_numeric(self) -> bool {
        !matches!(self, Self::Bar)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scatter => "scatter",
            Self::Hexbin => "hexbin",
            Self::Box => "box",
            Self::Bar => "bar",
        }
    }
}

impl std::fmt::Display for ChartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scatter" => Ok(Self::Scatter),
            "hexbin" => Ok(Self::Hexbin),
            "box" => Ok(Self::Box),
            "bar" => Ok(Self::Bar),
            other => Err(format!(
                "unknown chart kind '{other}' (expected scatter, hexbin, box or bar)"
            )),
        }
    }
}

/// Which column to chart and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRequest {
    pub column: String,
    pub kind: ChartKind,
}

impl ChartRequest {
    pub fn new(column: impl Into<String>, kind: ChartKind) -> Self {
        Self {
            column: column.into(),
            kind,
        }
    }

    /// Check the column exists and suits the chart kind.
    pub fn validate(&self, dataset: &Dataset) -> Result<(), PipelineError> {
        let column = dataset.column(&self.column).ok_or_else(|| {
            PipelineError::Render(format!("column '{}' does not exist", self.column))
        })?;
        if self.kind.requires_numeric() && !column.is_numeric() {
            return Err(PipelineError::Render(format!(
                "a {} chart needs a numeric column, but '{}' is {}",
                self.kind,
                self.column,
                column.kind()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartOptions {
    pub width: u32,
    pub height: u32,
    /// Bars beyond this count are folded into one "Other" bar.
    pub max_bars: usize,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 500,
            max_bars: 20,
        }
    }
}

impl ChartOptions {
    fn check(&self) -> Result<(), PipelineError> {
        if self.width < MIN_WIDTH || self.height < MIN_HEIGHT {
            return Err(PipelineError::Render(format!(
                "chart size {}x{} is below the {MIN_WIDTH}x{MIN_HEIGHT} minimum",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// A rendered chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// The kind actually drawn. Pair charts fall back to `Bar` when a
    /// column is categorical.
    pub kind: ChartKind,
    pub column: String,
    /// Second column for pair charts.
    pub compared_with: Option<String>,
    pub caption: String,
}

/// Render `request` against `dataset`.
pub fn render_chart(
    dataset: &Dataset,
    request: &ChartRequest,
    options: &ChartOptions,
) -> Result<ChartImage, PipelineError> {
    options.check()?;
    request.validate(dataset)?;
    let column = dataset.require_column(&request.column).map_err(|e| {
        PipelineError::Render(e.reason().to_string())
    })?;

    let mut canvas = Canvas::new(options.width, options.height);
    let name = column.name();

    let caption = match request.kind {
        ChartKind::Scatter => draw_scatter(&mut canvas, name, &column.indexed_numbers())?,
        ChartKind::Hexbin => draw_hexbin(&mut canvas, name, &column.indexed_numbers())?,
        ChartKind::Box => draw_box(&mut canvas, name, column.numbers())?,
        ChartKind::Bar => draw_bar(&mut canvas, name, column.values(), options.max_bars)?,
    };

    let png = canvas.encode_png()?;
    debug!(
        kind = %request.kind,
        column = name,
        bytes = png.len(),
        "rendered chart"
    );

    Ok(ChartImage {
        png,
        width: options.width,
        height: options.height,
        kind: request.kind,
        column: name.to_string(),
        compared_with: None,
        caption,
    })
}

/// Render `target` against `other`. Two numeric columns get the requested
/// kind; otherwise the chart falls back to a bar form that suits the
/// column kinds:
///
/// - categorical target, numeric other: mean of `other` per target category
/// - numeric target, categorical other: count of `target` per other category
/// - both categorical: stacked counts (crosstab)
pub fn render_comparison(
    dataset: &Dataset,
    target: &str,
    other: &str,
    kind: ChartKind,
    options: &ChartOptions,
) -> Result<ChartImage, PipelineError> {
    options.check()?;
    if target == other {
        return Err(PipelineError::Render(format!(
            "cannot compare column '{target}' with itself"
        )));
    }
    let lookup = |name: &str| {
        dataset
            .column(name)
            .ok_or_else(|| PipelineError::Render(format!("column '{name}' does not exist")))
    };
    let (a, b) = (lookup(target)?, lookup(other)?);

    let mut canvas = Canvas::new(options.width, options.height);
    let (drawn, caption) = match (a.is_numeric(), b.is_numeric()) {
        (true, true) => {
            let pairs = paired_numbers(a, b);
            if pairs.is_empty() {
                return Err(PipelineError::Render(format!(
                    "columns '{target}' and '{other}' share no numeric rows"
                )));
            }
            let caption = match kind {
                ChartKind::Scatter => pair_scatter(&mut canvas, target, other, &pairs),
                ChartKind::Hexbin => pair_hexbin(&mut canvas, target, other, &pairs),
                ChartKind::Box => pair_box(&mut canvas, target, other, &pairs)?,
                ChartKind::Bar => pair_binned_means(&mut canvas, target, other, &pairs)?,
            };
            (kind, caption)
        }
        (false, true) => (
            ChartKind::Bar,
            mean_by_category(&mut canvas, a, b, options.max_bars)?,
        ),
        (true, false) => (
            ChartKind::Bar,
            count_by_category(&mut canvas, a, b, options.max_bars)?,
        ),
        (false, false) => (
            ChartKind::Bar,
            stacked_crosstab(&mut canvas, a, b, options.max_bars)?,
        ),
    };

    let png = canvas.encode_png()?;
    debug!(
        kind = %drawn,
        column = target,
        other,
        bytes = png.len(),
        "rendered comparison chart"
    );

    Ok(ChartImage {
        png,
        width: options.width,
        height: options.height,
        kind: drawn,
        column: target.to_string(),
        compared_with: Some(other.to_string()),
        caption,
    })
}

// ---------------------------------------------------------------------------
// Single-column charts
// ---------------------------------------------------------------------------

fn no_values(column: &str) -> PipelineError {
    PipelineError::Render(format!("column '{column}' has no values to plot"))
}

fn by_row(points: &[(usize, f64)]) -> Vec<(f64, f64)> {
    points.iter().map(|&(row, v)| (row as f64, v)).collect()
}

fn draw_scatter(
    canvas: &mut Canvas,
    column: &str,
    points: &[(usize, f64)],
) -> Result<String, PipelineError> {
    if points.is_empty() {
        return Err(no_values(column));
    }
    let (_, ys) = canvas.plot_points(&by_row(points));
    Ok(format!(
        "Scatter of {column} by row: {} points, values from {} to {}.",
        points.len(),
        fmt_num(ys.data_min),
        fmt_num(ys.data_max)
    ))
}

fn draw_hexbin(
    canvas: &mut Canvas,
    column: &str,
    points: &[(usize, f64)],
) -> Result<String, PipelineError> {
    if points.is_empty() {
        return Err(no_values(column));
    }
    let density = canvas.plot_hexbin(&by_row(points));
    Ok(format!(
        "Hexbin density of {column} by row: {} points in {} bins (up to {} per bin), values from {} to {}.",
        points.len(),
        density.bins,
        density.max_count,
        fmt_num(density.ys.data_min),
        fmt_num(density.ys.data_max)
    ))
}

fn draw_box(canvas: &mut Canvas, column: &str, mut values: Vec<f64>) -> Result<String, PipelineError> {
    if values.is_empty() {
        return Err(no_values(column));
    }
    values.sort_by(f64::total_cmp);
    let stats = BoxStats::from_sorted(&values).ok_or_else(|| no_values(column))?;
    let ys = Scale::fit(values.iter().copied());
    canvas.draw_frame(5);

    let center = (canvas.left() + canvas.right()) / 2.0;
    let half = canvas.plot_width() * 0.15;
    canvas.box_glyph(center, half, &stats, &ys);

    Ok(format!(
        "Box plot of {column}: median {}, quartiles {} to {}, whiskers {} to {}, {} outlier(s).",
        fmt_num(stats.median),
        fmt_num(stats.q1),
        fmt_num(stats.q3),
        fmt_num(stats.whisker_low),
        fmt_num(stats.whisker_high),
        stats.outliers.len()
    ))
}

fn draw_bar(
    canvas: &mut Canvas,
    column: &str,
    values: &[String],
    max_bars: usize,
) -> Result<String, PipelineError> {
    let bars = fold_categories(category_counts(values), max_bars);
    if bars.is_empty() {
        return Err(no_values(column));
    }
    let heights: Vec<f64> = bars.iter().map(|(_, n)| *n as f64).collect();
    canvas.plot_bars(&heights, LIGHT_CORAL);

    Ok(format!(
        "Counts of {column}, left to right: {}.",
        listing(&bars)
    ))
}

// ---------------------------------------------------------------------------
// Pair charts
// ---------------------------------------------------------------------------

/// `(target, other)` for every row where both cells are numbers.
fn paired_numbers(a: &Column, b: &Column) -> Vec<(f64, f64)> {
    a.indexed_numbers()
        .into_iter()
        .filter_map(|(row, x)| b.number_at(row).map(|y| (x, y)))
        .collect()
}

fn pair_scatter(canvas: &mut Canvas, target: &str, other: &str, pairs: &[(f64, f64)]) -> String {
    let (xs, ys) = canvas.plot_points(pairs);
    format!(
        "Scatter of {other} against {target}: {} rows, {target} from {} to {}, {other} from {} to {}.",
        pairs.len(),
        fmt_num(xs.data_min),
        fmt_num(xs.data_max),
        fmt_num(ys.data_min),
        fmt_num(ys.data_max)
    )
}

fn pair_hexbin(canvas: &mut Canvas, target: &str, other: &str, pairs: &[(f64, f64)]) -> String {
    let density = canvas.plot_hexbin(pairs);
    format!(
        "Hexbin density of {other} against {target}: {} rows in {} bins (up to {} per bin).",
        pairs.len(),
        density.bins,
        density.max_count
    )
}

/// `other` values grouped by equal-width bins of `target`, empty bins dropped.
fn binned(pairs: &[(f64, f64)]) -> Vec<(String, Vec<f64>)> {
    let bins = Bins::fit(pairs.iter().map(|p| p.0));
    let mut groups: Vec<Vec<f64>> = vec![Vec::new(); bins.count];
    for &(x, y) in pairs {
        groups[bins.index(x)].push(y);
    }
    groups
        .into_iter()
        .enumerate()
        .filter(|(_, g)| !g.is_empty())
        .map(|(i, g)| (bins.label(i), g))
        .collect()
}

fn pair_box(
    canvas: &mut Canvas,
    target: &str,
    other: &str,
    pairs: &[(f64, f64)],
) -> Result<String, PipelineError> {
    let groups = binned(pairs);
    let ys = Scale::fit(pairs.iter().map(|p| p.1));
    canvas.draw_frame(5);

    let slot = canvas.plot_width() / groups.len() as f64;
    let mut parts = Vec::with_capacity(groups.len());
    for (i, (label, mut values)) in groups.into_iter().enumerate() {
        values.sort_by(f64::total_cmp);
        let stats = BoxStats::from_sorted(&values).ok_or_else(|| no_values(other))?;
        let center = canvas.left() + slot * (i as f64 + 0.5);
        canvas.box_glyph(center, slot * 0.3, &stats, &ys);
        parts.push(format!(
            "{target} {label}: median {} ({} rows)",
            fmt_num(stats.median),
            values.len()
        ));
    }

    Ok(format!(
        "Box plots of {other} by {target} range, left to right: {}.",
        parts.join("; ")
    ))
}

fn pair_binned_means(
    canvas: &mut Canvas,
    target: &str,
    other: &str,
    pairs: &[(f64, f64)],
) -> Result<String, PipelineError> {
    let means: Vec<(String, f64)> = binned(pairs)
        .into_iter()
        .filter_map(|(label, values)| mean(&values).map(|m| (label, m)))
        .collect();
    if means.is_empty() {
        return Err(no_values(other));
    }
    let heights: Vec<f64> = means.iter().map(|(_, m)| *m).collect();
    canvas.plot_bars(&heights, LIGHT_CORAL);

    let parts: Vec<String> = means
        .iter()
        .map(|(label, m)| format!("{target} {label}: {}", fmt_num(*m)))
        .collect();
    Ok(format!(
        "Mean {other} by {target} range, left to right: {}.",
        parts.join("; ")
    ))
}

fn mean_by_category(
    canvas: &mut Canvas,
    target: &Column,
    other: &Column,
    max_bars: usize,
) -> Result<String, PipelineError> {
    let mut groups: Vec<(String, Vec<f64>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (row, key) in target.values().iter().enumerate() {
        let Some(value) = other.number_at(row).filter(|_| !key.is_empty()) else {
            continue;
        };
        let slot = *index.entry(key.as_str()).or_insert_with(|| {
            groups.push((key.clone(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(value);
    }
    if groups.is_empty() {
        return Err(no_values(other.name()));
    }
    // Largest groups first; stable so ties keep first appearance.
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    let hidden = groups.len().saturating_sub(max_bars.max(1));
    groups.truncate(max_bars.max(1));

    let means: Vec<(String, f64)> = groups
        .into_iter()
        .filter_map(|(k, v)| mean(&v).map(|m| (k, m)))
        .collect();
    let heights: Vec<f64> = means.iter().map(|(_, m)| *m).collect();
    canvas.plot_bars(&heights, LIGHT_GREEN);

    let parts: Vec<String> = means
        .iter()
        .map(|(k, m)| format!("{k} ({})", fmt_num(*m)))
        .collect();
    let mut caption = format!(
        "Mean {} by {}, left to right: {}.",
        other.name(),
        target.name(),
        parts.join(", ")
    );
    if hidden > 0 {
        caption.push_str(&format!(" {hidden} smaller categories not shown."));
    }
    Ok(caption)
}

fn count_by_category(
    canvas: &mut Canvas,
    target: &Column,
    other: &Column,
    max_bars: usize,
) -> Result<String, PipelineError> {
    let keys: Vec<String> = target
        .indexed_numbers()
        .into_iter()
        .filter_map(|(row, _)| other.values().get(row).cloned())
        .collect();
    let bars = fold_categories(category_counts(&keys), max_bars);
    if bars.is_empty() {
        return Err(no_values(other.name()));
    }
    let heights: Vec<f64> = bars.iter().map(|(_, n)| *n as f64).collect();
    canvas.plot_bars(&heights, LIGHT_BLUE);

    Ok(format!(
        "Count of {} by {}, left to right: {}.",
        target.name(),
        other.name(),
        listing(&bars)
    ))
}

fn stacked_crosstab(
    canvas: &mut Canvas,
    target: &Column,
    other: &Column,
    max_bars: usize,
) -> Result<String, PipelineError> {
    let rows: Vec<(&str, &str)> = target
        .values()
        .iter()
        .zip(other.values())
        .filter(|(a, b)| !a.is_empty() && !b.is_empty())
        .map(|(a, b)| (a.as_str(), b.as_str()))
        .collect();
    if rows.is_empty() {
        return Err(PipelineError::Render(format!(
            "columns '{}' and '{}' share no filled rows",
            target.name(),
            other.name()
        )));
    }

    let target_keys: Vec<String> = rows.iter().map(|(a, _)| a.to_string()).collect();
    let other_keys: Vec<String> = rows.iter().map(|(_, b)| b.to_string()).collect();
    let bars = fold_categories(category_counts(&target_keys), max_bars);
    let series = fold_categories(category_counts(&other_keys), SET2.len());
    let slot_of = |folded: &[(String, usize)], key: &str| {
        folded
            .iter()
            .position(|(k, _)| k == key)
            .unwrap_or(folded.len() - 1)
    };

    let mut matrix = vec![vec![0usize; series.len()]; bars.len()];
    for (a, b) in &rows {
        matrix[slot_of(&bars, a)][slot_of(&series, b)] += 1;
    }

    let totals: Vec<f64> = matrix.iter().map(|r| r.iter().sum::<usize>() as f64).collect();
    canvas.plot_stacks(&matrix, &totals);

    let stack_names: Vec<&str> = series.iter().map(|(k, _)| k.as_str()).collect();
    Ok(format!(
        "Counts of {} split by {}; bars left to right: {}; segments bottom to top: {}.",
        target.name(),
        other.name(),
        listing(&bars),
        stack_names.join(", ")
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn listing(bars: &[(String, usize)]) -> String {
    bars.iter()
        .map(|(label, n)| format!("{label} ({n})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Keep the `max_bars - 1` largest categories and fold the rest into "Other".
fn fold_categories(counts: Vec<(String, usize)>, max_bars: usize) -> Vec<(String, usize)> {
    let max_bars = max_bars.max(2);
    if counts.len() <= max_bars {
        return counts;
    }
    let mut kept: Vec<(String, usize)> = counts[..max_bars - 1].to_vec();
    let rest: usize = counts[max_bars - 1..].iter().map(|(_, n)| n).sum();
    kept.push((OTHER_LABEL.to_string(), rest));
    kept
}

/// Equal-width bins over the observed range.
#[derive(Debug, Clone, Copy)]
struct Bins {
    min: f64,
    max: f64,
    count: usize,
}

impl Bins {
    fn fit(values: impl Iterator<Item = f64>) -> Self {
        let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let (min, max) = if min.is_finite() { (min, max) } else { (0.0, 0.0) };
        // A constant column gets one bin.
        let count = if max > min { PAIR_BINS } else { 1 };
        Self { min, max, count }
    }

    fn width(&self) -> f64 {
        (self.max - self.min) / self.count as f64
    }

    fn index(&self, v: f64) -> usize {
        if self.count == 1 {
            return 0;
        }
        (((v - self.min) / self.width()).floor().max(0.0) as usize).min(self.count - 1)
    }

    fn label(&self, i: usize) -> String {
        let lo = self.min + self.width() * i as f64;
        let hi = if i + 1 == self.count {
            self.max
        } else {
            self.min + self.width() * (i + 1) as f64
        };
        format!("{} to {}", fmt_num(lo), fmt_num(hi))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct BoxStats {
    q1: f64,
    median: f64,
    q3: f64,
    whisker_low: f64,
    whisker_high: f64,
    outliers: Vec<f64>,
}

impl BoxStats {
    fn from_sorted(sorted: &[f64]) -> Option<Self> {
        let q1 = quantile(sorted, 0.25)?;
        let median = quantile(sorted, 0.5)?;
        let q3 = quantile(sorted, 0.75)?;
        let iqr = q3 - q1;
        let lo_fence = q1 - 1.5 * iqr;
        let hi_fence = q3 + 1.5 * iqr;
        let inside: Vec<f64> = sorted
            .iter()
            .copied()
            .filter(|v| *v >= lo_fence && *v <= hi_fence)
            .collect();
        let whisker_low = inside.first().copied().unwrap_or(q1);
        let whisker_high = inside.last().copied().unwrap_or(q3);
        let outliers = sorted
            .iter()
            .copied()
            .filter(|v| *v < lo_fence || *v > hi_fence)
            .collect();
        Some(Self {
            q1,
            median,
            q3,
            whisker_low,
            whisker_high,
            outliers,
        })
    }
}

/// Bin key on a triangular lattice of hexagon centres: `(i, j, offset)`.
/// Row A centres sit at `(i, j·√3)`, row B at `(i + ½, (j + ½)·√3)`, in
/// units of `cell` pixels. Each point belongs to the nearest centre.
type HexKey = (i64, i64, bool);

fn hex_bin(px: f64, py: f64, cell: f64) -> HexKey {
    let sqrt3 = 3f64.sqrt();
    let x = px / cell;
    let y = py / (cell * sqrt3);

    let ia = x.round();
    let ja = y.round();
    let ib = (x - 0.5).round();
    let jb = (y - 0.5).round();

    let da = (x - ia).powi(2) + 3.0 * (y - ja).powi(2);
    let db = (x - ib - 0.5).powi(2) + 3.0 * (y - jb - 0.5).powi(2);

    if da <= db {
        (ia as i64, ja as i64, false)
    } else {
        (ib as i64, jb as i64, true)
    }
}

fn blues(count: usize, max: usize) -> Rgb<u8> {
    let t = if max <= 1 {
        1.0
    } else {
        (count as f64 - 1.0) / (max as f64 - 1.0)
    };
    let t = 0.25 + 0.75 * t;
    let mix = |i: usize| (BLUES_LOW[i] + (BLUES_HIGH[i] - BLUES_LOW[i]) * t).round() as u8;
    Rgb([mix(0), mix(1), mix(2)])
}

fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        format!("{v:.2}")
    }
}

/// What a hexbin layer drew.
struct Density {
    bins: usize,
    max_count: usize,
    ys: Scale,
}

// ---------------------------------------------------------------------------
// Drawing surface
// ---------------------------------------------------------------------------

/// Linear data range. Degenerate ranges are widened so every value maps
/// inside the plot area.
#[derive(Debug, Clone, Copy)]
struct Scale {
    data_min: f64,
    data_max: f64,
    lo: f64,
    hi: f64,
}

impl Scale {
    fn new(min: f64, max: f64) -> Self {
        let (lo, hi) = if (max - min).abs() < f64::EPSILON {
            let pad = if min.abs() > 1.0 { min.abs() * 0.1 } else { 1.0 };
            (min - pad, max + pad)
        } else {
            let pad = (max - min) * 0.05;
            (min - pad, max + pad)
        };
        Self {
            data_min: min,
            data_max: max,
            lo,
            hi,
        }
    }

    fn fit(values: impl Iterator<Item = f64>) -> Self {
        let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if min.is_finite() && max.is_finite() {
            Self::new(min, max)
        } else {
            Self::new(0.0, 1.0)
        }
    }

    fn fraction(&self, v: f64) -> f64 {
        ((v - self.lo) / (self.hi - self.lo)).clamp(0.0, 1.0)
    }
}

struct Canvas {
    img: RgbImage,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            img: RgbImage::from_pixel(width, height, BACKGROUND),
        }
    }

    fn left(&self) -> f64 {
        MARGIN_LEFT as f64
    }

    fn top(&self) -> f64 {
        MARGIN_TOP as f64
    }

    fn right(&self) -> f64 {
        self.img.width().saturating_sub(MARGIN_RIGHT) as f64
    }

    fn bottom(&self) -> f64 {
        self.img.height().saturating_sub(MARGIN_BOTTOM) as f64
    }

    fn plot_width(&self) -> f64 {
        self.right() - self.left()
    }

    fn plot_height(&self) -> f64 {
        self.bottom() - self.top()
    }

    fn x_px(&self, scale: &Scale, v: f64) -> f64 {
        self.left() + scale.fraction(v) * self.plot_width()
    }

    fn y_px(&self, scale: &Scale, v: f64) -> f64 {
        self.bottom() - scale.fraction(v) * self.plot_height()
    }

    fn put(&mut self, x: u32, y: u32, color: Rgb<u8>) {
        if x < self.img.width() && y < self.img.height() {
            self.img.put_pixel(x, y, color);
        }
    }

    fn blend(&mut self, x: i64, y: i64, color: Rgb<u8>, alpha: f64) {
        if x < 0 || y < 0 || x >= self.img.width() as i64 || y >= self.img.height() as i64 {
            return;
        }
        let px = self.img.get_pixel_mut(x as u32, y as u32);
        for c in 0..3 {
            let under = px.0[c] as f64;
            px.0[c] = (under + (color.0[c] as f64 - under) * alpha).round() as u8;
        }
    }

    /// Light horizontal gridlines plus the two axes.
    fn draw_frame(&mut self, gridlines: u32) {
        for i in 1..=gridlines {
            let y = self.bottom() - self.plot_height() * i as f64 / gridlines as f64;
            self.line(self.left(), y, self.right(), y, GRID);
        }
        self.draw_axes();
    }

    fn draw_axes(&mut self) {
        let (l, r, t, b) = (self.left(), self.right(), self.top(), self.bottom());
        self.line(l, b, r, b, AXIS);
        self.line(l, t, l, b, AXIS);
        for i in 0..=4 {
            let x = l + (r - l) * i as f64 / 4.0;
            self.line(x, b, x, b + 5.0, AXIS);
            let y = b - (b - t) * i as f64 / 4.0;
            self.line(l - 5.0, y, l, y, AXIS);
        }
    }

    fn fill_rect(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, color: Rgb<u8>) {
        let (xa, xb) = (x0.min(x1).round() as i64, x0.max(x1).round() as i64);
        let (ya, yb) = (y0.min(y1).round() as i64, y0.max(y1).round() as i64);
        for y in ya..=yb {
            for x in xa..=xb {
                self.blend(x, y, color, 1.0);
            }
        }
    }

    fn stroke_rect(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, color: Rgb<u8>) {
        self.line(x0, y0, x1, y0, color);
        self.line(x1, y0, x1, y1, color);
        self.line(x1, y1, x0, y1, color);
        self.line(x0, y1, x0, y0, color);
    }

    fn thick_hline(&mut self, x0: f64, x1: f64, y: f64, color: Rgb<u8>) {
        for dy in -1..=1 {
            self.line(x0, y + dy as f64, x1, y + dy as f64, color);
        }
    }

    /// Bresenham line between two points.
    fn line(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, color: Rgb<u8>) {
        let (mut x, mut y) = (x0.round() as i64, y0.round() as i64);
        let (xe, ye) = (x1.round() as i64, y1.round() as i64);
        let dx = (xe - x).abs();
        let dy = -(ye - y).abs();
        let sx = if x < xe { 1 } else { -1 };
        let sy = if y < ye { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.blend(x, y, color, 1.0);
            if x == xe && y == ye {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn fill_circle(&mut self, cx: f64, cy: f64, radius: f64, color: Rgb<u8>, alpha: f64) {
        let r = radius.ceil() as i64;
        let (icx, icy) = (cx.round() as i64, cy.round() as i64);
        for dy in -r..=r {
            for dx in -r..=r {
                if ((dx * dx + dy * dy) as f64) <= radius * radius {
                    self.blend(icx + dx, icy + dy, color, alpha);
                }
            }
        }
    }

    /// Translucent dots for `(x, y)` points; returns the fitted scales.
    fn plot_points(&mut self, points: &[(f64, f64)]) -> (Scale, Scale) {
        let xs = Scale::fit(points.iter().map(|p| p.0));
        let ys = Scale::fit(points.iter().map(|p| p.1));
        self.draw_frame(5);
        for &(x, y) in points {
            let (px, py) = (self.x_px(&xs, x), self.y_px(&ys, y));
            self.fill_circle(px, py, 3.5, TEAL, 0.5);
        }
        (xs, ys)
    }

    /// Hexagonal density of `(x, y)` points; empty cells stay blank.
    fn plot_hexbin(&mut self, points: &[(f64, f64)]) -> Density {
        let xs = Scale::fit(points.iter().map(|p| p.0));
        let ys = Scale::fit(points.iter().map(|p| p.1));
        let cell = self.plot_width() / HEXBIN_GRID;

        let mut bins: HashMap<HexKey, usize> = HashMap::new();
        for &(x, y) in points {
            let px = self.x_px(&xs, x) - self.left();
            let py = self.y_px(&ys, y) - self.top();
            *bins.entry(hex_bin(px, py, cell)).or_default() += 1;
        }
        let max_count = bins.values().copied().max().unwrap_or(1);

        self.draw_frame(5);
        let (left, top) = (self.left(), self.top());
        let (right, bottom) = (self.right(), self.bottom());
        for y in top as u32..bottom as u32 {
            for x in left as u32..right as u32 {
                let key = hex_bin(x as f64 + 0.5 - left, y as f64 + 0.5 - top, cell);
                if let Some(&count) = bins.get(&key) {
                    self.put(x, y, blues(count, max_count));
                }
            }
        }
        self.draw_axes();

        Density {
            bins: bins.len(),
            max_count,
            ys,
        }
    }

    fn box_glyph(&mut self, center: f64, half: f64, stats: &BoxStats, ys: &Scale) {
        let y_q1 = self.y_px(ys, stats.q1);
        let y_q3 = self.y_px(ys, stats.q3);
        let y_med = self.y_px(ys, stats.median);
        let y_lo = self.y_px(ys, stats.whisker_low);
        let y_hi = self.y_px(ys, stats.whisker_high);

        self.fill_rect(center - half, y_q3, center + half, y_q1, LIGHT_BLUE);
        self.stroke_rect(center - half, y_q3, center + half, y_q1, NAVY);
        self.thick_hline(center - half, center + half, y_med, NAVY);
        self.line(center, y_q1, center, y_lo, AXIS);
        self.line(center, y_q3, center, y_hi, AXIS);
        self.line(center - half / 2.0, y_lo, center + half / 2.0, y_lo, AXIS);
        self.line(center - half / 2.0, y_hi, center + half / 2.0, y_hi, AXIS);
        for &v in &stats.outliers {
            let y = self.y_px(ys, v);
            self.fill_circle(center, y, 3.0, LIGHT_CORAL, 1.0);
        }
    }

    /// One bar per value, grown from zero so negative means hang below it.
    fn plot_bars(&mut self, heights: &[f64], color: Rgb<u8>) {
        let lo = heights.iter().copied().fold(0.0, f64::min);
        let hi = heights.iter().copied().fold(0.0, f64::max);
        let ys = Scale::new(lo, hi);
        self.draw_frame(5);

        let slot = self.plot_width() / heights.len().max(1) as f64;
        let base = self.y_px(&ys, 0.0);
        for (i, &h) in heights.iter().enumerate() {
            let x0 = self.left() + slot * i as f64 + slot * 0.15;
            let x1 = x0 + slot * 0.7;
            let y = self.y_px(&ys, h);
            self.fill_rect(x0, y, x1, base, color);
            self.stroke_rect(x0, y, x1, base, AXIS);
        }
        self.draw_axes();
    }

    /// Stacked bars: `matrix[bar][segment]` counts, segments coloured from
    /// the qualitative palette bottom up.
    fn plot_stacks(&mut self, matrix: &[Vec<usize>], totals: &[f64]) {
        let peak = totals.iter().copied().fold(0.0, f64::max);
        let ys = Scale::new(0.0, peak);
        self.draw_frame(5);

        let slot = self.plot_width() / matrix.len().max(1) as f64;
        for (i, segments) in matrix.iter().enumerate() {
            let x0 = self.left() + slot * i as f64 + slot * 0.15;
            let x1 = x0 + slot * 0.7;
            let mut running = 0.0;
            for (j, &count) in segments.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                let y_bottom = self.y_px(&ys, running);
                running += count as f64;
                let y_top = self.y_px(&ys, running);
                self.fill_rect(x0, y_top, x1, y_bottom, SET2[j % SET2.len()]);
                self.stroke_rect(x0, y_top, x1, y_bottom, AXIS);
            }
        }
        self.draw_axes();
    }

    fn encode_png(self) -> Result<Vec<u8>, PipelineError> {
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(self.img)
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| PipelineError::Render(format!("PNG encoding failed: {e}")))?;
        Ok(cursor.into_inner())
    }
}
