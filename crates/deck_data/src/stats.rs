//! Summary statistics fed to the narrative prompts and comparison slides.

use std::collections::HashMap;

use deck_core::PipelineError;
use serde::{Deserialize, Serialize};

use crate::dataset::{Column, Dataset};

/// Categorical columns with more distinct values than this are "high diversity".
const HIGH_DIVERSITY_THRESHOLD: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub count: usize,
    pub missing: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation; zero for fewer than two values.
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalStats {
    pub count: usize,
    pub missing: usize,
    pub unique: usize,
    pub top: Option<String>,
    pub top_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ColumnStats {
    Numeric(NumericStats),
    Categorical(CategoricalStats),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    pub stats: ColumnStats,
}

impl ColumnSummary {
    pub fn of(column: &Column) -> Self {
        let stats = if column.is_numeric() {
            ColumnStats::Numeric(numeric_stats(column))
        } else {
            ColumnStats::Categorical(categorical_stats(column))
        };
        Self {
            name: column.name().to_string(),
            stats,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.stats, ColumnStats::Numeric(_))
    }

    /// One-line description used inside prompts.
    pub fn describe(&self) -> String {
        match &self.stats {
            ColumnStats::Numeric(s) => format!(
                "{} (numeric): count={}, min={:.2}, max={:.2}, mean={:.2}, std={:.2}",
                self.name, s.count, s.min, s.max, s.mean, s.std_dev
            ),
            ColumnStats::Categorical(s) => format!(
                "{} (categorical): count={}, unique={}, most frequent={} ({})",
                self.name,
                s.count,
                s.unique,
                s.top.as_deref().unwrap_or("n/a"),
                s.top_count
            ),
        }
    }
}

/// Whole-table summary centred on the target column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub target: String,
    pub columns: Vec<ColumnSummary>,
    /// Pearson correlation of the target with each other numeric column.
    pub correlations: Vec<(String, f64)>,
}

impl DatasetSummary {
    pub fn compute(dataset: &Dataset, target: &str) -> Result<Self, PipelineError> {
        let target_col = dataset.require_column(target)?;

        let columns = dataset.columns().iter().map(ColumnSummary::of).collect();

        let correlations = if target_col.is_numeric() {
            dataset
                .other_columns(target)
                .filter(|c| c.is_numeric())
                .filter_map(|other| {
                    pearson_columns(target_col, other).map(|r| (other.name().to_string(), r))
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            rows: dataset.row_count(),
            target: target.to_string(),
            columns,
            correlations,
        })
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSummary> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn target_summary(&self) -> Option<&ColumnSummary> {
        self.column(&self.target)
    }

    /// Names of every non-target column, in file order.
    pub fn other_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.name != self.target)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn correlation_with(&self, other: &str) -> Option<f64> {
        self.correlations
            .iter()
            .find(|(name, _)| name == other)
            .map(|(_, r)| *r)
    }

    /// Multi-line statistics block embedded in every generation prompt.
    pub fn prompt_context(&self) -> String {
        let mut out = format!(
            "Dataset: {} rows, {} columns. Selected column: {}.\n",
            self.rows,
            self.columns.len(),
            self.target
        );
        for column in &self.columns {
            out.push_str("- ");
            out.push_str(&column.describe());
            out.push('\n');
        }
        for (other, r) in &self.correlations {
            out.push_str(&format!(
                "- correlation({}, {other}) = {r:.2}\n",
                self.target
            ));
        }
        out
    }

    /// Deterministic bullets comparing the target with `other`.
    pub fn comparison_bullets(&self, other: &str) -> Vec<String> {
        let (Some(target), Some(other_summary)) = (self.target_summary(), self.column(other))
        else {
            return Vec::new();
        };
        let col = &self.target;
        let mut bullets = vec![format!("Rows analyzed: {}. Total entries in the file.", self.rows)];

        match self.correlation_with(other) {
            Some(r) => bullets.push(format!(
                "Correlation: {r:.2}. {} link between {col} and {other}.",
                correlation_strength(r)
            )),
            None => bullets.push(format!(
                "Correlation: n/a. {col} and {other} are not both numeric."
            )),
        }

        match &other_summary.stats {
            ColumnStats::Numeric(s) => {
                bullets.push(format!("{other} mean: {:.2}. Average across rows.", s.mean));
                bullets.push(format!("{other} min: {:.2}. Smallest value.", s.min));
                bullets.push(format!("{other} max: {:.2}. Largest value.", s.max));
            }
            ColumnStats::Categorical(s) => {
                bullets.push(format!("{other} unique: {}. Distinct values counted.", s.unique));
                bullets.push(format!(
                    "{other} top: {}. Most frequent value.",
                    s.top.as_deref().unwrap_or("n/a")
                ));
                let diversity = if s.unique > HIGH_DIVERSITY_THRESHOLD {
                    "High"
                } else {
                    "Low"
                };
                bullets.push(format!("{other} diversity: {diversity}. Variation in values."));
            }
        }

        match &target.stats {
            ColumnStats::Numeric(s) => {
                bullets.push(format!("{col} mean: {:.2}. Average of the selected column.", s.mean))
            }
            ColumnStats::Categorical(s) => bullets.push(format!(
                "{col} top: {}. Most frequent category.",
                s.top.as_deref().unwrap_or("n/a")
            )),
        }

        bullets
    }
}

fn correlation_strength(r: f64) -> &'static str {
    match r.abs() {
        a if a >= 0.7 => "Strong",
        a if a >= 0.3 => "Moderate",
        _ => "Weak",
    }
}

fn numeric_stats(column: &Column) -> NumericStats {
    let values = column.numbers();
    let count = values.len();
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let mean = mean(&values).unwrap_or(0.0);
    let std_dev = if count > 1 {
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };
    NumericStats {
        count,
        missing: column.missing(),
        min: if count > 0 { min } else { 0.0 },
        max: if count > 0 { max } else { 0.0 },
        mean,
        std_dev,
    }
}

fn categorical_stats(column: &Column) -> CategoricalStats {
    let counts = category_counts(column.values());
    let count = counts.iter().map(|(_, n)| n).sum();
    let top = counts.first().cloned();
    CategoricalStats {
        count,
        missing: column.missing(),
        unique: counts.len(),
        top_count: top.as_ref().map_or(0, |(_, n)| *n),
        top: top.map(|(v, _)| v),
    }
}

/// Count non-empty values; most frequent first, ties broken by first
/// appearance.
pub fn category_counts(values: &[String]) -> Vec<(String, usize)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(String, usize)> = Vec::new();
    for v in values.iter().filter(|v| !v.is_empty()) {
        match index.get(v.as_str()) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(v.as_str(), counts.len());
                counts.push((v.clone(), 1));
            }
        }
    }
    // Stable sort keeps first-appearance order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Quantile of already-sorted data using linear interpolation between
/// closest ranks.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Pearson correlation over rows where both columns hold numbers.
fn pearson_columns(a: &Column, b: &Column) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .indexed_numbers()
        .into_iter()
        .filter_map(|(row, x)| b.number_at(row).map(|y| (x, y)))
        .collect();
    pearson(&pairs)
}

/// Pearson correlation; `None` for fewer than two pairs or zero variance.
pub fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for &(x, y) in pairs {
        let dx = x - mx;
        let dy = y - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some(sxy / (sxx.sqrt() * syy.sqrt()))
}
