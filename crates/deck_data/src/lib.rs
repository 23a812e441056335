//! Tabular input: CSV loading, summary statistics and chart rendering.

pub mod chart;
pub mod dataset;
pub mod stats;

pub use chart::{ChartImage, ChartKind, ChartOptions, ChartRequest, render_chart, render_comparison};
pub use dataset::{Column, ColumnKind, Dataset};
pub use stats::{CategoricalStats, ColumnStats, ColumnSummary, DatasetSummary, NumericStats};
