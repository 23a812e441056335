use std::collections::HashSet;
use std::path::Path;

use deck_core::PipelineError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Delimiters considered when sniffing the header line.
const CANDIDATE_DELIMITERS: &[u8] = b",;\t|";

/// Inferred type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric => write!(f, "numeric"),
            Self::Categorical => write!(f, "categorical"),
        }
    }
}

/// One named column with its raw (trimmed) cells.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    kind: ColumnKind,
    values: Vec<String>,
}

impl Column {
    fn new(name: String, values: Vec<String>) -> Self {
        let kind = infer_kind(&values);
        Self { name, kind, values }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    pub fn is_numeric(&self) -> bool {
        self.kind == ColumnKind::Numeric
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Parsed cell at `row`, if it holds a finite number.
    pub fn number_at(&self, row: usize) -> Option<f64> {
        self.values.get(row).and_then(|v| parse_number(v))
    }

    /// `(row index, value)` for every finite numeric cell.
    pub fn indexed_numbers(&self) -> Vec<(usize, f64)> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| parse_number(v).map(|n| (i, n)))
            .collect()
    }

    /// Every finite numeric cell, in row order.
    pub fn numbers(&self) -> Vec<f64> {
        self.values.iter().filter_map(|v| parse_number(v)).collect()
    }

    /// Number of empty cells.
    pub fn missing(&self) -> usize {
        self.values.iter().filter(|v| v.is_empty()).count()
    }
}

/// An immutable table loaded from delimited text.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<Column>,
    row_count: usize,
    delimiter: u8,
}

impl Dataset {
    /// Read and parse a file from disk.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let bytes = std::fs::read(path).map_err(|e| {
            PipelineError::Parse(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Parse uploaded bytes. The first record is the header row.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PipelineError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(PipelineError::Parse("file is empty".into()));
        }

        let text = std::str::from_utf8(bytes).map_err(|e| {
            PipelineError::Parse(format!(
                "file is not valid UTF-8 text (invalid byte at offset {})",
                e.valid_up_to()
            ))
        })?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let delimiter = sniff_delimiter(text);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| PipelineError::Parse(format!("failed to read header row: {e}")))?
            .iter()
            .map(String::from)
            .collect();

        validate_headers(&headers)?;

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        let mut row_count = 0usize;
        for result in reader.records() {
            let record =
                result.map_err(|e| PipelineError::Parse(format!("malformed record: {e}")))?;
            for (column, value) in cells.iter_mut().zip(record.iter()) {
                column.push(value.to_string());
            }
            row_count += 1;
        }

        if row_count == 0 {
            return Err(PipelineError::Parse(
                "file has a header row but no data rows".into(),
            ));
        }

        let columns: Vec<Column> = headers
            .into_iter()
            .zip(cells)
            .map(|(name, values)| Column::new(name, values))
            .collect();

        debug!(
            rows = row_count,
            columns = columns.len(),
            delimiter = %(delimiter as char).escape_default(),
            "parsed tabular input"
        );

        Ok(Self {
            columns,
            row_count,
            delimiter,
        })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Header names in file order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up the target column, failing with a `ColumnError` that lists
    /// what is available.
    pub fn require_column(&self, name: &str) -> Result<&Column, PipelineError> {
        self.column(name).ok_or_else(|| {
            PipelineError::Column(format!(
                "column '{name}' is not in the header (available: {})",
                self.column_names().join(", ")
            ))
        })
    }

    /// Every column except `name`, in file order.
    pub fn other_columns<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Column> + 'a {
        self.columns.iter().filter(move |c| c.name != name)
    }
}

fn validate_headers(headers: &[String]) -> Result<(), PipelineError> {
    if headers.is_empty() {
        return Err(PipelineError::Parse("header row is empty".into()));
    }
    let mut seen = HashSet::new();
    for (i, name) in headers.iter().enumerate() {
        if name.is_empty() {
            return Err(PipelineError::Parse(format!(
                "header field {} has no name",
                i + 1
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(PipelineError::Parse(format!(
                "duplicate column name '{name}' in header"
            )));
        }
    }
    Ok(())
}

/// Pick the candidate delimiter that occurs most often on the first
/// non-blank line, ignoring quoted sections. Comma wins ties.
fn sniff_delimiter(text: &str) -> u8 {
    let Some(header) = text.lines().find(|l| !l.trim().is_empty()) else {
        return b',';
    };

    let mut counts = [0usize; 4];
    let mut in_quotes = false;
    for byte in header.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(idx) = CANDIDATE_DELIMITERS.iter().position(|&d| d == byte) {
            counts[idx] += 1;
        }
    }

    let mut best = 0usize;
    for idx in 1..counts.len() {
        if counts[idx] > counts[best] {
            best = idx;
        }
    }
    CANDIDATE_DELIMITERS[best]
}

fn parse_number(value: &str) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    value.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn infer_kind(values: &[String]) -> ColumnKind {
    let mut saw_number = false;
    for v in values {
        if v.is_empty() {
            continue;
        }
        if parse_number(v).is_none() {
            return ColumnKind::Categorical;
        }
        saw_number = true;
    }
    if saw_number {
        ColumnKind::Numeric
    } else {
        ColumnKind::Categorical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_rows() {
        let ds = Dataset::from_bytes(b"date,revenue\n2024-01,100\n2024-02,250.5\n").unwrap();
        assert_eq!(ds.column_names(), vec!["date", "revenue"]);
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.column("date").unwrap().kind(), ColumnKind::Categorical);
        assert_eq!(ds.column("revenue").unwrap().kind(), ColumnKind::Numeric);
        assert_eq!(ds.column("revenue").unwrap().numbers(), vec![100.0, 250.5]);
    }

    #[test]
    fn column_set_equals_header_set() {
        let input = "a;b;c\n1;x;3\n4;y;6\n";
        let ds = Dataset::from_bytes(input.as_bytes()).unwrap();
        assert_eq!(ds.delimiter(), b';');
        assert_eq!(ds.column_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn sniffs_tab_and_pipe() {
        let ds = Dataset::from_bytes(b"x\ty\n1\t2\n").unwrap();
        assert_eq!(ds.delimiter(), b'\t');
        let ds = Dataset::from_bytes(b"x|y\n1|2\n").unwrap();
        assert_eq!(ds.delimiter(), b'|');
    }

    #[test]
    fn quoted_commas_do_not_confuse_sniffing() {
        let input = "\"name, full\";score\n\"Smith, John\";3\n";
        let ds = Dataset::from_bytes(input.as_bytes()).unwrap();
        assert_eq!(ds.delimiter(), b';');
        assert_eq!(ds.column("name, full").unwrap().values()[0], "Smith, John");
    }

    #[test]
    fn empty_input_is_parse_error() {
        for input in [&b""[..], &b"   \n\n"[..]] {
            let err = Dataset::from_bytes(input).unwrap_err();
            assert!(matches!(err, PipelineError::Parse(_)), "got: {err}");
        }
    }

    #[test]
    fn header_only_is_parse_error() {
        let err = Dataset::from_bytes(b"a,b\n").unwrap_err();
        assert!(matches!(err, PipelineError::Parse(ref m) if m.contains("no data rows")));
    }

    #[test]
    fn ragged_rows_are_parse_error() {
        let err = Dataset::from_bytes(b"a,b\n1,2\n3,4,5\n").unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)), "got: {err}");
    }

    #[test]
    fn binary_input_is_parse_error() {
        let err = Dataset::from_bytes(&[0x50, 0x4b, 0x03, 0x04, 0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, PipelineError::Parse(ref m) if m.contains("UTF-8")));
    }

    #[test]
    fn duplicate_and_blank_headers_rejected() {
        assert!(matches!(
            Dataset::from_bytes(b"a,a\n1,2\n"),
            Err(PipelineError::Parse(_))
        ));
        assert!(matches!(
            Dataset::from_bytes(b"a,,c\n1,2,3\n"),
            Err(PipelineError::Parse(_))
        ));
    }

    #[test]
    fn missing_column_is_column_error() {
        let ds = Dataset::from_bytes(b"date,revenue\n2024,1\n").unwrap();
        let err = ds.require_column("profit").unwrap_err();
        match err {
            PipelineError::Column(msg) => {
                assert!(msg.contains("profit"));
                assert!(msg.contains("date, revenue"));
            }
            other => panic!("expected ColumnError, got {other}"),
        }
    }

    #[test]
    fn empty_cells_do_not_break_numeric_inference() {
        let ds = Dataset::from_bytes(b"v,w\n1,\n,2\n3,x\n").unwrap();
        let v = ds.column("v").unwrap();
        assert!(v.is_numeric());
        assert_eq!(v.missing(), 1);
        assert_eq!(v.indexed_numbers(), vec![(0, 1.0), (2, 3.0)]);
        assert!(!ds.column("w").unwrap().is_numeric());
    }

    #[test]
    fn all_empty_column_is_categorical() {
        let ds = Dataset::from_bytes(b"a,b\n1,\n2,\n").unwrap();
        assert_eq!(ds.column("b").unwrap().kind(), ColumnKind::Categorical);
    }

    #[test]
    fn nan_and_inf_are_not_numbers() {
        let ds = Dataset::from_bytes(b"a\nNaN\n1\n").unwrap();
        assert!(!ds.column("a").unwrap().is_numeric());
        let ds = Dataset::from_bytes(b"a\ninf\n").unwrap();
        assert!(!ds.column("a").unwrap().is_numeric());
    }

    #[test]
    fn strips_byte_order_mark() {
        let ds = Dataset::from_bytes("\u{feff}id,score\n1,2\n".as_bytes()).unwrap();
        assert_eq!(ds.column_names(), vec!["id", "score"]);
    }

    #[test]
    fn other_columns_excludes_target() {
        let ds = Dataset::from_bytes(b"a,b,c\n1,2,3\n").unwrap();
        let others: Vec<&str> = ds.other_columns("b").map(Column::name).collect();
        assert_eq!(others, vec!["a", "c"]);
    }

    #[test]
    fn from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "k,v\na,1\n").unwrap();
        let ds = Dataset::from_path(&path).unwrap();
        assert_eq!(ds.row_count(), 1);

        let err = Dataset::from_path(&dir.path().join("missing.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }
}
