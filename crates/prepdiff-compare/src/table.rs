//! Tab-separated tables and column-wise comparison.
//!
//! A column is numeric when every non-missing cell parses as a float; all
//! other columns keep their cells as text. Missing cells become NaN in numeric
//! columns and `None` in text columns.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use prepdiff_core::{PrepdiffError, Tolerance};
use serde::{Deserialize, Serialize};

/// Cell values treated as missing.
pub const MISSING_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// One parsed column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<f64>),
    Text(Vec<Option<String>>),
}

impl Column {
    fn from_cells(cells: Vec<Option<String>>) -> Self {
        let parsed: Option<Vec<f64>> = cells
            .iter()
            .map(|cell| match cell {
                None => Some(f64::NAN),
                Some(s) => s.trim().parse::<f64>().ok(),
            })
            .collect();
        match parsed {
            Some(values) => Column::Numeric(values),
            None => Column::Text(cells),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Numeric(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Numeric(_))
    }
}

/// A table with named, ordered columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
    rows: usize,
}

impl Table {
    /// Parse tab-separated text with a header row.
    ///
    /// # Errors
    ///
    /// Returns [`PrepdiffError::Csv`] on malformed input (including rows with
    /// a different number of fields than the header) and
    /// [`PrepdiffError::Table`] when the header row is missing.
    ///
    /// # Examples
    ///
    /// ```
    /// use prepdiff_compare::table::Table;
    ///
    /// let table = Table::from_reader("a\tb\n1\tx\nn/a\ty\n".as_bytes()).unwrap();
    /// assert_eq!(table.names(), ["a", "b"]);
    /// assert_eq!(table.rows(), 2);
    /// assert!(table.column("a").unwrap().is_numeric());
    /// assert!(!table.column("b").unwrap().is_numeric());
    /// ```
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PrepdiffError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Err(PrepdiffError::table("<input>", "missing header row"));
        }
        let names = dedupe_names(headers.iter());

        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
        let mut rows = 0;
        for record in reader.records() {
            let record = record?;
            for (column, field) in cells.iter_mut().zip(record.iter()) {
                column.push(if MISSING_TOKENS.contains(&field) {
                    None
                } else {
                    Some(field.to_string())
                });
            }
            rows += 1;
        }

        let columns = cells.into_iter().map(Column::from_cells).collect();
        Ok(Self {
            names,
            columns,
            rows,
        })
    }

    /// Load a `.tsv` file.
    ///
    /// # Errors
    ///
    /// Returns [`PrepdiffError::FileNotFound`] if `path` does not exist, or
    /// the errors of [`Table::from_reader`] with the path attached.
    pub fn from_path(path: &Path) -> Result<Self, PrepdiffError> {
        if !path.exists() {
            return Err(PrepdiffError::FileNotFound(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file)).map_err(|e| match e {
            PrepdiffError::Table { reason, .. } => PrepdiffError::table(path, reason),
            PrepdiffError::Csv(err) => PrepdiffError::table(path, err.to_string()),
            other => other,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }
}

/// Repeated header names get `.1`, `.2`, … suffixes in order of appearance.
fn dedupe_names<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut names = Vec::new();
    for name in raw {
        let mut candidate = name.to_string();
        while taken.contains(&candidate) {
            let n = seen.entry(name.to_string()).or_insert(0);
            *n += 1;
            candidate = format!("{name}.{n}");
        }
        taken.insert(candidate.clone());
        names.push(candidate);
    }
    names
}

/// How a shared column changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ColumnChange {
    /// Numeric values outside tolerance. `max_abs_diff` ignores missing
    /// positions and is `None` when every position has a missing value.
    #[serde(rename_all = "camelCase")]
    Numeric { max_abs_diff: Option<f64> },
    /// Text values differ, or one side is numeric and the other is not.
    NonNumeric,
}

/// A changed shared column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDiff {
    pub column: String,
    pub change: ColumnChange,
}

/// Outcome of comparing two tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableComparison {
    /// Columns present only in the second table, in its header order.
    pub added: Vec<String>,
    /// Columns present only in the first table, in its header order.
    pub removed: Vec<String>,
    /// Row counts when they differ; no column was compared in that case.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count_mismatch: Option<(usize, usize)>,
    /// Shared columns that changed, in the first table's header order.
    pub changed: Vec<ColumnDiff>,
}

impl TableComparison {
    pub fn columns_differ(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    pub fn is_identical(&self) -> bool {
        !self.columns_differ() && self.row_count_mismatch.is_none() && self.changed.is_empty()
    }
}

/// Compare two tables column by column.
///
/// Column-set differences are collected first; only columns present in both
/// tables are then compared. Numeric columns use `tolerance` with NaN equal to
/// NaN; other columns fall back to exact equality.
///
/// # Examples
///
/// ```
/// use prepdiff_compare::table::{compare_tables, Table};
/// use prepdiff_core::Tolerance;
///
/// let a = Table::from_reader("a\tb\n1\t2\n".as_bytes()).unwrap();
/// let b = Table::from_reader("a\tb\tc\n1\t2\t3\n".as_bytes()).unwrap();
/// let cmp = compare_tables(&a, &b, Tolerance::default());
/// assert_eq!(cmp.added, ["c"]);
/// assert!(cmp.changed.is_empty());
/// ```
pub fn compare_tables(a: &Table, b: &Table, tolerance: Tolerance) -> TableComparison {
    let names_a: HashSet<&str> = a.names.iter().map(String::as_str).collect();
    let names_b: HashSet<&str> = b.names.iter().map(String::as_str).collect();

    let added = b
        .names
        .iter()
        .filter(|n| !names_a.contains(n.as_str()))
        .cloned()
        .collect();
    let removed = a
        .names
        .iter()
        .filter(|n| !names_b.contains(n.as_str()))
        .cloned()
        .collect();

    if a.rows != b.rows {
        return TableComparison {
            added,
            removed,
            row_count_mismatch: Some((a.rows, b.rows)),
            changed: Vec::new(),
        };
    }

    let mut changed = Vec::new();
    for (name, col_a) in a.names.iter().zip(&a.columns) {
        let Some(col_b) = b.column(name) else {
            continue;
        };
        if let Some(change) = compare_columns(col_a, col_b, tolerance) {
            changed.push(ColumnDiff {
                column: name.clone(),
                change,
            });
        }
    }

    TableComparison {
        added,
        removed,
        row_count_mismatch: None,
        changed,
    }
}

/// Compare two equal-length columns; `None` means unchanged.
pub fn compare_columns(a: &Column, b: &Column, tolerance: Tolerance) -> Option<ColumnChange> {
    match (a, b) {
        (Column::Numeric(x), Column::Numeric(y)) => {
            if x.iter().zip(y).all(|(&p, &q)| is_close(p, q, tolerance)) {
                None
            } else {
                Some(ColumnChange::Numeric {
                    max_abs_diff: max_abs_diff(x, y),
                })
            }
        }
        (Column::Text(x), Column::Text(y)) if x == y => None,
        _ => Some(ColumnChange::NonNumeric),
    }
}

/// `|a - b| <= atol + rtol * |b|`, with NaN close only to NaN.
///
/// # Examples
///
/// ```
/// use prepdiff_compare::table::is_close;
/// use prepdiff_core::Tolerance;
///
/// let tol = Tolerance::default();
/// assert!(is_close(1.0, 1.0 + 1e-9, tol));
/// assert!(!is_close(1.0, 1.001, tol));
/// assert!(is_close(f64::NAN, f64::NAN, tol));
/// assert!(!is_close(f64::NAN, 0.0, tol));
/// ```
pub fn is_close(a: f64, b: f64, tolerance: Tolerance) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    if a == b {
        return true;
    }
    if a.is_infinite() || b.is_infinite() {
        return false;
    }
    (a - b).abs() <= tolerance.atol + tolerance.rtol * b.abs()
}

fn max_abs_diff(a: &[f64], b: &[f64]) -> Option<f64> {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .filter(|d| !d.is_nan())
        .fold(None, |acc: Option<f64>, d| {
            Some(acc.map_or(d, |m| m.max(d)))
        })
}
