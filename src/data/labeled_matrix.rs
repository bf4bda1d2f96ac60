//! Dense matrix with row and column labels.
//!
//! Used for the gene weight matrix (M), the activity matrix (A) and the
//! expression matrix (X).

use super::{delimited_reader, delimited_writer, parse_cell};
use crate::error::{ImodError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// A dense `f64` matrix with unique row and column labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledMatrix {
    /// Values (rows × columns).
    data: DMatrix<f64>,
    /// Row labels.
    row_ids: Vec<String>,
    /// Column labels.
    col_ids: Vec<String>,
}

impl LabeledMatrix {
    /// Create a new LabeledMatrix from a dense matrix and labels.
    pub fn new(data: DMatrix<f64>, row_ids: Vec<String>, col_ids: Vec<String>) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows != row_ids.len() {
            return Err(ImodError::DimensionMismatch {
                expected: nrows,
                actual: row_ids.len(),
            });
        }
        if ncols != col_ids.len() {
            return Err(ImodError::DimensionMismatch {
                expected: ncols,
                actual: col_ids.len(),
            });
        }
        check_unique(&row_ids, "rows")?;
        check_unique(&col_ids, "columns")?;
        Ok(Self {
            data,
            row_ids,
            col_ids,
        })
    }

    /// Build from row-major values.
    pub fn from_rows(rows: &[Vec<f64>], row_ids: Vec<String>, col_ids: Vec<String>) -> Result<Self> {
        let ncols = col_ids.len();
        let mut values = Vec::with_capacity(rows.len() * ncols);
        for row in rows {
            if row.len() != ncols {
                return Err(ImodError::DimensionMismatch {
                    expected: ncols,
                    actual: row.len(),
                });
            }
            values.extend_from_slice(row);
        }
        Self::new(
            DMatrix::from_row_slice(rows.len(), ncols, &values),
            row_ids,
            col_ids,
        )
    }

    /// Load a matrix from a delimited file.
    ///
    /// The header holds column labels (its first cell is the index name and is
    /// ignored); each following line is a row label followed by values.
    /// `.tsv`/`.txt` files are tab separated, everything else comma separated.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = delimited_reader(path.as_ref())?;

        let header = reader.headers()?.clone();
        if header.len() < 2 {
            return Err(ImodError::EmptyData(
                "Matrix file must have at least one column".to_string(),
            ));
        }
        let col_ids: Vec<String> = header.iter().skip(1).map(|s| s.trim().to_string()).collect();
        let n_cols = col_ids.len();

        let mut row_ids = Vec::new();
        let mut values = Vec::new();
        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            row_ids.push(record.get(0).unwrap_or_default().trim().to_string());
            for col_idx in 0..n_cols {
                let raw = record.get(col_idx + 1).unwrap_or_default();
                let value = parse_cell(raw).ok_or_else(|| ImodError::InvalidValue {
                    value: raw.to_string(),
                    row: row_idx,
                    col: col_idx,
                })?;
                values.push(value);
            }
        }

        if row_ids.is_empty() {
            return Err(ImodError::EmptyData("No rows in matrix file".to_string()));
        }

        let data = DMatrix::from_row_slice(row_ids.len(), n_cols, &values);
        Self::new(data, row_ids, col_ids)
    }

    /// Write the matrix to a delimited file with the given index header.
    pub fn to_csv_with_index<P: AsRef<Path>>(&self, path: P, index_name: &str) -> Result<()> {
        let mut writer = delimited_writer(path.as_ref())?;

        let mut header = Vec::with_capacity(self.n_cols() + 1);
        header.push(index_name.to_string());
        header.extend(self.col_ids.iter().cloned());
        writer.write_record(&header)?;

        for (i, row_id) in self.row_ids.iter().enumerate() {
            let mut record = Vec::with_capacity(self.n_cols() + 1);
            record.push(row_id.clone());
            for j in 0..self.n_cols() {
                record.push(format_value(self.data[(i, j)]));
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the matrix to a delimited file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_csv_with_index(path, "")
    }

    /// Value at (row, col) by position.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[(row, col)]
    }

    /// Value by labels.
    pub fn get_by_label(&self, row: &str, col: &str) -> Option<f64> {
        Some(self.data[(self.row_index(row)?, self.col_index(col)?)])
    }

    /// Number of rows.
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns.
    #[inline]
    pub fn n_cols(&self) -> usize {
        self.data.ncols()
    }

    /// Row labels.
    #[inline]
    pub fn row_ids(&self) -> &[String] {
        &self.row_ids
    }

    /// Column labels.
    #[inline]
    pub fn col_ids(&self) -> &[String] {
        &self.col_ids
    }

    /// Underlying matrix.
    #[inline]
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Position of a row label.
    pub fn row_index(&self, id: &str) -> Option<usize> {
        self.row_ids.iter().position(|r| r == id)
    }

    /// Position of a column label.
    pub fn col_index(&self, id: &str) -> Option<usize> {
        self.col_ids.iter().position(|c| c == id)
    }

    /// Row values by position.
    pub fn row_values(&self, row: usize) -> Vec<f64> {
        self.data.row(row).iter().copied().collect()
    }

    /// Column values by position.
    pub fn col_values(&self, col: usize) -> Vec<f64> {
        self.data.column(col).iter().copied().collect()
    }

    /// Row values by label.
    pub fn row(&self, id: &str) -> Option<Vec<f64>> {
        self.row_index(id).map(|i| self.row_values(i))
    }

    /// Column values by label.
    pub fn column(&self, id: &str) -> Option<Vec<f64>> {
        self.col_index(id).map(|j| self.col_values(j))
    }

    /// Column as an nalgebra vector.
    pub fn column_vector(&self, col: usize) -> DVector<f64> {
        self.data.column(col).into_owned()
    }

    /// Subset rows by label, in the order given.
    pub fn select_rows(&self, ids: &[String]) -> Result<Self> {
        let lookup = index_map(&self.row_ids);
        let mut indices = Vec::with_capacity(ids.len());
        for id in ids {
            let idx = lookup
                .get(id.as_str())
                .ok_or_else(|| ImodError::LabelMismatch(format!("Row '{}' not in matrix", id)))?;
            indices.push(*idx);
        }
        let data = self.data.select_rows(indices.iter());
        Self::new(data, ids.to_vec(), self.col_ids.clone())
    }

    /// Subset columns by label, in the order given.
    pub fn select_cols(&self, ids: &[String]) -> Result<Self> {
        let lookup = index_map(&self.col_ids);
        let mut indices = Vec::with_capacity(ids.len());
        for id in ids {
            let idx = lookup
                .get(id.as_str())
                .ok_or_else(|| ImodError::LabelMismatch(format!("Column '{}' not in matrix", id)))?;
            indices.push(*idx);
        }
        let data = self.data.select_columns(indices.iter());
        Self::new(data, self.row_ids.clone(), ids.to_vec())
    }

    /// Transposed copy with swapped labels.
    pub fn transpose(&self) -> Self {
        Self {
            data: self.data.transpose(),
            row_ids: self.col_ids.clone(),
            col_ids: self.row_ids.clone(),
        }
    }

    /// Rename row labels. Labels not in `map` are kept.
    pub fn rename_rows(&self, map: &HashMap<String, String>) -> Result<Self> {
        let row_ids = rename_labels(&self.row_ids, map);
        Self::new(self.data.clone(), row_ids, self.col_ids.clone())
    }

    /// Rename column labels. Labels not in `map` are kept.
    pub fn rename_cols(&self, map: &HashMap<String, String>) -> Result<Self> {
        let col_ids = rename_labels(&self.col_ids, map);
        Self::new(self.data.clone(), self.row_ids.clone(), col_ids)
    }
}

fn rename_labels(labels: &[String], map: &HashMap<String, String>) -> Vec<String> {
    labels
        .iter()
        .map(|l| map.get(l).cloned().unwrap_or_else(|| l.clone()))
        .collect()
}

fn index_map(labels: &[String]) -> HashMap<&str, usize> {
    labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect()
}

pub(crate) fn check_unique(labels: &[String], axis: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(labels.len());
    for label in labels {
        if !seen.insert(label.as_str()) {
            return Err(ImodError::DuplicateLabel {
                label: label.clone(),
                axis: axis.to_string(),
            });
        }
    }
    Ok(())
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn create_test_matrix() -> LabeledMatrix {
        let data = DMatrix::from_row_slice(3, 2, &[1.0, -2.0, 0.5, 4.0, -3.5, 0.0]);
        LabeledMatrix::new(data, ids("b", 3), vec!["0".into(), "1".into()]).unwrap()
    }

    #[test]
    fn test_dimensions() {
        let m = create_test_matrix();
        assert_eq!(m.n_rows(), 3);
        assert_eq!(m.n_cols(), 2);
        assert_eq!(m.get(1, 1), 4.0);
        assert_eq!(m.get_by_label("b2", "0"), Some(-3.5));
    }

    #[test]
    fn test_dimension_mismatch() {
        let data = DMatrix::zeros(2, 2);
        let result = LabeledMatrix::new(data, ids("g", 3), ids("s", 2));
        assert!(matches!(result, Err(ImodError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let data = DMatrix::zeros(2, 1);
        let result = LabeledMatrix::new(data, vec!["g".into(), "g".into()], vec!["s".into()]);
        assert!(matches!(result, Err(ImodError::DuplicateLabel { .. })));
    }

    #[test]
    fn test_select_rows_and_cols() {
        let m = create_test_matrix();
        let sub = m.select_rows(&["b2".to_string(), "b0".to_string()]).unwrap();
        assert_eq!(sub.row_ids(), &["b2", "b0"]);
        assert_eq!(sub.get(0, 0), -3.5);
        assert_eq!(sub.get(1, 1), -2.0);

        let sub = m.select_cols(&["1".to_string()]).unwrap();
        assert_eq!(sub.n_cols(), 1);
        assert_eq!(sub.col_values(0), vec![-2.0, 4.0, 0.0]);

        assert!(m.select_rows(&["missing".to_string()]).is_err());
    }

    #[test]
    fn test_transpose() {
        let m = create_test_matrix();
        let t = m.transpose();
        assert_eq!(t.row_ids(), m.col_ids());
        assert_eq!(t.get(1, 0), m.get(0, 1));
    }

    #[test]
    fn test_rename_cols() {
        let m = create_test_matrix();
        let mut map = HashMap::new();
        map.insert("0".to_string(), "GlpR".to_string());
        let renamed = m.rename_cols(&map).unwrap();
        assert_eq!(renamed.col_ids(), &["GlpR", "1"]);

        map.insert("1".to_string(), "GlpR".to_string());
        assert!(m.rename_cols(&map).is_err());
    }

    #[test]
    fn test_csv_roundtrip() {
        let m = create_test_matrix();
        let file = Builder::new().suffix(".csv").tempfile().unwrap();
        m.to_csv(file.path()).unwrap();
        let loaded = LabeledMatrix::from_csv(file.path()).unwrap();
        assert_eq!(loaded, m);
    }

    #[test]
    fn test_missing_values_written_empty() {
        let m = LabeledMatrix::from_rows(&[vec![1.5, f64::NAN]], ids("g", 1), ids("s", 2)).unwrap();
        let file = Builder::new().suffix(".csv").tempfile().unwrap();
        m.to_csv_with_index(file.path(), "gene").unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(text.lines().nth(1), Some("g0,1.5,"));
        let loaded = LabeledMatrix::from_csv(file.path()).unwrap();
        assert!(loaded.get(0, 1).is_nan());
    }

    #[test]
    fn test_read_tsv_with_missing() {
        let mut file = Builder::new().suffix(".tsv").tempfile().unwrap();
        writeln!(file, "gene\tS1\tS2").unwrap();
        writeln!(file, "b0001\t1.5\tNA").unwrap();
        writeln!(file, "b0002\t-0.5\t2").unwrap();
        file.flush().unwrap();

        let m = LabeledMatrix::from_csv(file.path()).unwrap();
        assert_eq!(m.col_ids(), &["S1", "S2"]);
        assert!(m.get(0, 1).is_nan());
        assert_eq!(m.get(1, 1), 2.0);
    }

    #[test]
    fn test_invalid_value() {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, ",S1").unwrap();
        writeln!(file, "b0001,abc").unwrap();
        file.flush().unwrap();

        let result = LabeledMatrix::from_csv(file.path());
        assert!(matches!(result, Err(ImodError::InvalidValue { .. })));
    }
}
