//! Annotation tables for genes, samples and iModulons.

use super::{delimited_reader, delimited_writer, is_missing};
use crate::error::{ImodError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::warn;

/// A single table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Free text.
    Text(String),
    /// Numeric value.
    Number(f64),
    /// Missing value.
    Missing,
}

impl Value {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Try to get as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as a number. Text that parses as a number is accepted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Missing => None,
        }
    }

    /// Render as a string, `None` when missing.
    pub fn to_display(&self) -> Option<String> {
        match self {
            Value::Missing => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Number(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    write!(f, "{}", *v as i64)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::Missing => Ok(()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            Value::Missing
        } else {
            Value::Number(v)
        }
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Number(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Text(if v { "True" } else { "False" }.to_string())
    }
}

/// Row-indexed annotation table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotationTable {
    /// Name of the index column.
    index_name: String,
    /// Row labels in order.
    index: Vec<String>,
    /// Column names in order.
    columns: Vec<String>,
    /// Data stored as row -> column -> value.
    data: HashMap<String, HashMap<String, Value>>,
}

impl AnnotationTable {
    /// Create a table with the given rows and no columns.
    pub fn new(index: Vec<String>) -> Self {
        let data = index
            .iter()
            .map(|r| (r.clone(), HashMap::new()))
            .collect();
        Self {
            index_name: String::new(),
            index,
            columns: Vec::new(),
            data,
        }
    }

    /// Load a table from a delimited file.
    ///
    /// The first column is the row index. Columns whose present values all
    /// parse as numbers are stored as numbers, everything else as text.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = delimited_reader(path.as_ref())?;
        let header = reader.headers()?.clone();
        if header.is_empty() {
            return Err(ImodError::EmptyData("Table file has no header".to_string()));
        }
        let index_name = header.get(0).unwrap_or_default().trim().to_string();
        let columns: Vec<String> = header.iter().skip(1).map(|s| s.trim().to_string()).collect();

        // First pass: collect raw strings to infer types
        let mut raw_rows: Vec<(String, Vec<String>)> = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            let row_id = record.get(0).unwrap_or_default().trim().to_string();
            let values: Vec<String> = (0..columns.len())
                .map(|i| record.get(i + 1).unwrap_or_default().to_string())
                .collect();
            raw_rows.push((row_id, values));
        }

        let numeric: Vec<bool> = (0..columns.len())
            .map(|col_idx| {
                raw_rows.iter().all(|(_, values)| {
                    let v = &values[col_idx];
                    is_missing(v) || v.trim().parse::<f64>().is_ok()
                })
            })
            .collect();

        let mut index = Vec::with_capacity(raw_rows.len());
        let mut data = HashMap::with_capacity(raw_rows.len());
        for (row_id, values) in raw_rows {
            if data.contains_key(&row_id) {
                return Err(ImodError::DuplicateLabel {
                    label: row_id,
                    axis: "table index".to_string(),
                });
            }
            let mut row = HashMap::with_capacity(columns.len());
            for (col_idx, col) in columns.iter().enumerate() {
                let raw = &values[col_idx];
                let value = if is_missing(raw) {
                    Value::Missing
                } else if numeric[col_idx] {
                    raw.trim()
                        .parse::<f64>()
                        .map(Value::Number)
                        .unwrap_or(Value::Missing)
                } else {
                    Value::Text(raw.trim().to_string())
                };
                row.insert(col.clone(), value);
            }
            index.push(row_id.clone());
            data.insert(row_id, row);
        }

        Ok(Self {
            index_name,
            index,
            columns,
            data,
        })
    }

    /// Write the table to a delimited file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = delimited_writer(path.as_ref())?;
        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push(self.index_name.clone());
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header)?;

        for row_id in &self.index {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(row_id.clone());
            for col in &self.columns {
                record.push(
                    self.get(row_id, col)
                        .and_then(Value::to_display)
                        .unwrap_or_default(),
                );
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Name of the index column.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Set the name of the index column.
    pub fn set_index_name(&mut self, name: &str) {
        self.index_name = name.to_string();
    }

    /// Row labels in order.
    pub fn index(&self) -> &[String] {
        &self.index
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.index.len()
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Check if a row exists.
    pub fn has_row(&self, row: &str) -> bool {
        self.data.contains_key(row)
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Find a column by case-insensitive name, returning its stored spelling.
    pub fn find_column_ci(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(column))
            .map(String::as_str)
    }

    /// Get a cell.
    pub fn get(&self, row: &str, column: &str) -> Option<&Value> {
        self.data.get(row).and_then(|r| r.get(column))
    }

    /// Get a non-missing cell rendered as a string.
    pub fn get_str(&self, row: &str, column: &str) -> Option<String> {
        self.get(row, column).and_then(Value::to_display)
    }

    /// Get a cell as a number.
    pub fn get_f64(&self, row: &str, column: &str) -> Option<f64> {
        self.get(row, column).and_then(Value::as_f64)
    }

    /// Set a cell, adding the column if needed.
    pub fn set(&mut self, row: &str, column: &str, value: impl Into<Value>) -> Result<()> {
        let row_data = self
            .data
            .get_mut(row)
            .ok_or_else(|| ImodError::LabelMismatch(format!("Row '{}' not in table", row)))?;
        row_data.insert(column.to_string(), value.into());
        if !self.columns.iter().any(|c| c == column) {
            self.columns.push(column.to_string());
        }
        Ok(())
    }

    /// Append an empty row.
    pub fn add_row(&mut self, row: &str) -> Result<()> {
        if self.data.contains_key(row) {
            return Err(ImodError::DuplicateLabel {
                label: row.to_string(),
                axis: "table index".to_string(),
            });
        }
        self.index.push(row.to_string());
        self.data.insert(row.to_string(), HashMap::new());
        Ok(())
    }

    /// Add a column filled with missing values if absent.
    pub fn ensure_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }

    /// All values of a column, in index order.
    pub fn column(&self, column: &str) -> Result<Vec<&Value>> {
        if !self.has_column(column) {
            return Err(ImodError::MissingColumn(column.to_string()));
        }
        Ok(self
            .index
            .iter()
            .map(|r| {
                self.data
                    .get(r)
                    .and_then(|m| m.get(column))
                    .unwrap_or(&Value::Missing)
            })
            .collect())
    }

    /// Rename a column.
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return Ok(());
        }
        let pos = self
            .columns
            .iter()
            .position(|c| c == old)
            .ok_or_else(|| ImodError::MissingColumn(old.to_string()))?;
        if self.has_column(new) {
            return Err(ImodError::DuplicateLabel {
                label: new.to_string(),
                axis: "table columns".to_string(),
            });
        }
        self.columns[pos] = new.to_string();
        for row in self.data.values_mut() {
            if let Some(v) = row.remove(old) {
                row.insert(new.to_string(), v);
            }
        }
        Ok(())
    }

    /// Remove a column if present.
    pub fn drop_column(&mut self, column: &str) {
        self.columns.retain(|c| c != column);
        for row in self.data.values_mut() {
            row.remove(column);
        }
    }

    /// Rename row labels. Labels not in `map` are kept.
    pub fn rename_index(&mut self, map: &HashMap<String, String>) -> Result<()> {
        let new_index: Vec<String> = self
            .index
            .iter()
            .map(|r| map.get(r).cloned().unwrap_or_else(|| r.clone()))
            .collect();
        super::check_unique(&new_index, "table index")?;

        let mut new_data = HashMap::with_capacity(self.data.len());
        for (old, new) in self.index.iter().zip(new_index.iter()) {
            if let Some(row) = self.data.remove(old) {
                new_data.insert(new.clone(), row);
            }
        }
        self.index = new_index;
        self.data = new_data;
        Ok(())
    }

    /// Restrict and reorder rows to `index`.
    ///
    /// Entries of `index` absent from the table are reported once with a
    /// warning and receive empty rows. Rows not in `index` are dropped.
    pub fn align_to(&self, index: &[String], name: &str) -> Self {
        let missing: Vec<&str> = index
            .iter()
            .filter(|r| !self.data.contains_key(*r))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() && !self.columns.is_empty() {
            warn!(
                table = name,
                n_missing = missing.len(),
                "Some {} are missing from the {} table: {:?}",
                name,
                name,
                missing
            );
        }

        let data = index
            .iter()
            .map(|r| (r.clone(), self.data.get(r).cloned().unwrap_or_default()))
            .collect();
        Self {
            index_name: self.index_name.clone(),
            index: index.to_vec(),
            columns: self.columns.clone(),
            data,
        }
    }

    /// Group row labels by the values of `columns`.
    ///
    /// Groups are returned in order of first appearance. Rows with a missing
    /// key value are skipped.
    pub fn group_by(&self, columns: &[&str]) -> Result<Vec<(Vec<String>, Vec<String>)>> {
        for col in columns {
            if !self.has_column(col) {
                return Err(ImodError::MissingColumn(col.to_string()));
            }
        }
        let mut groups: Vec<(Vec<String>, Vec<String>)> = Vec::new();
        let mut positions: HashMap<Vec<String>, usize> = HashMap::new();
        'rows: for row in &self.index {
            let mut key = Vec::with_capacity(columns.len());
            for col in columns {
                match self.get_str(row, col) {
                    Some(v) => key.push(v),
                    None => continue 'rows,
                }
            }
            match positions.get(&key) {
                Some(&pos) => groups[pos].1.push(row.clone()),
                None => {
                    positions.insert(key.clone(), groups.len());
                    groups.push((key, vec![row.clone()]));
                }
            }
        }
        Ok(groups)
    }

    /// Unique non-missing values of a column, sorted.
    pub fn unique(&self, column: &str) -> Result<Vec<String>> {
        let mut values: Vec<String> = self
            .column(column)?
            .into_iter()
            .filter_map(Value::to_display)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        values.sort();
        Ok(values)
    }

    /// Copy with only the given columns (those present), in the given order.
    pub fn select_columns(&self, columns: &[&str]) -> Self {
        let keep: Vec<String> = columns
            .iter()
            .filter(|c| self.has_column(c))
            .map(|c| c.to_string())
            .collect();
        let data = self
            .data
            .iter()
            .map(|(r, row)| {
                let row = row
                    .iter()
                    .filter(|(c, _)| keep.contains(c))
                    .map(|(c, v)| (c.clone(), v.clone()))
                    .collect();
                (r.clone(), row)
            })
            .collect();
        Self {
            index_name: self.index_name.clone(),
            index: self.index.clone(),
            columns: keep,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn create_test_csv() -> NamedTempFile {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "sample_id,project,condition,doi,od").unwrap();
        writeln!(file, "S1,control,wt_glc,doi:1,0.4").unwrap();
        writeln!(file, "S2,control,wt_glc,,0.5").unwrap();
        writeln!(file, "S3,heat,wt_42,doi:2,NA").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_table() {
        let file = create_test_csv();
        let table = AnnotationTable::from_csv(file.path()).unwrap();

        assert_eq!(table.n_rows(), 3);
        assert_eq!(table.index_name(), "sample_id");
        assert_eq!(table.columns(), &["project", "condition", "doi", "od"]);
        assert_eq!(table.get_str("S1", "project").as_deref(), Some("control"));
        assert_eq!(table.get_f64("S2", "od"), Some(0.5));
        assert!(table.get("S2", "doi").unwrap().is_missing());
        assert!(table.get("S3", "od").unwrap().is_missing());
    }

    #[test]
    fn test_align_to() {
        let file = create_test_csv();
        let table = AnnotationTable::from_csv(file.path()).unwrap();
        let aligned = table.align_to(&["S3".to_string(), "S4".to_string()], "sample");

        assert_eq!(aligned.index(), &["S3", "S4"]);
        assert_eq!(aligned.get_str("S3", "project").as_deref(), Some("heat"));
        assert!(aligned.get_str("S4", "project").is_none());
        assert!(!aligned.has_row("S1"));
    }

    #[test]
    fn test_group_by() {
        let file = create_test_csv();
        let table = AnnotationTable::from_csv(file.path()).unwrap();
        let groups = table.group_by(&["project", "condition"]).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, vec!["control", "wt_glc"]);
        assert_eq!(groups[0].1, vec!["S1", "S2"]);
        assert_eq!(groups[1].1, vec!["S3"]);
        assert!(table.group_by(&["missing"]).is_err());
    }

    #[test]
    fn test_set_and_rename() {
        let mut table = AnnotationTable::new(vec!["0".into(), "1".into()]);
        table.set("0", "Regulator", "glpR").unwrap();
        assert!(table.set("9", "regulator", "x").is_err());

        assert_eq!(table.find_column_ci("regulator"), Some("Regulator"));
        table.rename_column("Regulator", "regulator").unwrap();
        assert_eq!(table.get_str("0", "regulator").as_deref(), Some("glpR"));
        assert!(table.get("1", "regulator").is_none());

        let mut map = HashMap::new();
        map.insert("0".to_string(), "GlpR".to_string());
        table.rename_index(&map).unwrap();
        assert_eq!(table.index(), &["GlpR", "1"]);
        assert_eq!(table.get_str("GlpR", "regulator").as_deref(), Some("glpR"));
    }

    #[test]
    fn test_csv_roundtrip() {
        let file = create_test_csv();
        let table = AnnotationTable::from_csv(file.path()).unwrap();
        let out = Builder::new().suffix(".csv").tempfile().unwrap();
        table.to_csv(out.path()).unwrap();
        let loaded = AnnotationTable::from_csv(out.path()).unwrap();

        assert_eq!(loaded.index(), table.index());
        assert_eq!(loaded.columns(), table.columns());
        assert_eq!(loaded.get_str("S3", "doi"), table.get_str("S3", "doi"));
        assert_eq!(loaded.get_f64("S1", "od"), Some(0.4));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(0.25).to_string(), "0.25");
        assert_eq!(Value::from(f64::NAN), Value::Missing);
        assert_eq!(Value::from(true).to_string(), "True");
    }

    #[test]
    fn test_add_row() {
        let mut table = AnnotationTable::new(vec!["a".to_string()]);
        table.add_row("b").unwrap();
        table.set("b", "x", 1.0).unwrap();
        assert_eq!(table.index(), &["a", "b"]);
        assert!(table.get("a", "x").is_none());
        assert!(table.add_row("a").is_err());
    }
}
