//! Delimited report files, one per aggregated field

use crate::aggregate::AggregatedField;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of writing every report table
#[derive(Debug, Default)]
pub struct ReportOutcome {
    /// Fields written, with their file
    pub written: Vec<(String, PathBuf)>,
    /// Fields that failed, as [`Error::ReportWrite`]
    pub failures: Vec<Error>,
}

/// Writes aggregated tables as header-less delimited files
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
    delimiter: u8,
    extension: String,
    reserved: Vec<PathBuf>,
}

impl ReportWriter {
    /// Writer placing `<field>.<extension>` files in `dir`
    pub fn new(dir: impl Into<PathBuf>, delimiter: u8, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            delimiter,
            extension: extension.into(),
            reserved: Vec::new(),
        }
    }

    /// Files no table may be written to, such as the identifier-mapping file
    pub fn with_reserved(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.reserved.extend(paths);
        self
    }

    /// File a field's table is written to
    ///
    /// Characters that are unsafe in file names are replaced with `_`.
    pub fn path_for(&self, field: &str) -> PathBuf {
        let safe: String = field
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let safe = if safe.trim_matches('.').is_empty() {
            "_".to_string()
        } else {
            safe
        };
        self.dir.join(format!("{}.{}", safe, self.extension))
    }

    /// Write one table
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReportWrite`] naming the field.
    pub fn write_field(&self, table: &AggregatedField) -> Result<PathBuf> {
        let path = self.path_for(&table.name);
        write_rows(&path, self.delimiter, &table.rows).map_err(|e| Error::ReportWrite {
            field: table.name.clone(),
            reason: e.to_string(),
        })?;
        debug!(field = %table.name, rows = table.rows.len(), path = %path.display(), "Report table written");
        Ok(path)
    }

    /// Write every table independently
    ///
    /// A failing field does not stop the others; each failure is returned in
    /// [`ReportOutcome::failures`]. Field names that sanitise to a file already
    /// claimed by an earlier field, or to a reserved file, fail instead of
    /// overwriting it.
    pub fn write_all(&self, tables: &[AggregatedField]) -> ReportOutcome {
        let mut outcome = ReportOutcome::default();
        let mut claimed: HashMap<PathBuf, &str> = HashMap::new();
        for table in tables {
            let path = self.path_for(&table.name);
            let conflict = if self.reserved.contains(&path) {
                Some(format!("{} is reserved", path.display()))
            } else {
                claimed
                    .get(&path)
                    .map(|owner| format!("{} is already written for field {owner}", path.display()))
            };
            if let Some(reason) = conflict {
                warn!(field = %table.name, reason = %reason, "Report table skipped");
                outcome.failures.push(Error::ReportWrite {
                    field: table.name.clone(),
                    reason,
                });
                continue;
            }
            claimed.insert(path, &table.name);

            match self.write_field(table) {
                Ok(path) => outcome.written.push((table.name.clone(), path)),
                Err(e) => {
                    warn!(field = %table.name, error = %e, "Report table failed");
                    outcome.failures.push(e);
                }
            }
        }
        outcome
    }
}

fn write_rows(path: &Path, delimiter: u8, rows: &[Vec<String>]) -> std::result::Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::FieldKind;
    use tempfile::TempDir;

    fn table(name: &str, rows: &[&[&str]]) -> AggregatedField {
        AggregatedField {
            name: name.to_string(),
            kind: FieldKind::PerItem,
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn writes_tab_delimited_without_header() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path(), b'\t', "txt");

        let path = writer
            .write_field(&table("F", &[&["A", "x", ""], &["B", "y", "z"]]))
            .unwrap();

        assert_eq!(path, dir.path().join("F.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "A\tx\t\nB\ty\tz\n");
    }

    #[test]
    fn unsafe_field_names_are_sanitised() {
        let writer = ReportWriter::new("/summary", b'\t', "txt");
        assert_eq!(writer.path_for("growth/rates"), PathBuf::from("/summary/growth_rates.txt"));
        assert_eq!(writer.path_for(".."), PathBuf::from("/summary/_.txt"));
    }

    #[test]
    fn one_failure_does_not_stop_other_fields() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should go makes that one write fail
        std::fs::create_dir(dir.path().join("blocked.txt")).unwrap();
        let writer = ReportWriter::new(dir.path(), b'\t', "txt");

        let outcome = writer.write_all(&[
            table("first", &[&["A", "1"]]),
            table("blocked", &[&["A", "2"]]),
            table("last", &[&["A", "3"]]),
        ]);

        let written: Vec<&str> = outcome.written.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(written, vec!["first", "last"]);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            &outcome.failures[0],
            Error::ReportWrite { field, .. } if field == "blocked"
        ));
    }

    #[test]
    fn colliding_field_names_do_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path(), b'\t', "txt");

        let outcome = writer.write_all(&[
            table("growth/rates", &[&["A", "1"]]),
            table("growth_rates", &[&["A", "2"]]),
        ]);

        assert_eq!(outcome.written.len(), 1);
        assert_eq!(outcome.written[0].0, "growth/rates");
        assert!(matches!(
            &outcome.failures[..],
            [Error::ReportWrite { field, .. }] if field == "growth_rates"
        ));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("growth_rates.txt")).unwrap(),
            "A\t1\n"
        );
    }

    #[test]
    fn reserved_files_are_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let info = dir.path().join("Reconstructions_info.txt");
        std::fs::write(&info, "MicrobeID\na\n").unwrap();
        let writer = ReportWriter::new(dir.path(), b'\t', "txt").with_reserved([info.clone()]);

        let outcome = writer.write_all(&[
            table("Reconstructions_info", &[&["A", "1"]]),
            table("size", &[&["A", "2"]]),
        ]);

        assert_eq!(outcome.written.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(std::fs::read_to_string(&info).unwrap(), "MicrobeID\na\n");
    }

    #[test]
    fn empty_table_writes_empty_file() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::new(dir.path(), b',', "csv");
        let path = writer.write_field(&table("none", &[])).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "");
    }
}
