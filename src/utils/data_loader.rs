//! Data loading utilities
//!
//! CSV extracts are read with every column as text, cleaned of sentinel
//! tokens, unioned by column name and de-duplicated. Type inference happens
//! later, at feature selection.

use crate::error::{ForecastError, Result};
use polars::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Cell values that mean "no data" in analytics exports
pub const SENTINEL_TOKENS: &[&str] = &["unknown", "null", "(none)", "(not set)", "", "nan", "NaN"];

/// Replacement for sentinel and missing cells
pub const SENTINEL_REPLACEMENT: &str = "0";

/// CSV loader for analytics extracts
#[derive(Debug, Clone)]
pub struct DataLoader {
    /// Replace sentinel tokens after reading
    clean: bool,
    /// Drop duplicate rows after concatenation
    deduplicate: bool,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    /// Create a new data loader
    pub fn new() -> Self {
        Self {
            clean: true,
            deduplicate: true,
        }
    }

    pub fn with_cleaning(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    pub fn with_deduplication(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Load a CSV file with every column read as text
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| ForecastError::DataError(format!("{}: {}", path.display(), e)))?;

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .into_reader_with_file_handle(file)
            .finish()
            .map_err(|e| ForecastError::DataError(format!("{}: {}", path.display(), e)))?;

        if self.clean {
            clean_sentinels(&df)
        } else {
            Ok(df)
        }
    }

    /// Load CSV content handed over in memory. The bytes go through a
    /// temporary file that is removed when this call returns.
    pub fn load_csv_bytes(&self, bytes: &[u8]) -> Result<DataFrame> {
        let mut tmp = tempfile::Builder::new().suffix(".csv").tempfile()?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        self.load_csv(tmp.path())
    }

    /// Load and concatenate several CSV files.
    ///
    /// Unreadable files are skipped with a warning. Columns missing from a
    /// file are filled with the sentinel replacement.
    pub fn load_many<P: AsRef<Path>>(&self, paths: &[P]) -> Result<DataFrame> {
        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            match self.load_csv(path) {
                Ok(df) => {
                    info!(file = %path.display(), rows = df.height(), columns = df.width(), "Loaded CSV");
                    frames.push(df);
                }
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping unreadable file"),
            }
        }

        if frames.is_empty() {
            return Err(ForecastError::DataError("No data file could be loaded".to_string()));
        }

        let combined = concat_frames(&frames)?;
        if !self.deduplicate {
            return Ok(combined);
        }

        let before = combined.height();
        let deduped = drop_duplicate_rows(&combined)?;
        info!(
            removed = before - deduped.height(),
            rows = deduped.height(),
            columns = deduped.width(),
            "Removed duplicate rows"
        );
        Ok(deduped)
    }
}

fn is_sentinel(cell: &str) -> bool {
    let trimmed = cell.trim();
    SENTINEL_TOKENS.iter().any(|t| *t == trimmed)
}

/// Replace sentinel tokens, blanks and nulls in text columns with `"0"`.
/// Columns of other types are returned unchanged.
pub fn clean_sentinels(df: &DataFrame) -> Result<DataFrame> {
    let columns = df
        .get_columns()
        .iter()
        .map(|column| {
            let series = column.as_materialized_series();
            if series.dtype() != &DataType::String {
                return Ok(column.clone());
            }
            let cleaned: StringChunked = series
                .str()?
                .into_iter()
                .map(|cell| match cell {
                    Some(s) if !is_sentinel(s) => Some(s),
                    _ => Some(SENTINEL_REPLACEMENT),
                })
                .collect();
            Ok(Column::from(cleaned.with_name(series.name().clone()).into_series()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DataFrame::new(columns)?)
}

/// Stack frames vertically over the union of their columns. Cells a file
/// does not have become the sentinel replacement.
fn concat_frames(frames: &[DataFrame]) -> Result<DataFrame> {
    let combined = polars::functions::concat_df_diagonal(frames)?;
    Ok(combined
        .lazy()
        .with_columns([col("*").fill_null(lit(SENTINEL_REPLACEMENT))])
        .collect()?)
}

/// Drop repeated rows, keeping the first occurrence in order
pub fn drop_duplicate_rows(df: &DataFrame) -> Result<DataFrame> {
    Ok(df.unique_stable(None, UniqueKeepStrategy::First, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_clean_sentinels() {
        let df = df!(
            "source" => &[Some("google"), Some("(not set)"), Some("unknown"), None],
            "sessions" => &[Some("1"), Some(""), Some("nan"), Some("4")]
        )
        .unwrap();

        let cleaned = clean_sentinels(&df).unwrap();
        let source: Vec<Option<&str>> = cleaned.column("source").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(source, vec![Some("google"), Some("0"), Some("0"), Some("0")]);
        let sessions: Vec<Option<&str>> = cleaned.column("sessions").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(sessions, vec![Some("1"), Some("0"), Some("0"), Some("4")]);
    }

    #[test]
    fn test_drop_duplicates_keeps_first() {
        let df = df!(
            "a" => &["1", "2", "1", "3"],
            "b" => &["x", "y", "x", "z"]
        )
        .unwrap();

        let deduped = drop_duplicate_rows(&df).unwrap();
        assert_eq!(deduped.height(), 3);
        let a: Vec<Option<&str>> = deduped.column("a").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(a, vec![Some("1"), Some("2"), Some("3")]);
    }

    #[test]
    fn test_load_many_unions_columns() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.csv");
        let second = dir.path().join("second.csv");
        fs::write(&first, "date,sessions\n2024-01-01,10\n2024-01-02,12\n").unwrap();
        fs::write(&second, "date,sessions,users\n2024-01-02,12,7\n2024-01-03,(not set),9\n").unwrap();

        let df = DataLoader::new().load_many(&[&first, &second]).unwrap();
        assert_eq!(df.width(), 3);
        assert_eq!(df.height(), 4);

        let users: Vec<Option<&str>> = df.column("users").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(users[0], Some("0"));
        let sessions: Vec<Option<&str>> = df.column("sessions").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(sessions[3], Some("0"));
    }

    #[test]
    fn test_load_many_fills_absent_columns_without_cleaning() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.csv");
        let second = dir.path().join("second.csv");
        fs::write(&first, "sessions,source
10,google
").unwrap();
        fs::write(&second, "users,sessions
7,12
7,12
").unwrap();

        let df = DataLoader::new()
            .with_cleaning(false)
            .load_many(&[&first, &second])
            .unwrap();
        assert_eq!(df.get_column_names_str(), vec!["sessions", "source", "users"]);
        assert_eq!(df.height(), 2);

        let source: Vec<Option<&str>> = df.column("source").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(source, vec![Some("google"), Some("0")]);
        let users: Vec<Option<&str>> = df.column("users").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(users, vec![Some("0"), Some("7")]);
    }

    #[test]
    fn test_drop_duplicates_treats_nulls_as_equal() {
        let df = df!(
            "a" => &[Some("1"), None, None, Some("1")],
            "b" => &["x", "y", "y", "z"]
        )
        .unwrap();

        let deduped = drop_duplicate_rows(&df).unwrap();
        let b: Vec<Option<&str>> = deduped.column("b").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(b, vec![Some("x"), Some("y"), Some("z")]);
    }

    #[test]
    fn test_load_many_dedupes_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        fs::write(&first, "x,y\n1,2\n3,4\n").unwrap();
        fs::write(&second, "x,y\n1,2\n5,6\n").unwrap();

        let df = DataLoader::new().load_many(&[&first, &second]).unwrap();
        assert_eq!(df.height(), 3);
    }

    #[test]
    fn test_load_many_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.csv");
        fs::write(&good, "x\n1\n").unwrap();
        let missing = dir.path().join("missing.csv");

        let df = DataLoader::new().load_many(&[&missing, &good]).unwrap();
        assert_eq!(df.height(), 1);

        let err = DataLoader::new().load_many(&[&missing]).unwrap_err();
        assert!(matches!(err, ForecastError::DataError(_)));
    }

    #[test]
    fn test_load_csv_bytes() {
        let df = DataLoader::new()
            .load_csv_bytes(b"sessions,engagementRate\n3,0.5\nnull,0.7\n")
            .unwrap();
        assert_eq!(df.height(), 2);
        let sessions: Vec<Option<&str>> = df.column("sessions").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(sessions[1], Some("0"));
    }
}
