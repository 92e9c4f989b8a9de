//! Dataset rows loaded from CSV files
//!
//! Two layouts are understood. Files whose header names `ImageID` together
//! with `Thumbnail300KURL` and/or `OriginalURL` are read by column name, with
//! the thumbnail as primary URL and the original as fallback. Any other file
//! is read positionally: id, URL, then an optional fallback URL.

use crate::error::{FetchError, Result};
use crate::types::Row;
use std::io::Read;
use std::path::Path;

const ID_COLUMN: &str = "ImageID";
const THUMBNAIL_COLUMN: &str = "Thumbnail300KURL";
const ORIGINAL_COLUMN: &str = "OriginalURL";

/// Column indices for id, primary URL and optional fallback URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap {
    id: usize,
    primary: usize,
    fallback: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let find = |name: &str| headers.iter().position(|header| header == name);

        match (find(ID_COLUMN), find(THUMBNAIL_COLUMN), find(ORIGINAL_COLUMN)) {
            (Some(id), Some(primary), fallback) => Self {
                id,
                primary,
                fallback,
            },
            (Some(id), None, Some(original)) => Self {
                id,
                primary: original,
                fallback: None,
            },
            _ => Self {
                id: 0,
                primary: 1,
                fallback: (headers.len() > 2).then_some(2),
            },
        }
    }

    fn row(&self, record: &csv::StringRecord) -> Option<Row> {
        let id = record.get(self.id).map(str::trim).filter(|id| !id.is_empty())?;
        let primary = record.get(self.primary).unwrap_or_default();
        let fallback = self.fallback.and_then(|index| record.get(index));

        let row = Row::with_fallback(id, primary, fallback);
        (!row.urls().is_empty()).then_some(row)
    }
}

/// Ordered rows of one dataset split
#[derive(Debug, Clone, Default)]
pub struct CsvRowSource {
    rows: Vec<Row>,
    skipped: usize,
}

impl CsvRowSource {
    /// Load rows from a CSV file
    ///
    /// # Errors
    /// - File cannot be opened
    /// - Malformed CSV the reader cannot recover from
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| FetchError::file_io_error("open dataset", path, &e))?;

        let source = Self::from_reader(file)?;
        tracing::debug!(
            path = %path.display(),
            rows = source.len(),
            skipped = source.skipped(),
            "Dataset loaded"
        );
        Ok(source)
    }

    /// Load rows from any CSV reader; the first record is the header
    ///
    /// Rows that are not valid UTF-8 are skipped and counted like incomplete ones.
    ///
    /// # Errors
    /// - Malformed CSV the reader cannot recover from
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv::StringRecord::from_byte_record_lossy(reader.byte_headers()?.clone());
        let columns = ColumnMap::from_headers(&headers);
        let mut source = Self::default();

        for (index, record) in reader.byte_records().enumerate() {
            // +2: one for the header, one for 1-based numbering
            let line = index + 2;
            let record = match csv::StringRecord::from_byte_record(record?) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(line, error = %e.utf8_error(), "Skipping row with invalid UTF-8");
                    source.skipped += 1;
                    continue;
                },
            };

            match columns.row(&record) {
                Some(row) => source.rows.push(row),
                None => {
                    tracing::warn!(line, "Skipping row without an id or URL");
                    source.skipped += 1;
                },
            }
        }

        Ok(source)
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Records dropped for lacking an id or any URL, or for invalid UTF-8
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_positional_columns() {
        let data = "id,url\n1,http://x/a.jpg\n2,http://x/b.png\n";
        let source = CsvRowSource::from_reader(data.as_bytes()).unwrap();

        assert_eq!(source.len(), 2);
        assert_eq!(source.rows()[0].id(), "1");
        assert_eq!(source.rows()[0].primary_url(), Some("http://x/a.jpg"));
        assert_eq!(source.rows()[1].fallback_url(), None);
        assert_eq!(source.skipped(), 0);
    }

    #[test]
    fn test_positional_fallback_column() {
        let data = "a,b,c\n7,http://x/t.jpg,http://x/o.jpg\n8,,http://x/only.jpg\n";
        let rows = CsvRowSource::from_reader(data.as_bytes())
            .unwrap()
            .into_rows();

        assert_eq!(rows[0].fallback_url(), Some("http://x/o.jpg"));
        assert_eq!(rows[1].primary_url(), Some("http://x/only.jpg"));
    }

    #[test]
    fn test_named_columns_in_any_order() {
        let data = "OriginalURL,Subset,ImageID,Thumbnail300KURL\n\
                    http://x/orig.jpg,train,abc,http://x/thumb.jpg\n\
                    http://x/orig2.jpg,train,def,\n";
        let rows = CsvRowSource::from_reader(data.as_bytes())
            .unwrap()
            .into_rows();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id(), "abc");
        assert_eq!(rows[0].primary_url(), Some("http://x/thumb.jpg"));
        assert_eq!(rows[0].fallback_url(), Some("http://x/orig.jpg"));
        // Empty thumbnail falls back to the original URL
        assert_eq!(rows[1].primary_url(), Some("http://x/orig2.jpg"));
    }

    #[test]
    fn test_original_url_only() {
        let data = "ImageID,OriginalURL\nabc,http://x/orig.jpg\n";
        let rows = CsvRowSource::from_reader(data.as_bytes())
            .unwrap()
            .into_rows();
        assert_eq!(rows[0].urls(), &["http://x/orig.jpg".to_string()]);
    }

    #[test]
    fn test_incomplete_rows_are_skipped() {
        let data = "id,url\n,http://x/a.jpg\n2,\n3\n4,http://x/d.jpg\n";
        let source = CsvRowSource::from_reader(data.as_bytes()).unwrap();

        assert_eq!(source.len(), 1);
        assert_eq!(source.rows()[0].id(), "4");
        assert_eq!(source.skipped(), 3);
    }

    #[test]
    fn test_invalid_utf8_row_is_skipped() {
        let mut data = b"id,url\n1,http://x/a.jpg\n".to_vec();
        data.extend_from_slice(b"2,http://x/\xff\xfe.jpg\n");
        data.extend_from_slice(b"3,http://x/c.jpg\n");

        let source = CsvRowSource::from_reader(data.as_slice()).unwrap();

        assert_eq!(source.len(), 2);
        assert_eq!(source.rows()[0].id(), "1");
        assert_eq!(source.rows()[1].id(), "3");
        assert_eq!(source.skipped(), 1);
    }

    #[test]
    fn test_header_only_file_is_empty() {
        let source = CsvRowSource::from_reader("id,url\n".as_bytes()).unwrap();
        assert!(source.is_empty());
    }

    #[test]
    fn test_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "id,url").unwrap();
        writeln!(file, "42,http://x/img.jpg").unwrap();

        let source = CsvRowSource::from_path(file.path()).unwrap();
        assert_eq!(source.rows(), &[Row::new("42", "http://x/img.jpg")]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = CsvRowSource::from_path("/nonexistent/dataset.csv").unwrap_err();
        assert!(matches!(err, FetchError::Io(_)));
    }
}
