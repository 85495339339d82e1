use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::error::{Error, Result};

/// A CSV file held in memory as string records
#[derive(Debug, Clone)]
pub struct Table {
    path: PathBuf,
    headers: Vec<String>,
    records: Vec<csv::StringRecord>,
}

impl Table {
    pub fn read(path: impl AsRef<Path>) -> Result<Table> {
        let path = path.as_ref().to_path_buf();
        let csv_err = |source| Error::Csv {
            path: path.clone(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(csv_err)?;
        let headers = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect();
        let records = reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(csv_err)?;
        Ok(Table {
            path,
            headers,
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The first `count` columns by position, parsed as floats
    pub fn features(&self, count: usize) -> Result<Array2<f32>> {
        if self.headers.len() < count {
            return Err(Error::TooFewColumns {
                path: self.path.clone(),
                found: self.headers.len(),
                needed: count,
            });
        }
        let mut out = Array2::zeros((self.records.len(), count));
        for (row, record) in self.records.iter().enumerate() {
            for col in 0..count {
                let raw = record.get(col).unwrap_or("");
                out[[row, col]] = raw.parse::<f32>().map_err(|_| self.parse_error(row, col, raw))?;
            }
        }
        Ok(out)
    }

    /// An integer-valued column looked up by header name. `3.0` reads as 3.
    pub fn integer_column(&self, name: &str) -> Result<Vec<i64>> {
        let col = self
            .headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| Error::MissingColumn {
                path: self.path.clone(),
                column: name.to_string(),
            })?;
        self.records
            .iter()
            .enumerate()
            .map(|(row, record)| {
                let raw = record.get(col).unwrap_or("");
                parse_integer(raw).ok_or_else(|| self.parse_error(row, col, raw))
            })
            .collect()
    }

    fn parse_error(&self, row: usize, col: usize, raw: &str) -> Error {
        Error::Parse {
            path: self.path.clone(),
            row: row + 1,
            column: self.headers.get(col).cloned().unwrap_or_else(|| col.to_string()),
            value: raw.to_string(),
        }
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        let v = raw.parse::<f64>().ok()?;
        (v.is_finite() && v.fract() == 0.0).then_some(v as i64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_reads_features_and_target() {
        let file = write_csv("a,b,dloc,ED\n1.5,2,3,0\n-1,0.25,1.0,1\n");
        let table = Table::read(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        let x = table.features(2).unwrap();
        assert_eq!(x.dim(), (2, 2));
        assert_eq!(x[[1, 1]], 0.25);
        assert_eq!(table.integer_column("dloc").unwrap(), vec![3, 1]);
    }

    #[test]
    fn test_missing_column_and_bad_cell() {
        let file = write_csv("a,b,dloc\n1,x,2\n");
        let table = Table::read(file.path()).unwrap();
        assert!(matches!(
            table.integer_column("overload_loc"),
            Err(Error::MissingColumn { .. })
        ));
        assert!(matches!(table.features(2), Err(Error::Parse { row: 1, .. })));
        assert!(matches!(table.features(5), Err(Error::TooFewColumns { found: 3, .. })));
    }

    #[test]
    fn test_fractional_label_is_rejected() {
        assert_eq!(parse_integer("2"), Some(2));
        assert_eq!(parse_integer("2.0"), Some(2));
        assert_eq!(parse_integer("2.5"), None);
    }
}
