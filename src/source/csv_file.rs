//! CSV file row source

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{Reader, ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Row, RowSource};
use crate::{Result, TagalongError};

/// A CSV column, by header name or zero-based index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Index(usize),
    Name(String),
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Column::Index(i) => write!(f, "#{}", i),
            Column::Name(name) => write!(f, "'{}'", name),
        }
    }
}

impl Column {
    fn resolve(&self, headers: Option<&StringRecord>) -> Result<usize> {
        match (self, headers) {
            (Column::Index(i), _) => Ok(*i),
            (Column::Name(name), Some(headers)) => {
                headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
                    TagalongError::config("source", format!("no column named '{}'", name))
                })
            }
            (Column::Name(name), None) => Err(TagalongError::config(
                "source",
                format!("column '{}' given by name but the file has no header row", name),
            )),
        }
    }
}

/// Reads `(timestamp, payload)` rows from a CSV file.
///
/// Payload cells are sent as their UTF-8 bytes. The timestamp cell must parse
/// as a float; rows where it does not are reported as malformed.
pub struct CsvRowSource {
    path: PathBuf,
    reader: Reader<File>,
    record: StringRecord,
    timestamp_index: usize,
    payload_index: usize,
    row: usize,
}

impl fmt::Debug for CsvRowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvRowSource")
            .field("path", &self.path)
            .field("timestamp_index", &self.timestamp_index)
            .field("payload_index", &self.payload_index)
            .field("row", &self.row)
            .finish()
    }
}

impl CsvRowSource {
    /// Open `path` and resolve the two columns.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened, the header row cannot be read,
    /// or a named column does not exist.
    pub fn open(
        path: impl AsRef<Path>,
        timestamp: &Column,
        payload: &Column,
        has_headers: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| TagalongError::file_error(path.clone(), e))?;
        let mut reader =
            ReaderBuilder::new().has_headers(has_headers).flexible(true).from_reader(file);

        let headers = if has_headers {
            let headers = reader.headers().map_err(|e| {
                TagalongError::data_source(
                    format!("reading header of {}", path.display()),
                    Box::new(e),
                )
            })?;
            Some(headers.clone())
        } else {
            None
        };

        let timestamp_index = timestamp.resolve(headers.as_ref())?;
        let payload_index = payload.resolve(headers.as_ref())?;
        info!(
            "Reading rows from {} (timestamp column {}, payload column {})",
            path.display(),
            timestamp,
            payload
        );

        Ok(Self {
            path,
            reader,
            record: StringRecord::new(),
            timestamp_index,
            payload_index,
            row: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_record(&self) -> Result<Row> {
        let field = |index: usize, what: &str| {
            self.record.get(index).ok_or_else(|| TagalongError::MalformedRow {
                row: self.row,
                details: format!("missing {} column (index {})", what, index),
            })
        };

        let raw_timestamp = field(self.timestamp_index, "timestamp")?;
        let timestamp =
            raw_timestamp.trim().parse::<f64>().map_err(|e| TagalongError::MalformedRow {
                row: self.row,
                details: format!("timestamp '{}': {}", raw_timestamp, e),
            })?;
        if !timestamp.is_finite() {
            return Err(TagalongError::MalformedRow {
                row: self.row,
                details: format!("timestamp '{}' is not finite", raw_timestamp),
            });
        }
        let payload = field(self.payload_index, "payload")?;

        Ok(Row::new(timestamp, payload.as_bytes()))
    }
}

#[async_trait::async_trait]
impl RowSource for CsvRowSource {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        let more = match self.reader.read_record(&mut self.record) {
            Ok(more) => more,
            Err(e) if e.is_io_error() => {
                return Err(TagalongError::data_source(
                    format!("reading {}", self.path.display()),
                    Box::new(e),
                ));
            }
            Err(e) => {
                self.row += 1;
                return Err(TagalongError::MalformedRow { row: self.row, details: e.to_string() });
            }
        };

        if !more {
            debug!("{} exhausted after {} rows", self.path.display(), self.row);
            return Ok(None);
        }

        self.row += 1;
        self.parse_record().map(Some)
    }
}
