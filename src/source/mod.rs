//! Row sources feeding the transmitter.

mod csv_file;
mod memory;

pub use csv_file::{Column, CsvRowSource};
pub use memory::VecRowSource;

use crate::Result;

/// One timestamped payload to transmit.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: f64,
    pub payload: Vec<u8>,
}

impl Row {
    pub fn new(timestamp: f64, payload: impl Into<Vec<u8>>) -> Self {
        Self { timestamp, payload: payload.into() }
    }
}

/// Trait for payload sources
///
/// Rows come out in a stable order. The transmitter decides which of them
/// are already covered by the checkpoint; sources do no filtering.
#[async_trait::async_trait]
pub trait RowSource: Send {
    /// Get the next row
    ///
    /// Returns:
    /// - `Ok(Some(row))` - Row available
    /// - `Ok(None)` - Source exhausted
    /// - `Err(e)` - Error reading the row
    ///
    /// A [`crate::TagalongError::MalformedRow`] only concerns that row; the
    /// caller may keep reading. Any other error ends the source.
    async fn next_row(&mut self) -> Result<Option<Row>>;
}

#[async_trait::async_trait]
impl<S: RowSource + ?Sized> RowSource for Box<S> {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        (**self).next_row().await
    }
}
