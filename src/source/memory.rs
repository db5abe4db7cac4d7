//! In-memory row source

use std::collections::VecDeque;

use super::{Row, RowSource};
use crate::Result;

/// Yields a fixed list of rows in order.
#[derive(Debug, Clone, Default)]
pub struct VecRowSource {
    rows: VecDeque<Row>,
}

impl VecRowSource {
    pub fn new(rows: impl IntoIterator<Item = Row>) -> Self {
        Self { rows: rows.into_iter().collect() }
    }

    /// Single row with timestamp zero.
    pub fn single(payload: impl Into<Vec<u8>>) -> Self {
        Self::new([Row::new(0.0, payload)])
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait::async_trait]
impl RowSource for VecRowSource {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }
}
