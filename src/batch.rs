//! Batch sizing for statements bound by SQLite's variable limit.
//!
//! SQLite caps the number of bound parameters (`?`) a single statement may
//! carry. The cap is a limit on *variables*, not rows, so a bulk insert has to
//! be cut into batches whose width times row count stays under the cap.

use std::ops::Range;

use crate::error::{Error, Result};

/// Bound-parameter ceiling of SQLite builds older than 3.32.0. Safe for the
/// vast majority of bindings.
pub const SQLITE_DEFAULT_VARIABLE_LIMIT: usize = 999;

/// Bound-parameter ceiling of SQLite 3.32.0 and later.
pub const SQLITE_MAX_VARIABLE_NUMBER: usize = 32_766;

/// Largest number of whole rows of `columns_per_row` parameters that fit in
/// one statement carrying at most `variable_limit` parameters.
///
/// ```
/// use sqlite_plus::calc_batch_size;
///
/// assert_eq!(calc_batch_size(3, 999).unwrap(), 333);
/// assert!(calc_batch_size(1000, 999).is_err());
/// ```
pub fn calc_batch_size(columns_per_row: usize, variable_limit: usize) -> Result<usize> {
    if columns_per_row == 0 {
        return Err(Error::InvalidArgument {
            name: "columns_per_row",
        });
    }
    if variable_limit == 0 {
        return Err(Error::InvalidArgument {
            name: "variable_limit",
        });
    }
    if columns_per_row > variable_limit {
        return Err(Error::RowTooWide {
            columns: columns_per_row,
            limit: variable_limit,
        });
    }
    Ok(variable_limit / columns_per_row)
}

/// Per-model estimate: every writable field may be bound, plus one variable
/// for the table reference. Returns 0 when there is nothing to write.
pub fn calc_model_batch_size(
    row_count: usize,
    field_count: usize,
    variable_limit: usize,
) -> Result<usize> {
    if row_count == 0 {
        return Ok(0);
    }
    // field_count + 1 does not fit in usize, so no limit can hold the row
    let Some(columns) = field_count.checked_add(1) else {
        return Err(Error::RowTooWide {
            columns: field_count,
            limit: variable_limit,
        });
    };
    calc_batch_size(columns, variable_limit)
}

/// How a set of rows is cut into statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    row_count: usize,
    rows_per_batch: usize,
}

impl BatchPlan {
    /// Plan for a backend bound by `variable_limit` parameters per statement.
    pub fn new(row_count: usize, columns_per_row: usize, variable_limit: usize) -> Result<Self> {
        Ok(Self {
            row_count,
            rows_per_batch: calc_batch_size(columns_per_row, variable_limit)?,
        })
    }

    /// Plan for a backend without a parameter ceiling: everything goes in a
    /// single batch.
    pub fn unbounded(row_count: usize) -> Self {
        Self {
            row_count,
            rows_per_batch: row_count.max(1),
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn rows_per_batch(&self) -> usize {
        self.rows_per_batch
    }

    pub fn batch_count(&self) -> usize {
        self.row_count.div_ceil(self.rows_per_batch)
    }

    /// Index ranges of each batch, in order. The last one may be short.
    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> {
        let Self {
            row_count,
            rows_per_batch,
        } = *self;
        (0..row_count)
            .step_by(rows_per_batch)
            .map(move |start| start..(start + rows_per_batch).min(row_count))
    }
}
