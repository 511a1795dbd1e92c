//! Block planning: translating a memory budget into a safe, deterministic row partition.
//!
//! The planner is a pure function of the array descriptor and the budget. It never consults
//! the system allocator or wall-clock memory statistics; fractional budgets are resolved
//! against an available-memory figure the caller reports, so identical inputs always produce
//! identical plans.

use byte_unit::{Byte, UnitType};
use serde::{Deserialize, Serialize};
use tracing::{event, Level};
use validator::Validate;

use crate::error::ReductionError;
use crate::models::ArrayDescriptor;

/// Byte ceiling for a reduction run.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ceiling {
    /// Absolute ceiling in bytes
    Bytes(u64),
    /// Fraction of a caller-reported available-memory figure
    Fraction { fraction: f64, available: u64 },
}

/// Memory budget for a reduction run.
///
/// The budget is an explicit per-call value; there is no process-global default that the
/// engine reads mid-computation.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryBudget {
    /// Byte ceiling
    pub ceiling: Ceiling,
    /// Number of simultaneous in-memory copies of a block the chosen reduction requires
    pub copies_needed: usize,
}

impl MemoryBudget {
    /// Return a budget with an absolute byte ceiling.
    pub fn bytes(bytes: u64, copies_needed: usize) -> Self {
        MemoryBudget {
            ceiling: Ceiling::Bytes(bytes),
            copies_needed,
        }
    }

    /// Return a budget ceiling at a fraction of a reported available-memory figure.
    pub fn fraction(fraction: f64, available: u64, copies_needed: usize) -> Self {
        MemoryBudget {
            ceiling: Ceiling::Fraction {
                fraction,
                available,
            },
            copies_needed,
        }
    }

    /// Parse an absolute byte ceiling from a human-readable string such as "512 MiB".
    pub fn parse(ceiling: &str, copies_needed: usize) -> Result<Self, ReductionError> {
        let byte = Byte::parse_str(ceiling, true)?;
        Ok(Self::bytes(byte.as_u64(), copies_needed))
    }

    /// Resolve the ceiling to a byte count, rejecting budgets that do not resolve to a
    /// positive value.
    pub fn resolve(&self) -> Result<u64, ReductionError> {
        if self.copies_needed == 0 {
            return Err(ReductionError::InvalidBudget);
        }
        let resolved = match self.ceiling {
            Ceiling::Bytes(bytes) => bytes,
            Ceiling::Fraction {
                fraction,
                available,
            } => {
                if !fraction.is_finite() || fraction <= 0.0 {
                    return Err(ReductionError::InvalidBudget);
                }
                (available as f64 * fraction) as u64
            }
        };
        if resolved == 0 {
            return Err(ReductionError::InvalidBudget);
        }
        Ok(resolved)
    }
}

/// A contiguous range of whole rows.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlockRange {
    /// First row of the range
    pub start_row: usize,
    /// Number of rows in the range
    pub row_count: usize,
}

impl BlockRange {
    /// Return a new BlockRange.
    pub fn new(start_row: usize, row_count: usize) -> Self {
        BlockRange {
            start_row,
            row_count,
        }
    }

    /// Row one past the end of the range.
    pub fn end_row(&self) -> usize {
        self.start_row + self.row_count
    }
}

/// An ordered partition of `[0, rows)` into row-aligned blocks.
///
/// Ranges are contiguous, non-overlapping and in increasing order; their row counts sum to the
/// descriptor's row count. The plan is immutable once computed.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockPlan {
    ranges: Vec<BlockRange>,
    rows_per_block: usize,
    block_bytes: usize,
    budget: u64,
    budget_exceeded: bool,
}

impl BlockPlan {
    /// The planned ranges, in increasing row order.
    pub fn ranges(&self) -> &[BlockRange] {
        &self.ranges
    }

    /// Iterate over the planned ranges.
    pub fn iter(&self) -> impl Iterator<Item = BlockRange> + '_ {
        self.ranges.iter().copied()
    }

    /// Number of blocks in the plan.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// A plan always covers at least one row.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Rows per full-sized block.
    pub fn rows_per_block(&self) -> usize {
        self.rows_per_block
    }

    /// Worst-case in-memory footprint of one block in bytes, including the budget's copy
    /// multiplier.
    pub fn block_bytes(&self) -> usize {
        self.block_bytes
    }

    /// The resolved byte ceiling the plan was computed against.
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Whether even a single row exceeded the budget, forcing the minimum block size.
    ///
    /// Non-fatal: processing proceeds one row at a time, but callers may want to retry with a
    /// larger budget.
    pub fn budget_exceeded(&self) -> bool {
        self.budget_exceeded
    }

    /// Total number of rows covered by the plan.
    pub fn rows(&self) -> usize {
        self.ranges.iter().map(|range| range.row_count).sum()
    }
}

/// Format a byte count for log messages.
fn fmt_bytes(bytes: u64) -> String {
    format!(
        "{:.1}",
        Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary)
    )
}

/// Compute a block partition of the described array that respects the memory budget.
///
/// Rows per block is the largest whole-row count whose footprint, multiplied by the budget's
/// copy multiplier, stays within the resolved ceiling. If even one row exceeds the ceiling the
/// planner does not fail; it falls back to single-row blocks and flags the plan as over
/// budget.
///
/// Pure function of its inputs; no I/O is performed.
pub fn plan(
    descriptor: &ArrayDescriptor,
    budget: &MemoryBudget,
) -> Result<BlockPlan, ReductionError> {
    plan_for_workers(descriptor, budget, 1)
}

/// Compute a block partition for a run that will process up to `workers` blocks concurrently.
///
/// The concurrent footprint of a parallel run is `workers * block_bytes`, a multiplicative
/// extension of the per-block contract, so each block is sized against an equal share of the
/// ceiling and the plan records the full ceiling for the executor to enforce.
pub fn plan_for_workers(
    descriptor: &ArrayDescriptor,
    budget: &MemoryBudget,
    workers: usize,
) -> Result<BlockPlan, ReductionError> {
    descriptor
        .validate()
        .map_err(ReductionError::InvalidDescriptor)?;
    let ceiling = budget.resolve()?;
    let block_ceiling = ceiling / workers.max(1) as u64;
    let row_footprint = descriptor.bytes_per_row() as u128 * budget.copies_needed as u128;
    let mut rows_per_block = (block_ceiling as u128 / row_footprint) as usize;
    let mut budget_exceeded = false;
    if rows_per_block == 0 {
        budget_exceeded = true;
        rows_per_block = 1;
        event!(
            Level::WARN,
            "single row footprint {} exceeds budget {}; proceeding one row at a time",
            fmt_bytes(row_footprint as u64),
            fmt_bytes(block_ceiling),
        );
    }
    rows_per_block = rows_per_block.min(descriptor.rows);

    let mut ranges = Vec::with_capacity(descriptor.rows.div_ceil(rows_per_block));
    let mut start_row = 0;
    while start_row < descriptor.rows {
        let row_count = rows_per_block.min(descriptor.rows - start_row);
        ranges.push(BlockRange::new(start_row, row_count));
        start_row += row_count;
    }

    let block_bytes = (rows_per_block as u128 * row_footprint)
        .try_into()
        .unwrap_or(usize::MAX);
    event!(
        Level::DEBUG,
        blocks = ranges.len(),
        rows_per_block,
        "planned {} blocks of {} rows ({} per block)",
        ranges.len(),
        rows_per_block,
        fmt_bytes(block_bytes as u64),
    );
    Ok(BlockPlan {
        ranges,
        rows_per_block,
        block_bytes,
        budget: ceiling,
        budget_exceeded,
    })
}
