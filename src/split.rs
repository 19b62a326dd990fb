//! Split allocation: percentage validation, drift normalization, and
//! integer milliunit division that always sums back to the transaction
//! amount exactly.

use crate::error::{Result, TellerError};
use crate::models::{SplitAllocation, SplitInput, SplitLine};

/// Most lines a split may carry.
pub const MAX_SPLIT_LINES: usize = 5;
/// Percentage-sum drift tolerated and silently redistributed.
pub const DRIFT_TOLERANCE: f64 = 0.1;

// Below this the sum is treated as exactly 100 and left untouched, so
// float noise in honest inputs never flips the normalized flag.
const EXACT_EPS: f64 = 1e-9;

/// Check the structural split laws: 1 to [`MAX_SPLIT_LINES`] entries, no
/// negative percentage, and a sum within [`DRIFT_TOLERANCE`] of 100.
/// Returns the percentage sum for the caller's normalization step.
pub fn validate_parts(inputs: &[SplitInput]) -> Result<f64> {
    if inputs.is_empty() {
        return Err(TellerError::InvalidSplit(
            "split has no allocations".to_string(),
        ));
    }
    if inputs.len() > MAX_SPLIT_LINES {
        return Err(TellerError::InvalidSplit(format!(
            "split has {} allocations, maximum is {MAX_SPLIT_LINES}",
            inputs.len()
        )));
    }
    for input in inputs {
        if input.percentage < 0.0 {
            return Err(TellerError::InvalidSplit(format!(
                "negative percentage {} for {}",
                input.percentage, input.category_name
            )));
        }
    }

    let sum: f64 = inputs.iter().map(|i| i.percentage).sum();
    let diff = 100.0 - sum;
    if diff.abs() > DRIFT_TOLERANCE {
        return Err(TellerError::InvalidSplit(format!(
            "percentages sum to {sum:.2}, must be within {DRIFT_TOLERANCE} of 100"
        )));
    }
    Ok(sum)
}

/// Validate the requested percentages and divide `total` (milliunits)
/// among them. Truncates each line toward zero and gives the leftover
/// remainder to the largest line, so the returned amounts sum to `total`
/// with no fractional milliunits invented or lost.
pub fn allocate(total: i64, inputs: &[SplitInput]) -> Result<SplitAllocation> {
    let sum = validate_parts(inputs)?;
    let diff = 100.0 - sum;
    let normalized = diff.abs() > EXACT_EPS;
    let percentages: Vec<f64> = if normalized {
        // Redistribute the drift in proportion to each line's share.
        inputs
            .iter()
            .map(|i| i.percentage + diff * i.percentage / sum)
            .collect()
    } else {
        inputs.iter().map(|i| i.percentage).collect()
    };

    let mut amounts: Vec<i64> = percentages
        .iter()
        .map(|p| (p / 100.0 * total as f64) as i64)
        .collect();
    let remainder: i64 = total - amounts.iter().sum::<i64>();
    let mut largest = 0;
    for (idx, pct) in percentages.iter().enumerate() {
        if *pct > percentages[largest] {
            largest = idx;
        }
    }
    amounts[largest] += remainder;

    let lines = inputs
        .iter()
        .zip(percentages.iter().zip(amounts.iter()))
        .map(|(input, (pct, amount))| SplitLine {
            category_id: input.category_id.clone(),
            category_name: input.category_name.clone(),
            percentage: *pct,
            amount: *amount,
            memo: input.memo.clone(),
        })
        .collect();

    Ok(SplitAllocation { lines, normalized })
}
