//! Reverse-discounted cumulative sums.

use anyhow::{bail, Result};

/// Computes `y[t] = x[t] + discount * y[t + 1]` with `y[T - 1] = x[T - 1]`.
pub fn discount_cumsum(values: &[f64], discount: f64) -> Result<Vec<f64>> {
    if values.is_empty() {
        bail!("discount_cumsum requires at least one value");
    }

    let mut output = vec![0.0; values.len()];
    let mut running = 0.0;
    for index in (0..values.len()).rev() {
        running = values[index] + discount * running;
        output[index] = running;
    }
    Ok(output)
}
