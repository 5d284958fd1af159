//! Concatenation and padding of ragged per-path sequences into batch tensors.
//!
//! Every function allocates fresh output; inputs are only borrowed.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use tau_training_types::{InfoMap, PaddedTensor, StepSeries};

/// Concatenates per-path series end-to-end along the time axis.
pub fn concat_series(series: &[&StepSeries]) -> Result<StepSeries> {
    let Some(first) = series.first() else {
        bail!("concat_series requires at least one series");
    };
    let step_shape = first.step_shape().to_vec();
    let total = series.iter().map(|item| item.as_slice().len()).sum();
    let mut data = Vec::with_capacity(total);
    for (index, item) in series.iter().enumerate() {
        ensure_step_shape(index, &step_shape, item)?;
        data.extend_from_slice(item.as_slice());
    }
    Ok(StepSeries::new(step_shape, data)?)
}

/// Concatenates per-path scalar sequences end-to-end.
pub fn concat_values(values: &[&[f64]]) -> Vec<f64> {
    let total = values.iter().map(|item| item.len()).sum();
    let mut output = Vec::with_capacity(total);
    for item in values {
        output.extend_from_slice(item);
    }
    output
}

/// Concatenates per-path info maps key by key.
pub fn concat_info_maps(maps: &[&InfoMap]) -> Result<InfoMap> {
    let keys = shared_keys(maps)?;
    let mut output = InfoMap::new();
    for key in keys {
        let series = maps.iter().map(|map| &map[&key]).collect::<Vec<_>>();
        let joined =
            concat_series(&series).with_context(|| format!("failed to concatenate info '{key}'"))?;
        output.insert(key, joined);
    }
    Ok(output)
}

/// Longest path length in the batch.
pub fn max_path_length(lengths: &[usize]) -> Result<usize> {
    match lengths.iter().copied().max() {
        Some(0) | None => bail!("max_path_length requires at least one non-empty path"),
        Some(length) => Ok(length),
    }
}

/// Right-pads a series with zero steps up to `max_len`.
pub fn pad_series(series: &StepSeries, max_len: usize) -> Result<StepSeries> {
    if series.len() > max_len {
        bail!(
            "cannot pad series of length {} to shorter length {max_len}",
            series.len()
        );
    }
    let mut data = Vec::with_capacity(max_len * series.step_width());
    data.extend_from_slice(series.as_slice());
    data.resize(max_len * series.step_width(), 0.0);
    Ok(StepSeries::new(series.step_shape().to_vec(), data)?)
}

/// Right-pads a scalar sequence with zeros up to `max_len`.
pub fn pad_values(values: &[f64], max_len: usize) -> Result<Vec<f64>> {
    if values.len() > max_len {
        bail!(
            "cannot pad values of length {} to shorter length {max_len}",
            values.len()
        );
    }
    let mut output = Vec::with_capacity(max_len);
    output.extend_from_slice(values);
    output.resize(max_len, 0.0);
    Ok(output)
}

/// Stacks equal-length series under a leading path dimension.
pub fn stack_series(series: &[StepSeries]) -> Result<PaddedTensor> {
    let Some(first) = series.first() else {
        bail!("stack_series requires at least one series");
    };
    let step_shape = first.step_shape().to_vec();
    let length = first.len();
    let mut data = Vec::with_capacity(series.len() * first.as_slice().len());
    for (index, item) in series.iter().enumerate() {
        ensure_step_shape(index, &step_shape, item)?;
        if item.len() != length {
            bail!(
                "stack_series length mismatch at path {index}: expected {length}, found {}",
                item.len()
            );
        }
        data.extend_from_slice(item.as_slice());
    }
    Ok(PaddedTensor::new(series.len(), length, step_shape, data)?)
}

/// Pads each series to `max_len` and stacks them.
pub fn pad_series_n(series: &[&StepSeries], max_len: usize) -> Result<PaddedTensor> {
    let padded = series
        .iter()
        .map(|item| pad_series(item, max_len))
        .collect::<Result<Vec<_>>>()?;
    stack_series(&padded)
}

/// Pads each scalar sequence to `max_len` and stacks them as `[N, max_len]`.
pub fn pad_values_n(values: &[&[f64]], max_len: usize) -> Result<PaddedTensor> {
    if values.is_empty() {
        bail!("pad_values_n requires at least one sequence");
    }
    let mut data = Vec::with_capacity(values.len() * max_len);
    for item in values {
        data.extend(pad_values(item, max_len)?);
    }
    Ok(PaddedTensor::new(values.len(), max_len, Vec::new(), data)?)
}

/// Pads every info key per path, then stacks each key across paths.
pub fn pad_info_maps(
    maps: &[&InfoMap],
    max_len: usize,
) -> Result<BTreeMap<String, PaddedTensor>> {
    let keys = shared_keys(maps)?;
    let mut output = BTreeMap::new();
    for key in keys {
        let series = maps.iter().map(|map| &map[&key]).collect::<Vec<_>>();
        let stacked = pad_series_n(&series, max_len)
            .with_context(|| format!("failed to pad info '{key}'"))?;
        output.insert(key, stacked);
    }
    Ok(output)
}

/// Builds the `[N, max_len]` mask that is 1.0 exactly where `t < length`.
pub fn valid_mask(lengths: &[usize], max_len: usize) -> Result<PaddedTensor> {
    let ones = lengths
        .iter()
        .map(|length| vec![1.0; *length])
        .collect::<Vec<_>>();
    let rows = ones.iter().map(Vec::as_slice).collect::<Vec<_>>();
    pad_values_n(&rows, max_len)
}

fn ensure_step_shape(index: usize, expected: &[usize], series: &StepSeries) -> Result<()> {
    if series.step_shape() != expected {
        bail!(
            "step shape mismatch at path {index}: expected {expected:?}, found {:?}",
            series.step_shape()
        );
    }
    Ok(())
}

fn shared_keys(maps: &[&InfoMap]) -> Result<Vec<String>> {
    let Some(first) = maps.first() else {
        return Ok(Vec::new());
    };
    let keys = first.keys().cloned().collect::<Vec<_>>();
    for (index, map) in maps.iter().enumerate().skip(1) {
        if !map.keys().eq(keys.iter()) {
            bail!(
                "info keys differ at path {index}: expected {keys:?}, found {:?}",
                map.keys().collect::<Vec<_>>()
            );
        }
    }
    Ok(keys)
}
