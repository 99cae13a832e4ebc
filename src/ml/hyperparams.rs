//! Hyperparameter mappings and search grids
//!
//! Two shapes are used: the nested form `{stage: {param: value}}` read from
//! the configuration and passed to [`Pipeline::build`](super::model::Pipeline::build),
//! and the flat form `{"stage__param": value}` used to enumerate grid
//! candidates.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// Separator between stage and parameter names in the flat form.
pub const STAGE_SEPARATOR: &str = "__";

/// Parameters of a single pipeline stage.
pub type Params = BTreeMap<String, Value>;

/// Nested `{stage: {param: value}}` mapping.
pub type HyperparameterMapping = BTreeMap<String, Params>;

/// Nested `{stage: {param: [candidate values]}}` search grid.
pub type ParamGrid = BTreeMap<String, BTreeMap<String, Vec<Value>>>;

/// Flat `{"stage__param": value}` mapping.
pub type FlatParams = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HyperparamError {
    #[error("parameter key '{0}' has no '__' stage separator")]
    MalformedKey(String),
    #[error("grid parameter '{0}' has no candidate values")]
    EmptyCandidates(String),
}

/// Flatten a nested mapping into `stage__param` keys.
///
/// Stages with no parameters produce no keys.
pub fn flatten<T: Clone>(nested: &BTreeMap<String, BTreeMap<String, T>>) -> BTreeMap<String, T> {
    nested
        .iter()
        .flat_map(|(stage, params)| {
            params
                .iter()
                .map(move |(name, value)| (format!("{stage}{STAGE_SEPARATOR}{name}"), value.clone()))
        })
        .collect()
}

/// Inverse of [`flatten`]. Keys are split on the first separator, so
/// parameter names may themselves contain `__`.
pub fn unflatten<T: Clone>(
    flat: &BTreeMap<String, T>,
) -> Result<BTreeMap<String, BTreeMap<String, T>>, HyperparamError> {
    let mut nested: BTreeMap<String, BTreeMap<String, T>> = BTreeMap::new();
    for (key, value) in flat {
        let (stage, name) = key
            .split_once(STAGE_SEPARATOR)
            .ok_or_else(|| HyperparamError::MalformedKey(key.clone()))?;
        nested
            .entry(stage.to_string())
            .or_default()
            .insert(name.to_string(), value.clone());
    }
    Ok(nested)
}

/// Enumerate every combination of a flat grid.
///
/// Keys vary in sorted order with the last key changing fastest.
pub fn expand_grid(grid: &BTreeMap<String, Vec<Value>>) -> Result<Vec<FlatParams>, HyperparamError> {
    let mut candidates = vec![FlatParams::new()];
    for (key, values) in grid {
        if values.is_empty() {
            return Err(HyperparamError::EmptyCandidates(key.clone()));
        }
        candidates = candidates
            .into_iter()
            .flat_map(|partial| {
                values.iter().map(move |value| {
                    let mut next = partial.clone();
                    next.insert(key.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    Ok(candidates)
}

/// Overlay `overrides` onto `base`, stage by stage and parameter by parameter.
pub fn merge(base: &HyperparameterMapping, overrides: &HyperparameterMapping) -> HyperparameterMapping {
    let mut merged = base.clone();
    for (stage, params) in overrides {
        let entry = merged.entry(stage.clone()).or_default();
        for (name, value) in params {
            entry.insert(name.clone(), value.clone());
        }
    }
    merged
}
