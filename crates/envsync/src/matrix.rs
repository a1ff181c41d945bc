// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Matrix environments and the include/exclude selection over them.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./matrix_test.rs"]
mod matrix_test;

/// The axis name that `py` is an alias of.
pub const PYTHON_AXIS: &str = "python";

/// Axis name to accepted values; an empty set accepts any value.
pub type MatrixFilter = IndexMap<String, BTreeSet<String>>;

/// The values of every axis for one matrix instance.
pub type MatrixValues = IndexMap<String, String>;

/// Resolve the `py` alias.
pub fn axis_name(name: &str) -> &str {
    match name {
        "py" => PYTHON_AXIS,
        other => other,
    }
}

/// Parse `--include`/`--exclude` style `AXIS[=v1,v2]` specs.
pub fn parse_specs<S: AsRef<str>>(specs: &[S]) -> Result<MatrixFilter> {
    let mut filter = MatrixFilter::new();
    for spec in specs {
        let spec = spec.as_ref();
        let (name, values) = match spec.split_once('=') {
            Some((name, values)) => (name.trim(), Some(values)),
            None => (spec.trim(), None),
        };
        let name = axis_name(name).to_string();
        if filter.contains_key(&name) {
            return Err(Error::DuplicateMatrixVariable(name));
        }
        let values = values
            .into_iter()
            .flat_map(|values| values.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        filter.insert(name, values);
    }
    Ok(filter)
}

/// Select the environments whose matrix values pass the filters, keeping
/// the input order.
pub fn select<'a, I>(
    environments: I,
    included: &MatrixFilter,
    excluded: &MatrixFilter,
) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, &'a MatrixValues)>,
{
    let accepts =
        |filter: &BTreeSet<String>, value: &String| filter.is_empty() || filter.contains(value);
    environments
        .into_iter()
        .filter(|(_, values)| {
            let rejected = values
                .iter()
                .any(|(axis, value)| excluded.get(axis).is_some_and(|f| accepts(f, value)));
            if rejected {
                return false;
            }
            values.iter().any(|(axis, value)| {
                included.is_empty() || included.get(axis).is_some_and(|f| accepts(f, value))
            })
        })
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Every combination of the axis values of one matrix table, in table
/// order with the last axis varying fastest.
pub fn expand_matrix(axes: &IndexMap<String, Vec<String>>) -> Vec<MatrixValues> {
    if axes.is_empty() {
        return vec![MatrixValues::new()];
    }
    let names: Vec<&str> = axes.keys().map(|k| axis_name(k)).collect();
    axes.values()
        .map(|values| values.iter())
        .multi_cartesian_product()
        .map(|combination| {
            names
                .iter()
                .zip(combination)
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect()
        })
        .collect()
}

/// The name of one matrix instance of `env`, eg: `test.py3.11-postgres`.
///
/// The python axis always comes first and is written as `py{version}`.
pub fn instance_name(env: &str, values: &MatrixValues) -> String {
    let python = values.get(PYTHON_AXIS).map(|v| format!("py{v}"));
    let others = values
        .iter()
        .filter(|(axis, _)| *axis != PYTHON_AXIS)
        .map(|(_, v)| v.clone());
    let suffix = python.into_iter().chain(others).join("-");
    match (env, suffix.is_empty()) {
        (env, true) => env.to_string(),
        ("default", false) => suffix,
        (env, false) => format!("{env}.{suffix}"),
    }
}
