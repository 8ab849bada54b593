//! Named, shaped parameter buffers.
//!
//! A [`ParamDict`] is the common currency between the models (proposal,
//! critic), their gradient functions and the optimizer. Gradients use the same
//! representation ([`GradientDict`]), one group per parameter group with the
//! same shape. All arithmetic is shape-checked: nothing is broadcast.

use std::collections::BTreeMap;

use crate::error::{ensure_finite, AvoError, Result};

/// One shaped parameter buffer (row-major).
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGroup {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

impl ParamGroup {
    pub fn new(shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != values.len() {
            return Err(AvoError::shape("parameter group", &[numel], &[values.len()]));
        }
        Ok(Self { shape, values })
    }

    pub fn vector(values: Vec<f64>) -> Self {
        Self { shape: vec![values.len()], values }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            values: vec![0.0; shape.iter().product()],
        }
    }
}

/// Mapping from group name to shaped buffer. Iteration order is by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamDict {
    groups: BTreeMap<String, ParamGroup>,
}

/// Gradient of a scalar loss with respect to a [`ParamDict`].
pub type GradientDict = ParamDict;

impl ParamDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, group: ParamGroup) {
        self.groups.insert(name.into(), group);
    }

    pub fn get(&self, name: &str) -> Result<&ParamGroup> {
        self.groups
            .get(name)
            .ok_or_else(|| AvoError::MissingGroup(name.to_string()))
    }

    /// Values of `name`, checked against the expected shape.
    pub fn values(&self, name: &str, shape: &[usize]) -> Result<&[f64]> {
        let group = self.get(name)?;
        if group.shape != shape {
            return Err(AvoError::shape(name, shape, &group.shape));
        }
        Ok(&group.values)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamGroup)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Same groups and shapes, all values zero.
    pub fn zeros_like(&self) -> ParamDict {
        ParamDict {
            groups: self
                .groups
                .iter()
                .map(|(k, g)| (k.clone(), ParamGroup::zeros(&g.shape)))
                .collect(),
        }
    }

    /// Fail unless `other` has exactly the same group names and shapes.
    pub fn check_same_layout(&self, other: &ParamDict, context: &str) -> Result<()> {
        for (name, group) in &self.groups {
            let theirs = other
                .groups
                .get(name)
                .ok_or_else(|| AvoError::MissingGroup(name.clone()))?;
            if theirs.shape != group.shape {
                return Err(AvoError::shape(
                    format!("{context}: {name}"),
                    &group.shape,
                    &theirs.shape,
                ));
            }
        }
        if let Some(extra) = other.groups.keys().find(|k| !self.groups.contains_key(*k)) {
            return Err(AvoError::MissingGroup(format!("{context}: unexpected `{extra}`")));
        }
        Ok(())
    }

    /// `self += alpha * other`, group by group.
    pub fn add_scaled(&mut self, other: &ParamDict, alpha: f64) -> Result<()> {
        self.check_same_layout(other, "add_scaled")?;
        for (name, group) in self.groups.iter_mut() {
            let theirs = &other.groups[name];
            for (a, b) in group.values.iter_mut().zip(&theirs.values) {
                *a += alpha * b;
            }
        }
        Ok(())
    }

    /// Multiply every value by `alpha`.
    pub fn scale(&mut self, alpha: f64) {
        for group in self.groups.values_mut() {
            group.values.iter_mut().for_each(|v| *v *= alpha);
        }
    }

    /// Fail with [`AvoError::NonFinite`] naming the first offending group.
    pub fn ensure_finite(&self, context: &str) -> Result<()> {
        for (name, group) in &self.groups {
            ensure_finite(&group.values, || format!("{context}: {name}"))?;
        }
        Ok(())
    }

    /// Euclidean norm over all groups.
    pub fn l2_norm(&self) -> f64 {
        self.groups
            .values()
            .flat_map(|g| g.values.iter())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }
}

/// A model whose parameters can be exported to and loaded from a [`ParamDict`].
///
/// `load_param_dict` is the only way the optimizer writes into caller-owned
/// parameters.
pub trait ParamGroups {
    fn to_param_dict(&self) -> ParamDict;

    /// Overwrite the parameters in place. Shapes must match exactly.
    fn load_param_dict(&mut self, dict: &ParamDict) -> Result<()>;
}

impl ParamGroups for ParamDict {
    fn to_param_dict(&self) -> ParamDict {
        self.clone()
    }

    fn load_param_dict(&mut self, dict: &ParamDict) -> Result<()> {
        self.check_same_layout(dict, "load")?;
        self.clone_from(dict);
        Ok(())
    }
}
