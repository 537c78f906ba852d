//! Parameter values and fixed-schema parameter sets.

use super::descriptor::ModelDescriptor;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Weighted sample values for a polydisperse parameter.
///
/// `values` and `weights` are parallel arrays. Weights are passed to the
/// module as given; they are never normalised here.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    /// Sample values.
    pub values: Vec<f64>,
    /// One weight per sample value.
    pub weights: Vec<f64>,
}

impl Distribution {
    /// Build a distribution, checking the arrays are parallel and non-empty.
    pub fn new(values: Vec<f64>, weights: Vec<f64>) -> Result<Self> {
        let distribution = Self { values, weights };
        distribution.check().map_err(|reason| Error::InvalidValue {
            parameter: String::new(),
            reason,
        })?;
        Ok(distribution)
    }

    /// A single point with weight `1.0`.
    pub fn single(value: f64) -> Self {
        Self {
            values: vec![value],
            weights: vec![1.0],
        }
    }

    /// Equal weights `1/n` over `values`.
    pub fn uniform(values: Vec<f64>) -> Self {
        let weight = 1.0 / values.len() as f64;
        let weights = vec![weight; values.len()];
        Self { values, weights }
    }

    /// Number of sample points.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if there are no sample points.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check the invariants, naming the violation.
    pub(crate) fn check(&self) -> std::result::Result<(), &'static str> {
        if self.values.len() != self.weights.len() {
            return Err("values and weights differ in length");
        }
        if self.values.is_empty() {
            return Err("distribution is empty");
        }
        Ok(())
    }
}

/// The value held by one parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// A single scalar.
    Simple(f64),
    /// A weighted distribution.
    Polydisperse(Distribution),
}

impl ParameterValue {
    /// The scalar, if this is a simple value.
    pub fn as_simple(&self) -> Option<f64> {
        match self {
            Self::Simple(value) => Some(*value),
            Self::Polydisperse(_) => None,
        }
    }

    /// The distribution, if this is a polydisperse value.
    pub fn as_distribution(&self) -> Option<&Distribution> {
        match self {
            Self::Simple(_) => None,
            Self::Polydisperse(distribution) => Some(distribution),
        }
    }

    /// View as a distribution; a scalar is a single point with weight `1.0`.
    pub fn to_distribution(&self) -> Distribution {
        match self {
            Self::Simple(value) => Distribution::single(*value),
            Self::Polydisperse(distribution) => distribution.clone(),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Simple(value)
    }
}

impl From<Distribution> for ParameterValue {
    fn from(distribution: Distribution) -> Self {
        Self::Polydisperse(distribution)
    }
}

/// Values for every parameter of one model.
///
/// The key set is fixed by the descriptor the set was built from: values
/// can be read and replaced, but keys can never be added or removed.
#[derive(Debug, Clone)]
pub struct ParameterSet {
    descriptor: Arc<ModelDescriptor>,
    values: Vec<ParameterValue>,
}

impl ParameterSet {
    /// Default values from `descriptor`.
    ///
    /// Polydisperse parameters start as a single point at their default.
    pub fn defaults(descriptor: Arc<ModelDescriptor>) -> Self {
        let values = descriptor
            .parameters()
            .iter()
            .map(|p| {
                if p.is_polydisperse() {
                    ParameterValue::Polydisperse(Distribution::single(p.default))
                } else {
                    ParameterValue::Simple(p.default)
                }
            })
            .collect();
        Self { descriptor, values }
    }

    /// The descriptor fixing this set's keys.
    pub fn descriptor(&self) -> &Arc<ModelDescriptor> {
        &self.descriptor
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True for a model without parameters.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if `name` is a declared parameter.
    pub fn contains(&self, name: &str) -> bool {
        self.descriptor.position(name).is_some()
    }

    /// Value of `name`.
    pub fn get(&self, name: &str) -> Result<&ParameterValue> {
        let position = self.position(name)?;
        Ok(&self.values[position])
    }

    /// Mutable value of `name`.
    pub fn get_mut(&mut self, name: &str) -> Result<&mut ParameterValue> {
        let position = self.position(name)?;
        Ok(&mut self.values[position])
    }

    /// Replace the value of `name`.
    pub fn set(&mut self, name: &str, value: impl Into<ParameterValue>) -> Result<()> {
        *self.get_mut(name)? = value.into();
        Ok(())
    }

    /// `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.descriptor
            .parameters()
            .iter()
            .map(|p| p.name.as_str())
            .zip(self.values.iter())
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.descriptor
            .position(name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))
    }
}
