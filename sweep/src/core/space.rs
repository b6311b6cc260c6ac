//! Parameter spaces: ordered axes of candidate values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::Scalar;

/// One named parameter axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub values: Vec<Scalar>,
}

/// Ordered list of axes. Axis order is registration order and fixes the
/// expansion order (first axis varies slowest in a grid).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSpace {
    axes: Vec<Axis>,
}

impl ParamSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an axis. Re-registering a name replaces its values in place.
    pub fn axis<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Scalar>,
    {
        let name = name.into();
        let values: Vec<Scalar> = values.into_iter().map(Into::into).collect();
        match self.axes.iter_mut().find(|axis| axis.name == name) {
            Some(existing) => existing.values = values,
            None => self.axes.push(Axis { name, values }),
        }
        self
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// True when no axes are registered.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Number of combinations in the full cross-product.
    pub fn grid_size(&self) -> usize {
        self.axes.iter().map(|axis| axis.values.len()).product()
    }

    /// Total candidate values across all axes.
    pub fn value_count(&self) -> usize {
        self.axes.iter().map(|axis| axis.values.len()).sum()
    }
}

impl From<BTreeMap<String, Vec<Scalar>>> for ParamSpace {
    fn from(map: BTreeMap<String, Vec<Scalar>>) -> Self {
        Self {
            axes: map
                .into_iter()
                .map(|(name, values)| Axis { name, values })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_order_is_registration_order() {
        let space = ParamSpace::new().axis("z", [1, 2]).axis("a", ["x"]);
        let names: Vec<&str> = space.axes().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
        assert_eq!(space.grid_size(), 2);
        assert_eq!(space.value_count(), 3);
    }

    #[test]
    fn reregistering_replaces_values() {
        let space = ParamSpace::new().axis("lr", [0.1]).axis("lr", [0.2, 0.3]);
        assert_eq!(space.axes().len(), 1);
        assert_eq!(space.axes()[0].values.len(), 2);
    }
}
