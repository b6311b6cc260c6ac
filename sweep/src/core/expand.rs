//! Pure expansion primitives: grid cross-products, variant unions, shuffling.

use anyhow::{Result, bail};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use super::space::{Axis, ParamSpace};
use super::types::Config;

/// How a variant space with several axes is expanded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantMode {
    /// One output per value per axis: `k1 + k2 + ...` outputs per input.
    #[default]
    Independent,
    /// Axes are zipped: output `i` sets every axis to its `i`-th value.
    /// All axes must have the same number of values.
    Joint,
}

/// Replace every input with the cross-product of `space`, merged onto it.
///
/// Input-major order; within one input the first axis varies slowest.
/// An axis without values yields no combinations.
pub fn expand_grid(configs: &[Config], space: &ParamSpace) -> Vec<Config> {
    if space.is_empty() {
        return configs.to_vec();
    }
    let mut outputs = Vec::with_capacity(configs.len() * space.grid_size());
    for config in configs {
        grid_into(space.axes(), config.clone(), &mut outputs);
    }
    outputs
}

fn grid_into(axes: &[Axis], current: Config, outputs: &mut Vec<Config>) {
    let Some((axis, rest)) = axes.split_first() else {
        outputs.push(current);
        return;
    };
    for value in &axis.values {
        let mut next = current.clone();
        next.set(axis.name.clone(), value.clone());
        grid_into(rest, next, outputs);
    }
}

/// Replace every input with its variants.
///
/// Input-major order. With `keep_base`, each input is emitted unchanged in
/// front of its variants.
pub fn expand_variants(
    configs: &[Config],
    space: &ParamSpace,
    mode: VariantMode,
    keep_base: bool,
) -> Result<Vec<Config>> {
    if space.is_empty() {
        return Ok(configs.to_vec());
    }
    if mode == VariantMode::Joint {
        check_joint_lengths(space)?;
    }

    let mut outputs = Vec::new();
    for config in configs {
        if keep_base {
            outputs.push(config.clone());
        }
        match mode {
            VariantMode::Independent => {
                for axis in space.axes() {
                    for value in &axis.values {
                        outputs.push(config.clone().with(axis.name.clone(), value.clone()));
                    }
                }
            }
            VariantMode::Joint => {
                let width = space.axes()[0].values.len();
                for idx in 0..width {
                    let mut next = config.clone();
                    for axis in space.axes() {
                        next.set(axis.name.clone(), axis.values[idx].clone());
                    }
                    outputs.push(next);
                }
            }
        }
    }
    Ok(outputs)
}

fn check_joint_lengths(space: &ParamSpace) -> Result<()> {
    let axes = space.axes();
    let expected = axes[0].values.len();
    for axis in &axes[1..] {
        if axis.values.len() != expected {
            bail!(
                "joint variants require equal value counts: {} has {}, {} has {}",
                axes[0].name,
                expected,
                axis.name,
                axis.values.len()
            );
        }
    }
    Ok(())
}

/// Deterministic in-place permutation for a given seed.
pub fn shuffle_configs(configs: &mut [Config], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    configs.shuffle(&mut rng);
}
