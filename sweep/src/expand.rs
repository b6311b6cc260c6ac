//! ConfigSpace: a lazy pipeline that grows one base configuration into an
//! ordered list of trial configurations.
//!
//! Steps run in a fixed order regardless of registration order between
//! kinds: expansions (in call order), modifiers, filters, shuffle, then the
//! completion filter. Nothing is evaluated until [`ConfigSpace::get_configs`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::expand::{VariantMode, expand_grid, expand_variants, shuffle_configs};
use crate::core::space::ParamSpace;
use crate::core::types::Config;
use crate::io::oracle::CompletionIndex;

/// Seed used by `shuffle(None)`.
pub const DEFAULT_SHUFFLE_SEED: u64 = 42;

type Modifier = Arc<dyn Fn(Config) -> Result<Config> + Send + Sync>;
type Filter = Arc<dyn Fn(&Config) -> Result<bool> + Send + Sync>;

#[derive(Debug, Clone)]
enum Step {
    Grid(ParamSpace),
    Variants {
        space: ParamSpace,
        mode: VariantMode,
        keep_base: bool,
    },
}

#[derive(Debug, Clone)]
struct CompletionFilter {
    results_root: PathBuf,
    ignore_keys: Vec<String>,
}

/// Result of [`ConfigSpace::expand`]: the configurations plus how many each
/// stage dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub configs: Vec<Config>,
    /// Configurations after grid/variant expansion.
    pub generated: usize,
    /// Dropped by user filters.
    pub filtered: usize,
    /// Dropped because a completed run already exists.
    pub already_completed: usize,
}

/// Builder for a parameter sweep.
///
/// ```
/// use sweep::core::space::ParamSpace;
/// use sweep::core::types::Config;
/// use sweep::expand::ConfigSpace;
///
/// let configs = ConfigSpace::new(Config::new().with("lr", 0.1))
///     .add_grid_search(ParamSpace::new().axis("batch", [8, 16]))
///     .add_variants(ParamSpace::new().axis("seed", [1, 2]))
///     .get_configs()
///     .unwrap();
/// assert_eq!(configs.len(), 4);
/// ```
#[derive(Clone)]
pub struct ConfigSpace {
    base: Config,
    steps: Vec<Step>,
    modifiers: Vec<Modifier>,
    filters: Vec<Filter>,
    shuffle_seed: Option<u64>,
    completion: Option<CompletionFilter>,
}

impl fmt::Debug for ConfigSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigSpace")
            .field("base", &self.base)
            .field("steps", &self.steps)
            .field("modifiers", &self.modifiers.len())
            .field("filters", &self.filters.len())
            .field("shuffle_seed", &self.shuffle_seed)
            .field("completion", &self.completion)
            .finish()
    }
}

impl ConfigSpace {
    pub fn new(base: Config) -> Self {
        Self {
            base,
            steps: Vec::new(),
            modifiers: Vec::new(),
            filters: Vec::new(),
            shuffle_seed: None,
            completion: None,
        }
    }

    /// Cross every current configuration with the full product of `space`.
    pub fn add_grid_search(mut self, space: ParamSpace) -> Self {
        self.steps.push(Step::Grid(space));
        self
    }

    /// Replace every current configuration with its independent variants.
    pub fn add_variants(self, space: ParamSpace) -> Self {
        self.add_variants_with(space, VariantMode::Independent)
    }

    pub fn add_variants_with(mut self, space: ParamSpace, mode: VariantMode) -> Self {
        self.steps.push(Step::Variants {
            space,
            mode,
            keep_base: false,
        });
        self
    }

    /// Like [`ConfigSpace::add_variants`], keeping each input ahead of its variants.
    pub fn add_variants_keeping_base(self, space: ParamSpace) -> Self {
        self.add_variants_keeping_base_with(space, VariantMode::Independent)
    }

    pub fn add_variants_keeping_base_with(mut self, space: ParamSpace, mode: VariantMode) -> Self {
        self.steps.push(Step::Variants {
            space,
            mode,
            keep_base: true,
        });
        self
    }

    /// Transform every configuration. Modifiers run in registration order,
    /// after all expansions.
    pub fn add_modifier<F>(mut self, modifier: F) -> Self
    where
        F: Fn(Config) -> Result<Config> + Send + Sync + 'static,
    {
        self.modifiers.push(Arc::new(modifier));
        self
    }

    /// Keep only configurations for which `filter` returns `true`. Filters
    /// run after modifiers and short-circuit on the first `false`.
    pub fn add_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Config) -> Result<bool> + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Permute the final list deterministically; `None` uses [`DEFAULT_SHUFFLE_SEED`].
    pub fn shuffle(mut self, seed: Option<u64>) -> Self {
        self.shuffle_seed = Some(seed.unwrap_or(DEFAULT_SHUFFLE_SEED));
        self
    }

    /// Drop configurations that already completed under `results_root`.
    pub fn filter_completed(self, results_root: impl Into<PathBuf>) -> Self {
        self.filter_completed_ignoring(results_root, &[])
    }

    pub fn filter_completed_ignoring(
        mut self,
        results_root: impl Into<PathBuf>,
        ignore_keys: &[String],
    ) -> Self {
        self.completion = Some(CompletionFilter {
            results_root: results_root.into(),
            ignore_keys: ignore_keys.to_vec(),
        });
        self
    }

    /// Evaluate the pipeline. Repeatable; each call rescans the results root.
    pub fn get_configs(&self) -> Result<Vec<Config>> {
        Ok(self.expand()?.configs)
    }

    #[instrument(skip_all, fields(steps = self.steps.len()))]
    pub fn expand(&self) -> Result<Expansion> {
        let mut configs = vec![self.base.clone()];
        for (idx, step) in self.steps.iter().enumerate() {
            configs = match step {
                Step::Grid(space) => expand_grid(&configs, space),
                Step::Variants {
                    space,
                    mode,
                    keep_base,
                } => expand_variants(&configs, space, *mode, *keep_base)
                    .with_context(|| format!("expansion step #{idx}"))?,
            };
            debug!(step = idx, configs = configs.len(), "expansion step applied");
        }
        let generated = configs.len();

        for (idx, modifier) in self.modifiers.iter().enumerate() {
            configs = configs
                .into_iter()
                .map(|config| modifier(config).with_context(|| format!("modifier #{idx}")))
                .collect::<Result<_>>()?;
        }

        let mut kept = Vec::with_capacity(configs.len());
        for config in configs {
            if self.passes_filters(&config)? {
                kept.push(config);
            }
        }
        let filtered = generated - kept.len();
        let mut configs = kept;
        for (idx, config) in configs.iter().enumerate() {
            config
                .ensure_finite()
                .with_context(|| format!("configuration #{idx}"))?;
        }

        if let Some(seed) = self.shuffle_seed {
            shuffle_configs(&mut configs, seed);
        }

        let mut already_completed = 0;
        if let Some(completion) = &self.completion {
            let index =
                CompletionIndex::scan_ignoring(&completion.results_root, &completion.ignore_keys)
                    .with_context(|| {
                        format!("scan results root {}", completion.results_root.display())
                    })?;
            let before = configs.len();
            let mut remaining = Vec::with_capacity(before);
            for config in configs {
                if !index.contains(&config)? {
                    remaining.push(config);
                }
            }
            already_completed = before - remaining.len();
            configs = remaining;
        }

        info!(
            generated,
            filtered,
            already_completed,
            remaining = configs.len(),
            "configurations expanded"
        );
        Ok(Expansion {
            configs,
            generated,
            filtered,
            already_completed,
        })
    }

    fn passes_filters(&self, config: &Config) -> Result<bool> {
        for (idx, filter) in self.filters.iter().enumerate() {
            if !filter(config).with_context(|| format!("filter #{idx}"))? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::oracle::is_completed;
    use crate::test_support::{write_completed_run, write_incomplete_run};
    use anyhow::bail;
    use tempfile::tempdir;

    fn base() -> Config {
        Config::new().with("lr", 0.1)
    }

    #[test]
    fn base_alone_yields_itself() {
        let configs = ConfigSpace::new(base()).get_configs().expect("expand");
        assert_eq!(configs, vec![base()]);
    }

    #[test]
    fn grid_then_variants_is_input_major() {
        let configs = ConfigSpace::new(base())
            .add_grid_search(ParamSpace::new().axis("batch", [8, 16]))
            .add_variants(ParamSpace::new().axis("seed", [1, 2]))
            .get_configs()
            .expect("expand");
        let pairs: Vec<(i64, i64)> = configs
            .iter()
            .map(|c| (c.get_i64("batch").unwrap(), c.get_i64("seed").unwrap()))
            .collect();
        assert_eq!(pairs, vec![(8, 1), (8, 2), (16, 1), (16, 2)]);
        assert!(configs.iter().all(|c| c.get_f64("lr") == Some(0.1)));
    }

    #[test]
    fn chained_grids_compose() {
        let configs = ConfigSpace::new(base())
            .add_grid_search(ParamSpace::new().axis("a", [1, 2]))
            .add_grid_search(ParamSpace::new().axis("b", [1, 2, 3]))
            .get_configs()
            .expect("expand");
        assert_eq!(configs.len(), 6);
    }

    #[test]
    fn empty_spaces_are_noops() {
        let configs = ConfigSpace::new(base())
            .add_grid_search(ParamSpace::new())
            .add_variants(ParamSpace::new())
            .get_configs()
            .expect("expand");
        assert_eq!(configs, vec![base()]);
    }

    #[test]
    fn modifiers_run_before_filters() {
        let configs = ConfigSpace::new(base())
            .add_grid_search(ParamSpace::new().axis("batch", [8, 16, 32]))
            .add_filter(|c| Ok(c.get_i64("scaled") != Some(32)))
            .add_modifier(|c| {
                let batch = c.get_i64("batch").unwrap_or_default();
                Ok(c.with("scaled", batch * 2))
            })
            .get_configs()
            .expect("expand");
        let batches: Vec<i64> = configs.iter().filter_map(|c| c.get_i64("batch")).collect();
        assert_eq!(batches, vec![8, 32]);
    }

    #[test]
    fn idempotent_modifier_applied_twice_equals_once() {
        let clamp = |c: Config| -> Result<Config> {
            let lr = c.get_f64("lr").unwrap_or_default().min(0.05);
            Ok(c.with("lr", lr))
        };
        let once = ConfigSpace::new(base())
            .add_modifier(clamp)
            .get_configs()
            .expect("once");
        let twice = ConfigSpace::new(base())
            .add_modifier(clamp)
            .add_modifier(clamp)
            .get_configs()
            .expect("twice");
        assert_eq!(once, twice);
    }

    #[test]
    fn filters_short_circuit() {
        let configs = ConfigSpace::new(base())
            .add_grid_search(ParamSpace::new().axis("batch", [8, 16]))
            .add_filter(|c| Ok(c.get_i64("batch") == Some(8)))
            .add_filter(|c| {
                if c.get_i64("batch") == Some(16) {
                    bail!("second filter saw a rejected config");
                }
                Ok(true)
            })
            .get_configs()
            .expect("expand");
        assert_eq!(configs.len(), 1);
    }

    #[test]
    fn modifier_error_aborts_with_context() {
        let err = ConfigSpace::new(base())
            .add_modifier(Ok)
            .add_modifier(|_| bail!("bad lr"))
            .get_configs()
            .expect_err("fails");
        let message = format!("{err:#}");
        assert!(message.contains("modifier #1"));
        assert!(message.contains("bad lr"));
    }

    #[test]
    fn filter_error_aborts_with_context() {
        let err = ConfigSpace::new(base())
            .add_filter(|_| bail!("no"))
            .get_configs()
            .expect_err("fails");
        assert!(format!("{err:#}").contains("filter #0"));
    }

    #[test]
    fn shuffle_is_deterministic_and_repeatable() {
        let space = ConfigSpace::new(base())
            .add_grid_search(ParamSpace::new().axis("i", 0..20))
            .shuffle(Some(42));
        let first = space.get_configs().expect("first");
        let second = space.get_configs().expect("second");
        assert_eq!(first, second);

        let default_seed = ConfigSpace::new(base())
            .add_grid_search(ParamSpace::new().axis("i", 0..20))
            .shuffle(None)
            .get_configs()
            .expect("default");
        assert_eq!(first, default_seed);

        let unshuffled = ConfigSpace::new(base())
            .add_grid_search(ParamSpace::new().axis("i", 0..20))
            .get_configs()
            .expect("plain");
        assert_ne!(first, unshuffled);
    }

    #[test]
    fn completion_filter_drops_only_marked_matches() {
        let temp = tempdir().expect("tempdir");
        let space =
            ConfigSpace::new(base()).add_grid_search(ParamSpace::new().axis("batch", [8, 16, 32]));
        let all = space.get_configs().expect("all");
        write_completed_run(temp.path(), "done", &all[0]).expect("write");
        write_incomplete_run(temp.path(), "partial", &all[1]).expect("write");

        let expansion = space.filter_completed(temp.path()).expand().expect("expand");
        assert_eq!(expansion.generated, 3);
        assert_eq!(expansion.already_completed, 1);
        assert_eq!(expansion.configs, vec![all[1].clone(), all[2].clone()]);
    }

    #[test]
    fn completion_filter_matches_long_float_values() {
        let temp = tempdir().expect("tempdir");
        let space = ConfigSpace::new(base()).add_grid_search(
            ParamSpace::new().axis("lr", [0.000_974_244_737_258_402_7, 0.3, 2.0 / 3.0]),
        );
        for (idx, config) in space.get_configs().expect("all").iter().enumerate() {
            write_completed_run(temp.path(), &format!("run-{idx}"), config).expect("write");
            assert!(is_completed(temp.path(), config).expect("oracle"));
        }

        let expansion = space.filter_completed(temp.path()).expand().expect("expand");
        assert_eq!(expansion.already_completed, 3);
        assert!(expansion.configs.is_empty());
    }

    #[test]
    fn non_finite_value_fails_expansion() {
        let err = ConfigSpace::new(base())
            .add_variants(ParamSpace::new().axis("lr", [0.1, f64::NAN]))
            .get_configs()
            .expect_err("nan");
        let message = format!("{err:#}");
        assert!(message.contains("configuration #1"));
        assert!(message.contains("finite"));

        let configs = ConfigSpace::new(base())
            .add_variants(ParamSpace::new().axis("lr", [0.1, f64::INFINITY]))
            .add_filter(|c| Ok(c.get_f64("lr").is_some_and(f64::is_finite)))
            .get_configs()
            .expect("filtered out before the check");
        assert_eq!(configs.len(), 1);
    }

    #[test]
    fn expansion_reports_filtered_count() {
        let expansion = ConfigSpace::new(base())
            .add_grid_search(ParamSpace::new().axis("batch", [8, 16, 32]))
            .add_filter(|c| Ok(c.get_i64("batch") != Some(16)))
            .expand()
            .expect("expand");
        assert_eq!(expansion.generated, 3);
        assert_eq!(expansion.filtered, 1);
        assert_eq!(expansion.already_completed, 0);
    }

    #[test]
    fn joint_mismatch_propagates() {
        let err = ConfigSpace::new(base())
            .add_variants_with(
                ParamSpace::new().axis("a", [1, 2]).axis("b", [1]),
                VariantMode::Joint,
            )
            .get_configs()
            .expect_err("ragged");
        assert!(format!("{err:#}").contains("equal value counts"));
    }
}
