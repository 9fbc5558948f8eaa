#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod apply_corrector;
pub mod column_remover;
pub mod ordering;

pub use apply_corrector::ApplyCorrector;

use common::logical_plan::{ColumnMap, Provider};
use common::OrmError;
use std::collections::BTreeSet;

/// Which rewrites run after translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Rewrite applies into predicate joins where possible.
    pub convert_applies: bool,
    /// Fail on correction faults instead of keeping the applies.
    pub strict_correction: bool,
    pub remove_redundant_columns: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            convert_applies: true,
            strict_correction: false,
            remove_redundant_columns: true,
        }
    }
}

/// Result of optimizing a translated provider tree.
#[derive(Debug, Clone)]
pub struct Optimized {
    pub provider: Provider,
    /// Old root column index to new root column index.
    pub column_map: ColumnMap,
}

/// Runs the correction and optimization passes in order.
pub struct Optimizer {
    config: OptimizerConfig,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Optimizes a provider tree.
    ///
    /// # Arguments
    ///
    /// * `provider` - Root of the translated tree.
    /// * `required` - Root columns read by the item projector.
    pub fn optimize(
        &self,
        provider: &Provider,
        required: &BTreeSet<usize>,
    ) -> Result<Optimized, OrmError> {
        let mut current = ordering::correct_ordering(provider)?;
        if self.config.convert_applies {
            current = ApplyCorrector::new(self.config.strict_correction).correct(&current)?;
        }
        if self.config.remove_redundant_columns {
            let (provider, column_map) =
                column_remover::remove_redundant_columns(&current, required)?;
            Ok(Optimized {
                provider,
                column_map,
            })
        } else {
            let column_map = (0..current.header().len()).map(Some).collect();
            Ok(Optimized {
                provider: current,
                column_map,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use common::logical_plan::*;
    use common::testutil::*;
    use common::{ApplyParameterId, Column, DataType, Header};
    use std::sync::Arc;

    /// In-memory int rows with columns `alias.c0 .. alias.c{width-1}`.
    pub fn int_raw(alias: &str, width: usize, rows: usize) -> Provider {
        let header = Header::new(
            (0..width)
                .map(|i| Column::new(&format!("{}.c{}", alias, i), DataType::Int, true))
                .collect(),
        );
        Provider::raw(header, Arc::new(gen_random_int_rows(rows, width, 4, 0.1)))
    }

    #[test]
    fn test_optimize_pipeline() {
        init();
        let right = Provider::filter(
            int_raw("a1", 3, 5),
            TupleExpr::eq(
                TupleExpr::Column(1),
                TupleExpr::ApplyParam {
                    parameter: ApplyParameterId(0),
                    index: 0,
                },
            ),
        );
        let apply = Provider::apply(
            int_raw("a0", 2, 5),
            right,
            ApplyParameterId(0),
            ApplyKind::Outer,
        );
        let required: BTreeSet<usize> = vec![1, 4].into_iter().collect();
        let res = Optimizer::new(OptimizerConfig::default())
            .optimize(&apply, &required)
            .unwrap();
        match res.provider.kind() {
            ProviderKind::Select { source, .. } => {
                assert!(matches!(source.kind(), ProviderKind::PredicateJoin { .. }))
            }
            other => panic!("expected select, got {:?}", other),
        }
        assert_eq!(res.provider.header().len(), 2);
        assert_eq!(res.column_map.len(), 5);
        assert!(res.column_map[1].is_some());
        assert!(res.column_map[4].is_some());
        assert!(res.column_map[2].is_none());

        let config = OptimizerConfig {
            convert_applies: false,
            remove_redundant_columns: false,
            ..OptimizerConfig::default()
        };
        let res = Optimizer::new(config).optimize(&apply, &required).unwrap();
        assert_eq!(res.provider, apply);
    }

    #[test]
    fn test_config_defaults() {
        let config: OptimizerConfig = serde_json::from_str("{\"strict_correction\": true}").unwrap();
        assert!(config.strict_correction);
        assert!(config.convert_applies);
    }
}
