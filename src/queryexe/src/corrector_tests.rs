// These tests run the same queries with and without apply conversion over
// random data. Converting applies into joins must never change a result.

#[cfg(test)]
mod tests {
    use crate::engine::{EngineConfig, ParameterContext, QueryEngine};
    use crate::expression::{lambda, new_record, param, Expr, Lambda, QueryMethod};
    use crate::materializer::Value;
    use crate::testutil::*;
    use common::execution::CommandExecutor;
    use common::testutil::*;
    use common::{OrmError, Tuple};
    use memstore::MemoryStore;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    const CUSTOMERS: i32 = 20;
    const ORDERS: i32 = 60;

    fn random_store(seed: u64) -> Arc<MemoryStore> {
        init();
        let mut rng = StdRng::seed_from_u64(seed);
        let store = Arc::new(MemoryStore::new_test_store());
        store.create_schema(&shop_model()).unwrap();
        let customers = (1..=CUSTOMERS)
            .map(|id| {
                let name = format!("C{}", id);
                if rng.gen_bool(0.7) {
                    customer_row(id, &name, Some("Main St"), Some("Springfield"))
                } else {
                    customer_row(id, &name, None, None)
                }
            })
            .collect();
        store.insert_tuples("Customers", customers).unwrap();
        let employees = (1..=3)
            .map(|id| Tuple::new(vec![int(id), string(&format!("E{}", id))]))
            .collect();
        store.insert_tuples("Employee", employees).unwrap();
        let orders = (1..=ORDERS)
            .map(|id| {
                // Customers past 15 never order so some applies come back empty.
                let customer = rng.gen_range(1..=15);
                let salesman = if rng.gen_bool(0.5) {
                    Some(rng.gen_range(1..=3))
                } else {
                    None
                };
                let total = Decimal::new(rng.gen_range(0..10000), 2);
                order_row(id, &total.to_string(), None, customer, salesman)
            })
            .collect();
        store.insert_tuples("Orders", orders).unwrap();
        store
    }

    fn engine(store: &Arc<MemoryStore>, config: EngineConfig) -> QueryEngine {
        let executor: Arc<dyn CommandExecutor> = store.clone();
        QueryEngine::new(Arc::new(shop_model()), executor, config).unwrap()
    }

    /// Engines over one store, converting applies and keeping them.
    fn engines(seed: u64) -> (QueryEngine, QueryEngine) {
        let store = random_store(seed);
        let kept = EngineConfig {
            convert_applies: false,
            ..EngineConfig::default()
        };
        (engine(&store, EngineConfig::default()), engine(&store, kept))
    }

    fn rows(engine: &QueryEngine, expr: &Expr) -> Vec<String> {
        let result = engine
            .execute(expr, &ParameterContext::new(), &identity_map())
            .unwrap();
        let mut rows: Vec<String> = match result {
            Value::List(values) => values.iter().map(|v| v.to_string()).collect(),
            other => vec![other.to_string()],
        };
        rows.sort();
        rows
    }

    fn assert_same(expr: &Expr, converts: bool) {
        for seed in 0..5 {
            let (converted, kept) = engines(seed);
            assert_eq!(rows(&converted, expr), rows(&kept, expr), "seed {}", seed);
            let kept_sql = kept.explain(expr).unwrap().sql;
            let converted_sql = converted.explain(expr).unwrap().sql;
            if converts {
                assert!(kept_sql.contains("APPLY"), "{}", kept_sql);
                assert!(!converted_sql.contains("APPLY"), "{}", converted_sql);
            } else {
                assert_eq!(kept_sql, converted_sql);
            }
        }
    }

    fn orders_with(c: &str) -> Expr {
        param(c).member("Orders")
    }

    #[test]
    fn test_select_many() {
        let expr = Expr::root("Customer").method(QueryMethod::SelectMany {
            collection: lambda("c", orders_with("c")),
            result: Some(Lambda::new2(
                "c",
                "o",
                new_record(vec![("Customer", param("c").member("Name")), ("Order", param("o").member("Id"))]),
            )),
        });
        assert_same(&expr, true);
    }

    #[test]
    fn test_select_many_filtered() {
        let expr = Expr::root("Customer").method(QueryMethod::SelectMany {
            collection: lambda(
                "c",
                orders_with("c").filter(lambda("o", param("o").member("Total").gt(Expr::int(40)))),
            ),
            result: Some(Lambda::new2(
                "c",
                "o",
                new_record(vec![
                    ("Customer", param("c").member("Id")),
                    ("Total", param("o").member("Total")),
                    ("Salesman", param("o").path("Salesman.Name")),
                ]),
            )),
        });
        assert_same(&expr, true);
    }

    #[test]
    fn test_default_if_empty() {
        let expr = Expr::root("Customer").method(QueryMethod::SelectMany {
            collection: lambda(
                "c",
                orders_with("c")
                    .filter(lambda("o", param("o").member("Salesman").ne(Expr::null())))
                    .method(QueryMethod::DefaultIfEmpty),
            ),
            result: Some(Lambda::new2(
                "c",
                "o",
                new_record(vec![("Customer", param("c").member("Id")), ("Order", param("o").member("Id"))]),
            )),
        });
        assert_same(&expr, true);
        let (converted, _) = engines(0);
        let unmatched = rows(&converted, &expr)
            .iter()
            .filter(|r| r.ends_with("Order: null}"))
            .count();
        assert!(unmatched >= (CUSTOMERS - 15) as usize);
    }

    #[test]
    fn test_existence_and_aggregates_stay() {
        let any = Expr::root("Customer")
            .filter(lambda(
                "c",
                orders_with("c").any(Some(lambda("o", param("o").member("Total").gt(Expr::int(90))))),
            ))
            .select(lambda("c", param("c").member("Id")));
        assert_same(&any, false);

        let counts = Expr::root("Customer").select(lambda(
            "c",
            new_record(vec![
                ("Id", param("c").member("Id")),
                ("Orders", orders_with("c").count()),
                ("Total", orders_with("c").sum(Some(lambda("o", param("o").member("Total"))))),
            ]),
        ));
        assert_same(&counts, false);
    }

    #[test]
    fn test_strict_correction() {
        let store = random_store(1);
        let expr = Expr::root("Customer").select(lambda(
            "c",
            new_record(vec![
                ("Id", param("c").member("Id")),
                ("First", orders_with("c").first().member("Id")),
            ]),
        ));
        let strict = engine(
            &store,
            EngineConfig {
                strict_correction: true,
                ..EngineConfig::default()
            },
        );
        assert!(matches!(strict.translate(&expr), Err(OrmError::CorrectionFault(_))));
        let lenient = engine(&store, EngineConfig::default());
        let customers = rows(&lenient, &expr);
        assert_eq!(customers.len(), CUSTOMERS as usize);
        assert!(lenient.explain(&expr).unwrap().sql.contains("OUTER APPLY"));
    }
}
