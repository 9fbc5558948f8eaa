// These tests run queries end to end: translation, correction, compilation
// and materialization over rows produced by the in-memory store.

#[cfg(test)]
mod tests {
    use crate::engine::{EngineConfig, ParameterContext, QueryEngine};
    use crate::expression::{lambda, new_record, param, var, Expr, ExprFunction, Lambda, LocalCollection, QueryMethod};
    use crate::materializer::Value;
    use crate::testutil::*;
    use common::execution::CancellationToken;
    use common::logical_plan::AggregateKind;
    use common::testutil::*;
    use common::{DataType, Field, OrmError};
    use futures::executor::block_on;
    use std::sync::Arc;

    const FACTORS: [&str; 5] = ["Int", "Long", "Float", "Double", "Decimal"];

    fn run(engine: &QueryEngine, expr: &Expr) -> Result<Value, OrmError> {
        engine.execute(expr, &ParameterContext::new(), &identity_map())
    }

    fn values(engine: &QueryEngine, expr: &Expr) -> Vec<Value> {
        match run(engine, expr).unwrap() {
            Value::List(values) => values,
            other => panic!("expected a list, got {}", other),
        }
    }

    fn scalar(value: &Value) -> Field {
        value.as_field().cloned().unwrap_or(Field::Null)
    }

    fn member(value: &Value, name: &str) -> Value {
        value.member(name).cloned().unwrap_or(Value::Null)
    }

    fn gender_is(gender: &str) -> Lambda {
        lambda("t", param("t").member("Gender").eq(Expr::string(gender)))
    }

    fn factor(name: &str) -> Lambda {
        lambda("r", param("r").member(name))
    }

    fn no_stats() -> Expr {
        Expr::root("StatRecord").filter(lambda("r", param("r").member("IntFactor").lt(Expr::int(0))))
    }

    fn average_type(name: &str) -> DataType {
        match name {
            "Float" => DataType::Float,
            "Decimal" => DataType::Decimal,
            _ => DataType::Double,
        }
    }

    #[test]
    fn test_all_over_filtered_teachers() {
        let (engine, _) = teacher_engine();
        let females = Expr::root("Teacher").filter(gender_is("Female"));
        let all_male = females.clone().all(gender_is("Male"));
        assert_eq!(scalar(&run(&engine, &all_male).unwrap()), Field::BoolField(false));
        assert!(engine.explain(&all_male).unwrap().sql.contains("NOT EXISTS"));
        let all_female = females.clone().all(gender_is("Female"));
        assert_eq!(scalar(&run(&engine, &all_female).unwrap()), Field::BoolField(true));
        let nobody = Expr::root("Teacher").filter(gender_is("Other")).all(gender_is("Male"));
        assert_eq!(scalar(&run(&engine, &nobody).unwrap()), Field::BoolField(true));
        assert_eq!(scalar(&run(&engine, &females.any(None)).unwrap()), Field::BoolField(true));
    }

    #[test]
    fn test_counts() {
        let (engine, _) = teacher_engine();
        let females = Expr::root("Teacher").filter(gender_is("Female")).count();
        assert_eq!(scalar(&run(&engine, &females).unwrap()), int(2));
        let males = Expr::root("Teacher").method(QueryMethod::Count {
            predicate: Some(gender_is("Male")),
            long: true,
        });
        assert_eq!(scalar(&run(&engine, &males).unwrap()), Field::LongField(1));
    }

    #[test]
    fn test_string_matching() {
        let (engine, _) = teacher_engine();
        let expr = Expr::root("Teacher")
            .filter(lambda(
                "t",
                Expr::call(ExprFunction::StartsWith, vec![param("t").member("Name"), Expr::string("A")]),
            ))
            .select(lambda("t", param("t").member("Name")));
        let names = values(&engine, &expr);
        assert_eq!(names.len(), 1);
        assert_eq!(scalar(&names[0]), string("Ann"));

        let contains = Expr::root("Teacher")
            .select(lambda("t", param("t").member("Name")))
            .method(QueryMethod::Contains(Box::new(Expr::string("Bob"))));
        assert_eq!(scalar(&run(&engine, &contains).unwrap()), Field::BoolField(true));
    }

    #[test]
    fn test_matching_dialect_wildcards() {
        let (engine, store) = teacher_engine();
        store
            .insert_tuples(
                "Teacher",
                vec![
                    common::Tuple::new(vec![int(4), string("a[b]c"), string("Male")]),
                    common::Tuple::new(vec![int(5), string("abc"), string("Male")]),
                    common::Tuple::new(vec![int(6), string("a[b]_x"), string("Male")]),
                ],
            )
            .unwrap();
        let starts_with = |prefix: &str| {
            Expr::root("Teacher")
                .filter(lambda(
                    "t",
                    Expr::call(ExprFunction::StartsWith, vec![param("t").member("Name"), Expr::string(prefix)]),
                ))
                .select(lambda("t", param("t").member("Name")))
        };
        let expr = starts_with("a[b]");
        let names: Vec<Field> = values(&engine, &expr).iter().map(scalar).collect();
        assert_eq!(names, vec![string("a[b]c"), string("a[b]_x")]);
        let sql = engine.explain(&expr).unwrap().sql;
        assert!(sql.contains("LIKE N'a\\[b]%' ESCAPE N'\\'"), "{}", sql);

        let expr = starts_with("a[b]_");
        let names: Vec<Field> = values(&engine, &expr).iter().map(scalar).collect();
        assert_eq!(names, vec![string("a[b]_x")]);
        let sql = engine.explain(&expr).unwrap().sql;
        assert!(sql.contains("LIKE N'a\\[b]\\_%' ESCAPE N'\\'"), "{}", sql);
    }

    #[test]
    fn test_averages() {
        let (engine, _) = stat_engine(EngineConfig::default());
        for name in FACTORS.iter() {
            let all = Expr::root("StatRecord").average(Some(factor(&format!("{}Factor", name))));
            let average = scalar(&run(&engine, &all).unwrap());
            assert_eq!(average.dtype(), Some(average_type(name)), "{}", name);
            assert_eq!(average.as_f64(), Some(2.5), "{}", name);

            let nullable = Expr::root("StatRecord").average(Some(factor(&format!("Nullable{}Factor", name))));
            let average = scalar(&run(&engine, &nullable).unwrap());
            assert_eq!(average.as_f64(), Some(3.0), "{}", name);
        }
    }

    #[test]
    fn test_empty_average() {
        let (engine, _) = stat_engine(EngineConfig::default());
        for name in FACTORS.iter() {
            let strict = no_stats().average(Some(factor(&format!("{}Factor", name))));
            match run(&engine, &strict) {
                Err(OrmError::InvalidOperation(_)) => {}
                other => panic!("{}: expected an error, got {:?}", name, other),
            }
            let nullable = no_stats().average(Some(factor(&format!("Nullable{}Factor", name))));
            assert!(run(&engine, &nullable).unwrap().is_null(), "{}", name);
        }
    }

    #[test]
    fn test_empty_average_async() {
        let (engine, _) = stat_engine(EngineConfig::default());
        let token = CancellationToken::new();
        let params = ParameterContext::new();
        let session = identity_map();
        let strict = no_stats().average(Some(factor("IntFactor")));
        match block_on(engine.execute_async(&strict, &params, &session, &token)) {
            Err(OrmError::InvalidOperation(_)) => {}
            other => panic!("expected an error, got {:?}", other),
        }
        let nullable = no_stats().average(Some(factor("NullableIntFactor")));
        let average = block_on(engine.execute_async(&nullable, &params, &session, &token)).unwrap();
        assert!(average.is_null());
    }

    #[test]
    fn test_empty_sum_min_max() {
        let (engine, _) = stat_engine(EngineConfig::default());
        let sum = no_stats().sum(Some(factor("IntFactor")));
        assert_eq!(scalar(&run(&engine, &sum).unwrap()), int(0));
        let nullable_sum = no_stats().sum(Some(factor("NullableDecimalFactor")));
        assert_eq!(scalar(&run(&engine, &nullable_sum).unwrap()).as_f64(), Some(0.0));

        for kind in [AggregateKind::Min, AggregateKind::Max].iter() {
            let strict = no_stats().method(QueryMethod::Aggregate {
                kind: *kind,
                selector: Some(factor("LongFactor")),
            });
            assert!(run(&engine, &strict).is_err());
            let nullable = no_stats().method(QueryMethod::Aggregate {
                kind: *kind,
                selector: Some(factor("NullableLongFactor")),
            });
            assert!(run(&engine, &nullable).unwrap().is_null());
        }

        let total = Expr::root("StatRecord").sum(Some(factor("IntFactor")));
        assert_eq!(scalar(&run(&engine, &total).unwrap()), int(10));
    }

    #[test]
    fn test_outer_join_nulls() {
        let (engine, _) = shop_engine();
        let expr = Expr::root("Order")
            .order_by(lambda("o", param("o").member("Id")))
            .select(lambda(
                "o",
                new_record(vec![
                    ("Id", param("o").member("Id")),
                    ("Salesman", param("o").member("Salesman")),
                    ("SalesmanName", param("o").path("Salesman.Name")),
                ]),
            ));
        let orders = values(&engine, &expr);
        assert_eq!(orders.len(), 3);
        let salesman = member(&orders[0], "Salesman");
        assert_eq!(salesman.as_entity().unwrap().type_name, "Employee");
        assert_eq!(scalar(&member(&orders[0], "SalesmanName")), string("Eve"));
        for order in &orders[1..] {
            assert!(member(order, "Salesman").is_null());
            assert!(member(order, "SalesmanName").is_null());
        }
    }

    #[test]
    fn test_left_join_nulls() {
        let (engine, _) = shop_engine();
        let expr = Expr::root("Order").method(QueryMethod::LeftJoin {
            inner: Box::new(Expr::root("Employee")),
            outer_key: lambda("o", param("o").path("Salesman.Id")),
            inner_key: lambda("e", param("e").member("Id")),
            result: Lambda::new2(
                "o",
                "e",
                new_record(vec![
                    ("Id", param("o").member("Id")),
                    ("Salesman", param("e")),
                    ("Name", param("e").member("Name")),
                ]),
            ),
        });
        let mut orders = values(&engine, &expr);
        orders.sort_by_key(|v| v.to_string());
        assert_eq!(orders.len(), 3);
        assert_eq!(scalar(&member(&orders[0], "Name")), string("Eve"));
        for order in &orders[1..] {
            assert!(member(order, "Salesman").is_null());
            assert!(member(order, "Name").is_null());
        }
    }

    #[test]
    fn test_structure_of_nulls() {
        let (engine, _) = shop_engine();
        let expr = Expr::root("Customer")
            .order_by(lambda("c", param("c").member("Id")))
            .select(lambda("c", param("c").member("Address")));
        let addresses = values(&engine, &expr);
        assert_eq!(scalar(&member(&addresses[0], "Street")), string("Main St"));
        assert!(addresses[1].is_null());
    }

    #[test]
    fn test_identity_map() {
        let (engine, _) = shop_engine();
        let expr = Expr::root("Order")
            .order_by(lambda("o", param("o").member("Id")))
            .select(lambda("o", param("o").member("Customer")));
        let session = identity_map();
        let customers = match engine.execute(&expr, &ParameterContext::new(), &session).unwrap() {
            Value::List(values) => values,
            other => panic!("expected a list, got {}", other),
        };
        let ann = customers[0].as_entity().unwrap();
        assert!(Arc::ptr_eq(ann, customers[1].as_entity().unwrap()));
        assert!(!Arc::ptr_eq(ann, customers[2].as_entity().unwrap()));

        let again = engine.execute(&expr, &ParameterContext::new(), &session).unwrap();
        assert!(Arc::ptr_eq(ann, again.as_list().unwrap()[0].as_entity().unwrap()));
    }

    #[test]
    fn test_nested_aggregates() {
        let (engine, _) = shop_engine();
        let expr = Expr::root("Customer")
            .order_by(lambda("c", param("c").member("Id")))
            .select(lambda(
                "c",
                new_record(vec![
                    ("Name", param("c").member("Name")),
                    ("Orders", param("c").member("Orders").count()),
                    (
                        "Total",
                        param("c").member("Orders").sum(Some(lambda("o", param("o").member("Total")))),
                    ),
                ]),
            ));
        let customers = values(&engine, &expr);
        assert_eq!(scalar(&member(&customers[0], "Orders")), int(2));
        assert_eq!(scalar(&member(&customers[1], "Orders")), int(1));
        assert_eq!(scalar(&member(&customers[0], "Total")), decimal("30.00"));
        assert_eq!(scalar(&member(&customers[1], "Total")), decimal("5.00"));
    }

    #[test]
    fn test_nested_sequences_restart() {
        let (engine, store) = shop_engine();
        let expr = Expr::root("Customer")
            .order_by(lambda("c", param("c").member("Id")))
            .select(lambda(
                "c",
                new_record(vec![
                    ("Name", param("c").member("Name")),
                    ("Orders", param("c").member("Orders")),
                ]),
            ));
        let customers = values(&engine, &expr);
        let orders = match member(&customers[0], "Orders") {
            Value::Sequence(orders) => orders,
            other => panic!("expected a sequence, got {}", other),
        };
        let before = store.executed_count();
        assert_eq!(orders.to_vec().unwrap().len(), 2);
        assert_eq!(orders.to_vec().unwrap().len(), 2);
        assert_eq!(store.executed_count(), before + 2);
        let token = CancellationToken::new();
        assert_eq!(block_on(orders.to_vec_async(&token)).unwrap().len(), 2);
    }

    #[test]
    fn test_groups_restart() {
        let (engine, store) = shop_engine();
        let expr = Expr::root("Order")
            .group_by(lambda("o", param("o").path("Customer.Id")))
            .order_by(lambda("g", param("g").member("Key")));
        let groups = values(&engine, &expr);
        assert_eq!(groups.len(), 2);
        let (key, elements) = match &groups[0] {
            Value::Group { key, elements } => (key, elements),
            other => panic!("expected a group, got {}", other),
        };
        assert_eq!(scalar(key), int(1));
        let before = store.executed_count();
        let first = elements.to_vec().unwrap();
        let second = elements.to_vec().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(store.executed_count(), before + 2);
        assert!(Arc::ptr_eq(first[0].as_entity().unwrap(), second[0].as_entity().unwrap()));
    }

    #[test]
    fn test_group_aggregates() {
        let (engine, _) = shop_engine();
        let expr = Expr::root("Order")
            .group_by(lambda("o", param("o").path("Customer.Id")))
            .order_by(lambda("g", param("g").member("Key")))
            .select(lambda(
                "g",
                new_record(vec![
                    ("Customer", param("g").member("Key")),
                    ("Count", param("g").count()),
                    ("Total", param("g").sum(Some(lambda("o", param("o").member("Total"))))),
                ]),
            ));
        let groups = values(&engine, &expr);
        assert_eq!(groups.len(), 2);
        assert_eq!(scalar(&member(&groups[0], "Count")), int(2));
        assert_eq!(scalar(&member(&groups[0], "Total")), decimal("30.00"));
        assert_eq!(scalar(&member(&groups[1], "Customer")), int(2));
        assert_eq!(scalar(&member(&groups[1], "Total")), decimal("5.00"));
    }

    #[test]
    fn test_paging_with_variables() {
        let (engine, _) = shop_engine();
        let expr = Expr::root("Order")
            .order_by(lambda("o", param("o").member("Id")))
            .skip(var("skip", DataType::Int))
            .take(var("take", DataType::Int))
            .select(lambda("o", param("o").member("Id")));
        let session = identity_map();
        let page = |skip: i32, take: i32| -> Vec<Field> {
            let params = ParameterContext::new().with("skip", int(skip)).with("take", int(take));
            match engine.execute(&expr, &params, &session).unwrap() {
                Value::List(values) => values.iter().map(scalar).collect(),
                other => panic!("expected a list, got {}", other),
            }
        };
        assert_eq!(page(1, 1), vec![int(2)]);
        assert_eq!(page(0, 2), vec![int(1), int(2)]);
        assert_eq!(page(2, 5), vec![int(3)]);
        assert_eq!(engine.cache().len().unwrap(), 1);
    }

    #[test]
    fn test_cache_hits() {
        let (engine, _) = teacher_engine();
        let expr = Expr::root("Teacher").filter(gender_is("Female"));
        let first = engine.translate(&expr).unwrap();
        let second = engine.translate(&expr).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        engine.translate(&Expr::root("Teacher").filter(gender_is("Male"))).unwrap();
        assert_eq!(engine.cache().len().unwrap(), 2);

        let config = EngineConfig {
            cache_capacity: 0,
            ..EngineConfig::default()
        };
        let (uncached, _) = engine_with(teacher_model(), config);
        let first = uncached.translate(&expr).unwrap();
        let second = uncached.translate(&expr).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_first_and_single() {
        let (engine, _) = shop_engine();
        let expensive =
            Expr::root("Order").filter(lambda("o", param("o").member("Total").gt(Expr::int(100))));
        match run(&engine, &expensive.clone().first()) {
            Err(OrmError::InvalidOperation(_)) => {}
            other => panic!("expected an error, got {:?}", other),
        }
        let or_default = expensive.method(QueryMethod::First {
            predicate: None,
            or_default: true,
        });
        assert!(run(&engine, &or_default).unwrap().is_null());

        match run(&engine, &Expr::root("Order").single()) {
            Err(OrmError::InvalidOperation(message)) => assert!(message.contains("more than one")),
            other => panic!("expected an error, got {:?}", other),
        }
        let third = Expr::root("Order").method(QueryMethod::Single {
            predicate: Some(lambda("o", param("o").member("Id").eq(Expr::int(3)))),
            or_default: false,
        });
        let order = run(&engine, &third).unwrap();
        assert_eq!(scalar(&member(&order, "Total")), decimal("5.00"));
    }

    #[test]
    fn test_cancelled() {
        let (engine, _) = teacher_engine();
        let token = CancellationToken::new();
        token.cancel();
        let result = block_on(engine.execute_async(
            &Expr::root("Teacher"),
            &ParameterContext::new(),
            &identity_map(),
            &token,
        ));
        assert!(matches!(result, Err(OrmError::Cancelled)));
    }

    #[test]
    fn test_joins() {
        let (engine, _) = shop_engine();
        let joined = Expr::root("Order").method(QueryMethod::Join {
            inner: Box::new(Expr::root("Customer")),
            outer_key: lambda("o", param("o").path("Customer.Id")),
            inner_key: lambda("c", param("c").member("Id")),
            result: Lambda::new2(
                "o",
                "c",
                new_record(vec![("Order", param("o").member("Id")), ("Name", param("c").member("Name"))]),
            ),
        });
        let mut rows: Vec<String> = values(&engine, &joined).iter().map(|v| v.to_string()).collect();
        rows.sort();
        assert_eq!(rows, vec!["{Order: 1, Name: Ann}", "{Order: 2, Name: Ann}", "{Order: 3, Name: Bob}"]);

        let grouped = Expr::root("Customer").method(QueryMethod::GroupJoin {
            inner: Box::new(Expr::root("Order")),
            outer_key: lambda("c", param("c").member("Id")),
            inner_key: lambda("o", param("o").path("Customer.Id")),
            result: Lambda::new2(
                "c",
                "os",
                new_record(vec![("Name", param("c").member("Name")), ("Orders", param("os").count())]),
            ),
        });
        let mut rows: Vec<String> = values(&engine, &grouped).iter().map(|v| v.to_string()).collect();
        rows.sort();
        assert_eq!(rows, vec!["{Name: Ann, Orders: 2}", "{Name: Bob, Orders: 1}"]);
    }

    #[test]
    fn test_default_if_empty() {
        let (engine, _) = shop_engine();
        let expr = Expr::root("Customer").method(QueryMethod::SelectMany {
            collection: lambda(
                "c",
                param("c")
                    .member("Orders")
                    .filter(lambda("o", param("o").member("Salesman").ne(Expr::null())))
                    .method(QueryMethod::DefaultIfEmpty),
            ),
            result: Some(Lambda::new2(
                "c",
                "o",
                new_record(vec![("Name", param("c").member("Name")), ("Order", param("o"))]),
            )),
        });
        let mut rows = values(&engine, &expr);
        rows.sort_by_key(|v| v.to_string());
        assert_eq!(rows.len(), 2);
        assert_eq!(scalar(&member(&rows[0], "Name")), string("Ann"));
        assert_eq!(scalar(&member(&member(&rows[0], "Order"), "Id")), int(1));
        assert!(member(&rows[1], "Order").is_null());
    }

    #[test]
    fn test_set_operations() {
        let (engine, _) = teacher_engine();
        let names = |gender: &str| {
            Expr::root("Teacher")
                .filter(gender_is(gender))
                .select(lambda("t", param("t").member("Name")))
        };
        let union = names("Female").method(QueryMethod::Union(Box::new(names("Male"))));
        assert_eq!(values(&engine, &union).len(), 3);
        let concat = names("Female").method(QueryMethod::Concat(Box::new(names("Female"))));
        assert_eq!(values(&engine, &concat).len(), 4);
        let except = Expr::root("Teacher")
            .select(lambda("t", param("t").member("Name")))
            .method(QueryMethod::Except(Box::new(names("Female"))));
        let rest = values(&engine, &except);
        assert_eq!(rest.len(), 1);
        assert_eq!(scalar(&rest[0]), string("Bob"));
    }

    #[test]
    fn test_local_collection() {
        let (engine, _) = teacher_engine();
        let local = Expr::Local(LocalCollection::scalars(DataType::Int, vec![int(1), int(2), int(3)]));
        let expr = local.filter(lambda("x", param("x").gt(Expr::int(1)))).count();
        assert_eq!(scalar(&run(&engine, &expr).unwrap()), int(2));
    }

    #[test]
    fn test_date_parts() {
        let (engine, _) = shop_engine();
        let expr = Expr::root("Order")
            .select(lambda("o", param("o").path("Placed.Year")))
            .distinct();
        let years = values(&engine, &expr);
        assert_eq!(years.len(), 1);
        assert_eq!(scalar(&years[0]).as_i64(), Some(2021));
    }

    #[test]
    fn test_explain() {
        let (engine, _) = teacher_engine();
        let explanation = engine
            .explain(&Expr::root("Teacher").filter(lambda(
                "t",
                param("t").member("Name").eq(var("name", DataType::String)),
            )))
            .unwrap();
        assert_eq!(explanation.dialect, engine.dialect());
        assert!(explanation.sql.starts_with("SELECT"));
        assert_eq!(explanation.parameters.len(), 1);
        let text = explanation.to_string();
        assert!(text.contains("Plan:"));
        assert!(text.contains(&explanation.sql));
    }

    #[test]
    fn test_sql_selects_read_columns() {
        let (engine, _) = shop_engine();
        let big_spenders = Expr::root("Customer")
            .filter(lambda(
                "c",
                param("c")
                    .member("Orders")
                    .any(Some(lambda("o", param("o").member("Total").gt(Expr::int(15))))),
            ))
            .select(lambda("c", param("c").member("Name")));
        let names = values(&engine, &big_spenders);
        assert_eq!(names.len(), 1);
        assert_eq!(scalar(&names[0]), string("Ann"));
        let sql = engine.explain(&big_spenders).unwrap().sql;
        assert_eq!(sql.matches("EXISTS").count(), 1, "{}", sql);

        let count = Expr::root("Customer").count();
        assert_eq!(scalar(&run(&engine, &count).unwrap()), int(2));
        let sql = engine.explain(&count).unwrap().sql;
        assert_eq!(sql.matches("COUNT(*)").count(), 1, "{}", sql);
    }

    #[test]
    fn test_translation_errors() {
        let (engine, _) = teacher_engine();
        match run(&engine, &Expr::root("Student")) {
            Err(OrmError::TranslationError { .. }) => {}
            other => panic!("expected a translation error, got {:?}", other),
        }
        let unknown = Expr::root("Teacher").select(lambda("t", param("t").member("Salary")));
        assert!(matches!(run(&engine, &unknown), Err(OrmError::TranslationError { .. })));
        assert_eq!(engine.cache().len().unwrap(), 0);
    }
}
