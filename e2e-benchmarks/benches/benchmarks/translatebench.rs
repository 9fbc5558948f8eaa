use criterion::{criterion_group, Criterion};

use crate::benchmarks::benchtemplate::{BenchTemplate, Template};
use common::testutil::*;
use queryexe::expression::{lambda, new_record, param, Lambda};
use queryexe::{EngineConfig, Expr, QueryMethod};

/// Filters, nested aggregates, groupings and a select many over the shop model.
pub fn shop_queries() -> Vec<Expr> {
    let by_name = Expr::root("Customer")
        .filter(lambda("c", param("c").member("Name").eq(Expr::string("C7"))))
        .order_by(lambda("c", param("c").member("Id")));
    let totals = Expr::root("Customer").select(lambda(
        "c",
        new_record(vec![
            ("Name", param("c").member("Name")),
            ("Orders", param("c").member("Orders").count()),
            (
                "Total",
                param("c")
                    .member("Orders")
                    .sum(Some(lambda("o", param("o").member("Total")))),
            ),
        ]),
    ));
    let groups = Expr::root("Order")
        .group_by(lambda("o", param("o").path("Customer.Id")))
        .select(lambda(
            "g",
            new_record(vec![
                ("Customer", param("g").member("Key")),
                ("Count", param("g").count()),
            ]),
        ));
    let flattened = Expr::root("Customer").method(QueryMethod::SelectMany {
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
            new_record(vec![
                ("Name", param("c").member("Name")),
                ("Salesman", param("o").path("Salesman.Name")),
            ]),
        )),
    });
    vec![by_name, totals, groups, flattened]
}

fn translate_with(c: &mut Criterion, name: &str, config: EngineConfig) {
    let mut bt = Template::new(shop_model(), config);
    for q in shop_queries() {
        bt.add_query(q);
    }
    bt.show_configuration();
    bt.bench_translate(c, name);
}

fn bench_translate_sqlserver(c: &mut Criterion) {
    translate_with(c, "translate_sqlserver", EngineConfig::default());
}

fn bench_translate_postgres(c: &mut Criterion) {
    let config = EngineConfig {
        dialect: String::from("postgresql-9.4"),
        ..EngineConfig::default()
    };
    translate_with(c, "translate_postgres", config);
}

fn bench_translate_keep_applies(c: &mut Criterion) {
    let config = EngineConfig {
        convert_applies: false,
        remove_redundant_columns: false,
        ..EngineConfig::default()
    };
    translate_with(c, "translate_keep_applies", config);
}

criterion_group! {
    name = translatebench;
    config = Criterion::default().sample_size(10);
    targets =
    bench_translate_sqlserver,
    bench_translate_postgres,
    bench_translate_keep_applies,
}
