use criterion::{criterion_group, Criterion};

use crate::benchmarks::benchtemplate::{BenchTemplate, Template};
use crate::benchmarks::translatebench::shop_queries;
use common::testutil::*;
use queryexe::EngineConfig;

fn execute_shop(c: &mut Criterion, name: &str, customers: i32, per_customer: i32, config: EngineConfig) {
    let mut bt = Template::new(shop_model(), config);
    bt.load_shop(customers, per_customer);
    for q in shop_queries() {
        bt.add_query(q);
    }
    bt.show_configuration();
    bt.bench_execute(c, name);
}

fn bench_execute_tiny(c: &mut Criterion) {
    execute_shop(c, "execute_tiny", 10, 3, EngineConfig::default());
}

fn bench_execute_small(c: &mut Criterion) {
    execute_shop(c, "execute_small", 200, 10, EngineConfig::default());
}

fn bench_execute_small_applies(c: &mut Criterion) {
    let config = EngineConfig {
        convert_applies: false,
        ..EngineConfig::default()
    };
    execute_shop(c, "execute_small_applies", 200, 10, config);
}

criterion_group! {
    name = executebench;
    config = Criterion::default().sample_size(10);
    targets =
    bench_execute_tiny,
    bench_execute_small,
    bench_execute_small_applies,
}
