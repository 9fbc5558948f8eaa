use criterion::criterion_main;

mod benchmarks;

criterion_main! {
    benchmarks::translatebench::translatebench,
    benchmarks::executebench::executebench,
}
