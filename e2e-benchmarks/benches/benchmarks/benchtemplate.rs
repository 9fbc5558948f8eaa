use common::catalog::DomainModel;
use common::execution::CommandExecutor;
use common::testutil::*;
use common::{Field, Tuple};
use memstore::MemoryStore;
use queryexe::{EngineConfig, EntityResolver, Expr, IdentityMap, ParameterContext, QueryEngine};

use criterion::{black_box, Criterion};
use std::sync::Arc;

/// Engine over an in-memory store plus the queries a benchmark runs.
pub struct Template {
    pub engine: QueryEngine,
    pub store: Arc<MemoryStore>,
    pub queries: Vec<Expr>,
}

impl Template {
    pub fn new(model: DomainModel, config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new_test_store());
        store.create_schema(&model).unwrap();
        let executor: Arc<dyn CommandExecutor> = store.clone();
        let engine = QueryEngine::new(Arc::new(model), executor, config).unwrap();
        Template {
            engine,
            store,
            queries: Vec::new(),
        }
    }

    /// Shop data: `customers` customers with `per_customer` orders each.
    pub fn load_shop(&self, customers: i32, per_customer: i32) {
        let mut customer_rows = Vec::new();
        let mut order_rows = Vec::new();
        for c in 1..=customers {
            let street = if c % 3 == 0 { Field::Null } else { string("Main St") };
            customer_rows.push(Tuple::new(vec![
                int(c),
                string(&format!("C{}", c)),
                street.clone(),
                street,
            ]));
            for i in 0..per_customer {
                let id = (c - 1) * per_customer + i + 1;
                order_rows.push(Tuple::new(vec![
                    int(id),
                    Field::parse(common::DataType::Decimal, &format!("{}.50", id % 100)).unwrap(),
                    Field::Null,
                    int(c),
                    Field::parse(common::DataType::DateTime, "2021-03-04 10:00:00").unwrap(),
                    if id % 2 == 0 { int(1) } else { Field::Null },
                ]));
            }
        }
        self.store.insert_tuples("Customers", customer_rows).unwrap();
        self.store
            .insert_tuples("Employee", vec![Tuple::new(vec![int(1), string("Eve")])])
            .unwrap();
        self.store.insert_tuples("Orders", order_rows).unwrap();
    }

    pub fn add_query(&mut self, expr: Expr) {
        self.queries.push(expr);
    }

    pub fn show_configuration(&self) {
        println!(
            "{} queries for {} {:?}",
            self.queries.len(),
            self.engine.dialect(),
            self.engine.config()
        );
    }

    /// Translates every query from scratch.
    pub fn run_translations(&self) {
        self.engine.cache().clear().unwrap();
        for q in &self.queries {
            black_box(self.engine.translate(q).unwrap());
        }
    }

    /// Runs every query; translations come from the cache after the first round.
    pub fn run_queries(&self) {
        let session: Arc<dyn EntityResolver> = Arc::new(IdentityMap::new());
        let params = ParameterContext::new();
        for q in &self.queries {
            black_box(self.engine.execute(q, &params, &session).unwrap());
        }
    }
}

pub trait BenchTemplate {
    fn bench_translate(&mut self, c: &mut Criterion, name: &str);
    fn bench_execute(&mut self, c: &mut Criterion, name: &str);
}

impl BenchTemplate for Template {
    fn bench_translate(&mut self, c: &mut Criterion, name: &str) {
        c.bench_function(name, |b| b.iter(|| self.run_translations()));
    }

    fn bench_execute(&mut self, c: &mut Criterion, name: &str) {
        c.bench_function(name, |b| b.iter(|| self.run_queries()));
    }
}
