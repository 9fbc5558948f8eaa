use crate::engine::{EngineConfig, QueryEngine};
use crate::session::{EntityResolver, IdentityMap};
use common::catalog::DomainModel;
use common::execution::CommandExecutor;
use common::testutil::*;
use common::{DataType, Field, Tuple};
use memstore::MemoryStore;
use rust_decimal::Decimal;
use std::sync::Arc;

pub fn decimal(text: &str) -> Field {
    Field::parse(DataType::Decimal, text).unwrap()
}

pub fn date(text: &str) -> Field {
    Field::parse(DataType::DateTime, text).unwrap()
}

/// Engine over a fresh store holding the tables of `model`.
pub fn engine_with(model: DomainModel, config: EngineConfig) -> (QueryEngine, Arc<MemoryStore>) {
    init();
    let store = Arc::new(MemoryStore::new_test_store());
    store.create_schema(&model).unwrap();
    let executor: Arc<dyn CommandExecutor> = store.clone();
    (QueryEngine::new(Arc::new(model), executor, config).unwrap(), store)
}

pub fn identity_map() -> Arc<dyn EntityResolver> {
    Arc::new(IdentityMap::new())
}

/// Ann (Female), Bob (Male), Cat (Female).
pub fn teacher_engine() -> (QueryEngine, Arc<MemoryStore>) {
    let (engine, store) = engine_with(teacher_model(), EngineConfig::default());
    store
        .insert_tuples(
            "Teacher",
            vec![
                Tuple::new(vec![int(1), string("Ann"), string("Female")]),
                Tuple::new(vec![int(2), string("Bob"), string("Male")]),
                Tuple::new(vec![int(3), string("Cat"), string("Female")]),
            ],
        )
        .unwrap();
    (engine, store)
}

/// Records 1 to 4 with every factor equal to the id; nullable factors are
/// null for odd ids.
pub fn stat_engine(config: EngineConfig) -> (QueryEngine, Arc<MemoryStore>) {
    let (engine, store) = engine_with(stat_record_model(), config);
    let rows = (1..=4)
        .map(|i: i32| {
            let nullable = |f: Field| if i % 2 == 1 { Field::Null } else { f };
            Tuple::new(vec![
                int(i),
                int(i),
                nullable(int(i)),
                Field::LongField(i as i64),
                nullable(Field::LongField(i as i64)),
                Field::FloatField(i as f32),
                nullable(Field::FloatField(i as f32)),
                Field::DoubleField(i as f64),
                nullable(Field::DoubleField(i as f64)),
                Field::DecimalField(Decimal::from(i)),
                nullable(Field::DecimalField(Decimal::from(i))),
            ])
        })
        .collect();
    store.insert_tuples("StatRecord", rows).unwrap();
    (engine, store)
}

pub fn customer_row(id: i32, name: &str, street: Option<&str>, city: Option<&str>) -> Tuple {
    let text = |s: Option<&str>| s.map_or(Field::Null, string);
    Tuple::new(vec![int(id), string(name), text(street), text(city)])
}

pub fn order_row(id: i32, total: &str, discount: Option<f64>, customer: i32, salesman: Option<i32>) -> Tuple {
    Tuple::new(vec![
        int(id),
        decimal(total),
        discount.map_or(Field::Null, Field::DoubleField),
        int(customer),
        date("2021-03-04 10:00:00"),
        salesman.map_or(Field::Null, int),
    ])
}

/// Ann (Main St) with orders 1 and 2, Bob (no address) with order 3.
/// Only order 1 has a salesman.
pub fn shop_engine_with(config: EngineConfig) -> (QueryEngine, Arc<MemoryStore>) {
    let (engine, store) = engine_with(shop_model(), config);
    store
        .insert_tuples(
            "Customers",
            vec![
                customer_row(1, "Ann", Some("Main St"), Some("Springfield")),
                customer_row(2, "Bob", None, None),
            ],
        )
        .unwrap();
    store
        .insert_tuples("Employee", vec![Tuple::new(vec![int(1), string("Eve")])])
        .unwrap();
    store
        .insert_tuples(
            "Orders",
            vec![
                order_row(1, "10.00", Some(0.1), 1, Some(1)),
                order_row(2, "20.00", None, 1, None),
                order_row(3, "5.00", None, 2, None),
            ],
        )
        .unwrap();
    (engine, store)
}

pub fn shop_engine() -> (QueryEngine, Arc<MemoryStore>) {
    shop_engine_with(EngineConfig::default())
}
