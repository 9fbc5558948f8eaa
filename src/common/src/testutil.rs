use crate::catalog::{DomainModel, DomainModelBuilder, FieldDecl, FieldDeclKind, TypeDecl};
use crate::{DataType, Field, Tuple};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Converts an int vector to a Tuple.
///
/// # Argument
///
/// * `data` - Data to put into tuple.
pub fn int_vec_to_tuple(data: Vec<i32>) -> Tuple {
    let mut tuple_data = Vec::new();

    for val in data {
        tuple_data.push(Field::IntField(val));
    }

    Tuple::new(tuple_data)
}

/// Creates a Vec of tuples containing IntFields given a 2D Vec of i32 's
pub fn create_tuple_list(tuple_data: Vec<Vec<i32>>) -> Vec<Tuple> {
    let mut tuples = Vec::new();
    for item in &tuple_data {
        let fields = item.iter().map(|i| Field::IntField(*i)).collect();
        tuples.push(Tuple::new(fields));
    }
    tuples
}

pub fn int(i: i32) -> Field {
    Field::IntField(i)
}

pub fn string(s: &str) -> Field {
    Field::StringField(s.to_string())
}

pub fn gen_rand_string(n: usize) -> String {
    thread_rng().sample_iter(Alphanumeric).take(n).map(char::from).collect()
}

/// Random int table of `rows` x `width` with values in `0..max`, nulls with probability `null_ratio`.
pub fn gen_random_int_rows(rows: usize, width: usize, max: i32, null_ratio: f64) -> Vec<Tuple> {
    let mut rng = thread_rng();
    (0..rows)
        .map(|_| {
            Tuple::new(
                (0..width)
                    .map(|_| {
                        if rng.gen_bool(null_ratio) {
                            Field::Null
                        } else {
                            Field::IntField(rng.gen_range(0..max))
                        }
                    })
                    .collect(),
            )
        })
        .collect()
}

/// Compares two tuple lists ignoring order.
pub fn compare_unordered_tuples(a: &[Tuple], b: &[Tuple]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

/// Customers, orders and employees.
///
/// Orders reference their customer (required) and salesman (optional).
pub fn shop_model() -> DomainModel {
    DomainModelBuilder::new()
        .add_type(
            TypeDecl::new("Customer")
                .table("Customers")
                .key("Id", DataType::Int)
                .scalar("Name", DataType::String, false)
                .structure(
                    "Address",
                    vec![
                        FieldDecl {
                            name: "Street".to_string(),
                            kind: FieldDeclKind::Scalar {
                                dtype: DataType::String,
                            },
                            nullable: false,
                        },
                        FieldDecl {
                            name: "City".to_string(),
                            kind: FieldDeclKind::Scalar {
                                dtype: DataType::String,
                            },
                            nullable: false,
                        },
                    ],
                    true,
                )
                .entity_set("Orders", "Order", "Customer")
                .index("IX_Customer_Name", &["Name"], false, Some(80)),
        )
        .add_type(
            TypeDecl::new("Order")
                .table("Orders")
                .identity()
                .key("Id", DataType::Int)
                .scalar("Total", DataType::Decimal, false)
                .scalar("Discount", DataType::Double, true)
                .reference("Customer", "Customer", false)
                .scalar("Placed", DataType::DateTime, false)
                .reference("Salesman", "Employee", true),
        )
        .add_type(
            TypeDecl::new("Employee")
                .key("Id", DataType::Int)
                .scalar("Name", DataType::String, false),
        )
        .build()
        .unwrap()
}

/// Teachers with a gender stored as text.
pub fn teacher_model() -> DomainModel {
    DomainModelBuilder::new()
        .add_type(
            TypeDecl::new("Teacher")
                .key("Id", DataType::Int)
                .scalar("Name", DataType::String, false)
                .scalar("Gender", DataType::String, false),
        )
        .build()
        .unwrap()
}

/// One non-nullable and one nullable factor per numeric type.
pub fn stat_record_model() -> DomainModel {
    DomainModelBuilder::new()
        .add_type(
            TypeDecl::new("StatRecord")
                .key("Id", DataType::Int)
                .scalar("IntFactor", DataType::Int, false)
                .scalar("NullableIntFactor", DataType::Int, true)
                .scalar("LongFactor", DataType::Long, false)
                .scalar("NullableLongFactor", DataType::Long, true)
                .scalar("FloatFactor", DataType::Float, false)
                .scalar("NullableFloatFactor", DataType::Float, true)
                .scalar("DoubleFactor", DataType::Double, false)
                .scalar("NullableDoubleFactor", DataType::Double, true)
                .scalar("DecimalFactor", DataType::Decimal, false)
                .scalar("NullableDecimalFactor", DataType::Decimal, true),
        )
        .build()
        .unwrap()
}
