use crate::projector::{ItemExpr, SubQueryRef};
use crate::query::{ResultKind, TranslatedQuery};
use crate::session::{Entity, EntityResolver};
use common::catalog::Catalog;
use common::execution::{CancellationToken, CommandExecutor, ParameterValues};
use common::logical_plan::AggregateKind;
use common::model::{FieldInfo, FieldKind, TypeInfo};
use common::{Field, OrmError, Tuple};
use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;

/// A materialized query result.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Scalar(Field),
    Entity(Arc<Entity>),
    Structure {
        type_name: String,
        members: Vec<(String, Value)>,
    },
    /// Anonymous record.
    Record(Vec<(String, Value)>),
    Group {
        key: Box<Value>,
        elements: LazySequence,
    },
    /// Nested sequence, fetched when enumerated.
    Sequence(LazySequence),
    /// Elements of a root sequence.
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Scalar(Field::Null))
    }

    pub fn as_field(&self) -> Option<&Field> {
        match self {
            Value::Scalar(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Arc<Entity>> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }

    /// Member of a record, structure or entity.
    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(members) | Value::Structure { members, .. } => {
                members.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            Value::Entity(e) => e.get(name),
            Value::Group { key, .. } if name == "Key" => Some(key),
            _ => None,
        }
    }
}

fn write_members(f: &mut fmt::Formatter<'_>, members: &[(String, Value)]) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (name, value)) in members.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: {}", name, value)?;
    }
    write!(f, "}}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Scalar(field) => write!(f, "{}", field),
            Value::Entity(e) => write!(f, "{}", e),
            Value::Structure { type_name, members } => {
                write!(f, "{}", type_name)?;
                write_members(f, members)
            }
            Value::Record(members) => write_members(f, members),
            Value::Group { key, .. } => write!(f, "Group({})", key),
            Value::Sequence(_) => write!(f, "<sequence>"),
            Value::List(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// What shaping reads besides the tuple: where nested sequences run and
/// how entities are resolved.
#[derive(Clone)]
pub struct ShapeContext {
    pub executor: Arc<dyn CommandExecutor>,
    pub resolver: Arc<dyn EntityResolver>,
    pub parameters: Arc<ParameterValues>,
}

impl ShapeContext {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        resolver: Arc<dyn EntityResolver>,
        parameters: ParameterValues,
    ) -> Self {
        Self {
            executor,
            resolver,
            parameters: Arc::new(parameters),
        }
    }
}

/// A nested query bound to one outer row.
///
/// Every enumeration runs the query again, so a sequence can be enumerated
/// any number of times.
#[derive(Clone)]
pub struct LazySequence {
    query: Arc<TranslatedQuery>,
    context: ShapeContext,
}

impl LazySequence {
    pub fn query(&self) -> &TranslatedQuery {
        &self.query
    }

    /// Parameter values the query runs with, outer row bindings included.
    pub fn parameters(&self) -> &ParameterValues {
        &self.context.parameters
    }

    pub fn to_vec(&self) -> Result<Vec<Value>, OrmError> {
        let rows = self
            .context
            .executor
            .execute(&self.query.request, &self.context.parameters)?;
        self.query
            .materializer
            .shape_rows(&self.query, &rows, &self.context, None)
    }

    pub async fn to_vec_async(&self, token: &CancellationToken) -> Result<Vec<Value>, OrmError> {
        token.check()?;
        let rows = self
            .context
            .executor
            .execute_async(&self.query.request, &self.context.parameters, token)
            .await?;
        self.query
            .materializer
            .shape_rows(&self.query, &rows, &self.context, Some(token))
    }
}

impl fmt::Debug for LazySequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySequence")
            .field("sql", &self.query.request.text)
            .finish()
    }
}

type Shaper = Arc<dyn Fn(&Tuple, &ShapeContext) -> Result<Value, OrmError> + Send + Sync>;

fn read(tuple: &Tuple, index: usize) -> Result<&Field, OrmError> {
    tuple.get_field(index).ok_or_else(|| {
        OrmError::ValidationError(format!("Tuple {} has no column {}", tuple, index))
    })
}

fn all_null(tuple: &Tuple, columns: &[usize]) -> Result<bool, OrmError> {
    for c in columns {
        if !read(tuple, *c)?.is_null() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Items of the fields of an entity laid out at `columns`.
fn field_items(type_info: &TypeInfo, fields: &[FieldInfo], columns: &[usize], prefix: &str) -> Vec<(String, ItemExpr)> {
    let mut items = Vec::new();
    for field in fields {
        match &field.kind {
            FieldKind::Scalar(dtype) => items.push((
                field.name.clone(),
                ItemExpr::column(columns[field.mapping.offset], *dtype, field.nullable),
            )),
            FieldKind::Structure(nested) => {
                let type_name = format!("{}{}", prefix, field.name);
                items.push((
                    field.name.clone(),
                    ItemExpr::Structure {
                        members: field_items(type_info, nested, columns, &format!("{}.", type_name)),
                        type_name,
                    },
                ))
            }
            FieldKind::Reference { .. } => {
                for i in field.mapping.range() {
                    let column = &type_info.columns[i];
                    items.push((
                        column.name.clone(),
                        ItemExpr::column(columns[i], column.dtype, column.nullable),
                    ));
                }
            }
            FieldKind::EntitySet { .. } => {}
        }
    }
    items
}

fn compile_members(members: &[(String, ItemExpr)], catalog: &dyn Catalog) -> Result<Vec<(String, Shaper)>, OrmError> {
    members
        .iter()
        .map(|(name, item)| Ok((name.clone(), compile_item(item, catalog)?)))
        .collect()
}

fn shape_members(
    members: &[(String, Shaper)],
    tuple: &Tuple,
    context: &ShapeContext,
) -> Result<Vec<(String, Value)>, OrmError> {
    members
        .iter()
        .map(|(name, shaper)| Ok((name.clone(), shaper(tuple, context)?)))
        .collect()
}

/// Binds a nested query to the outer row.
fn bind_sequence(sub: &SubQueryRef, tuple: &Tuple, context: &ShapeContext) -> Result<LazySequence, OrmError> {
    let mut parameters = ParameterValues::clone(&context.parameters);
    for (key, index) in &sub.bindings {
        parameters.insert(key.clone(), read(tuple, *index)?.clone());
    }
    Ok(LazySequence {
        query: sub.query.clone(),
        context: ShapeContext {
            executor: context.executor.clone(),
            resolver: context.resolver.clone(),
            parameters: Arc::new(parameters),
        },
    })
}

fn compile_item(item: &ItemExpr, catalog: &dyn Catalog) -> Result<Shaper, OrmError> {
    Ok(match item {
        ItemExpr::Column { index, .. } => {
            let index = *index;
            Arc::new(move |tuple, _| {
                Ok(match read(tuple, index)? {
                    Field::Null => Value::Null,
                    field => Value::Scalar(field.clone()),
                })
            })
        }
        ItemExpr::Constant(Field::Null) => Arc::new(|_, _| Ok(Value::Null)),
        ItemExpr::Constant(field) => {
            let field = field.clone();
            Arc::new(move |_, _| Ok(Value::Scalar(field.clone())))
        }
        ItemExpr::Entity {
            type_name,
            columns,
            key,
            ..
        } => {
            let type_info = catalog.get_type(type_name)?.clone();
            let members = compile_members(&field_items(&type_info, &type_info.fields, columns, ""), catalog)?;
            let type_name = type_name.clone();
            let key = key.clone();
            Arc::new(move |tuple, context| {
                let key = Tuple::new(
                    key.iter()
                        .map(|k| read(tuple, *k).map(Field::clone))
                        .collect::<Result<_, _>>()?,
                );
                // Rows of the null side of an outer join carry no identity.
                if key.field_vals().any(Field::is_null) {
                    return Ok(Value::Null);
                }
                let entity = Entity {
                    type_name: type_name.clone(),
                    key,
                    fields: shape_members(&members, tuple, context)?,
                };
                Ok(Value::Entity(context.resolver.resolve(entity)?))
            })
        }
        ItemExpr::Structure { type_name, members } => {
            let columns = item.distinct_columns();
            let members = compile_members(members, catalog)?;
            let type_name = type_name.clone();
            Arc::new(move |tuple, context| {
                if !columns.is_empty() && all_null(tuple, &columns)? {
                    return Ok(Value::Null);
                }
                Ok(Value::Structure {
                    type_name: type_name.clone(),
                    members: shape_members(&members, tuple, context)?,
                })
            })
        }
        ItemExpr::Anonymous { members } => {
            let members = compile_members(members, catalog)?;
            Arc::new(move |tuple, context| Ok(Value::Record(shape_members(&members, tuple, context)?)))
        }
        ItemExpr::Grouping { key, elements } => {
            let key = compile_item(key, catalog)?;
            let elements = elements.clone();
            Arc::new(move |tuple, context| {
                Ok(Value::Group {
                    key: Box::new(key(tuple, context)?),
                    elements: bind_sequence(&elements, tuple, context)?,
                })
            })
        }
        ItemExpr::SubQuery(sub) => {
            let sub = sub.clone();
            Arc::new(move |tuple, context| Ok(Value::Sequence(bind_sequence(&sub, tuple, context)?)))
        }
    })
}

const NO_ELEMENTS: &str = "Sequence contains no elements";

/// Shapes the tuples of one query into its result.
///
/// Compiled once per query; the closure tree is shared by every execution.
pub struct Materializer {
    shaper: Shaper,
}

impl Materializer {
    /// Compiles an item projector.
    ///
    /// # Arguments
    ///
    /// * `item` - Projector over the tuples of the query.
    /// * `catalog` - Model describing the entities the item reads.
    pub fn compile(item: &ItemExpr, catalog: &dyn Catalog) -> Result<Self, OrmError> {
        Ok(Self {
            shaper: compile_item(item, catalog)?,
        })
    }

    /// Shapes one element.
    pub fn shape(&self, tuple: &Tuple, context: &ShapeContext) -> Result<Value, OrmError> {
        (self.shaper)(tuple, context)
    }

    /// Shapes every row, checking `token` before each one.
    pub fn shape_rows(
        &self,
        query: &TranslatedQuery,
        rows: &[Tuple],
        context: &ShapeContext,
        token: Option<&CancellationToken>,
    ) -> Result<Vec<Value>, OrmError> {
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(token) = token {
                token.check()?;
            }
            query.request.check_shape(row)?;
            values.push(self.shape(row, context)?);
        }
        Ok(values)
    }

    /// Turns the rows of a query into its result value.
    pub fn finish(
        &self,
        query: &TranslatedQuery,
        rows: &[Tuple],
        context: &ShapeContext,
        token: Option<&CancellationToken>,
    ) -> Result<Value, OrmError> {
        match query.result {
            ResultKind::Sequence => Ok(Value::List(self.shape_rows(query, rows, context, token)?)),
            ResultKind::First { or_default } => match rows.first() {
                Some(_) => self.single_value(query, &rows[..1], context, token),
                None if or_default => Ok(Value::Null),
                None => Err(OrmError::InvalidOperation(String::from(NO_ELEMENTS))),
            },
            ResultKind::Single { or_default } => match rows.len() {
                0 if or_default => Ok(Value::Null),
                0 => Err(OrmError::InvalidOperation(String::from(NO_ELEMENTS))),
                1 => self.single_value(query, rows, context, token),
                _ => Err(OrmError::InvalidOperation(String::from(
                    "Sequence contains more than one element",
                ))),
            },
            ResultKind::Exists => match scalar(rows)? {
                Field::Null => Ok(Value::Scalar(Field::BoolField(false))),
                field => field
                    .as_bool()
                    .map(|b| Value::Scalar(Field::BoolField(b)))
                    .ok_or_else(|| OrmError::ValidationError(format!("Expected a boolean, got {}", field))),
            },
            ResultKind::Count { long } => {
                let field = scalar(rows)?;
                let count = field.as_i64().unwrap_or(0);
                if long {
                    Ok(Value::Scalar(Field::LongField(count)))
                } else {
                    i32::try_from(count)
                        .map(|c| Value::Scalar(Field::IntField(c)))
                        .map_err(|_| {
                            OrmError::InvalidOperation(String::from(
                                "Arithmetic operation resulted in an overflow",
                            ))
                        })
                }
            }
            ResultKind::Aggregate {
                kind,
                dtype,
                nullable,
            } => match scalar(rows)? {
                Field::Null => match kind {
                    AggregateKind::Sum | AggregateKind::Count => dtype
                        .zero()
                        .map(Value::Scalar)
                        .ok_or_else(|| OrmError::ValidationError(format!("Cannot sum {}", dtype))),
                    _ if nullable => Ok(Value::Null),
                    _ => Err(OrmError::InvalidOperation(String::from(NO_ELEMENTS))),
                },
                field => {
                    query.request.check_shape(&rows[0])?;
                    Ok(Value::Scalar(field))
                }
            },
        }
    }

    fn single_value(
        &self,
        query: &TranslatedQuery,
        rows: &[Tuple],
        context: &ShapeContext,
        token: Option<&CancellationToken>,
    ) -> Result<Value, OrmError> {
        Ok(self
            .shape_rows(query, rows, context, token)?
            .into_iter()
            .next()
            .unwrap_or(Value::Null))
    }
}

/// First field of the first row; null without rows.
fn scalar(rows: &[Tuple]) -> Result<Field, OrmError> {
    match rows.first() {
        None => Ok(Field::Null),
        Some(row) => Ok(read(row, 0)?.clone()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::session::{IdentityMap, NoTracking};
    use async_trait::async_trait;
    use common::execution::QueryRequest;
    use common::logical_plan::Provider;
    use common::testutil::*;
    use common::{DataType, Header};

    struct NoRows;

    #[async_trait]
    impl CommandExecutor for NoRows {
        fn execute(&self, _: &QueryRequest, _: &ParameterValues) -> Result<Vec<Tuple>, OrmError> {
            Ok(vec![])
        }

        async fn execute_async(
            &self,
            _: &QueryRequest,
            _: &ParameterValues,
            _: &CancellationToken,
        ) -> Result<Vec<Tuple>, OrmError> {
            Ok(vec![])
        }
    }

    fn context(resolver: Arc<dyn EntityResolver>) -> ShapeContext {
        ShapeContext::new(Arc::new(NoRows), resolver, ParameterValues::new())
    }

    fn query(item: ItemExpr, shape: Vec<DataType>, result: ResultKind) -> TranslatedQuery {
        let model = teacher_model();
        TranslatedQuery {
            request: QueryRequest {
                text: String::new(),
                parameters: vec![],
                provider: Arc::new(Provider::raw(Header::new(vec![]), Arc::new(vec![]))),
                shape,
            },
            materializer: Materializer::compile(&item, &model).unwrap(),
            projector: item,
            result,
        }
    }

    fn teacher_item(offset: usize) -> ItemExpr {
        ItemExpr::Entity {
            type_name: String::from("Teacher"),
            columns: vec![offset, offset + 1, offset + 2],
            key: vec![offset],
            nullable: true,
        }
    }

    fn row(id: Field, name: Field, gender: Field) -> Tuple {
        Tuple::new(vec![id, name, gender])
    }

    #[test]
    fn test_entities_resolve_once() {
        let q = query(
            teacher_item(0),
            vec![DataType::Int, DataType::String, DataType::String],
            ResultKind::Sequence,
        );
        let ctx = context(Arc::new(IdentityMap::new()));
        let rows = vec![
            row(int(1), string("Ann"), string("Female")),
            row(int(1), string("Ann"), string("Female")),
            row(Field::Null, Field::Null, Field::Null),
        ];
        let value = q.materializer.finish(&q, &rows, &ctx, None).unwrap();
        let values = value.as_list().unwrap();
        assert_eq!(values.len(), 3);
        let a = values[0].as_entity().unwrap();
        let b = values[1].as_entity().unwrap();
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(a.get("Name").and_then(Value::as_field), Some(&string("Ann")));
        assert!(values[2].is_null());
    }

    #[test]
    fn test_first_and_single() {
        let item = ItemExpr::column(0, DataType::Int, false);
        let ctx = context(Arc::new(NoTracking));
        let rows = vec![int_vec_to_tuple(vec![4]), int_vec_to_tuple(vec![5])];
        let first = query(item.clone(), vec![DataType::Int], ResultKind::First { or_default: false });
        assert_eq!(
            first.materializer.finish(&first, &rows, &ctx, None).unwrap().as_field(),
            Some(&int(4))
        );
        assert!(matches!(
            first.materializer.finish(&first, &[], &ctx, None),
            Err(OrmError::InvalidOperation(_))
        ));
        let single = query(item, vec![DataType::Int], ResultKind::Single { or_default: true });
        assert!(single.materializer.finish(&single, &[], &ctx, None).unwrap().is_null());
        assert!(matches!(
            single.materializer.finish(&single, &rows, &ctx, None),
            Err(OrmError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_empty_aggregates() {
        let ctx = context(Arc::new(NoTracking));
        let null_row = vec![Tuple::new(vec![Field::Null])];
        let item = ItemExpr::column(0, DataType::Double, true);
        let avg = |nullable| {
            query(
                item.clone(),
                vec![DataType::Double],
                ResultKind::Aggregate {
                    kind: AggregateKind::Avg,
                    dtype: DataType::Double,
                    nullable,
                },
            )
        };
        let strict = avg(false);
        match strict.materializer.finish(&strict, &null_row, &ctx, None) {
            Err(OrmError::InvalidOperation(msg)) => assert_eq!(msg, NO_ELEMENTS),
            other => panic!("Expected an invalid operation, got {:?}", other),
        }
        let lenient = avg(true);
        assert!(lenient
            .materializer
            .finish(&lenient, &null_row, &ctx, None)
            .unwrap()
            .is_null());
        let sum = query(
            ItemExpr::column(0, DataType::Long, true),
            vec![DataType::Long],
            ResultKind::Aggregate {
                kind: AggregateKind::Sum,
                dtype: DataType::Long,
                nullable: false,
            },
        );
        assert_eq!(
            sum.materializer.finish(&sum, &null_row, &ctx, None).unwrap().as_field(),
            Some(&Field::LongField(0))
        );
    }

    #[test]
    fn test_cancelled_while_shaping() {
        let q = query(
            ItemExpr::column(0, DataType::Int, false),
            vec![DataType::Int],
            ResultKind::Sequence,
        );
        let ctx = context(Arc::new(NoTracking));
        let token = CancellationToken::new();
        token.cancel();
        let rows = vec![int_vec_to_tuple(vec![1])];
        assert!(matches!(
            q.materializer.finish(&q, &rows, &ctx, Some(&token)),
            Err(OrmError::Cancelled)
        ));
    }

    #[test]
    fn test_structure_of_nulls_is_null() {
        let item = ItemExpr::Anonymous {
            members: vec![(
                String::from("Address"),
                ItemExpr::Structure {
                    type_name: String::from("Customer.Address"),
                    members: vec![
                        (String::from("Street"), ItemExpr::column(0, DataType::String, true)),
                        (String::from("City"), ItemExpr::column(1, DataType::String, true)),
                    ],
                },
            )],
        };
        let q = query(item, vec![DataType::String, DataType::String], ResultKind::Sequence);
        let ctx = context(Arc::new(NoTracking));
        let rows = vec![
            Tuple::new(vec![Field::Null, Field::Null]),
            Tuple::new(vec![string("Main"), Field::Null]),
        ];
        let value = q.materializer.finish(&q, &rows, &ctx, None).unwrap();
        let values = value.as_list().unwrap();
        assert!(values[0].member("Address").unwrap().is_null());
        let address = values[1].member("Address").unwrap();
        assert_eq!(address.member("Street").and_then(Value::as_field), Some(&string("Main")));
        assert!(address.member("City").unwrap().is_null());
    }
}
