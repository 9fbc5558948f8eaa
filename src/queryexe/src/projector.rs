use crate::expression::Expr;
use crate::query::TranslatedQuery;
use common::{DataType, Field, OrmError, ParamKey};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A nested query enumerated per outer row.
#[derive(Debug, Clone)]
pub struct SubQueryRef {
    pub query: Arc<TranslatedQuery>,
    /// Outer tuple column bound to each outer parameter of `query`.
    pub bindings: Vec<(ParamKey, usize)>,
    /// Source expression, kept so the sequence can be queried further.
    pub expression: Option<Expr>,
}

impl SubQueryRef {
    fn shift(&self, offset: usize) -> Self {
        Self {
            query: self.query.clone(),
            bindings: self
                .bindings
                .iter()
                .map(|(k, i)| (k.clone(), i + offset))
                .collect(),
            expression: self.expression.clone(),
        }
    }

    fn remap(&self, map: &[Option<usize>]) -> Result<Self, OrmError> {
        let mut bindings = Vec::with_capacity(self.bindings.len());
        for (k, i) in &self.bindings {
            bindings.push((k.clone(), remap_index(map, *i)?));
        }
        // Hidden bindings of the expression refer to the old columns.
        Ok(Self {
            query: self.query.clone(),
            bindings,
            expression: None,
        })
    }
}

/// How the element of a query is built from a tuple of the root provider.
#[derive(Debug, Clone)]
pub enum ItemExpr {
    Column {
        index: usize,
        dtype: DataType,
        nullable: bool,
    },
    Constant(Field),
    /// An entity; `columns` follow the type's column layout.
    Entity {
        type_name: String,
        columns: Vec<usize>,
        key: Vec<usize>,
        nullable: bool,
    },
    Structure {
        type_name: String,
        members: Vec<(String, ItemExpr)>,
    },
    Anonymous {
        members: Vec<(String, ItemExpr)>,
    },
    Grouping {
        key: Box<ItemExpr>,
        elements: SubQueryRef,
    },
    SubQuery(SubQueryRef),
}

fn remap_index(map: &[Option<usize>], i: usize) -> Result<usize, OrmError> {
    map.get(i).copied().flatten().ok_or_else(|| {
        OrmError::ValidationError(format!("Projected column {} was removed", i))
    })
}

impl ItemExpr {
    pub fn column(index: usize, dtype: DataType, nullable: bool) -> Self {
        ItemExpr::Column {
            index,
            dtype,
            nullable,
        }
    }

    /// Every column read, including the columns bound into nested queries.
    pub fn columns(&self) -> BTreeSet<usize> {
        self.column_list().into_iter().collect()
    }

    /// Columns read in traversal order, repeats included.
    pub fn column_list(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<usize>) {
        match self {
            ItemExpr::Column { index, .. } => out.push(*index),
            ItemExpr::Constant(_) => {}
            ItemExpr::Entity { columns, .. } => out.extend(columns.iter().copied()),
            ItemExpr::Structure { members, .. } | ItemExpr::Anonymous { members } => {
                for (_, m) in members {
                    m.collect_columns(out);
                }
            }
            ItemExpr::Grouping { key, elements } => {
                key.collect_columns(out);
                out.extend(elements.bindings.iter().map(|(_, i)| *i));
            }
            ItemExpr::SubQuery(sub) => out.extend(sub.bindings.iter().map(|(_, i)| *i)),
        }
    }

    /// Columns read in traversal order, each once.
    pub fn distinct_columns(&self) -> Vec<usize> {
        let mut seen = BTreeSet::new();
        self.column_list()
            .into_iter()
            .filter(|c| seen.insert(*c))
            .collect()
    }

    /// Same item over a tuple with `offset` columns prepended.
    pub fn shift(&self, offset: usize) -> ItemExpr {
        let members = |ms: &[(String, ItemExpr)]| -> Vec<(String, ItemExpr)> {
            ms.iter().map(|(n, m)| (n.clone(), m.shift(offset))).collect()
        };
        match self {
            ItemExpr::Column {
                index,
                dtype,
                nullable,
            } => ItemExpr::column(index + offset, *dtype, *nullable),
            ItemExpr::Constant(f) => ItemExpr::Constant(f.clone()),
            ItemExpr::Entity {
                type_name,
                columns,
                key,
                nullable,
            } => ItemExpr::Entity {
                type_name: type_name.clone(),
                columns: columns.iter().map(|c| c + offset).collect(),
                key: key.iter().map(|c| c + offset).collect(),
                nullable: *nullable,
            },
            ItemExpr::Structure {
                type_name,
                members: ms,
            } => ItemExpr::Structure {
                type_name: type_name.clone(),
                members: members(ms),
            },
            ItemExpr::Anonymous { members: ms } => ItemExpr::Anonymous {
                members: members(ms),
            },
            ItemExpr::Grouping { key, elements } => ItemExpr::Grouping {
                key: Box::new(key.shift(offset)),
                elements: elements.shift(offset),
            },
            ItemExpr::SubQuery(sub) => ItemExpr::SubQuery(sub.shift(offset)),
        }
    }

    /// Moves every column through `map`.
    ///
    /// # Arguments
    ///
    /// * `map` - Old column index to new column index; `None` for removed columns.
    pub fn remap(&self, map: &[Option<usize>]) -> Result<ItemExpr, OrmError> {
        let members = |ms: &[(String, ItemExpr)]| -> Result<Vec<(String, ItemExpr)>, OrmError> {
            ms.iter()
                .map(|(n, m)| Ok((n.clone(), m.remap(map)?)))
                .collect()
        };
        Ok(match self {
            ItemExpr::Column {
                index,
                dtype,
                nullable,
            } => ItemExpr::column(remap_index(map, *index)?, *dtype, *nullable),
            ItemExpr::Constant(f) => ItemExpr::Constant(f.clone()),
            ItemExpr::Entity {
                type_name,
                columns,
                key,
                nullable,
            } => ItemExpr::Entity {
                type_name: type_name.clone(),
                columns: columns
                    .iter()
                    .map(|c| remap_index(map, *c))
                    .collect::<Result<_, _>>()?,
                key: key
                    .iter()
                    .map(|c| remap_index(map, *c))
                    .collect::<Result<_, _>>()?,
                nullable: *nullable,
            },
            ItemExpr::Structure {
                type_name,
                members: ms,
            } => ItemExpr::Structure {
                type_name: type_name.clone(),
                members: members(ms)?,
            },
            ItemExpr::Anonymous { members: ms } => ItemExpr::Anonymous {
                members: members(ms)?,
            },
            ItemExpr::Grouping { key, elements } => ItemExpr::Grouping {
                key: Box::new(key.remap(map)?),
                elements: elements.remap(map)?,
            },
            ItemExpr::SubQuery(sub) => ItemExpr::SubQuery(sub.remap(map)?),
        })
    }

    /// Same item read from the nullable side of an outer join.
    pub fn to_nullable(&self) -> ItemExpr {
        let members = |ms: &[(String, ItemExpr)]| -> Vec<(String, ItemExpr)> {
            ms.iter().map(|(n, m)| (n.clone(), m.to_nullable())).collect()
        };
        match self {
            ItemExpr::Column { index, dtype, .. } => ItemExpr::column(*index, *dtype, true),
            ItemExpr::Entity {
                type_name,
                columns,
                key,
                ..
            } => ItemExpr::Entity {
                type_name: type_name.clone(),
                columns: columns.clone(),
                key: key.clone(),
                nullable: true,
            },
            ItemExpr::Structure {
                type_name,
                members: ms,
            } => ItemExpr::Structure {
                type_name: type_name.clone(),
                members: members(ms),
            },
            ItemExpr::Anonymous { members: ms } => ItemExpr::Anonymous {
                members: members(ms),
            },
            other => other.clone(),
        }
    }

    /// Named member of a structure or anonymous record.
    pub fn member(&self, name: &str) -> Option<&ItemExpr> {
        match self {
            ItemExpr::Structure { members, .. } | ItemExpr::Anonymous { members } => {
                members.iter().find(|(n, _)| n == name).map(|(_, m)| m)
            }
            _ => None,
        }
    }

    /// Whether a single column reads as this item.
    pub fn is_scalar(&self) -> bool {
        matches!(self, ItemExpr::Column { .. } | ItemExpr::Constant(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn order_item() -> ItemExpr {
        ItemExpr::Anonymous {
            members: vec![
                (
                    String::from("Order"),
                    ItemExpr::Entity {
                        type_name: String::from("Order"),
                        columns: vec![0, 1, 2],
                        key: vec![0],
                        nullable: false,
                    },
                ),
                (
                    String::from("Total"),
                    ItemExpr::column(1, DataType::Decimal, false),
                ),
                (String::from("Tag"), ItemExpr::Constant(Field::IntField(7))),
            ],
        }
    }

    #[test]
    fn test_columns() {
        let item = order_item();
        assert_eq!(item.column_list(), vec![0, 1, 2, 1]);
        assert_eq!(item.distinct_columns(), vec![0, 1, 2]);
        assert_eq!(item.columns().len(), 3);
        assert!(item.member("Tag").unwrap().is_scalar());
        assert!(item.member("Nope").is_none());
    }

    #[test]
    fn test_shift_and_remap() {
        let item = order_item().shift(2);
        assert_eq!(item.distinct_columns(), vec![2, 3, 4]);
        let map = vec![None, None, Some(0), Some(1), Some(2)];
        let back = item.remap(&map).unwrap();
        assert_eq!(back.distinct_columns(), vec![0, 1, 2]);
        let missing = vec![None, None, Some(0), None, Some(1)];
        assert!(item.remap(&missing).is_err());
    }

    #[test]
    fn test_to_nullable() {
        match order_item().to_nullable() {
            ItemExpr::Anonymous { members } => {
                assert!(matches!(members[0].1, ItemExpr::Entity { nullable: true, .. }));
                assert!(matches!(members[1].1, ItemExpr::Column { nullable: true, .. }));
            }
            _ => panic!("Expected anonymous item"),
        }
    }
}
