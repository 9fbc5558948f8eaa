use crate::{Column, DataType, Header};
use std::ops::Range;

/// Position of a field's columns within the flat column layout of its type.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub struct Segment {
    pub offset: usize,
    pub length: usize,
}

impl Segment {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }

    /// Segment moved right by `offset`.
    pub fn shift(&self, offset: usize) -> Self {
        Self::new(self.offset + offset, self.length)
    }
}

/// A column of the table a type is mapped to.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct ColumnInfo {
    /// Database column name.
    pub name: String,
    pub dtype: DataType,
    pub nullable: bool,
}

/// What a persistent field holds.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub enum FieldKind {
    /// A single column.
    Scalar(DataType),
    /// An embedded structure flattened into consecutive columns.
    Structure(Vec<FieldInfo>),
    /// A reference to another entity, stored as that entity's key columns.
    Reference { target: String },
    /// The entities of `target` whose `inverse` reference points back here. Owns no columns.
    EntitySet { target: String, inverse: String },
}

/// Persistent field of a type.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct FieldInfo {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Columns of the field within the owning type's layout.
    pub mapping: Segment,
}

impl FieldInfo {
    /// Nested field of a structure field.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the nested field.
    pub fn sub_field(&self, name: &str) -> Option<&FieldInfo> {
        match &self.kind {
            FieldKind::Structure(fields) => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    /// Dtype of a scalar field.
    pub fn dtype(&self) -> Option<DataType> {
        match self.kind {
            FieldKind::Scalar(dtype) => Some(dtype),
            _ => None,
        }
    }
}

/// Index over a type's table.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct IndexInfo {
    pub name: String,
    /// Column positions within the type layout.
    pub columns: Vec<usize>,
    pub unique: bool,
    pub primary: bool,
    /// Percentage of each page filled on creation, where the dialect supports it.
    pub fill_factor: Option<u8>,
}

/// A persistent type mapped onto one table.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct TypeInfo {
    pub name: String,
    pub table: String,
    pub fields: Vec<FieldInfo>,
    /// Flat column layout of the table.
    pub columns: Vec<ColumnInfo>,
    /// Key column positions.
    pub key: Vec<usize>,
    pub indexes: Vec<IndexInfo>,
    /// Whether the key is generated by the database.
    pub identity: bool,
}

impl TypeInfo {
    /// Get a top level field by name.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the field.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The primary index. Every built type has one.
    pub fn primary_index(&self) -> Option<&IndexInfo> {
        self.indexes.iter().find(|i| i.primary)
    }

    /// Get an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Fields that map to the key columns, in key order.
    pub fn key_fields(&self) -> Vec<&FieldInfo> {
        self.fields
            .iter()
            .filter(|f| f.mapping.length > 0 && self.key.contains(&f.mapping.offset))
            .collect()
    }

    /// Provider header for a scan of this type, qualified with `alias`.
    ///
    /// # Arguments
    ///
    /// * `alias` - Qualifier for the column names.
    pub fn header(&self, alias: &str) -> Header {
        Header::new(
            self.columns
                .iter()
                .map(|c| Column::new(&format!("{}.{}", alias, c.name), c.dtype, c.nullable))
                .collect(),
        )
    }
}
