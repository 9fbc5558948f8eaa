use crate::{DataType, OrmError};
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Column of a provider header. Identity is the name, which is unique within a header.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
pub struct Column {
    /// Column name, possibly qualified as `alias.name`.
    pub name: String,
    /// Column dtype.
    pub dtype: DataType,
    /// Whether the column can hold nulls.
    pub nullable: bool,
}

impl Column {
    /// Create a new column.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the column.
    /// * `dtype` - Dtype of the column.
    /// * `nullable` - Whether the column can hold nulls.
    pub fn new(name: &str, dtype: DataType, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            nullable,
        }
    }

    /// Name without its qualifier.
    pub fn base_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(i) => &self.name[i + 1..],
            None => &self.name,
        }
    }

    /// Same column requalified with `alias`.
    pub fn realias(&self, alias: &str) -> Self {
        Self {
            name: format!("{}.{}", alias, self.base_name()),
            dtype: self.dtype,
            nullable: self.nullable,
        }
    }

    /// Same column allowing nulls.
    pub fn to_nullable(&self) -> Self {
        Self {
            nullable: true,
            ..self.clone()
        }
    }
}

/// Ordered columns produced by a provider.
#[derive(PartialEq, Clone, Debug, Default)]
pub struct Header {
    /// Columns in tuple order.
    columns: Vec<Column>,
    /// Mapping from column name to position in the header.
    name_map: HashMap<String, usize>,
}

impl Serialize for Header {
    /// Custom serialize to avoid serializing name_map.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.columns.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Header {
    /// Custom deserialize to avoid serializing name_map.
    fn deserialize<D>(deserializer: D) -> Result<Header, D::Error>
    where
        D: Deserializer<'de>,
    {
        let columns = Vec::deserialize(deserializer)?;
        Ok(Header::new(columns))
    }
}

impl Header {
    /// Create a new header.
    ///
    /// # Arguments
    ///
    /// * `columns` - Columns in the order they appear in tuples.
    pub fn new(columns: Vec<Column>) -> Self {
        let mut name_map = HashMap::new();
        for (i, col) in columns.iter().enumerate() {
            name_map.entry(col.name.clone()).or_insert(i);
        }
        Self { columns, name_map }
    }

    /// Get the column at index.
    pub fn get(&self, i: usize) -> Option<&Column> {
        self.columns.get(i)
    }

    /// Get the column at index or a validation error.
    pub fn column(&self, i: usize) -> Result<&Column, OrmError> {
        self.columns.get(i).ok_or_else(|| {
            OrmError::ValidationError(format!(
                "Column index {} out of range for header of size {}",
                i,
                self.len()
            ))
        })
    }

    /// Get the index of the column with the given name.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the column to look for.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_map.get(name).copied()
    }

    /// Check if the column name is in the header.
    pub fn contains(&self, name: &str) -> bool {
        self.name_map.contains_key(name)
    }

    /// Whether any column name is shared with `other`.
    pub fn collides_with(&self, other: &Header) -> bool {
        other.columns.iter().any(|c| self.contains(&c.name))
    }

    /// Get an iterator of the columns.
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Header holding the columns at the given indexes, in that order.
    ///
    /// # Arguments
    ///
    /// * `indexes` - Indexes of the columns to keep.
    pub fn select(&self, indexes: &[usize]) -> Result<Self, OrmError> {
        let mut cols = Vec::with_capacity(indexes.len());
        for i in indexes {
            cols.push(self.column(*i)?.clone());
        }
        Ok(Self::new(cols))
    }

    /// Merge two headers into one.
    ///
    /// The other header is appended to the current header.
    ///
    /// # Arguments
    ///
    /// * `other` - Other header to add to current header.
    pub fn join(&self, other: &Self) -> Self {
        let mut cols = self.columns.clone();
        cols.extend(other.columns.iter().cloned());
        Self::new(cols)
    }

    /// Header with extra columns at the end.
    pub fn append(&self, extra: Vec<Column>) -> Self {
        let mut cols = self.columns.clone();
        cols.extend(extra);
        Self::new(cols)
    }

    /// Header with every column requalified with `alias`.
    pub fn alias(&self, alias: &str) -> Self {
        Self::new(self.columns.iter().map(|c| c.realias(alias)).collect())
    }

    /// Header with every column nullable, as seen from the optional side of an outer join.
    pub fn to_nullable(&self) -> Self {
        Self::new(self.columns.iter().map(Column::to_nullable).collect())
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn header() -> Header {
        Header::new(vec![
            Column::new("a1.Id", DataType::Int, false),
            Column::new("a1.Name", DataType::String, true),
        ])
    }

    #[test]
    fn test_index_of_and_select() {
        let h = header();
        assert_eq!(h.index_of("a1.Name"), Some(1));
        assert_eq!(h.index_of("Name"), None);
        let s = h.select(&[1]).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.index_of("a1.Name"), Some(0));
        assert!(h.select(&[2]).is_err());
    }

    #[test]
    fn test_alias() {
        let h = header().alias("a7");
        assert_eq!(h.index_of("a7.Id"), Some(0));
        assert_eq!(h.get(1).unwrap().base_name(), "Name");
    }

    #[test]
    fn test_join_and_nullable() {
        let h = header();
        let other = header().alias("a2").to_nullable();
        let joined = h.join(&other);
        assert_eq!(joined.len(), 4);
        assert!(joined.get(2).unwrap().nullable);
        assert!(!joined.get(0).unwrap().nullable);
        assert!(!h.collides_with(&other));
        assert!(h.collides_with(&header()));
    }

    #[test]
    fn test_serde_skips_name_map() {
        let h = header();
        let json = serde_json::to_string(&h).unwrap();
        let back: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
        assert_eq!(back.index_of("a1.Id"), Some(0));
    }
}
