use crate::model::*;
use crate::{DataType, OrmError};
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// Functions needed to implement a catalog. It keeps track of all persistent types and how they map onto tables.
pub trait Catalog {
    /// Get types from catalog.
    fn get_types(&self) -> &[Arc<TypeInfo>];

    /// Get a type by name.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the type.
    fn get_type(&self, name: &str) -> Result<&Arc<TypeInfo>, OrmError> {
        self.get_types()
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| OrmError::ValidationError(format!("Type {} not found", name)))
    }

    /// Checks if the type is known to the catalog.
    fn is_valid_type(&self, name: &str) -> bool {
        self.get_type(name).is_ok()
    }

    /// Gets a field of a type.
    ///
    /// # Arguments
    ///
    /// * `type_name` - Name of the type owning the field.
    /// * `field_name` - Name of the field.
    fn get_field(&self, type_name: &str, field_name: &str) -> Result<&FieldInfo, OrmError> {
        let type_info = self.get_type(type_name)?;
        type_info.field(field_name).ok_or_else(|| {
            OrmError::ValidationError(format!("Field {}.{} not found", type_name, field_name))
        })
    }
}

/// Declared field, before layout.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FieldDecl {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldDeclKind,
    #[serde(default)]
    pub nullable: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "kind")]
pub enum FieldDeclKind {
    Scalar { dtype: DataType },
    Structure { fields: Vec<FieldDecl> },
    Reference { target: String },
    EntitySet { target: String, inverse: String },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IndexDecl {
    pub name: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub fill_factor: Option<u8>,
}

/// Declared type. The layout is computed when the model is built.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    pub key: Vec<String>,
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub indexes: Vec<IndexDecl>,
    #[serde(default)]
    pub identity: bool,
}

impl TypeDecl {
    /// Starts a type declaration mapped to a table of the same name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: None,
            key: Vec::new(),
            fields: Vec::new(),
            indexes: Vec::new(),
            identity: false,
        }
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    /// Adds a non-nullable scalar key field.
    pub fn key(mut self, name: &str, dtype: DataType) -> Self {
        self.key.push(name.to_string());
        self.scalar(name, dtype, false)
    }

    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    pub fn scalar(mut self, name: &str, dtype: DataType, nullable: bool) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            kind: FieldDeclKind::Scalar { dtype },
            nullable,
        });
        self
    }

    pub fn structure(mut self, name: &str, fields: Vec<FieldDecl>, nullable: bool) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            kind: FieldDeclKind::Structure { fields },
            nullable,
        });
        self
    }

    pub fn reference(mut self, name: &str, target: &str, nullable: bool) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            kind: FieldDeclKind::Reference {
                target: target.to_string(),
            },
            nullable,
        });
        self
    }

    pub fn entity_set(mut self, name: &str, target: &str, inverse: &str) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            kind: FieldDeclKind::EntitySet {
                target: target.to_string(),
                inverse: inverse.to_string(),
            },
            nullable: false,
        });
        self
    }

    pub fn index(mut self, name: &str, fields: &[&str], unique: bool, fill_factor: Option<u8>) -> Self {
        self.indexes.push(IndexDecl {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique,
            fill_factor,
        });
        self
    }
}

/// Immutable domain model. Built once, then shared by `Arc` across translations.
#[derive(Debug, Clone)]
pub struct DomainModel {
    types: Vec<Arc<TypeInfo>>,
    name_map: HashMap<String, usize>,
    decls: Vec<TypeDecl>,
}

impl Catalog for DomainModel {
    fn get_types(&self) -> &[Arc<TypeInfo>] {
        &self.types
    }

    fn get_type(&self, name: &str) -> Result<&Arc<TypeInfo>, OrmError> {
        self.name_map
            .get(name)
            .map(|i| &self.types[*i])
            .ok_or_else(|| OrmError::ValidationError(format!("Type {} not found", name)))
    }
}

impl Serialize for DomainModel {
    /// Custom serialize to keep only the declarations.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.decls.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DomainModel {
    /// Custom deserialize that lays the declarations out again.
    fn deserialize<D>(deserializer: D) -> Result<DomainModel, D::Error>
    where
        D: Deserializer<'de>,
    {
        let decls: Vec<TypeDecl> = Vec::deserialize(deserializer)?;
        let mut builder = DomainModelBuilder::new();
        for decl in decls {
            builder = builder.add_type(decl);
        }
        builder.build().map_err(serde::de::Error::custom)
    }
}

/// Collects type declarations and lays them out into a `DomainModel`.
#[derive(Default)]
pub struct DomainModelBuilder {
    decls: Vec<TypeDecl>,
}

impl DomainModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(mut self, decl: TypeDecl) -> Self {
        self.decls.push(decl);
        self
    }

    /// Validates the declarations and computes column layouts.
    pub fn build(self) -> Result<DomainModel, OrmError> {
        let mut key_columns: HashMap<String, Vec<ColumnInfo>> = HashMap::new();
        for decl in &self.decls {
            if key_columns.contains_key(&decl.name) {
                return Err(OrmError::ValidationError(format!(
                    "Type {} declared twice",
                    decl.name
                )));
            }
            if decl.key.is_empty() {
                return Err(OrmError::ValidationError(format!(
                    "Type {} has no key",
                    decl.name
                )));
            }
            let mut cols = Vec::new();
            for key in &decl.key {
                let field = decl.fields.iter().find(|f| &f.name == key).ok_or_else(|| {
                    OrmError::ValidationError(format!("Key field {}.{} not found", decl.name, key))
                })?;
                match field.kind {
                    FieldDeclKind::Scalar { dtype } => cols.push(ColumnInfo {
                        name: field.name.clone(),
                        dtype,
                        nullable: false,
                    }),
                    _ => {
                        return Err(OrmError::ValidationError(format!(
                            "Key field {}.{} must be scalar",
                            decl.name, key
                        )))
                    }
                }
            }
            key_columns.insert(decl.name.clone(), cols);
        }

        let mut types = Vec::new();
        let mut name_map = HashMap::new();
        for decl in &self.decls {
            let mut columns = Vec::new();
            let fields = layout_fields(&decl.name, &decl.fields, "", false, &key_columns, &mut columns)?;
            let mut key = Vec::new();
            for k in &decl.key {
                if let Some(f) = fields.iter().find(|f| &f.name == k) {
                    key.push(f.mapping.offset);
                }
            }
            let mut indexes = vec![IndexInfo {
                name: format!("PK_{}", decl.name),
                columns: key.clone(),
                unique: true,
                primary: true,
                fill_factor: None,
            }];
            for index in &decl.indexes {
                let mut cols = Vec::new();
                for name in &index.fields {
                    let field = fields.iter().find(|f| &f.name == name).ok_or_else(|| {
                        OrmError::ValidationError(format!(
                            "Index {} references unknown field {}",
                            index.name, name
                        ))
                    })?;
                    cols.extend(field.mapping.range());
                }
                indexes.push(IndexInfo {
                    name: index.name.clone(),
                    columns: cols,
                    unique: index.unique,
                    primary: false,
                    fill_factor: index.fill_factor,
                });
            }
            name_map.insert(decl.name.clone(), types.len());
            types.push(Arc::new(TypeInfo {
                name: decl.name.clone(),
                table: decl.table.clone().unwrap_or_else(|| decl.name.clone()),
                fields,
                columns,
                key,
                indexes,
                identity: decl.identity,
            }));
        }

        // Entity sets must be backed by a reference on the target pointing back.
        for t in &types {
            for f in &t.fields {
                if let FieldKind::EntitySet { target, inverse } = &f.kind {
                    let target_type = name_map.get(target).map(|i| &types[*i]).ok_or_else(|| {
                        OrmError::ValidationError(format!("Unknown type {} in {}.{}", target, t.name, f.name))
                    })?;
                    match target_type.field(inverse).map(|x| &x.kind) {
                        Some(FieldKind::Reference { target: back }) if back == &t.name => {}
                        _ => {
                            return Err(OrmError::ValidationError(format!(
                                "{}.{} must be a reference to {}",
                                target, inverse, t.name
                            )))
                        }
                    }
                }
            }
        }

        Ok(DomainModel {
            types,
            name_map,
            decls: self.decls,
        })
    }
}

fn layout_fields(
    type_name: &str,
    decls: &[FieldDecl],
    prefix: &str,
    parent_nullable: bool,
    key_columns: &HashMap<String, Vec<ColumnInfo>>,
    columns: &mut Vec<ColumnInfo>,
) -> Result<Vec<FieldInfo>, OrmError> {
    let mut fields = Vec::with_capacity(decls.len());
    for decl in decls {
        let offset = columns.len();
        let nullable = decl.nullable || parent_nullable;
        let kind = match &decl.kind {
            FieldDeclKind::Scalar { dtype } => {
                columns.push(ColumnInfo {
                    name: format!("{}{}", prefix, decl.name),
                    dtype: *dtype,
                    nullable,
                });
                FieldKind::Scalar(*dtype)
            }
            FieldDeclKind::Structure { fields } => {
                let nested_prefix = format!("{}{}_", prefix, decl.name);
                let nested =
                    layout_fields(type_name, fields, &nested_prefix, nullable, key_columns, columns)?;
                FieldKind::Structure(nested)
            }
            FieldDeclKind::Reference { target } => {
                let keys = key_columns.get(target).ok_or_else(|| {
                    OrmError::ValidationError(format!(
                        "Unknown type {} in {}.{}",
                        target, type_name, decl.name
                    ))
                })?;
                for k in keys {
                    columns.push(ColumnInfo {
                        name: format!("{}{}{}", prefix, decl.name, k.name),
                        dtype: k.dtype,
                        nullable,
                    });
                }
                FieldKind::Reference {
                    target: target.clone(),
                }
            }
            FieldDeclKind::EntitySet { target, inverse } => FieldKind::EntitySet {
                target: target.clone(),
                inverse: inverse.clone(),
            },
        };
        fields.push(FieldInfo {
            name: decl.name.clone(),
            kind,
            nullable,
            mapping: Segment::new(offset, columns.len() - offset),
        });
    }
    Ok(fields)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::*;

    #[test]
    fn test_layout() {
        let model = shop_model();
        let order = model.get_type("Order").unwrap();
        let names: Vec<&str> = order.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Id", "Total", "Discount", "CustomerId", "Placed", "SalesmanId"]
        );
        let customer_ref = order.field("Customer").unwrap();
        assert_eq!(customer_ref.mapping, Segment::new(3, 1));
        let customer = model.get_type("Customer").unwrap();
        let address = customer.field("Address").unwrap();
        assert_eq!(address.sub_field("City").unwrap().mapping, Segment::new(3, 1));
        assert!(customer.columns[2].nullable);
        assert_eq!(customer.field("Orders").unwrap().mapping.length, 0);
        assert_eq!(customer.primary_index().unwrap().columns, vec![0]);
    }

    #[test]
    fn test_bad_inverse() {
        let res = DomainModelBuilder::new()
            .add_type(
                TypeDecl::new("A")
                    .key("Id", DataType::Int)
                    .entity_set("Bs", "B", "Owner"),
            )
            .add_type(TypeDecl::new("B").key("Id", DataType::Int))
            .build();
        assert!(res.is_err());
    }

    #[test]
    fn test_unknown_type() {
        let model = shop_model();
        assert!(model.get_type("Nope").is_err());
        assert!(model.get_field("Customer", "Nope").is_err());
        assert!(model.is_valid_type("Customer"));
    }

    #[test]
    fn test_json_round_trip_rebuilds_layout() {
        let model = shop_model();
        let json = serde_json::to_string(&model).unwrap();
        let back: DomainModel = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.get_type("Order").unwrap().columns,
            model.get_type("Order").unwrap().columns
        );
    }
}
