use common::model::TypeInfo;
use common::{Field, OrmError, Tuple};
use memstore::MemoryStore;
use std::fs::File;
use std::io::Read;

/// Reads csv records into rows of the table `type_info` is mapped to.
///
/// Records hold one value per table column, in column order and without a
/// header line. Empty values and `null` are read as null.
///
/// # Arguments
///
/// * `type_info` - Type whose table the rows belong to.
/// * `reader` - Source of the csv text.
pub fn read_rows<R: Read>(type_info: &TypeInfo, reader: R) -> Result<Vec<Tuple>, OrmError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(reader);
    let mut rows = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let rec = result.map_err(|e| {
            OrmError::ValidationError(format!("Could not read row {} of {}: {}", line + 1, type_info.table, e))
        })?;
        if rec.len() != type_info.columns.len() {
            return Err(OrmError::ValidationError(format!(
                "Row {} of {} has {} values, expected {}",
                line + 1,
                type_info.table,
                rec.len(),
                type_info.columns.len()
            )));
        }
        let mut fields = Vec::with_capacity(rec.len());
        for (value, column) in rec.iter().zip(type_info.columns.iter()) {
            let field = Field::parse(column.dtype, value)?;
            if field.is_null() && !column.nullable {
                return Err(OrmError::ValidationError(format!(
                    "Row {} of {}: column {} is not nullable",
                    line + 1,
                    type_info.table,
                    column.name
                )));
            }
            fields.push(field);
        }
        rows.push(Tuple::new(fields));
    }
    Ok(rows)
}

/// Function to import csv data into the table of a type.
///
/// # Arguments
///
/// * `type_info` - Type whose table receives the rows.
/// * `path` - Path to the csv file.
/// * `store` - Store holding the table.
pub fn import_csv(type_info: &TypeInfo, path: &str, store: &MemoryStore) -> Result<usize, OrmError> {
    debug!("ormq::csv_utils trying to open file, path: {:?}", path);
    let file = File::open(path)?;
    let rows = read_rows(type_info, file)?;
    let imported = rows.len();
    store.insert_tuples(&type_info.table, rows)?;
    info!("Num records imported into {}: {}", type_info.table, imported);
    Ok(imported)
}
