use crate::evaluator::{Evaluator, Tables};
use async_trait::async_trait;
use common::catalog::Catalog;
use common::execution::{CancellationToken, CommandExecutor, ParameterValues, QueryRequest};
use common::{OrmError, Tuple};

use std::collections::HashMap;
use std::fs;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory tables serving queries. Tables are persisted as one
/// `<table>.ms` file each on shutdown and loaded again on startup.
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    persist_path: PathBuf,
    executed: AtomicUsize,
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        info!("Dropping memory store");
    }
}

fn poisoned<T>(_: T) -> OrmError {
    OrmError::ExecutionError {
        context: String::from("Memory store lock poisoned"),
        source: None,
    }
}

impl MemoryStore {
    /// Create a new store from scratch or load the tables persisted at `storage_path`.
    ///
    /// # Arguments
    ///
    /// * `storage_path` - Directory holding persisted tables; empty for no persistence.
    pub fn new(storage_path: &str) -> Result<Self, OrmError> {
        if !storage_path.is_empty() && Path::exists(Path::new(storage_path)) {
            info!("Initializing memstore from path: {:?}", storage_path);
            MemoryStore::load(storage_path)
        } else {
            info!("Creating new memstore with path: {:?}", storage_path);
            Ok(MemoryStore {
                tables: Arc::new(RwLock::new(HashMap::new())),
                persist_path: PathBuf::from(storage_path),
                executed: AtomicUsize::new(0),
            })
        }
    }

    /// Create a new store that will not be persisted.
    pub fn new_test_store() -> Self {
        MemoryStore {
            tables: Arc::new(RwLock::new(HashMap::new())),
            persist_path: PathBuf::new(),
            executed: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, OrmError> {
        self.tables.read().map_err(poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, OrmError> {
        self.tables.write().map_err(poisoned)
    }

    /// Add a new empty table.
    pub fn create_table(&self, name: &str) -> Result<(), OrmError> {
        let mut tables = self.write()?;
        if tables.contains_key(name) {
            return Err(OrmError::ExecutionError {
                context: format!("Table {} already exists", name),
                source: None,
            });
        }
        debug!("memstore::create_table {}", name);
        tables.insert(name.to_string(), Arc::new(Vec::new()));
        Ok(())
    }

    /// Creates the tables of every type in `catalog` that does not have one yet.
    pub fn create_schema(&self, catalog: &dyn Catalog) -> Result<(), OrmError> {
        let mut tables = self.write()?;
        for type_info in catalog.get_types() {
            if !tables.contains_key(&type_info.table) {
                debug!("memstore::create_schema table {}", type_info.table);
                tables.insert(type_info.table.clone(), Arc::new(Vec::new()));
            }
        }
        Ok(())
    }

    /// Appends rows to a table.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the table.
    /// * `rows` - Rows in table column order.
    pub fn insert_tuples(&self, name: &str, rows: Vec<Tuple>) -> Result<(), OrmError> {
        let mut tables = self.write()?;
        let table = tables.get_mut(name).ok_or_else(|| OrmError::ExecutionError {
            context: format!("Table {} does not exist", name),
            source: None,
        })?;
        debug!("memstore::insert_tuples {} rows into {}", rows.len(), name);
        // Running queries keep their snapshot of the old rows.
        Arc::make_mut(table).extend(rows);
        Ok(())
    }

    /// Remove the table and all its rows. Removing a missing table is a no-op.
    pub fn remove_table(&self, name: &str) -> Result<(), OrmError> {
        let mut tables = self.write()?;
        if tables.remove(name).is_none() {
            debug!("memstore::remove_table {} does not exist", name);
        }
        Ok(())
    }

    /// Rows of a table.
    pub fn get_rows(&self, name: &str) -> Result<Arc<Vec<Tuple>>, OrmError> {
        self.read()?
            .get(name)
            .cloned()
            .ok_or_else(|| OrmError::ExecutionError {
                context: format!("Table {} does not exist", name),
                source: None,
            })
    }

    /// Drops every table.
    pub fn reset(&self) -> Result<(), OrmError> {
        self.write()?.clear();
        self.executed.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Number of requests executed so far.
    pub fn executed_count(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    /// Persist every table under the storage path.
    pub fn shutdown(&self) -> Result<(), OrmError> {
        info!("Shutting down and persisting tables");
        if self.persist_path.as_os_str().is_empty() {
            info!("Test store or no path, not persisting");
            return Ok(());
        }
        fs::create_dir_all(&self.persist_path)?;
        let tables = self.read()?;
        for (name, rows) in tables.iter() {
            let mut file_path = self.persist_path.clone();
            file_path.push(name);
            file_path.set_extension("ms");
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(file_path)?;
            serde_cbor::to_writer(file, rows.as_ref())
                .map_err(|e| OrmError::execution(format!("Failed persisting table {}", name), e))?;
        }
        Ok(())
    }

    /// Create a store from a directory and populate it from the `.ms` files.
    fn load(path: &str) -> Result<Self, OrmError> {
        let mut tables = HashMap::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let file_path = entry.path();
            if file_path.extension().map_or(true, |e| e != "ms") {
                continue;
            }
            let name = match file_path.file_stem() {
                Some(stem) => stem.to_string_lossy().to_string(),
                None => continue,
            };
            let file = OpenOptions::new().read(true).open(&file_path)?;
            let rows: Vec<Tuple> = serde_cbor::from_reader(file)
                .map_err(|e| OrmError::execution(format!("Cannot read table {}", name), e))?;
            debug!("memstore::load {} rows into {}", rows.len(), name);
            tables.insert(name, Arc::new(rows));
        }
        Ok(MemoryStore {
            tables: Arc::new(RwLock::new(tables)),
            persist_path: PathBuf::from(path),
            executed: AtomicUsize::new(0),
        })
    }

    fn run(
        &self,
        request: &QueryRequest,
        parameters: &ParameterValues,
        token: Option<&CancellationToken>,
    ) -> Result<Vec<Tuple>, OrmError> {
        request.bind(parameters)?;
        self.executed.fetch_add(1, Ordering::SeqCst);
        debug!("memstore::execute {}", request.text);
        // Snapshot so that long evaluations do not hold the lock.
        let tables = self.read()?.clone();
        let mut evaluator = Evaluator::new(&tables, parameters);
        if let Some(t) = token {
            evaluator = evaluator.with_token(t);
        }
        let rows = evaluator.evaluate(&request.provider)?;
        for row in &rows {
            request.check_shape(row)?;
        }
        Ok(rows)
    }
}

#[async_trait]
impl CommandExecutor for MemoryStore {
    fn execute(
        &self,
        request: &QueryRequest,
        parameters: &ParameterValues,
    ) -> Result<Vec<Tuple>, OrmError> {
        self.run(request, parameters, None)
    }

    async fn execute_async(
        &self,
        request: &QueryRequest,
        parameters: &ParameterValues,
        token: &CancellationToken,
    ) -> Result<Vec<Tuple>, OrmError> {
        token.check()?;
        self.run(request, parameters, Some(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::logical_plan::Provider;
    use common::testutil::*;
    use common::{DataType, Field, ParamKey};
    use futures::executor::block_on;
    use std::env;

    fn teacher_rows() -> Vec<Tuple> {
        vec![
            Tuple::new(vec![int(1), string("Ann"), string("Female")]),
            Tuple::new(vec![int(2), string("Bob"), string("Male")]),
        ]
    }

    fn scan_request() -> QueryRequest {
        let model = teacher_model();
        let teacher = model.get_type("Teacher").unwrap();
        let provider = Provider::index(teacher, "PK_Teacher", "a0").unwrap();
        QueryRequest {
            text: String::from("SELECT * FROM Teacher"),
            parameters: vec![],
            shape: vec![DataType::Int, DataType::String, DataType::String],
            provider: Arc::new(provider),
        }
    }

    #[test]
    fn test_create_and_insert() {
        let store = MemoryStore::new_test_store();
        store.create_schema(&teacher_model()).unwrap();
        assert!(store.create_table("Teacher").is_err());
        store.insert_tuples("Teacher", teacher_rows()).unwrap();
        assert_eq!(store.get_rows("Teacher").unwrap().len(), 2);
        assert!(store.insert_tuples("Missing", vec![]).is_err());
        store.remove_table("Teacher").unwrap();
        assert!(store.get_rows("Teacher").is_err());
    }

    #[test]
    fn test_snapshot_isolation() {
        let store = MemoryStore::new_test_store();
        store.create_table("Teacher").unwrap();
        store.insert_tuples("Teacher", teacher_rows()).unwrap();
        let before = store.get_rows("Teacher").unwrap();
        store.insert_tuples("Teacher", teacher_rows()).unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(store.get_rows("Teacher").unwrap().len(), 4);
    }

    #[test]
    fn test_execute_sync_and_async() {
        init();
        let store = MemoryStore::new_test_store();
        store.create_schema(&teacher_model()).unwrap();
        store.insert_tuples("Teacher", teacher_rows()).unwrap();
        let request = scan_request();
        let parameters = ParameterValues::new();
        assert_eq!(store.execute(&request, &parameters).unwrap().len(), 2);
        let token = CancellationToken::new();
        let rows = block_on(store.execute_async(&request, &parameters, &token)).unwrap();
        assert_eq!(rows, teacher_rows());
        assert_eq!(store.executed_count(), 2);

        token.cancel();
        let res = block_on(store.execute_async(&request, &parameters, &token));
        assert!(matches!(res, Err(OrmError::Cancelled)));
        assert_eq!(store.executed_count(), 2);
    }

    #[test]
    fn test_unbound_parameter() {
        let store = MemoryStore::new_test_store();
        let mut request = scan_request();
        request.parameters = vec![ParamKey::Named(String::from("p0"))];
        let res = store.execute(&request, &ParameterValues::new());
        assert!(matches!(res, Err(OrmError::ValidationError(_))));
    }

    #[test]
    fn test_shape_mismatch() {
        let store = MemoryStore::new_test_store();
        store.create_table("Teacher").unwrap();
        store
            .insert_tuples("Teacher", vec![Tuple::new(vec![int(1), string("Ann"), Field::Null])])
            .unwrap();
        let mut request = scan_request();
        request.shape = vec![DataType::Int, DataType::String];
        assert!(store.execute(&request, &ParameterValues::new()).is_err());
    }

    #[test]
    fn test_persist_and_load() {
        let mut path = env::temp_dir();
        path.push(format!("memstore_test_{}", gen_rand_string(8)));
        let path_str = path.to_string_lossy().to_string();
        {
            let store = MemoryStore::new(&path_str).unwrap();
            store.create_table("Teacher").unwrap();
            store.insert_tuples("Teacher", teacher_rows()).unwrap();
            store.shutdown().unwrap();
        }
        let store = MemoryStore::new(&path_str).unwrap();
        assert_eq!(*store.get_rows("Teacher").unwrap(), teacher_rows());
        fs::remove_dir_all(path).unwrap();
    }
}
