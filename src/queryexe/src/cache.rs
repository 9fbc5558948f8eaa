use crate::expression::Expr;
use crate::query::TranslatedQuery;
use common::OrmError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Entries {
    queries: HashMap<Vec<u8>, Arc<TranslatedQuery>>,
    /// Keys in insertion order, oldest first.
    order: VecDeque<Vec<u8>>,
}

/// Compiled queries by expression and dialect.
///
/// Entries are immutable and shared; once `capacity` is reached the oldest
/// entry is evicted.
pub struct QueryCache {
    capacity: usize,
    entries: RwLock<Entries>,
}

fn poisoned<T>(_: T) -> OrmError {
    OrmError::ExecutionError {
        context: String::from("Query cache lock poisoned"),
        source: None,
    }
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Cache key of an expression for a dialect.
    ///
    /// Variables are keyed by name and type, so queries differing only in
    /// variable values share an entry.
    ///
    /// # Arguments
    ///
    /// * `expr` - Query expression.
    /// * `dialect` - Name of the target dialect.
    pub fn key(expr: &Expr, dialect: &str) -> Result<Vec<u8>, OrmError> {
        serde_cbor::to_vec(&(expr, dialect))
            .map_err(|e| OrmError::ValidationError(format!("Cannot encode query {}: {}", expr, e)))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Entries>, OrmError> {
        self.entries.read().map_err(poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Entries>, OrmError> {
        self.entries.write().map_err(poisoned)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Arc<TranslatedQuery>>, OrmError> {
        Ok(self.read()?.queries.get(key).cloned())
    }

    /// Stores a query and returns the cached instance for the key, which is
    /// the earlier one when another thread inserted first.
    pub fn insert(&self, key: Vec<u8>, query: TranslatedQuery) -> Result<Arc<TranslatedQuery>, OrmError> {
        let query = Arc::new(query);
        if self.capacity == 0 {
            return Ok(query);
        }
        let mut entries = self.write()?;
        if let Some(existing) = entries.queries.get(&key) {
            return Ok(existing.clone());
        }
        while entries.order.len() >= self.capacity {
            match entries.order.pop_front() {
                Some(oldest) => {
                    entries.queries.remove(&oldest);
                }
                None => break,
            }
        }
        entries.order.push_back(key.clone());
        entries.queries.insert(key, query.clone());
        Ok(query)
    }

    pub fn len(&self) -> Result<usize, OrmError> {
        Ok(self.read()?.queries.len())
    }

    pub fn is_empty(&self) -> Result<bool, OrmError> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<(), OrmError> {
        let mut entries = self.write()?;
        entries.queries.clear();
        entries.order.clear();
        Ok(())
    }
}
