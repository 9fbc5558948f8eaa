use crate::materializer::Value;
use common::{OrmError, Tuple};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A materialized entity.
#[derive(Debug, Clone)]
pub struct Entity {
    pub type_name: String,
    pub key: Tuple,
    /// Field values in declaration order. References hold their key columns.
    pub fields: Vec<(String, Value)>,
}

impl Entity {
    /// Value of a field.
    ///
    /// # Arguments
    ///
    /// * `name` - Field name, or column name for reference keys.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.type_name)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// Maps materialized entities onto the instances a session tracks.
pub trait EntityResolver: Send + Sync {
    /// Returns the instance standing for `entity`'s identity.
    fn resolve(&self, entity: Entity) -> Result<Arc<Entity>, OrmError>;
}

/// Resolver handing out a fresh instance per row.
#[derive(Debug, Default)]
pub struct NoTracking;

impl EntityResolver for NoTracking {
    fn resolve(&self, entity: Entity) -> Result<Arc<Entity>, OrmError> {
        Ok(Arc::new(entity))
    }
}

/// Identity map: one instance per type and key.
///
/// The first instance materialized for an identity is kept; rows read later
/// resolve to it even when their values differ.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entities: Mutex<HashMap<(String, Tuple), Arc<Entity>>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(String, Tuple), Arc<Entity>>>, OrmError> {
        self.entities.lock().map_err(|_| OrmError::ExecutionError {
            context: String::from("Identity map lock poisoned"),
            source: None,
        })
    }

    /// Tracked instance for an identity.
    pub fn get(&self, type_name: &str, key: &Tuple) -> Result<Option<Arc<Entity>>, OrmError> {
        Ok(self
            .locked()?
            .get(&(type_name.to_string(), key.clone()))
            .cloned())
    }

    pub fn len(&self) -> Result<usize, OrmError> {
        Ok(self.locked()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, OrmError> {
        Ok(self.locked()?.is_empty())
    }

    /// Forgets every tracked instance.
    pub fn clear(&self) -> Result<(), OrmError> {
        self.locked()?.clear();
        Ok(())
    }
}

impl EntityResolver for IdentityMap {
    fn resolve(&self, entity: Entity) -> Result<Arc<Entity>, OrmError> {
        let mut entities = self.locked()?;
        let identity = (entity.type_name.clone(), entity.key.clone());
        Ok(entities
            .entry(identity)
            .or_insert_with(|| Arc::new(entity))
            .clone())
    }
}
