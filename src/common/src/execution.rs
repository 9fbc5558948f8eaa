//! Contract with the execution collaborator.

use crate::logical_plan::Provider;
use crate::{DataType, Field, OrmError, ParamKey, Tuple};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Runtime parameter values by key.
pub type ParameterValues = HashMap<ParamKey, Field>;

/// A handle for cancelling execution.
///
/// Clones share the same flag, so a token can be cancelled from another
/// thread than the one fetching or materializing rows.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with `Cancelled` once the token was cancelled.
    pub fn check(&self) -> Result<(), OrmError> {
        if self.is_cancelled() {
            Err(OrmError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One command for the execution collaborator.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub text: String,
    /// Parameter keys in placeholder order.
    pub parameters: Vec<ParamKey>,
    /// Types of the result columns, in order.
    pub shape: Vec<DataType>,
    /// The compiled plan, for collaborators evaluating providers rather than SQL text.
    pub provider: Arc<Provider>,
}

impl QueryRequest {
    /// Parameter values in placeholder order.
    ///
    /// # Arguments
    ///
    /// * `values` - Bound parameter values.
    pub fn bind(&self, values: &ParameterValues) -> Result<Vec<Field>, OrmError> {
        self.parameters
            .iter()
            .map(|key| {
                values.get(key).cloned().ok_or_else(|| {
                    OrmError::ValidationError(format!("Parameter {} is not bound", key))
                })
            })
            .collect()
    }

    /// Checks that a fetched tuple has the announced shape.
    pub fn check_shape(&self, tuple: &Tuple) -> Result<(), OrmError> {
        if tuple.size() != self.shape.len() {
            return Err(OrmError::ValidationError(format!(
                "Expected {} fields, got {}",
                self.shape.len(),
                tuple.size()
            )));
        }
        for (field, dtype) in tuple.field_vals().zip(self.shape.iter()) {
            if let Some(actual) = field.dtype() {
                if actual != *dtype {
                    return Err(OrmError::ValidationError(format!(
                        "Expected {}, got {} in {}",
                        dtype, actual, tuple
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Runs commands and returns their rows.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        request: &QueryRequest,
        parameters: &ParameterValues,
    ) -> Result<Vec<Tuple>, OrmError>;

    /// Fetches the rows without blocking the caller, honouring `token`.
    async fn execute_async(
        &self,
        request: &QueryRequest,
        parameters: &ParameterValues,
        token: &CancellationToken,
    ) -> Result<Vec<Tuple>, OrmError>;
}
