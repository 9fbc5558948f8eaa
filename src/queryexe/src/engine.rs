use crate::cache::QueryCache;
use crate::expression::Expr;
use crate::materializer::{Materializer, ShapeContext, Value};
use crate::query::{QueryPreparer, TranslatedQuery, Translation, Translator};
use crate::session::EntityResolver;
use common::catalog::DomainModel;
use common::execution::{CancellationToken, CommandExecutor, ParameterValues, QueryRequest};
use common::{Field, OrmError, ParamKey};
use optimizer::{Optimizer, OptimizerConfig};
use sqlgen::{compile_command, translator_from_name, SqlTranslator};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::sync::Arc;

/// Engine settings, read from a JSON file or left at their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rewrite applies into joins where the dialect would otherwise need APPLY.
    pub convert_applies: bool,
    /// Fail on correction faults instead of keeping the applies.
    pub strict_correction: bool,
    pub remove_redundant_columns: bool,
    /// Compiled queries kept; 0 disables caching.
    pub cache_capacity: usize,
    /// Dialect name such as `postgresql-9.4`.
    pub dialect: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            convert_applies: true,
            strict_correction: false,
            remove_redundant_columns: true,
            cache_capacity: 256,
            dialect: String::from("sqlserver-11.0"),
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, OrmError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a config file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path of a JSON config file.
    pub fn from_file(path: &str) -> Result<Self, OrmError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            convert_applies: self.convert_applies,
            strict_correction: self.strict_correction,
            remove_redundant_columns: self.remove_redundant_columns,
        }
    }
}

/// Values of the variables a query reads, bound on every execution.
#[derive(Debug, Clone, Default)]
pub struct ParameterContext {
    values: HashMap<String, Field>,
}

impl ParameterContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: Field) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: Field) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.values.get(name)
    }

    /// Values keyed the way compiled commands reference them.
    pub fn values(&self) -> ParameterValues {
        self.values
            .iter()
            .map(|(name, value)| (ParamKey::Named(name.clone()), value.clone()))
            .collect()
    }
}

/// What a query compiles to, for display.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub dialect: String,
    pub plan: serde_json::Value,
    #[serde(skip)]
    pub plan_text: String,
    pub sql: String,
    pub parameters: Vec<String>,
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plan:")?;
        write!(f, "{}", self.plan_text)?;
        writeln!(f, "SQL ({}):", self.dialect)?;
        writeln!(f, "{}", self.sql)?;
        if !self.parameters.is_empty() {
            writeln!(f, "Parameters: {}", self.parameters.join(", "))?;
        }
        Ok(())
    }
}

/// Entry point: translates, compiles, caches and runs queries against one
/// model, dialect and executor.
pub struct QueryEngine {
    model: Arc<DomainModel>,
    translator: Arc<dyn SqlTranslator>,
    executor: Arc<dyn CommandExecutor>,
    config: EngineConfig,
    cache: QueryCache,
    optimizer: Optimizer,
}

impl QueryEngine {
    /// Creates an engine for the dialect named in `config`.
    ///
    /// # Arguments
    ///
    /// * `model` - Domain model queries are bound against.
    /// * `executor` - Runs the compiled commands.
    /// * `config` - Engine settings.
    pub fn new(
        model: Arc<DomainModel>,
        executor: Arc<dyn CommandExecutor>,
        config: EngineConfig,
    ) -> Result<Self, OrmError> {
        let translator = translator_from_name(&config.dialect)?;
        Ok(Self::with_translator(model, translator, executor, config))
    }

    pub fn with_translator(
        model: Arc<DomainModel>,
        translator: Arc<dyn SqlTranslator>,
        executor: Arc<dyn CommandExecutor>,
        config: EngineConfig,
    ) -> Self {
        info!(
            "Query engine for {} (cache capacity {})",
            translator.name(),
            config.cache_capacity
        );
        Self {
            model,
            translator,
            executor,
            cache: QueryCache::new(config.cache_capacity),
            optimizer: Optimizer::new(config.optimizer_config()),
            config,
        }
    }

    pub fn model(&self) -> &DomainModel {
        &self.model
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn dialect(&self) -> String {
        self.translator.name()
    }

    /// Compiled query for an expression, from the cache when possible.
    pub fn translate(&self, expr: &Expr) -> Result<Arc<TranslatedQuery>, OrmError> {
        let key = QueryCache::key(expr, &self.translator.name())?;
        if let Some(query) = self.cache.get(&key)? {
            debug!("Query cache hit for {}", expr);
            return Ok(query);
        }
        debug!("Query cache miss for {}", expr);
        let translation = Translator::new(self.model.as_ref(), self).translate(expr)?;
        let query = self.prepare(translation)?;
        self.cache.insert(key, query)
    }

    pub fn explain(&self, expr: &Expr) -> Result<Explanation, OrmError> {
        let query = self.translate(expr)?;
        Ok(Explanation {
            dialect: self.translator.name(),
            plan: query.provider().to_json()?,
            plan_text: query.provider().to_string(),
            sql: query.sql().to_string(),
            parameters: query.request.parameters.iter().map(|p| p.to_string()).collect(),
        })
    }

    fn context(&self, parameters: &ParameterContext, resolver: &Arc<dyn EntityResolver>) -> ShapeContext {
        ShapeContext::new(self.executor.clone(), resolver.clone(), parameters.values())
    }

    /// Runs a query.
    ///
    /// # Arguments
    ///
    /// * `expr` - Query expression.
    /// * `parameters` - Values of the variables the expression reads.
    /// * `resolver` - Session resolving materialized entities.
    pub fn execute(
        &self,
        expr: &Expr,
        parameters: &ParameterContext,
        resolver: &Arc<dyn EntityResolver>,
    ) -> Result<Value, OrmError> {
        let query = self.translate(expr)?;
        let context = self.context(parameters, resolver);
        let rows = self.executor.execute(&query.request, &context.parameters)?;
        debug!("Fetched {} rows", rows.len());
        query.materializer.finish(&query, &rows, &context, None)
    }

    /// Runs a query, awaiting the fetch and honouring `token` while shaping.
    pub async fn execute_async(
        &self,
        expr: &Expr,
        parameters: &ParameterContext,
        resolver: &Arc<dyn EntityResolver>,
        token: &CancellationToken,
    ) -> Result<Value, OrmError> {
        token.check()?;
        let query = self.translate(expr)?;
        let context = self.context(parameters, resolver);
        let rows = self
            .executor
            .execute_async(&query.request, &context.parameters, token)
            .await?;
        debug!("Fetched {} rows", rows.len());
        query
            .materializer
            .finish(&query, &rows, &context, Some(token))
    }
}

impl QueryPreparer for QueryEngine {
    fn prepare(&self, translation: Translation) -> Result<TranslatedQuery, OrmError> {
        let required = translation.projector.columns();
        let optimized = self.optimizer.optimize(&translation.provider, &required)?;
        let projector = translation.projector.remap(&optimized.column_map)?;
        let command = compile_command(&optimized.provider, self.translator.as_ref())?;
        debug!("Compiled for {}: {}", self.translator.name(), command.text);
        let materializer = Materializer::compile(&projector, self.model.as_ref())?;
        Ok(TranslatedQuery {
            request: QueryRequest {
                text: command.text,
                parameters: command.parameters,
                shape: command.shape,
                provider: Arc::new(optimized.provider),
            },
            projector,
            result: translation.result,
            materializer,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::testutil::*;

    #[test]
    fn test_config() {
        let config = EngineConfig::from_json(r#"{"dialect": "sqlite-3", "strict_correction": true}"#).unwrap();
        assert_eq!(config.dialect, "sqlite-3");
        assert!(config.strict_correction);
        assert!(config.convert_applies);
        assert_eq!(config.cache_capacity, EngineConfig::default().cache_capacity);
        assert!(config.optimizer_config().strict_correction);
        assert!(EngineConfig::from_json("{\"cache_capacity\": \"many\"}").is_err());
    }

    #[test]
    fn test_parameter_context() {
        let mut params = ParameterContext::new().with("n", int(3));
        params.set("name", string("Ann"));
        assert_eq!(params.get("n"), Some(&int(3)));
        let values = params.values();
        assert_eq!(values.len(), 2);
        assert_eq!(
            values.get(&ParamKey::Named(String::from("name"))),
            Some(&string("Ann"))
        );
    }
}
