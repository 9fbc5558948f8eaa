pub use translator::Translator;
mod translator;

use crate::materializer::Materializer;
use crate::projector::ItemExpr;
use common::execution::QueryRequest;
use common::logical_plan::{AggregateKind, Provider};
use common::{DataType, OrmError};
use std::fmt;

/// How the rows of a query become its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// Every row is an element.
    Sequence,
    First {
        or_default: bool,
    },
    /// At most two rows are fetched; a second one is an error.
    Single {
        or_default: bool,
    },
    /// One boolean row.
    Exists,
    Count {
        long: bool,
    },
    /// One row holding a scalar aggregate.
    Aggregate {
        kind: AggregateKind,
        dtype: DataType,
        /// Whether the aggregated values can be null, which makes an empty input yield null.
        nullable: bool,
    },
}

/// Output of the translator, before optimization and compilation.
#[derive(Debug, Clone)]
pub struct Translation {
    pub provider: Provider,
    pub projector: ItemExpr,
    pub result: ResultKind,
}

/// A query ready to run: optimized plan, command text and compiled shaper.
///
/// Immutable once built, so it is shared by the cache and by every
/// nested sequence enumerating it.
pub struct TranslatedQuery {
    pub request: QueryRequest,
    pub projector: ItemExpr,
    pub result: ResultKind,
    pub(crate) materializer: Materializer,
}

impl TranslatedQuery {
    pub fn provider(&self) -> &Provider {
        &self.request.provider
    }

    pub fn sql(&self) -> &str {
        &self.request.text
    }
}

impl fmt::Debug for TranslatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatedQuery")
            .field("sql", &self.request.text)
            .field("parameters", &self.request.parameters)
            .field("result", &self.result)
            .finish()
    }
}

/// Turns translations into runnable queries. The translator uses it for
/// nested sequences, which are separate queries.
pub trait QueryPreparer {
    fn prepare(&self, translation: Translation) -> Result<TranslatedQuery, OrmError>;
}
