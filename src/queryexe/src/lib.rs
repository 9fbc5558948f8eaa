#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod cache;
pub mod engine;
pub mod expression;
pub mod materializer;
pub mod projector;
pub mod query;
pub mod session;

#[cfg(test)]
mod testutil;
mod corrector_tests;
mod engine_tests;

pub use common::execution::CancellationToken;
pub use engine::{EngineConfig, Explanation, ParameterContext, QueryEngine};
pub use expression::{Expr, Lambda, QueryMethod};
pub use materializer::{LazySequence, Value};
pub use session::{Entity, EntityResolver, IdentityMap, NoTracking};
