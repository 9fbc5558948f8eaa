#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod compiler;
pub mod dialect;
pub mod dom;
pub mod render;

pub use compiler::{compile, SqlCompiler};
pub use dialect::{translator_for, translator_from_name, DialectKind, SqlTranslator, Version};
pub use render::{render_query, render_statement, SqlCommand};

use common::logical_plan::Provider;
use common::OrmError;

/// Compiles and renders `provider` for the dialect of `translator`.
///
/// # Arguments
///
/// * `provider` - Optimized provider tree.
/// * `translator` - Target dialect.
pub fn compile_command(
    provider: &Provider,
    translator: &dyn SqlTranslator,
) -> Result<SqlCommand, OrmError> {
    let query = compile(provider, translator)?;
    render_query(&query, provider.header(), translator)
}
