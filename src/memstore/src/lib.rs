#[macro_use]
extern crate log;

pub mod evaluator;
pub mod expression;
pub mod storage_manager;

pub use evaluator::Evaluator;
pub use storage_manager::MemoryStore;
