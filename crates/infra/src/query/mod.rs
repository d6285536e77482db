//! Query model: filter specifications, the query handle and its compiler.

pub mod builder;
pub mod compiler;
pub mod filter;
pub mod options;

pub use builder::{Order, Projection, Query, Window};
pub use compiler::FilterCompiler;
pub use filter::{Filter, FilterOp};
pub use options::{ConflictTarget, Page, QueryOptions};
