// crates/bfa-engine/src/db/mod.rs
// SQLite storage for the database-backed knowledge base

pub mod causes;
pub mod pool;
pub mod schema;
pub mod statistics;

pub use pool::DatabasePool;
