//! Configuration schema and SQLite-backed store

mod schema;
mod store;

pub use schema::*;
pub use store::{ConfigChange, ConfigStore};
