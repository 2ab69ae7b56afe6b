//! Placebot Storage crate - SQLite placement database.
//!
//! Provides the per-session connection wrapper with bounded read-only
//! execution, schema introspection for prompt composition, migrations for
//! the placement schema, and the demo data seed.

pub mod db;
pub mod error;
pub mod migrations;
pub mod schema;
pub mod seed;

pub use db::{query_read_only, Database, DatabaseOptions};
pub use error::StorageError;
pub use schema::{describe_conn, SchemaIntrospector};
pub use seed::{seed_demo_data, SeedReport};
