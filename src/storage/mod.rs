mod dimensions;
mod filters;
mod sqlite;

pub use sqlite::SqliteStorage;
