pub mod sqlite;

pub use sqlite::SqliteCandleStore;
