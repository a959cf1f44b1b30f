pub mod config;
pub mod kv;

pub use config::Config;
pub use kv::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
