pub mod capture;
pub mod config;
pub mod db;
pub mod display;
pub mod error;
pub mod legacy;
pub mod load;
pub mod service;
pub mod values;

pub use config::HistoryConfig;
pub use db::Db;
pub use error::HistoryError;
pub use service::HistoryService;
pub use rusqlite;
pub use rusqlite_migration;
pub use serde_rusqlite;
