pub mod core;
pub mod history;
pub mod types;

pub use self::core::Db;
pub use types::*;
