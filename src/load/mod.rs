//! Loading the history of an entity and of the embedded objects it owns.

pub mod context;
pub mod engine;
pub mod metadata;
pub mod store;

pub use context::{placeholder_name, LoadContext, ParentLink};
pub use engine::HistoryLoader;
pub use metadata::{EntityMetadata, EntityType, Relation, StaticMetadata};
pub use store::{AccessPolicy, AllowAll, EntitySnapshot, EntityStore, HistoryRepository, MemoryEntityStore};
