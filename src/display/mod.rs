//! Rendering loaded history into view models.

pub mod adapter;
pub mod merge;
pub mod pipeline;
pub mod translator;
pub mod types;

pub use adapter::{
    default_display_attribute, default_display_record, AdapterRegistry, ConversionContext, DefaultAdapter,
    HistoryAdapter, OwnerHooks,
};
pub use merge::merge_into;
pub use pipeline::DisplayPipeline;
pub use translator::{MapTranslator, NoTranslation, Translator};
pub use types::{DisplayAttribute, DisplayRecord, FlatDisplay};
