pub mod arena;
pub mod metadata;
pub mod source;
pub mod watcher;

pub use arena::{ArenaPool, MetadataNodeArena};
pub use metadata::{MetadataExtraction, MetadataExtractor};
pub use source::SourceExtractor;
pub use watcher::{ImageEvent, ImageWatcher};
