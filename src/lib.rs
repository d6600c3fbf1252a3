//! Persistent, queryable symbol tree indices over source and metadata
//! assemblies.

pub mod checksum;
pub mod config;
pub mod error;
pub mod index;
pub mod indexer;
pub mod metadata;
pub mod symbols;
pub mod tree;
pub mod workspace;

pub use checksum::{Checksum, ChecksumProvider, ContentChecksumProvider};
pub use config::IndexerConfig;
pub use error::{Result, SymbolTreeError};
pub use index::{
    NoOpStorage, PersistentStorage, SqliteStorage, SymbolTreeCacheService, WorkQueueHandle,
};
pub use indexer::{MetadataExtractor, SourceExtractor};
pub use metadata::{ImageBuilder, MetadataAssembly, MetadataImage, ModuleBuilder};
pub use symbols::{AssemblyDef, AssemblySymbol, LazyAssembly, Symbol, SymbolDef, SymbolRef};
pub use tree::{SearchQuery, SymbolTreeInfo};
pub use workspace::{MetadataReference, Project, ProjectId};
