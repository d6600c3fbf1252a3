pub mod cache;
pub mod storage;
pub mod work_queue;

pub use cache::{
    metadata_storage_key, read_info, source_storage_key, write_info, CacheStats, IndexState,
    SymbolTreeCacheService,
};
pub use storage::{NoOpStorage, PersistentStorage, SqliteStorage};
pub use work_queue::{WorkCommand, WorkQueueHandle};
