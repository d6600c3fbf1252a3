//! Cache service and storage behavior across projects and sessions.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use symbol_tree_index::checksum::{Checksum, ChecksumProvider, ContentChecksumProvider};
use symbol_tree_index::index::{
    metadata_storage_key, read_info, write_info, IndexState, PersistentStorage, SqliteStorage,
    SymbolTreeCacheService, WorkQueueHandle,
};
use symbol_tree_index::metadata::{type_attributes, ImageBuilder, MetadataImage, ModuleBuilder};
use symbol_tree_index::tree::serialization_format_checksum;
use symbol_tree_index::workspace::{MetadataReference, Project};
use symbol_tree_index::{MetadataExtractor, NoOpStorage, SymbolTreeError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn image(types: &[&str]) -> Arc<MetadataImage> {
    let mut module = ModuleBuilder::new("lib.dll");
    for name in types {
        module.add_type("Lib", name, type_attributes::PUBLIC);
    }
    Arc::new(ImageBuilder::new("Lib").with_module(module.build()).build())
}

fn build(image: &MetadataImage, checksum: Checksum) -> symbol_tree_index::SymbolTreeInfo {
    MetadataExtractor::new()
        .create_info(image, checksum, &CancellationToken::new())
        .unwrap()
}

mod storage {
    use super::*;

    #[test]
    fn test_round_trip_through_sqlite() {
        let temp_dir = TempDir::new().unwrap();
        let storage = SqliteStorage::new(temp_dir.path().join("index.db")).unwrap();
        let checksum = Checksum::create(b"lib v1");
        let info = build(&image(&["Widget", "Gadget`1"]), checksum);
        let key = metadata_storage_key(Path::new("/refs/lib.mdjson"));

        assert!(write_info(&storage, &key, &info).unwrap());

        let loaded = read_info(&storage, &key, &checksum).unwrap().unwrap();
        assert!(loaded.is_equivalent(&info));
        assert_eq!(loaded.find_node_indices("Gadget", false).len(), 1);
    }

    #[test]
    fn test_checksum_mismatch_is_a_miss() {
        let storage = SqliteStorage::in_memory().unwrap();
        let checksum = Checksum::create(b"lib v1");
        let info = build(&image(&["Widget"]), checksum);
        write_info(&storage, "key", &info).unwrap();

        let other = Checksum::create(b"lib v2");
        assert!(read_info(&storage, "key", &other).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_stream_is_a_miss() {
        let storage = SqliteStorage::in_memory().unwrap();
        let checksum = Checksum::create(b"lib v1");
        let stored_checksum = Checksum::combine(&checksum, &serialization_format_checksum());
        storage
            .write_stream("key", &stored_checksum, b"not an index")
            .unwrap();

        assert!(read_info(&storage, "key", &checksum).unwrap().is_none());
    }
}

mod cache {
    use super::*;

    #[tokio::test]
    async fn test_aliased_metadata_is_parsed_once() {
        let cache = SymbolTreeCacheService::new(Arc::new(NoOpStorage));
        let cancel = CancellationToken::new();
        let shared = image(&["Widget"]);

        let plain = MetadataReference::new("/a/lib.mdjson", shared.clone());
        let aliased = MetadataReference::new("/b/lib.mdjson", shared.clone()).with_aliases(["legacy"]);
        let first = Project::empty("First").with_reference(plain.clone());
        let second = Project::empty("Second").with_reference(aliased.clone());

        let (a, b) = tokio::join!(
            cache.update_project(&first, &cancel),
            cache.update_project(&second, &cancel)
        );
        a.unwrap();
        b.unwrap();

        let provider = ContentChecksumProvider;
        let plain_info = cache.metadata_info(&plain.file_path).unwrap();
        let aliased_info = cache.metadata_info(&aliased.file_path).unwrap();

        assert_eq!(plain_info.checksum(), provider.metadata_checksum(&plain));
        assert_eq!(aliased_info.checksum(), provider.metadata_checksum(&aliased));
        assert_ne!(plain_info.checksum(), aliased_info.checksum());
        assert_eq!(cache.stats().metadata_builds, 1);
    }

    #[tokio::test]
    async fn test_changed_image_is_rebuilt() {
        let cache = SymbolTreeCacheService::new(Arc::new(NoOpStorage));
        let cancel = CancellationToken::new();
        let path = "/refs/lib.mdjson";

        let project = Project::empty("App").with_reference(MetadataReference::new(path, image(&["Old"])));
        cache.update_project(&project, &cancel).await.unwrap();

        let updated = Project {
            metadata_references: vec![MetadataReference::new(path, image(&["New"]))],
            ..project.clone()
        };
        cache.update_project(&updated, &cancel).await.unwrap();

        let info = cache.metadata_info(Path::new(path)).unwrap();
        assert!(info.find_node_indices("Old", false).is_empty());
        assert_eq!(info.find_node_indices("New", false).len(), 1);
        assert_eq!(cache.stats().metadata_builds, 2);
    }

    #[tokio::test]
    async fn test_new_session_reuses_persisted_indices() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("index.db");
        let cancel = CancellationToken::new();
        let reference = MetadataReference::new("/refs/lib.mdjson", image(&["Widget"]));
        let project = Project::empty("App").with_reference(reference.clone());

        {
            let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());
            let cache = SymbolTreeCacheService::new(storage);
            cache.update_project(&project, &cancel).await.unwrap();
            assert_eq!(cache.stats().metadata_builds, 1);
        }

        let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());
        let cache = SymbolTreeCacheService::new(storage);
        cache.update_project(&project, &cancel).await.unwrap();

        assert_eq!(cache.stats().metadata_builds, 0);
        let info = cache.metadata_info(&reference.file_path).unwrap();
        assert_eq!(info.find_node_indices("Widget", false).len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_update_reports_cancellation() {
        let cache = SymbolTreeCacheService::new(Arc::new(NoOpStorage));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let project = Project::empty("App")
            .with_reference(MetadataReference::new("/refs/lib.mdjson", image(&["Widget"])));

        let result = cache.update_project(&project, &cancel).await;

        assert!(matches!(result, Err(SymbolTreeError::Cancelled)));
        assert!(cache.metadata_info(Path::new("/refs/lib.mdjson")).is_none());
    }

    #[tokio::test]
    async fn test_work_queue_indexes_and_evicts() {
        let cache = Arc::new(SymbolTreeCacheService::new(Arc::new(NoOpStorage)));
        let queue = WorkQueueHandle::new(cache.clone(), Duration::from_millis(10));
        let reference = MetadataReference::new("/refs/lib.mdjson", image(&["Widget"]));
        let project = Arc::new(Project::empty("App").with_reference(reference.clone()));

        queue.enqueue_project(project.clone()).await.unwrap();
        queue.flush().await.unwrap();
        assert!(matches!(cache.index_state(project.id), IndexState::Indexed(_)));
        assert!(cache.metadata_info(&reference.file_path).is_some());

        queue.remove_project(project.id).await.unwrap();
        queue.flush().await.unwrap();
        assert_eq!(cache.index_state(project.id), IndexState::Removed);
        assert!(cache.metadata_info(&reference.file_path).is_none());

        queue.shutdown().await.unwrap();
    }
}
