//! In-memory cache of symbol tree indices for a live set of projects.
//!
//! Source indices are keyed by project. Metadata indices are keyed by the
//! referenced file and shared between every project referencing it; the
//! parse behind them runs at most once per [`MetadataId`], however many
//! projects or aliases ask for it concurrently. Entries are replaced with
//! fully built indices, never updated in place.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::checksum::{Checksum, ChecksumProvider, ContentChecksumProvider};
use crate::config::IndexerConfig;
use crate::error::{Result, SymbolTreeError};
use crate::indexer::{MetadataExtractor, SourceExtractor};
use crate::tree::{deserialize, serialization_format_checksum, serialize, SymbolTreeInfo};
use crate::workspace::{MetadataId, MetadataReference, Project, ProjectId, VersionStamp};

use super::storage::PersistentStorage;

const SOURCE_KEY_PREFIX: &str = "SymbolTreeInfo_Source_";
const METADATA_KEY_PREFIX: &str = "SymbolTreeInfo_Metadata_";

pub fn source_storage_key(project_id: ProjectId) -> String {
    format!("{}{}", SOURCE_KEY_PREFIX, project_id)
}

pub fn metadata_storage_key(file_path: &Path) -> String {
    format!("{}{}", METADATA_KEY_PREFIX, file_path.display())
}

/// Stored streams are keyed by the index checksum and the serialization
/// format, so a format change reads as a miss.
fn storage_checksum(checksum: &Checksum) -> Checksum {
    Checksum::combine(checksum, &serialization_format_checksum())
}

/// Reads a persisted index. Streams that fail to deserialize are misses.
pub fn read_info(
    storage: &dyn PersistentStorage,
    key: &str,
    checksum: &Checksum,
) -> Result<Option<SymbolTreeInfo>> {
    let Some(bytes) = storage.read_stream(key, &storage_checksum(checksum))? else {
        return Ok(None);
    };
    Ok(deserialize(&bytes, checksum))
}

pub fn write_info(storage: &dyn PersistentStorage, key: &str, info: &SymbolTreeInfo) -> Result<bool> {
    storage.write_stream(key, &storage_checksum(&info.checksum()), &serialize(info))
}

/// Where a project is in its indexing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Unindexed,
    Indexing,
    Indexed(Checksum),
    /// Indexed at the given checksum, with a newer snapshot waiting.
    Stale(Checksum),
    Removed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub source_entries: usize,
    pub metadata_entries: usize,
    pub source_builds: usize,
    pub metadata_builds: usize,
}

struct SourceInfo {
    info: Arc<SymbolTreeInfo>,
    version: VersionStamp,
}

struct MetadataInfo {
    info: Arc<SymbolTreeInfo>,
    metadata_id: MetadataId,
    referencing_projects: HashSet<ProjectId>,
}

type MetadataCell = Arc<OnceCell<Arc<SymbolTreeInfo>>>;

pub struct SymbolTreeCacheService {
    storage: Arc<dyn PersistentStorage>,
    checksums: Arc<dyn ChecksumProvider>,
    source_extractor: SourceExtractor,
    metadata_extractor: Arc<MetadataExtractor>,
    source_infos: Mutex<HashMap<ProjectId, SourceInfo>>,
    metadata_infos: Mutex<HashMap<PathBuf, MetadataInfo>>,
    metadata_cells: Mutex<HashMap<MetadataId, MetadataCell>>,
    states: Mutex<HashMap<ProjectId, IndexState>>,
    lanes: Mutex<HashMap<ProjectId, Arc<tokio::sync::Mutex<()>>>>,
    source_builds: Arc<AtomicUsize>,
    metadata_builds: Arc<AtomicUsize>,
}

impl SymbolTreeCacheService {
    pub fn new(storage: Arc<dyn PersistentStorage>) -> Self {
        Self::with_checksum_provider(storage, Arc::new(ContentChecksumProvider))
    }

    pub fn with_checksum_provider(
        storage: Arc<dyn PersistentStorage>,
        checksums: Arc<dyn ChecksumProvider>,
    ) -> Self {
        Self {
            storage,
            checksums,
            source_extractor: SourceExtractor::new(true),
            metadata_extractor: Arc::new(MetadataExtractor::new()),
            source_infos: Mutex::new(HashMap::new()),
            metadata_infos: Mutex::new(HashMap::new()),
            metadata_cells: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            lanes: Mutex::new(HashMap::new()),
            source_builds: Arc::new(AtomicUsize::new(0)),
            metadata_builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_config(storage: Arc<dyn PersistentStorage>, config: &IndexerConfig) -> Self {
        let mut service = Self::new(storage);
        service.source_extractor = SourceExtractor::new(config.include_internal_source);
        service
    }

    pub fn index_state(&self, project_id: ProjectId) -> IndexState {
        lock(&self.states)
            .get(&project_id)
            .copied()
            .unwrap_or(IndexState::Unindexed)
    }

    /// Records that a newer snapshot of the project is waiting to be indexed.
    pub fn mark_stale(&self, project_id: ProjectId) {
        let mut states = lock(&self.states);
        let state = states.entry(project_id).or_insert(IndexState::Unindexed);
        if let IndexState::Indexed(checksum) = *state {
            *state = IndexState::Stale(checksum);
        }
    }

    pub fn source_info(&self, project_id: ProjectId) -> Option<Arc<SymbolTreeInfo>> {
        lock(&self.source_infos)
            .get(&project_id)
            .map(|entry| entry.info.clone())
    }

    pub fn metadata_info(&self, file_path: &Path) -> Option<Arc<SymbolTreeInfo>> {
        lock(&self.metadata_infos)
            .get(file_path)
            .map(|entry| entry.info.clone())
    }

    /// Projects currently holding the metadata entry for `file_path`.
    pub fn referencing_projects(&self, file_path: &Path) -> Vec<ProjectId> {
        let mut projects: Vec<ProjectId> = lock(&self.metadata_infos)
            .get(file_path)
            .map(|entry| entry.referencing_projects.iter().copied().collect())
            .unwrap_or_default();
        projects.sort();
        projects
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            source_entries: lock(&self.source_infos).len(),
            metadata_entries: lock(&self.metadata_infos).len(),
            source_builds: self.source_builds.load(Ordering::Relaxed),
            metadata_builds: self.metadata_builds.load(Ordering::Relaxed),
        }
    }

    /// Brings every index of `project` up to date. Runs serially with other
    /// updates of the same project.
    pub async fn update_project(&self, project: &Project, cancel: &CancellationToken) -> Result<()> {
        let lane = self.lane(project.id);
        let _guard = lane.lock().await;

        let previous = self.set_state(project.id, IndexState::Indexing);
        match self.update_project_indices(project, cancel).await {
            Ok(checksum) => {
                self.set_state(project.id, IndexState::Indexed(checksum));
                Ok(())
            }
            Err(e) => {
                let restored = match previous {
                    IndexState::Indexed(checksum) | IndexState::Stale(checksum) => {
                        IndexState::Stale(checksum)
                    }
                    _ => IndexState::Unindexed,
                };
                self.set_state(project.id, restored);
                Err(e)
            }
        }
    }

    async fn update_project_indices(
        &self,
        project: &Project,
        cancel: &CancellationToken,
    ) -> Result<Checksum> {
        let source = self.update_source_symbol_tree_info(project, cancel).await?;
        for reference in &project.metadata_references {
            self.update_metadata_symbol_tree_info(project, reference, cancel)
                .await?;
        }
        self.prune_references(project);
        Ok(source.checksum())
    }

    /// Index of the project's declared symbols. The version stamp is checked
    /// before the checksum so unchanged projects skip hashing.
    pub async fn update_source_symbol_tree_info(
        &self,
        project: &Project,
        cancel: &CancellationToken,
    ) -> Result<Arc<SymbolTreeInfo>> {
        if let Some(entry) = lock(&self.source_infos).get(&project.id) {
            if entry.version == project.semantic_version {
                return Ok(entry.info.clone());
            }
        }

        // Indices built with and without internal members must never be
        // mistaken for each other, in memory or in storage.
        let checksum = Checksum::combine(
            &self.checksums.source_checksum(project),
            &self.source_extractor.mode_checksum(),
        );
        {
            let mut infos = lock(&self.source_infos);
            if let Some(entry) = infos.get_mut(&project.id) {
                if entry.info.checksum() == checksum {
                    tracing::debug!("Source index of {} unchanged", project.name);
                    entry.version = project.semantic_version;
                    return Ok(entry.info.clone());
                }
            }
        }

        let assembly = project.assembly.clone();
        let extractor = self.source_extractor;
        let builds = self.source_builds.clone();
        let task_cancel = cancel.clone();
        let key = source_storage_key(project.id);
        let info = self
            .load_or_create(key, checksum, cancel, move || {
                builds.fetch_add(1, Ordering::Relaxed);
                extractor.create_info(assembly.as_ref(), checksum, &task_cancel)
            })
            .await?;

        lock(&self.source_infos).insert(
            project.id,
            SourceInfo {
                info: info.clone(),
                version: project.semantic_version,
            },
        );
        Ok(info)
    }

    /// Index of one metadata reference of `project`, shared with every other
    /// project referencing the same file.
    pub async fn update_metadata_symbol_tree_info(
        &self,
        project: &Project,
        reference: &MetadataReference,
        cancel: &CancellationToken,
    ) -> Result<Arc<SymbolTreeInfo>> {
        let checksum = self.checksums.metadata_checksum(reference);
        {
            let mut infos = lock(&self.metadata_infos);
            if let Some(entry) = infos.get_mut(&reference.file_path) {
                if entry.info.checksum() == checksum {
                    entry.referencing_projects.insert(project.id);
                    return Ok(entry.info.clone());
                }
            }
        }

        let metadata_id = reference.metadata_id();
        let cell = lock(&self.metadata_cells)
            .entry(metadata_id)
            .or_default()
            .clone();

        let built = cell
            .get_or_try_init(|| {
                let image = reference.image.clone();
                let extractor = self.metadata_extractor.clone();
                let builds = self.metadata_builds.clone();
                let task_cancel = cancel.clone();
                let key = metadata_storage_key(&reference.file_path);
                self.load_or_create(key, checksum, cancel, move || {
                    builds.fetch_add(1, Ordering::Relaxed);
                    extractor.create_info(&image, checksum, &task_cancel)
                })
            })
            .await
            .cloned();
        let shared = match built {
            Ok(shared) => shared,
            Err(e) => {
                self.discard_failed_cell(metadata_id, &cell);
                return Err(e);
            }
        };

        let info = if shared.checksum() == checksum {
            shared
        } else {
            Arc::new(shared.with_checksum(checksum))
        };

        let replaced = {
            let mut infos = lock(&self.metadata_infos);
            let mut referencing_projects = infos
                .get(&reference.file_path)
                .map(|entry| entry.referencing_projects.clone())
                .unwrap_or_default();
            referencing_projects.insert(project.id);
            infos.insert(
                reference.file_path.clone(),
                MetadataInfo {
                    info: info.clone(),
                    metadata_id,
                    referencing_projects,
                },
            )
        };
        if let Some(old) = replaced {
            if old.metadata_id != metadata_id {
                self.evict_unused_cells([old.metadata_id]);
            }
        }
        Ok(info)
    }

    /// Drops `project` from metadata entries it no longer references.
    pub fn prune_references(&self, project: &Project) {
        let evicted = {
            let mut infos = lock(&self.metadata_infos);
            for (path, entry) in infos.iter_mut() {
                if project.reference(path).is_none() {
                    entry.referencing_projects.remove(&project.id);
                }
            }
            evict_unreferenced(&mut infos)
        };
        self.evict_unused_cells(evicted);
    }

    /// Forgets every index held for `project_id`. Metadata entries no other
    /// project references are evicted from memory; persisted streams stay.
    pub fn remove_project(&self, project_id: ProjectId) {
        lock(&self.source_infos).remove(&project_id);
        lock(&self.lanes).remove(&project_id);

        let evicted = {
            let mut infos = lock(&self.metadata_infos);
            for entry in infos.values_mut() {
                entry.referencing_projects.remove(&project_id);
            }
            evict_unreferenced(&mut infos)
        };
        self.evict_unused_cells(evicted);
        self.set_state(project_id, IndexState::Removed);
        tracing::debug!("Removed project {}", project_id);
    }

    async fn load_or_create<F>(
        &self,
        key: String,
        checksum: Checksum,
        cancel: &CancellationToken,
        create: F,
    ) -> Result<Arc<SymbolTreeInfo>>
    where
        F: FnOnce() -> Result<SymbolTreeInfo> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(SymbolTreeError::Cancelled);
        }

        let storage = self.storage.clone();
        let read_key = key.clone();
        let stored =
            tokio::task::spawn_blocking(move || read_info(storage.as_ref(), &read_key, &checksum))
                .await?;

        match stored {
            Ok(Some(info)) => {
                tracing::debug!("Loaded {} from storage", key);
                return Ok(Arc::new(info));
            }
            Ok(None) => tracing::debug!("No stored index for {}", key),
            Err(e) => tracing::warn!("Failed to read {}: {}", key, e),
        }

        let info = Arc::new(tokio::task::spawn_blocking(create).await??);
        tracing::info!("Built {} ({} nodes)", key, info.node_count());

        let storage = self.storage.clone();
        let written_info = info.clone();
        let write_key = key.clone();
        let written = tokio::task::spawn_blocking(move || {
            write_info(storage.as_ref(), &write_key, &written_info)
        })
        .await?;
        if let Err(e) = written {
            tracing::warn!("Failed to persist {}: {}", key, e);
        }

        Ok(info)
    }

    fn lane(&self, project_id: ProjectId) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.lanes).entry(project_id).or_default().clone()
    }

    fn set_state(&self, project_id: ProjectId, state: IndexState) -> IndexState {
        lock(&self.states)
            .insert(project_id, state)
            .unwrap_or(IndexState::Unindexed)
    }

    /// Drops a cell whose computation failed, unless another request has
    /// since replaced or filled it.
    fn discard_failed_cell(&self, metadata_id: MetadataId, cell: &MetadataCell) {
        let mut cells = lock(&self.metadata_cells);
        let unchanged = cells
            .get(&metadata_id)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && !current.initialized());
        if unchanged {
            cells.remove(&metadata_id);
        }
    }

    fn evict_unused_cells(&self, candidates: impl IntoIterator<Item = MetadataId>) {
        let in_use: HashSet<MetadataId> = lock(&self.metadata_infos)
            .values()
            .map(|entry| entry.metadata_id)
            .collect();
        let mut cells = lock(&self.metadata_cells);
        for metadata_id in candidates {
            if !in_use.contains(&metadata_id) {
                cells.remove(&metadata_id);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn evict_unreferenced(infos: &mut HashMap<PathBuf, MetadataInfo>) -> Vec<MetadataId> {
    let mut evicted = Vec::new();
    infos.retain(|path, entry| {
        if entry.referencing_projects.is_empty() {
            tracing::debug!("Evicting metadata index for {}", path.display());
            evicted.push(entry.metadata_id);
            false
        } else {
            true
        }
    });
    evicted
}
