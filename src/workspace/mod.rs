//! Projects and the references they compile against.
//!
//! A [`Project`] is an immutable snapshot: changing its symbols produces a
//! new snapshot with a newer [`VersionStamp`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksum::Checksum;
use crate::error::Result;
use crate::metadata::MetadataImage;
use crate::symbols::{AssemblyDef, AssemblySymbol, SymbolDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// An id derived from a directory path, stable across sessions so the
    /// project's persisted source index can be found again.
    pub fn for_path(path: &Path) -> Self {
        let checksum = Checksum::create(path.to_string_lossy().as_bytes());
        Self::from_uuid(Uuid::from_bytes(*checksum.as_bytes()))
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic version of a project's declared symbols. Equal stamps mean
/// nothing changed; different stamps mean something may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionStamp(u64);

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

impl VersionStamp {
    pub fn new() -> Self {
        Self(NEXT_VERSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for VersionStamp {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of loaded metadata, independent of how a reference aliases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetadataId(Checksum);

impl MetadataId {
    pub fn new(content: Checksum) -> Self {
        Self(content)
    }
}

impl fmt::Display for MetadataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct MetadataReference {
    pub file_path: PathBuf,
    /// Extern aliases the reference is imported under
    pub aliases: Vec<String>,
    pub image: Arc<MetadataImage>,
}

impl MetadataReference {
    pub fn new(file_path: impl Into<PathBuf>, image: Arc<MetadataImage>) -> Self {
        Self {
            file_path: file_path.into(),
            aliases: Vec::new(),
            image,
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn metadata_id(&self) -> MetadataId {
        self.image.metadata_id()
    }

    pub fn load(file_path: &Path) -> Result<Self> {
        let image = MetadataImage::load(file_path)?;
        Ok(Self::new(file_path, Arc::new(image)))
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub semantic_version: VersionStamp,
    pub assembly: Arc<dyn AssemblySymbol>,
    pub metadata_references: Vec<MetadataReference>,
}

impl Project {
    pub fn new(name: impl Into<String>, assembly: Arc<dyn AssemblySymbol>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            semantic_version: VersionStamp::new(),
            assembly,
            metadata_references: Vec::new(),
        }
    }

    /// A project with no declared symbols.
    pub fn empty(name: impl Into<String>) -> Self {
        let name = name.into();
        let assembly = AssemblyDef::new(name.clone(), SymbolDef::global_namespace());
        Self::new(name, Arc::new(assembly))
    }

    pub fn with_id(mut self, id: ProjectId) -> Self {
        self.id = id;
        self
    }

    pub fn with_reference(mut self, reference: MetadataReference) -> Self {
        self.metadata_references.push(reference);
        self
    }

    pub fn with_references(mut self, references: impl IntoIterator<Item = MetadataReference>) -> Self {
        self.metadata_references.extend(references);
        self
    }

    /// Next snapshot of this project with a new set of declared symbols.
    pub fn with_assembly(&self, assembly: Arc<dyn AssemblySymbol>) -> Self {
        Self {
            assembly,
            semantic_version: VersionStamp::new(),
            ..self.clone()
        }
    }

    pub fn reference(&self, file_path: &Path) -> Option<&MetadataReference> {
        self.metadata_references
            .iter()
            .find(|reference| reference.file_path == file_path)
    }
}

/// Finds metadata image files under `root`, honoring ignore files.
pub fn find_image_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .ignore(true)
        .build();

    let mut files: Vec<PathBuf> = walker
        .flatten()
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.is_file() && path.extension().is_some_and(|e| e == extension)
        })
        .collect();
    files.sort();
    files
}

/// Loads every image under `root`. Unreadable files are logged and skipped.
pub fn load_references_from_dir(root: &Path, extension: &str) -> Vec<MetadataReference> {
    find_image_files(root, extension)
        .into_iter()
        .filter_map(|path| match MetadataReference::load(&path) {
            Ok(reference) => Some(reference),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{type_attributes, ImageBuilder, ModuleBuilder};
    use tempfile::tempdir;

    fn write_image(dir: &Path, file: &str, type_name: &str) -> PathBuf {
        let mut module = ModuleBuilder::new("m.dll");
        module.add_type("N", type_name, type_attributes::PUBLIC);
        let image = ImageBuilder::new(type_name).with_module(module.build()).build();
        let path = dir.join(file);
        std::fs::write(&path, image.to_json().unwrap()).unwrap();
        path
    }

    #[test]
    fn test_version_stamps_increase() {
        let first = VersionStamp::new();
        let second = VersionStamp::new();
        assert!(second > first);
    }

    #[test]
    fn test_path_ids_are_stable() {
        let id = ProjectId::for_path(Path::new("/work/refs"));
        assert_eq!(id, ProjectId::for_path(Path::new("/work/refs")));
        assert_ne!(id, ProjectId::for_path(Path::new("/work/other")));

        let project = Project::empty("App").with_id(id);
        assert_eq!(project.id, id);
    }

    #[test]
    fn test_with_assembly_bumps_version() {
        let project = Project::empty("App");
        let next = project.with_assembly(Arc::new(AssemblyDef::new(
            "App",
            SymbolDef::global_namespace(),
        )));
        assert_eq!(next.id, project.id);
        assert_ne!(next.semantic_version, project.semantic_version);
    }

    #[test]
    fn test_load_references_from_dir() {
        let dir = tempdir().unwrap();
        write_image(dir.path(), "a.mdjson", "A");
        write_image(dir.path(), "b.mdjson", "B");
        std::fs::write(dir.path().join("broken.mdjson"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(find_image_files(dir.path(), "mdjson").len(), 3);

        let references = load_references_from_dir(dir.path(), "mdjson");
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].image.name, "A");
    }

    #[test]
    fn test_same_bytes_same_metadata_id() {
        let dir = tempdir().unwrap();
        let path = write_image(dir.path(), "a.mdjson", "A");
        let first = MetadataReference::load(&path).unwrap();
        let second = MetadataReference::load(&path).unwrap().with_aliases(["global", "x"]);
        assert_eq!(first.metadata_id(), second.metadata_id());
    }
}
