use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use symbol_tree_index::checksum::{ChecksumProvider, ContentChecksumProvider};
use symbol_tree_index::config::{IndexerConfig, DEFAULT_CONFIG_FILE};
use symbol_tree_index::index::{
    metadata_storage_key, read_info, write_info, SqliteStorage, SymbolTreeCacheService,
    WorkQueueHandle,
};
use symbol_tree_index::indexer::{ImageEvent, ImageWatcher, MetadataExtractor};
use symbol_tree_index::metadata::MetadataAssembly;
use symbol_tree_index::symbols::{AssemblyDef, AssemblySymbol, LazyAssembly, Symbol};
use symbol_tree_index::tree::{SearchQuery, SymbolTreeInfo};
use symbol_tree_index::workspace::{
    find_image_files, load_references_from_dir, MetadataReference, Project, ProjectId,
};

#[derive(Parser)]
#[command(name = "symbol-tree")]
#[command(about = "Build and query symbol tree indices over metadata images")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Index every metadata image under ./refs
    symbol-tree index ./refs

    # Find a type or member by exact name
    symbol-tree find List --path ./refs

    # Tolerate typos
    symbol-tree find Dictonary --fuzzy --path ./refs

    # Types deriving from a base type or interface
    symbol-tree derived IDisposable --path ./refs

    # Extension methods extending int
    symbol-tree extensions Int32 --path ./refs

    # Keep indices up to date while images change
    symbol-tree watch ./refs
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Path to the index database (overrides the configuration file)
    #[arg(long)]
    pub db: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and persist indices for every metadata image in a directory
    Index {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Find symbols by name
    Find {
        /// Name, or a regular expression with --regex
        name: String,

        /// Directory holding the metadata images
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// JSON description of a source assembly to search as well
        #[arg(long)]
        source: Option<PathBuf>,

        /// Match names case-insensitively
        #[arg(long)]
        ignore_case: bool,

        /// Match names within a small edit distance
        #[arg(long, conflicts_with_all = ["ignore_case", "regex"])]
        fuzzy: bool,

        /// Treat the name as a regular expression
        #[arg(long, conflicts_with = "ignore_case")]
        regex: bool,

        /// Maximum number of results
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// List types deriving from a base type or implementing an interface
    Derived {
        /// Simple name of the base type
        base: String,

        #[arg(long, default_value = ".")]
        path: PathBuf,
    },

    /// List extension methods
    Extensions {
        /// Receiver type simple name (e.g. Int32 or String[])
        receiver: Option<String>,

        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// List methods whose receiver cannot be named
        #[arg(long, conflicts_with = "receiver")]
        complex: bool,
    },

    /// Watch a directory and re-index images as they change
    Watch {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Show storage statistics
    Stats,
}

pub fn load_config(cli: &Cli) -> anyhow::Result<IndexerConfig> {
    let config = IndexerConfig::load(&cli.config)?;
    Ok(match &cli.db {
        Some(db) => config.with_storage_path(db),
        None => config,
    })
}

fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

pub fn index_directory(path: &Path, config: &IndexerConfig) -> anyhow::Result<()> {
    let storage = SqliteStorage::new(&config.storage_path)
        .with_context(|| format!("opening {}", config.storage_path.display()))?;
    let files = find_image_files(path, &config.image_extension);
    println!("Found {} metadata images", files.len());

    let bar = progress_bar(files.len());
    let nodes_indexed = AtomicUsize::new(0);
    let up_to_date = AtomicUsize::new(0);
    let errors = AtomicUsize::new(0);
    let extractor = MetadataExtractor::new();
    let checksums = ContentChecksumProvider;
    let cancel = CancellationToken::new();

    // Each rayon thread checks its own arena out of the extractor's pool.
    let built: Vec<(PathBuf, SymbolTreeInfo)> = files
        .par_iter()
        .filter_map(|file| {
            bar.set_message(file.display().to_string());
            let result = MetadataReference::load(file).and_then(|reference| {
                let checksum = checksums.metadata_checksum(&reference);
                let key = metadata_storage_key(file);
                match read_info(&storage, &key, &checksum) {
                    Ok(Some(_)) => Ok(None),
                    _ => extractor
                        .create_info(&reference.image, checksum, &cancel)
                        .map(Some),
                }
            });
            bar.inc(1);

            match result {
                Ok(Some(info)) => {
                    nodes_indexed.fetch_add(info.node_count(), Ordering::Relaxed);
                    Some((file.clone(), info))
                }
                Ok(None) => {
                    up_to_date.fetch_add(1, Ordering::Relaxed);
                    None
                }
                Err(e) => {
                    errors.fetch_add(1, Ordering::Relaxed);
                    bar.println(format!("Error indexing {}: {}", file.display(), e));
                    None
                }
            }
        })
        .collect();
    bar.finish_and_clear();

    for (file, info) in &built {
        write_info(&storage, &metadata_storage_key(file), info)?;
    }

    println!(
        "Indexed {} nodes from {} images ({} up to date, {} errors) in {} ms",
        nodes_indexed.into_inner(),
        built.len(),
        up_to_date.into_inner(),
        errors.into_inner(),
        bar.elapsed().as_millis()
    );

    Ok(())
}

/// A project referencing every image under `path`, optionally with declared
/// source symbols.
fn load_project(
    path: &Path,
    source: Option<&Path>,
    config: &IndexerConfig,
) -> anyhow::Result<Project> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "workspace".to_string());

    let project = match source {
        Some(source) => {
            let json = std::fs::read_to_string(source)
                .with_context(|| format!("reading {}", source.display()))?;
            let assembly = AssemblyDef::from_json(&json)?;
            Project::new(name, Arc::new(assembly))
        }
        None => Project::empty(name),
    };

    let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    Ok(project
        .with_id(ProjectId::for_path(&root))
        .with_references(load_references_from_dir(path, &config.image_extension)))
}

fn open_service(config: &IndexerConfig) -> anyhow::Result<Arc<SymbolTreeCacheService>> {
    let storage = SqliteStorage::new(&config.storage_path)
        .with_context(|| format!("opening {}", config.storage_path.display()))?;
    Ok(Arc::new(SymbolTreeCacheService::from_config(
        Arc::new(storage),
        config,
    )))
}

fn lazy_metadata_assembly(reference: &MetadataReference) -> LazyAssembly {
    let image = reference.image.clone();
    LazyAssembly::new(move || {
        let image = image.clone();
        async move { Arc::new(MetadataAssembly::from_image(&image)) as Arc<dyn AssemblySymbol> }
    })
}

/// Every index of the project paired with the assembly it binds against and
/// a label for output.
async fn project_indices(
    service: &SymbolTreeCacheService,
    project: &Project,
    cancel: &CancellationToken,
) -> anyhow::Result<Vec<(String, Arc<SymbolTreeInfo>, LazyAssembly)>> {
    service.update_project(project, cancel).await?;

    let mut indices = Vec::new();
    if let Some(info) = service.source_info(project.id) {
        indices.push((
            project.assembly.name().to_string(),
            info,
            LazyAssembly::ready(project.assembly.clone()),
        ));
    }
    for reference in &project.metadata_references {
        if let Some(info) = service.metadata_info(&reference.file_path) {
            indices.push((
                reference.file_path.display().to_string(),
                info,
                lazy_metadata_assembly(reference),
            ));
        }
    }
    Ok(indices)
}

#[allow(clippy::too_many_arguments)]
pub async fn find_symbols(
    config: &IndexerConfig,
    path: &Path,
    source: Option<&Path>,
    name: &str,
    ignore_case: bool,
    fuzzy: bool,
    regex: bool,
    limit: usize,
) -> anyhow::Result<()> {
    if fuzzy && name.chars().count() < config.fuzzy_min_query_len {
        println!(
            "Fuzzy queries need at least {} characters",
            config.fuzzy_min_query_len
        );
        return Ok(());
    }

    let query = if regex {
        let pattern = Regex::new(name).with_context(|| format!("invalid pattern {}", name))?;
        SearchQuery::custom(move |candidate| pattern.is_match(candidate))
    } else if fuzzy {
        SearchQuery::fuzzy(name)
    } else {
        SearchQuery::exact(name, ignore_case)
    };

    let service = open_service(config)?;
    let project = load_project(path, source, config)?;
    let cancel = CancellationToken::new();

    let mut printed = 0;
    for (label, info, assembly) in project_indices(&service, &project, &cancel).await? {
        if fuzzy {
            info.wait_for_spell_checker().await;
        }
        for index in info.find_node_indices_for(&query) {
            for symbol in info.bind_nodes(&[index], &assembly, &cancel).await? {
                if printed == limit {
                    return Ok(());
                }
                println!(
                    "{} ({}) - {}",
                    info.full_name(index),
                    symbol.kind().as_str(),
                    label
                );
                printed += 1;
            }
        }
    }

    if printed == 0 {
        println!("No symbols found for: {}", name);
    }
    Ok(())
}

pub async fn find_derived(config: &IndexerConfig, path: &Path, base: &str) -> anyhow::Result<()> {
    let service = open_service(config)?;
    let project = load_project(path, None, config)?;
    let cancel = CancellationToken::new();

    let mut found = false;
    for (label, info, assembly) in project_indices(&service, &project, &cancel).await? {
        for symbol in info.find_derived_types(base, &assembly, &cancel).await? {
            println!("{} ({}) - {}", symbol.name(), symbol.kind().as_str(), label);
            found = true;
        }
    }

    if !found {
        println!("No types derive from: {}", base);
    }
    Ok(())
}

pub async fn list_extensions(
    config: &IndexerConfig,
    path: &Path,
    receiver: Option<&str>,
    complex: bool,
) -> anyhow::Result<()> {
    let service = open_service(config)?;
    let project = load_project(path, None, config)?;
    let cancel = CancellationToken::new();

    for (label, info, _) in project_indices(&service, &project, &cancel).await? {
        if !info.contains_extension_methods() {
            continue;
        }
        if complex {
            for method in info.complex_extension_methods() {
                println!("{}.{} - {}", method.container_name, method.method_name, label);
            }
        } else if let Some(receiver) = receiver {
            for method in info.extension_methods_for(receiver) {
                println!("{}.{} - {}", method.container_name, method.method_name, label);
            }
        } else {
            for (receiver, methods) in info.receiver_type_map() {
                for method in methods {
                    println!(
                        "{}.{} ({}) - {}",
                        method.container_name, method.method_name, receiver, label
                    );
                }
            }
        }
    }
    Ok(())
}

pub async fn watch_directory(config: &IndexerConfig, path: &Path) -> anyhow::Result<()> {
    let service = open_service(config)?;
    let queue = WorkQueueHandle::from_config(service.clone(), config);

    let mut project = load_project(path, None, config)?;
    queue.enqueue_project(Arc::new(project.clone())).await?;
    queue.flush().await?;
    println!(
        "Indexed {} metadata images, watching for changes...",
        service.stats().metadata_entries
    );

    let watcher = ImageWatcher::new(path, config.debounce(), &config.image_extension)?;
    let (tx, mut rx) = mpsc::channel::<Vec<ImageEvent>>(16);
    tokio::task::spawn_blocking(move || {
        while let Some(events) = watcher.recv() {
            if tx.blocking_send(events).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            events = rx.recv() => {
                let Some(events) = events else { break };
                for event in events {
                    project.metadata_references.retain(|r| r.file_path != event.path());
                    match &event {
                        ImageEvent::Modified(file) => match MetadataReference::load(file) {
                            Ok(reference) => {
                                project.metadata_references.push(reference);
                                println!("Updated {}", file.display());
                            }
                            Err(e) => eprintln!("Error loading {}: {}", file.display(), e),
                        },
                        ImageEvent::Deleted(file) => println!("Removed {}", file.display()),
                    }
                }
                queue.enqueue_project(Arc::new(project.clone())).await?;
            }
        }
    }

    queue.shutdown().await?;
    Ok(())
}

pub fn show_stats(config: &IndexerConfig) -> anyhow::Result<()> {
    let storage = SqliteStorage::new(&config.storage_path)?;

    println!("Storage: {}", config.storage_path.display());
    println!("  Stored indices: {}", storage.stream_count()?);
    println!("  Total size: {} bytes", storage.total_bytes()?);
    println!("\nConfiguration:");
    println!("  Image extension: .{}", config.image_extension);
    println!("  Debounce: {} ms", config.debounce_ms);
    println!("  Include internal source members: {}", config.include_internal_source);
    println!("  Fuzzy minimum query length: {}", config.fuzzy_min_query_len);

    Ok(())
}
