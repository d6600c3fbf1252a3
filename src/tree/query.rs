//! Name lookups over a [`SymbolTreeInfo`], bound back to live symbols.
//!
//! Matching only touches the node table. The assembly is materialized once a
//! lookup has at least one matching node, so a miss never forces symbol
//! creation. Nodes whose path no longer exists in the assembly bind to
//! nothing and are dropped.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, SymbolTreeError};
use crate::symbols::{AssemblySymbol, LazyAssembly, SymbolRef};

use super::info::SymbolTreeInfo;

pub type NamePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum SearchKind {
    Exact,
    ExactIgnoreCase,
    Fuzzy,
    Custom(NamePredicate),
}

impl fmt::Debug for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchKind::Exact => write!(f, "Exact"),
            SearchKind::ExactIgnoreCase => write!(f, "ExactIgnoreCase"),
            SearchKind::Fuzzy => write!(f, "Fuzzy"),
            SearchKind::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub name: String,
    pub kind: SearchKind,
}

impl SearchQuery {
    pub fn exact(name: impl Into<String>, ignore_case: bool) -> Self {
        Self {
            name: name.into(),
            kind: if ignore_case {
                SearchKind::ExactIgnoreCase
            } else {
                SearchKind::Exact
            },
        }
    }

    pub fn fuzzy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SearchKind::Fuzzy,
        }
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            name: String::new(),
            kind: SearchKind::Custom(Arc::new(predicate)),
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(SymbolTreeError::Cancelled)
    } else {
        Ok(())
    }
}

async fn materialize(
    assembly: &LazyAssembly,
    cancel: &CancellationToken,
) -> Result<Arc<dyn AssemblySymbol>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SymbolTreeError::Cancelled),
        assembly = assembly.get() => Ok(assembly),
    }
}

impl SymbolTreeInfo {
    /// Node indices matching `query`, in table order.
    ///
    /// Fuzzy queries return nothing until the spell checker is ready; asking
    /// starts building it.
    pub fn find_node_indices_for(&self, query: &SearchQuery) -> Vec<usize> {
        match &query.kind {
            SearchKind::Exact => self.find_node_indices(&query.name, false),
            SearchKind::ExactIgnoreCase => self.find_node_indices(&query.name, true),
            SearchKind::Fuzzy => self.fuzzy_node_indices(&query.name),
            SearchKind::Custom(predicate) => {
                self.find_node_indices_by_predicate(|name| predicate(name))
            }
        }
    }

    fn fuzzy_node_indices(&self, name: &str) -> Vec<usize> {
        let Some(checker) = self.spell_checker() else {
            tracing::debug!("Spell checker not ready, fuzzy query for {} skipped", name);
            return Vec::new();
        };

        let mut indices: Vec<usize> = checker
            .find_similar_words(name)
            .iter()
            .flat_map(|word| self.find_node_indices(word, true))
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    pub async fn find(
        &self,
        query: &SearchQuery,
        assembly: &LazyAssembly,
        cancel: &CancellationToken,
    ) -> Result<Vec<SymbolRef>> {
        check_cancelled(cancel)?;
        let indices = self.find_node_indices_for(query);
        self.bind_nodes(&indices, assembly, cancel).await
    }

    pub async fn find_exact(
        &self,
        name: &str,
        ignore_case: bool,
        assembly: &LazyAssembly,
        cancel: &CancellationToken,
    ) -> Result<Vec<SymbolRef>> {
        self.find(&SearchQuery::exact(name, ignore_case), assembly, cancel)
            .await
    }

    pub async fn find_fuzzy(
        &self,
        name: &str,
        assembly: &LazyAssembly,
        cancel: &CancellationToken,
    ) -> Result<Vec<SymbolRef>> {
        self.find(&SearchQuery::fuzzy(name), assembly, cancel).await
    }

    pub async fn find_by_predicate<F>(
        &self,
        predicate: F,
        assembly: &LazyAssembly,
        cancel: &CancellationToken,
    ) -> Result<Vec<SymbolRef>>
    where
        F: Fn(&str) -> bool,
    {
        check_cancelled(cancel)?;
        let indices = self.find_node_indices_by_predicate(predicate);
        self.bind_nodes(&indices, assembly, cancel).await
    }

    /// Binds every type recorded as deriving from `base_name`.
    pub async fn find_derived_types(
        &self,
        base_name: &str,
        assembly: &LazyAssembly,
        cancel: &CancellationToken,
    ) -> Result<Vec<SymbolRef>> {
        check_cancelled(cancel)?;
        let indices = self.derived_type_indices(base_name);
        let mut symbols = self.bind_nodes(&indices, assembly, cancel).await?;
        symbols.retain(|symbol| symbol.kind().is_type());
        Ok(symbols)
    }

    /// Binds the given nodes in order. Either every node is bound or the
    /// call fails with `Cancelled`.
    pub async fn bind_nodes(
        &self,
        indices: &[usize],
        assembly: &LazyAssembly,
        cancel: &CancellationToken,
    ) -> Result<Vec<SymbolRef>> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        let assembly = materialize(assembly, cancel).await?;
        let root = assembly.global_namespace();

        let mut results = Vec::new();
        for &index in indices {
            check_cancelled(cancel)?;
            results.extend(self.bind(index, &root));
        }
        Ok(results)
    }

    /// Resolves the path of node `index` member by member from `root`.
    pub fn bind(&self, index: usize, root: &SymbolRef) -> Vec<SymbolRef> {
        let mut path = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            let node = self.nodes()[i];
            if node.is_root() {
                break;
            }
            path.push(self.name(i));
            current = node.parent();
        }

        let Some((last, containers)) = path.split_first() else {
            return Vec::new();
        };

        let mut scope = vec![root.clone()];
        for name in containers.iter().rev() {
            scope = scope
                .iter()
                .flat_map(|symbol| symbol.get_members_named(name))
                .filter(|member| member.kind().is_namespace_or_type())
                .collect();
            if scope.is_empty() {
                return Vec::new();
            }
        }

        scope
            .iter()
            .flat_map(|symbol| symbol.get_members_named(last))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use crate::symbols::{AssemblyDef, Symbol, SymbolDef, SymbolKind};
    use crate::tree::info::NameInheritanceMap;
    use crate::tree::node::BuilderNode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn assembly() -> Arc<dyn AssemblySymbol> {
        Arc::new(AssemblyDef::new(
            "Lib",
            SymbolDef::global_namespace().with_member(
                SymbolDef::namespace("N")
                    .with_member(SymbolDef::class("C").with_member(SymbolDef::method("Run")))
                    .with_member(SymbolDef::class("Other")),
            ),
        ))
    }

    fn info() -> SymbolTreeInfo {
        let nodes = vec![
            BuilderNode::root(),
            BuilderNode::new("N", 0),
            BuilderNode::new("C", 1),
            BuilderNode::new("Run", 2),
            BuilderNode::new("Other", 1),
            BuilderNode::new("Gone", 1),
        ];
        SymbolTreeInfo::create(Checksum::NULL, &nodes, &NameInheritanceMap::new())
    }

    #[tokio::test]
    async fn test_find_exact_binds_symbol() {
        let lazy = LazyAssembly::ready(assembly());
        let cancel = CancellationToken::new();

        let found = info().find_exact("C", false, &lazy, &cancel).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "C");
        assert_eq!(found[0].kind(), SymbolKind::Class);

        let wrong_case = info().find_exact("c", false, &lazy, &cancel).await.unwrap();
        assert!(wrong_case.is_empty());

        let ignore_case = info().find_exact("c", true, &lazy, &cancel).await.unwrap();
        assert_eq!(ignore_case.len(), 1);
    }

    #[tokio::test]
    async fn test_nested_member_binds() {
        let lazy = LazyAssembly::ready(assembly());
        let found = info()
            .find_exact("Run", false, &lazy, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind(), SymbolKind::Method);
    }

    #[tokio::test]
    async fn test_stale_node_binds_to_nothing() {
        let lazy = LazyAssembly::ready(assembly());
        let found = info()
            .find_exact("Gone", false, &lazy, &CancellationToken::new())
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_miss_does_not_materialize_assembly() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let lazy = LazyAssembly::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { assembly() }
        });

        let found = info()
            .find_exact("Missing", false, &lazy, &CancellationToken::new())
            .await
            .unwrap();
        assert!(found.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_query_returns_error() {
        let lazy = LazyAssembly::ready(assembly());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = info().find_exact("C", false, &lazy, &cancel).await;
        assert!(matches!(result, Err(SymbolTreeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_predicate_results_follow_table_order() {
        let lazy = LazyAssembly::ready(assembly());
        let found = info()
            .find_by_predicate(|name| name.len() > 1, &lazy, &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<&str> = found.iter().map(|symbol| symbol.name()).collect();
        assert_eq!(names, vec!["Other", "Run"]);
    }

    #[tokio::test]
    async fn test_fuzzy_after_spell_checker_ready() {
        let info = info();
        let lazy = LazyAssembly::ready(assembly());
        let cancel = CancellationToken::new();

        info.wait_for_spell_checker().await;
        let found = info.find_fuzzy("Otehr", &lazy, &cancel).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "Other");
    }

    #[test]
    fn test_fuzzy_without_runtime_returns_nothing() {
        let info = info();
        assert!(info
            .find_node_indices_for(&SearchQuery::fuzzy("Other"))
            .is_empty());
    }

    #[test]
    fn test_bind_skips_non_container_path() {
        let info = info();
        let root: SymbolRef = assembly().global_namespace();
        let index = info.find_node_indices("Run", false)[0];
        assert_eq!(info.bind(index, &root).len(), 1);
        assert!(info.bind(0, &root).is_empty());
    }
}
