//! Builds symbol tree nodes from a compilation's declared symbols.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::checksum::Checksum;
use crate::error::{Result, SymbolTreeError};
use crate::symbols::{Accessibility, AssemblySymbol, SymbolRef};
use crate::tree::{BuilderNode, NameInheritanceMap, SymbolTreeInfo, ROOT_NODE_INDEX};

#[derive(Debug, Clone, Copy)]
pub struct SourceExtractor {
    include_internal: bool,
}

impl SourceExtractor {
    /// With `include_internal` only private members are left out; without
    /// it internal members are left out as well.
    pub fn new(include_internal: bool) -> Self {
        Self { include_internal }
    }

    pub fn include_internal(&self) -> bool {
        self.include_internal
    }

    /// Identifies the accessibility mode. Mixed into source index checksums.
    pub fn mode_checksum(&self) -> Checksum {
        if self.include_internal {
            Checksum::create(b"source+internal")
        } else {
            Checksum::create(b"source")
        }
    }

    pub fn is_indexed(&self, symbol: &SymbolRef) -> bool {
        if !symbol.can_be_referenced_by_name() {
            return false;
        }
        match symbol.declared_accessibility() {
            Accessibility::Private => false,
            Accessibility::Internal => self.include_internal,
            _ => true,
        }
    }

    pub fn create_info(
        &self,
        assembly: &dyn AssemblySymbol,
        checksum: Checksum,
        cancel: &CancellationToken,
    ) -> Result<SymbolTreeInfo> {
        let nodes = self.extract(assembly, cancel)?;
        tracing::debug!(
            "Extracted {} source nodes from {}",
            nodes.len(),
            assembly.name()
        );
        Ok(SymbolTreeInfo::create(
            checksum,
            &nodes,
            &NameInheritanceMap::new(),
        ))
    }

    pub fn extract(
        &self,
        assembly: &dyn AssemblySymbol,
        cancel: &CancellationToken,
    ) -> Result<Vec<BuilderNode>> {
        let mut nodes = vec![BuilderNode::root()];
        let global = assembly.global_namespace();
        self.add_members(ROOT_NODE_INDEX, &[global], &mut nodes, cancel)?;
        Ok(nodes)
    }

    /// Adds one node per distinct member name of `containers`, then recurses
    /// into each group. Same-named members of one container (overloads,
    /// generic arities, partial namespaces) share a node.
    fn add_members(
        &self,
        parent: usize,
        containers: &[SymbolRef],
        nodes: &mut Vec<BuilderNode>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SymbolTreeError::Cancelled);
        }

        let mut groups: BTreeMap<String, Vec<SymbolRef>> = BTreeMap::new();
        for container in containers {
            if !container.kind().is_namespace_or_type() {
                continue;
            }
            for member in container.get_members() {
                if self.is_indexed(&member) {
                    groups.entry(member.name().to_string()).or_default().push(member);
                }
            }
        }

        for (name, members) in groups {
            let index = nodes.len();
            nodes.push(BuilderNode::new(name, parent as i32));
            self.add_members(index, &members, nodes, cancel)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{AssemblyDef, SymbolDef};

    fn assembly() -> AssemblyDef {
        AssemblyDef::new(
            "App",
            SymbolDef::global_namespace().with_member(
                SymbolDef::namespace("App")
                    .with_member(
                        SymbolDef::class("Service")
                            .with_member(SymbolDef::method("Run"))
                            .with_member(SymbolDef::method("Run"))
                            .with_member(SymbolDef::method(".ctor"))
                            .with_member(
                                SymbolDef::method("Helper")
                                    .with_accessibility(Accessibility::Internal),
                            )
                            .with_member(
                                SymbolDef::method("Secret").with_accessibility(Accessibility::Private),
                            ),
                    )
                    .with_member(SymbolDef::class("Hidden").with_accessibility(Accessibility::Internal)),
            ),
        )
    }

    fn names(nodes: &[BuilderNode]) -> Vec<&str> {
        nodes.iter().map(|node| node.name.as_str()).collect()
    }

    #[test]
    fn test_include_internal_excludes_private_only() {
        let nodes = SourceExtractor::new(true)
            .extract(&assembly(), &CancellationToken::new())
            .unwrap();
        let names = names(&nodes);

        assert!(names.contains(&"Helper"));
        assert!(names.contains(&"Hidden"));
        assert!(!names.contains(&"Secret"));
    }

    #[test]
    fn test_exclude_internal() {
        let nodes = SourceExtractor::new(false)
            .extract(&assembly(), &CancellationToken::new())
            .unwrap();
        let names = names(&nodes);

        assert!(!names.contains(&"Helper"));
        assert!(!names.contains(&"Hidden"));
        assert!(!names.contains(&"Secret"));
        assert!(names.contains(&"Service"));
    }

    #[test]
    fn test_unreferenceable_names_and_overloads() {
        let nodes = SourceExtractor::new(true)
            .extract(&assembly(), &CancellationToken::new())
            .unwrap();
        let names = names(&nodes);

        assert!(!names.contains(&".ctor"));
        assert_eq!(names.iter().filter(|name| **name == "Run").count(), 1);
    }

    #[test]
    fn test_parents_precede_children() {
        let nodes = SourceExtractor::new(true)
            .extract(&assembly(), &CancellationToken::new())
            .unwrap();
        assert!(nodes[0].is_root());
        for (index, node) in nodes.iter().enumerate().skip(1) {
            assert!((node.parent_index as usize) < index);
        }
    }

    #[test]
    fn test_create_info_full_names() {
        let info = SourceExtractor::new(true)
            .create_info(&assembly(), Checksum::NULL, &CancellationToken::new())
            .unwrap();
        let run = info.find_node_indices("Run", false);
        assert_eq!(run.len(), 1);
        assert_eq!(info.full_name(run[0]), "App.Service.Run");
    }

    #[test]
    fn test_cancelled_extraction() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = SourceExtractor::new(true).extract(&assembly(), &cancel);
        assert!(matches!(result, Err(SymbolTreeError::Cancelled)));
    }
}
