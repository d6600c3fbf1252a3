use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::checksum::Checksum;

use super::node::{BuilderNode, ExtensionMethodInfo, Node, ROOT_NODE_INDEX};
use super::sort::{compare_ignore_case, sort_nodes};
use super::spell::{LazySpellChecker, SpellChecker};

/// Inheritance edges keyed by simple names, as produced by extraction.
pub type NameInheritanceMap = BTreeMap<String, BTreeSet<String>>;

/// Sealed name index for one assembly snapshot.
///
/// Nodes live in one sorted table whose names are spans into a single
/// concatenated buffer. All payload is behind `Arc`, so [`with_checksum`]
/// copies are cheap and share the lazily built spell checker.
///
/// [`with_checksum`]: SymbolTreeInfo::with_checksum
#[derive(Clone)]
pub struct SymbolTreeInfo {
    checksum: Checksum,
    names: Arc<str>,
    nodes: Arc<[Node]>,
    /// Base name node -> derived name nodes
    inheritance_map: Arc<BTreeMap<u32, Vec<u32>>>,
    receiver_type_map: Arc<BTreeMap<String, Vec<ExtensionMethodInfo>>>,
    complex_extension_methods: Arc<[ExtensionMethodInfo]>,
    spell_checker: Arc<LazySpellChecker>,
}

impl SymbolTreeInfo {
    /// Sorts `unsorted` into a sealed index and derives the side indices.
    pub fn create(
        checksum: Checksum,
        unsorted: &[BuilderNode],
        inheritance: &NameInheritanceMap,
    ) -> Self {
        let sorted = sort_nodes(unsorted);
        let (receiver_type_map, complex_extension_methods) = build_extension_method_maps(unsorted);

        let mut info = Self::from_parts(
            checksum,
            sorted.concatenated_names,
            sorted.nodes,
            BTreeMap::new(),
            receiver_type_map,
            complex_extension_methods,
        );
        info.inheritance_map = Arc::new(info.index_inheritance_map(inheritance));
        info
    }

    pub(crate) fn from_parts(
        checksum: Checksum,
        names: String,
        nodes: Vec<Node>,
        inheritance_map: BTreeMap<u32, Vec<u32>>,
        receiver_type_map: BTreeMap<String, Vec<ExtensionMethodInfo>>,
        complex_extension_methods: Vec<ExtensionMethodInfo>,
    ) -> Self {
        Self {
            checksum,
            names: names.into(),
            nodes: nodes.into(),
            inheritance_map: Arc::new(inheritance_map),
            receiver_type_map: Arc::new(receiver_type_map),
            complex_extension_methods: complex_extension_methods.into(),
            spell_checker: Arc::new(LazySpellChecker::new()),
        }
    }

    /// An index containing only the root node.
    pub fn create_empty(checksum: Checksum) -> Self {
        Self::create(checksum, &[BuilderNode::root()], &NameInheritanceMap::new())
    }

    /// Same index under a different checksum. Shares every payload.
    pub fn with_checksum(&self, checksum: Checksum) -> Self {
        if checksum == self.checksum {
            return self.clone();
        }
        Self {
            checksum,
            ..self.clone()
        }
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn concatenated_names(&self) -> &str {
        &self.names
    }

    pub fn name(&self, index: usize) -> &str {
        &self.names[self.nodes[index].name_span.as_range()]
    }

    /// Dotted name of a node, e.g. `System.Collections.Generic.List`.
    pub fn full_name(&self, index: usize) -> String {
        let mut parts = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            let node = self.nodes[i];
            if node.is_root() {
                break;
            }
            parts.push(self.name(i));
            current = node.parent();
        }
        parts.reverse();
        parts.join(".")
    }

    pub fn inheritance_map(&self) -> &BTreeMap<u32, Vec<u32>> {
        &self.inheritance_map
    }

    pub fn receiver_type_map(&self) -> &BTreeMap<String, Vec<ExtensionMethodInfo>> {
        &self.receiver_type_map
    }

    pub fn complex_extension_methods(&self) -> &[ExtensionMethodInfo] {
        &self.complex_extension_methods
    }

    /// Extension methods whose receiver has the simple name `receiver_type`
    /// (`Name[]` for arrays).
    pub fn extension_methods_for(&self, receiver_type: &str) -> &[ExtensionMethodInfo] {
        self.receiver_type_map
            .get(receiver_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_extension_methods(&self) -> bool {
        !self.receiver_type_map.is_empty() || !self.complex_extension_methods.is_empty()
    }

    /// Same checksum and an identical node table.
    pub fn is_equivalent(&self, other: &SymbolTreeInfo) -> bool {
        self.checksum == other.checksum
            && self.nodes.len() == other.nodes.len()
            && self
                .nodes
                .iter()
                .zip(other.nodes.iter())
                .all(|(a, b)| a.name_span == b.name_span && a.parent_index == b.parent_index)
            && self.names == other.names
    }

    /// Any index whose name equals `name` case-insensitively.
    fn binary_search(&self, name: &str) -> Option<usize> {
        let mut low = 0usize;
        let mut high = self.nodes.len();
        while low < high {
            let mid = low + (high - low) / 2;
            match compare_ignore_case(self.name(mid), name) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// Indices of every node named `name`, in table order. With
    /// `ignore_case` the whole case-insensitive class is returned, otherwise
    /// only ordinal matches.
    pub fn find_node_indices(&self, name: &str, ignore_case: bool) -> Vec<usize> {
        let Some(position) = self.binary_search(name) else {
            return Vec::new();
        };

        let matches_class =
            |index: usize| compare_ignore_case(self.name(index), name) == std::cmp::Ordering::Equal;

        let mut start = position;
        while start > 0 && matches_class(start - 1) {
            start -= 1;
        }

        let mut results = Vec::new();
        let mut index = start;
        while index < self.nodes.len() && matches_class(index) {
            if ignore_case || self.name(index) == name {
                results.push(index);
            }
            index += 1;
        }
        results
    }

    /// Linear scan over every non-root node.
    pub fn find_node_indices_by_predicate<F>(&self, predicate: F) -> Vec<usize>
    where
        F: Fn(&str) -> bool,
    {
        (0..self.nodes.len())
            .filter(|&index| index != ROOT_NODE_INDEX && predicate(self.name(index)))
            .collect()
    }

    /// Names of types recorded as deriving from or implementing `base_name`.
    pub fn derived_type_names(&self, base_name: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .derived_type_indices(base_name)
            .into_iter()
            .map(|index| self.name(index))
            .collect();
        names.dedup();
        names
    }

    pub(crate) fn derived_type_indices(&self, base_name: &str) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .find_node_indices(base_name, false)
            .into_iter()
            .filter_map(|index| self.inheritance_map.get(&(index as u32)))
            .flatten()
            .map(|&derived| derived as usize)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    fn index_inheritance_map(&self, inheritance: &NameInheritanceMap) -> BTreeMap<u32, Vec<u32>> {
        let mut map: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for (base_name, derived_names) in inheritance {
            let Some(&base_index) = self.find_node_indices(base_name, false).first() else {
                tracing::debug!("Inheritance base {} has no node, skipping", base_name);
                continue;
            };

            // Every node carrying the derived name; binding later keeps the
            // ones that are actually types.
            let derived_indices: Vec<u32> = derived_names
                .iter()
                .flat_map(|derived_name| self.find_node_indices(derived_name, false))
                .map(|index| index as u32)
                .collect();
            if !derived_indices.is_empty() {
                map.entry(base_index as u32)
                    .or_default()
                    .extend(derived_indices);
            }
        }

        for values in map.values_mut() {
            values.sort_unstable();
            values.dedup();
        }
        map
    }

    /// The spell checker if it has finished computing. Starts the
    /// computation otherwise.
    pub fn spell_checker(&self) -> Option<&SpellChecker> {
        match self.spell_checker.get() {
            Some(checker) => Some(checker),
            None => {
                self.start_spell_checker();
                None
            }
        }
    }

    pub fn start_spell_checker(&self) {
        let names = self.names.clone();
        let nodes = self.nodes.clone();
        self.spell_checker
            .start(move || distinct_names(&names, &nodes));
    }

    /// Waits until the spell checker is available.
    pub async fn wait_for_spell_checker(&self) -> &SpellChecker {
        let names = self.names.clone();
        let nodes = self.nodes.clone();
        self.spell_checker
            .wait(move || distinct_names(&names, &nodes))
            .await
    }
}

impl fmt::Debug for SymbolTreeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTreeInfo")
            .field("checksum", &self.checksum)
            .field("nodes", &self.nodes.len())
            .field("inheritance_entries", &self.inheritance_map.len())
            .field("receiver_types", &self.receiver_type_map.len())
            .field("complex_extension_methods", &self.complex_extension_methods.len())
            .finish()
    }
}

fn distinct_names(names: &str, nodes: &[Node]) -> Vec<String> {
    let spans: BTreeSet<_> = nodes
        .iter()
        .filter(|node| node.name_span.length > 0)
        .map(|node| (node.name_span.start, node.name_span.length))
        .collect();
    spans
        .into_iter()
        .map(|(start, length)| names[start as usize..(start + length) as usize].to_string())
        .collect()
}

fn builder_full_name(nodes: &[BuilderNode], index: usize) -> String {
    let mut parts = Vec::new();
    let mut current = index;
    while !nodes[current].is_root() {
        parts.push(nodes[current].name.as_str());
        current = nodes[current].parent_index as usize;
    }
    parts.reverse();
    parts.join(".")
}

fn build_extension_method_maps(
    unsorted: &[BuilderNode],
) -> (BTreeMap<String, Vec<ExtensionMethodInfo>>, Vec<ExtensionMethodInfo>) {
    let mut receiver_type_map: BTreeMap<String, Vec<ExtensionMethodInfo>> = BTreeMap::new();
    let mut complex = Vec::new();

    for node in unsorted {
        if node.parameter_type_infos.is_empty() || node.is_root() {
            continue;
        }

        let container_name = builder_full_name(unsorted, node.parent_index as usize);
        for info in &node.parameter_type_infos {
            let method = ExtensionMethodInfo::new(container_name.clone(), node.name.clone());
            match info.receiver_key() {
                Some(key) => receiver_type_map.entry(key).or_default().push(method),
                None => complex.push(method),
            }
        }
    }

    for methods in receiver_type_map.values_mut() {
        methods.sort();
        methods.dedup();
    }
    complex.sort();
    complex.dedup();

    (receiver_type_map, complex)
}
