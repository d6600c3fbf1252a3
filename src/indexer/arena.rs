//! Scratch node storage for metadata extraction.
//!
//! Each extraction pass checks an arena out of an [`ArenaPool`], fills it,
//! converts it to builder nodes and checks it back in. The arena is reset on
//! check-in so its allocations are reused by the next pass.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use crate::tree::{BuilderNode, ParameterTypeInfo, ROOT_NODE_PARENT_INDEX};

pub const ROOT: u32 = 0;

#[derive(Debug)]
struct ArenaNode {
    name: String,
    parent: u32,
    parameter_type_infos: Vec<ParameterTypeInfo>,
}

/// Name tree where children with the same name under the same parent are
/// merged into one node. Nodes are appended, so a parent always precedes
/// its children.
#[derive(Debug, Default)]
pub struct MetadataNodeArena {
    nodes: Vec<ArenaNode>,
    children: HashMap<(u32, String), u32>,
    checked_out: bool,
}

impl MetadataNodeArena {
    fn reset(&mut self) {
        self.nodes.clear();
        self.children.clear();
        self.nodes.push(ArenaNode {
            name: String::new(),
            parent: ROOT,
            parameter_type_infos: Vec::new(),
        });
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn name(&self, node: u32) -> &str {
        &self.nodes[node as usize].name
    }

    pub fn child(&self, parent: u32, name: &str) -> Option<u32> {
        self.children.get(&(parent, name.to_string())).copied()
    }

    pub fn get_or_create_child(&mut self, parent: u32, name: &str) -> u32 {
        if let Some(existing) = self.child(parent, name) {
            return existing;
        }

        let index = self.nodes.len() as u32;
        self.nodes.push(ArenaNode {
            name: name.to_string(),
            parent,
            parameter_type_infos: Vec::new(),
        });
        self.children.insert((parent, name.to_string()), index);
        index
    }

    /// Walks (creating as needed) a dotted path below `parent`.
    pub fn get_or_create_path<'a, I>(&mut self, parent: u32, parts: I) -> u32
    where
        I: IntoIterator<Item = &'a str>,
    {
        parts
            .into_iter()
            .fold(parent, |node, part| self.get_or_create_child(node, part))
    }

    pub fn add_parameter_type_info(&mut self, node: u32, info: ParameterTypeInfo) {
        let infos = &mut self.nodes[node as usize].parameter_type_infos;
        if !infos.contains(&info) {
            infos.push(info);
        }
    }

    pub fn to_builder_nodes(&self) -> Vec<BuilderNode> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let parent_index = if index == ROOT as usize {
                    ROOT_NODE_PARENT_INDEX
                } else {
                    node.parent as i32
                };
                BuilderNode::new(node.name.clone(), parent_index)
                    .with_parameter_type_infos(node.parameter_type_infos.clone())
            })
            .collect()
    }
}

/// Reusable arenas. Checking out never blocks: an empty pool hands out a
/// fresh arena.
#[derive(Debug, Default)]
pub struct ArenaPool {
    free: Mutex<Vec<MetadataNodeArena>>,
}

impl ArenaPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_out(&self) -> PooledArena<'_> {
        let mut arena = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        debug_assert!(!arena.checked_out, "arena checked out twice");
        arena.checked_out = true;
        arena.reset();

        PooledArena { pool: self, arena }
    }

    fn check_in(&self, mut arena: MetadataNodeArena) {
        debug_assert!(arena.checked_out, "arena checked in without checkout");
        arena.checked_out = false;
        arena.reset();
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(arena);
    }

    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// An arena borrowed from an [`ArenaPool`], returned on drop.
pub struct PooledArena<'a> {
    pool: &'a ArenaPool,
    arena: MetadataNodeArena,
}

impl Deref for PooledArena<'_> {
    type Target = MetadataNodeArena;

    fn deref(&self) -> &Self::Target {
        &self.arena
    }
}

impl DerefMut for PooledArena<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.arena
    }
}

impl Drop for PooledArena<'_> {
    fn drop(&mut self) {
        let arena = std::mem::take(&mut self.arena);
        self.pool.check_in(arena);
    }
}
