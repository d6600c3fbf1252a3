use serde::{Deserialize, Serialize};

/// Parent index stored on the root node.
pub const ROOT_NODE_PARENT_INDEX: i32 = -1;

/// Index of the root node in a sorted node table. The root has the empty
/// name, which orders before every other name.
pub const ROOT_NODE_INDEX: usize = 0;

/// Byte range into the concatenated name buffer of a `SymbolTreeInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextSpan {
    pub start: u32,
    pub length: u32,
}

impl TextSpan {
    pub fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    pub fn end(&self) -> u32 {
        self.start + self.length
    }

    pub fn as_range(&self) -> std::ops::Range<usize> {
        self.start as usize..self.end() as usize
    }
}

/// One entry of the sorted node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Node {
    pub name_span: TextSpan,
    pub parent_index: i32,
}

impl Node {
    pub fn new(name_span: TextSpan, parent_index: i32) -> Self {
        Self {
            name_span,
            parent_index,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_index == ROOT_NODE_PARENT_INDEX
    }

    pub fn parent(&self) -> Option<usize> {
        if self.is_root() {
            None
        } else {
            Some(self.parent_index as usize)
        }
    }
}

/// Type of the first parameter of an extension method, as far as it can be
/// determined from the signature alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterTypeInfo {
    /// Simple name of the receiver type. Empty for complex types.
    pub name: String,
    /// The receiver cannot be named without binding (generic parameter,
    /// function pointer, ...).
    pub is_complex_type: bool,
    pub is_array: bool,
}

impl ParameterTypeInfo {
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_complex_type: false,
            is_array: false,
        }
    }

    pub fn complex() -> Self {
        Self {
            name: String::new(),
            is_complex_type: true,
            is_array: false,
        }
    }

    pub fn into_array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Key of this receiver in the simple-type extension method map, or
    /// `None` when it belongs to the complex bucket.
    pub fn receiver_key(&self) -> Option<String> {
        if self.is_complex_type {
            None
        } else if self.is_array {
            Some(format!("{}[]", self.name))
        } else {
            Some(self.name.clone())
        }
    }
}

/// An extension method located by container and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExtensionMethodInfo {
    /// Dotted name of the declaring static class, e.g. `System.Linq.Enumerable`
    pub container_name: String,
    pub method_name: String,
}

impl ExtensionMethodInfo {
    pub fn new(container_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            method_name: method_name.into(),
        }
    }
}

/// Construction-time node. Carries the actual name; converted into a [`Node`]
/// by the sort step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderNode {
    pub name: String,
    pub parent_index: i32,
    /// Receiver types when this node names extension methods
    pub parameter_type_infos: Vec<ParameterTypeInfo>,
}

impl BuilderNode {
    pub fn root() -> Self {
        Self::new("", ROOT_NODE_PARENT_INDEX)
    }

    pub fn new(name: impl Into<String>, parent_index: i32) -> Self {
        Self {
            name: name.into(),
            parent_index,
            parameter_type_infos: Vec::new(),
        }
    }

    pub fn with_parameter_type_infos(mut self, infos: Vec<ParameterTypeInfo>) -> Self {
        self.parameter_type_infos = infos;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_index == ROOT_NODE_PARENT_INDEX
    }
}
