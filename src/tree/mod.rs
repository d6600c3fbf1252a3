//! The symbol tree index: a sorted, binary-searchable table of names with
//! parent pointers, plus inheritance and extension method side indices.

pub mod info;
pub mod node;
pub mod query;
pub mod serialization;
pub mod sort;
pub mod spell;

pub use info::{NameInheritanceMap, SymbolTreeInfo};
pub use node::{
    BuilderNode, ExtensionMethodInfo, Node, ParameterTypeInfo, TextSpan, ROOT_NODE_INDEX,
    ROOT_NODE_PARENT_INDEX,
};
pub use query::{SearchKind, SearchQuery};
pub use serialization::{deserialize, serialization_format_checksum, serialize};
pub use spell::SpellChecker;
