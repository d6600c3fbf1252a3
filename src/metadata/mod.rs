//! Metadata images.
//!
//! An image is a JSON document shaped after the ECMA-335 tables the index
//! reads: TypeDef, TypeRef, TypeSpec and MethodDef, one set per module.
//! Table references are 0-based indices. Type specifications and method
//! signatures are raw signature blobs, stored as base64 strings.

pub mod builder;
pub mod signature;
pub mod symbols;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::checksum::Checksum;
use crate::error::{Result, SymbolTreeError};
use crate::workspace::MetadataId;

pub use builder::{ImageBuilder, ModuleBuilder};
pub use signature::{MethodSignature, PrimitiveTypeCode, SignatureEncoder, SignatureType};
pub use symbols::MetadataAssembly;

pub mod type_attributes {
    pub const VISIBILITY_MASK: u32 = 0x0000_0007;
    pub const NOT_PUBLIC: u32 = 0x0000_0000;
    pub const PUBLIC: u32 = 0x0000_0001;
    pub const NESTED_PUBLIC: u32 = 0x0000_0002;
    pub const NESTED_PRIVATE: u32 = 0x0000_0003;
    pub const INTERFACE: u32 = 0x0000_0020;
    pub const ABSTRACT: u32 = 0x0000_0080;
    pub const SEALED: u32 = 0x0000_0100;

    /// Abstract and sealed: how static classes are encoded.
    pub const STATIC_CLASS: u32 = ABSTRACT | SEALED;
}

pub mod method_attributes {
    pub const MEMBER_ACCESS_MASK: u32 = 0x0007;
    pub const PRIVATE: u32 = 0x0001;
    pub const ASSEMBLY: u32 = 0x0003;
    pub const PUBLIC: u32 = 0x0006;
    pub const STATIC: u32 = 0x0010;
    pub const SPECIAL_NAME: u32 = 0x0800;
}

/// Raw signature bytes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({})", STANDARD.encode(&self.0))
    }
}

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Blob)
            .map_err(serde::de::Error::custom)
    }
}

/// Reference to a row of one of the type tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityHandle {
    TypeDefinition(u32),
    TypeReference(u32),
    TypeSpecification(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Raw name, including any `` `N `` arity suffix
    pub name: String,
    /// Empty for nested types
    #[serde(default)]
    pub namespace: String,
    pub attributes: u32,
    /// Enclosing type of a nested type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declaring_type: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<EntityHandle>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<EntityHandle>,
    /// Rows of the MethodDef table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<u32>,
}

impl TypeDefinition {
    pub fn is_nested(&self) -> bool {
        self.declaring_type.is_some()
    }

    pub fn visibility(&self) -> u32 {
        self.attributes & type_attributes::VISIBILITY_MASK
    }

    /// Public, or nested public.
    pub fn is_public(&self) -> bool {
        matches!(
            self.visibility(),
            type_attributes::PUBLIC | type_attributes::NESTED_PUBLIC
        )
    }

    pub fn is_static_class(&self) -> bool {
        self.attributes & type_attributes::STATIC_CLASS == type_attributes::STATIC_CLASS
    }

    pub fn is_interface(&self) -> bool {
        self.attributes & type_attributes::INTERFACE != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionScope {
    Module,
    AssemblyReference(String),
    /// Enclosing type of a nested type reference
    TypeReference(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeReference {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub resolution_scope: ResolutionScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSpecification {
    pub signature: Blob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDefinition {
    pub name: String,
    pub attributes: u32,
    pub signature: Blob,
    #[serde(default)]
    pub custom_attribute_count: u32,
}

impl MethodDefinition {
    pub fn is_public(&self) -> bool {
        self.attributes & method_attributes::MEMBER_ACCESS_MASK == method_attributes::PUBLIC
    }

    pub fn is_static(&self) -> bool {
        self.attributes & method_attributes::STATIC != 0
    }
}

/// Namespace hierarchy of a module, derived from type definition namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceDefinition {
    pub name: String,
    pub namespaces: BTreeMap<String, NamespaceDefinition>,
    /// Top-level type definitions directly in this namespace
    pub type_definitions: Vec<u32>,
}

impl NamespaceDefinition {
    fn child(&mut self, segment: &str) -> &mut NamespaceDefinition {
        self.namespaces
            .entry(segment.to_string())
            .or_insert_with(|| NamespaceDefinition {
                name: segment.to_string(),
                ..Default::default()
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub name: String,
    pub mvid: Uuid,
    #[serde(default)]
    pub type_definitions: Vec<TypeDefinition>,
    #[serde(default)]
    pub type_references: Vec<TypeReference>,
    #[serde(default)]
    pub type_specifications: Vec<TypeSpecification>,
    #[serde(default)]
    pub method_definitions: Vec<MethodDefinition>,
}

impl ModuleMetadata {
    pub fn type_definition(&self, row: u32) -> Result<&TypeDefinition> {
        self.type_definitions.get(row as usize).ok_or_else(|| {
            SymbolTreeError::bad_image(format!("{}: no TypeDef row {}", self.name, row))
        })
    }

    pub fn type_reference(&self, row: u32) -> Result<&TypeReference> {
        self.type_references.get(row as usize).ok_or_else(|| {
            SymbolTreeError::bad_image(format!("{}: no TypeRef row {}", self.name, row))
        })
    }

    pub fn type_specification(&self, row: u32) -> Result<&TypeSpecification> {
        self.type_specifications.get(row as usize).ok_or_else(|| {
            SymbolTreeError::bad_image(format!("{}: no TypeSpec row {}", self.name, row))
        })
    }

    pub fn method_definition(&self, row: u32) -> Result<&MethodDefinition> {
        self.method_definitions.get(row as usize).ok_or_else(|| {
            SymbolTreeError::bad_image(format!("{}: no MethodDef row {}", self.name, row))
        })
    }

    /// Checks the cross-table references the namespace and nesting
    /// structure depend on.
    pub fn validate(&self) -> Result<()> {
        let count = self.type_definitions.len() as u32;
        for definition in &self.type_definitions {
            if let Some(declaring) = definition.declaring_type {
                if declaring >= count {
                    return Err(SymbolTreeError::bad_image(format!(
                        "{}: {} is nested in missing TypeDef row {}",
                        self.name, definition.name, declaring
                    )));
                }
            }
        }
        Ok(())
    }

    /// Builds the namespace tree. Dotted namespaces become one level per
    /// segment; nested types are not listed.
    pub fn global_namespace(&self) -> NamespaceDefinition {
        let mut root = NamespaceDefinition::default();
        for (row, definition) in self.type_definitions.iter().enumerate() {
            if definition.is_nested() {
                continue;
            }

            let mut namespace = &mut root;
            for segment in definition.namespace.split('.').filter(|s| !s.is_empty()) {
                namespace = namespace.child(segment);
            }
            namespace.type_definitions.push(row as u32);
        }
        root
    }

    /// Nested type rows keyed by their declaring type row.
    pub fn nested_types(&self) -> BTreeMap<u32, Vec<u32>> {
        let mut nested: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for (row, definition) in self.type_definitions.iter().enumerate() {
            if let Some(declaring) = definition.declaring_type {
                nested.entry(declaring).or_default().push(row as u32);
            }
        }
        nested
    }
}

/// A loaded metadata file: the modules of one assembly.
#[derive(Debug, Serialize, Deserialize)]
pub struct MetadataImage {
    pub name: String,
    pub modules: Vec<ModuleMetadata>,
    #[serde(skip)]
    content_checksum: OnceCell<Checksum>,
}

impl MetadataImage {
    pub fn new(name: impl Into<String>, modules: Vec<ModuleMetadata>) -> Self {
        Self {
            name: name.into(),
            modules,
            content_checksum: OnceCell::new(),
        }
    }

    /// Parses an image. The checksum is taken over the exact input bytes.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let image: MetadataImage = serde_json::from_slice(bytes)?;
        let _ = image.content_checksum.set(Checksum::create(bytes));
        Ok(image)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json_bytes(&bytes)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn content_checksum(&self) -> Checksum {
        *self.content_checksum.get_or_init(|| {
            let bytes = serde_json::to_vec(self).unwrap_or_default();
            Checksum::create(&bytes)
        })
    }

    /// Identity of the underlying metadata, shared by every reference to it
    /// whatever its aliases.
    pub fn metadata_id(&self) -> MetadataId {
        MetadataId::new(self.content_checksum())
    }
}

/// Drops the `` `N `` generic arity suffix: `` List`1 `` becomes `List`.
pub fn name_without_backticks(name: &str) -> &str {
    match name.find('`') {
        Some(index) => &name[..index],
        None => name,
    }
}
