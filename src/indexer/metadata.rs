//! Builds symbol tree nodes from metadata images.
//!
//! Only namespaces, public (or nested public) types and extension methods
//! are indexed. Malformed rows and blobs are logged and skipped; a module
//! that cannot be read contributes nothing and the next module is processed.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use crate::checksum::Checksum;
use crate::error::{Result, SymbolTreeError};
use crate::metadata::signature::{decode_method_signature, decode_type, SignatureType};
use crate::metadata::{
    name_without_backticks, EntityHandle, MetadataImage, ModuleMetadata, NamespaceDefinition,
    ResolutionScope,
};
use crate::tree::{BuilderNode, NameInheritanceMap, ParameterTypeInfo, SymbolTreeInfo};

use super::arena::{ArenaPool, MetadataNodeArena, ROOT};

/// Bound on declaring-type and type-spec chains; longer chains are cycles.
const MAX_CHAIN_DEPTH: usize = 64;

/// Unsorted output of one extraction pass.
#[derive(Debug, Clone, Default)]
pub struct MetadataExtraction {
    pub nodes: Vec<BuilderNode>,
    pub inheritance: NameInheritanceMap,
    pub skipped_modules: usize,
}

#[derive(Debug, Default)]
pub struct MetadataExtractor {
    pool: ArenaPool,
}

impl MetadataExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_info(
        &self,
        image: &MetadataImage,
        checksum: Checksum,
        cancel: &CancellationToken,
    ) -> Result<SymbolTreeInfo> {
        let extraction = self.extract(image, cancel)?;
        Ok(SymbolTreeInfo::create(
            checksum,
            &extraction.nodes,
            &extraction.inheritance,
        ))
    }

    pub fn extract(
        &self,
        image: &MetadataImage,
        cancel: &CancellationToken,
    ) -> Result<MetadataExtraction> {
        let mut arena = self.pool.check_out();
        let mut inheritance = NameInheritanceMap::new();
        let mut skipped_modules = 0;

        for module in &image.modules {
            if cancel.is_cancelled() {
                return Err(SymbolTreeError::Cancelled);
            }

            let mut walker = ModuleWalker {
                module,
                arena: &mut *arena,
                inheritance: &mut inheritance,
            };
            if let Err(e) = walker.walk() {
                tracing::warn!("Skipping module {} of {}: {}", module.name, image.name, e);
                skipped_modules += 1;
            }
        }

        tracing::debug!(
            "Extracted {} nodes from {} ({} modules)",
            arena.len(),
            image.name,
            image.modules.len()
        );

        Ok(MetadataExtraction {
            nodes: arena.to_builder_nodes(),
            inheritance,
            skipped_modules,
        })
    }
}

struct ModuleWalker<'a> {
    module: &'a ModuleMetadata,
    arena: &'a mut MetadataNodeArena,
    inheritance: &'a mut NameInheritanceMap,
}

impl ModuleWalker<'_> {
    fn walk(&mut self) -> Result<()> {
        self.module.validate()?;
        let nested = self.module.nested_types();
        let global = self.module.global_namespace();
        self.visit_namespace(ROOT, &global, &nested)
    }

    fn visit_namespace(
        &mut self,
        node: u32,
        namespace: &NamespaceDefinition,
        nested: &BTreeMap<u32, Vec<u32>>,
    ) -> Result<()> {
        for (name, child) in &namespace.namespaces {
            let child_node = self.arena.get_or_create_child(node, name);
            self.visit_namespace(child_node, child, nested)?;
        }
        for &row in &namespace.type_definitions {
            self.visit_type(node, row, nested, 0)?;
        }
        Ok(())
    }

    fn visit_type(
        &mut self,
        parent: u32,
        row: u32,
        nested: &BTreeMap<u32, Vec<u32>>,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_CHAIN_DEPTH {
            return Err(SymbolTreeError::bad_image("nested type chain too deep"));
        }

        let module = self.module;
        let definition = module.type_definition(row)?;
        if !definition.is_public() {
            return Ok(());
        }

        let simple_name = name_without_backticks(&definition.name);
        let node = self.arena.get_or_create_child(parent, simple_name);

        let bases = definition.base_type.iter().chain(definition.interfaces.iter());
        for &base in bases {
            if let Err(e) = self.add_inheritance(base, simple_name) {
                tracing::warn!("{}: bad base type of {}: {}", module.name, definition.name, e);
            }
        }

        if definition.is_static_class() {
            for &method_row in &definition.methods {
                if let Err(e) = self.add_extension_method(node, method_row) {
                    tracing::warn!("{}: bad method in {}: {}", module.name, definition.name, e);
                }
            }
        }

        if let Some(children) = nested.get(&row) {
            for &child in children {
                self.visit_type(node, child, nested, depth + 1)?;
            }
        }
        Ok(())
    }

    fn add_extension_method(&mut self, type_node: u32, method_row: u32) -> Result<()> {
        let method = self.module.method_definition(method_row)?;
        if !method.is_public() || !method.is_static() || method.custom_attribute_count == 0 {
            return Ok(());
        }

        let signature = decode_method_signature(method.signature.as_bytes())?;
        let Some(receiver) = signature.parameter_types.first() else {
            return Ok(());
        };

        let info = parameter_type_info(self.module, receiver, 0)?;
        let method_node = self.arena.get_or_create_child(type_node, &method.name);
        self.arena.add_parameter_type_info(method_node, info);
        Ok(())
    }

    fn add_inheritance(&mut self, base: EntityHandle, derived_name: &str) -> Result<()> {
        let mut parts = Vec::new();
        base_type_name_parts(self.module, base, &mut parts, 0)?;

        let Some(&base_name) = parts.last() else {
            return Ok(());
        };
        if is_system_object(&parts) {
            return Ok(());
        }

        self.inheritance
            .entry(base_name.to_string())
            .or_default()
            .insert(derived_name.to_string());
        // Keep the base reachable by name even if this image never declares it.
        self.arena.get_or_create_path(ROOT, parts.iter().copied());
        Ok(())
    }
}

fn is_system_object(parts: &[&str]) -> bool {
    parts == ["System", "Object"]
}

/// Receiver type of an extension method, reduced to a simple name where the
/// signature alone allows it.
pub fn parameter_type_info(
    module: &ModuleMetadata,
    ty: &SignatureType,
    depth: usize,
) -> Result<ParameterTypeInfo> {
    if depth > MAX_CHAIN_DEPTH {
        return Err(SymbolTreeError::bad_image("type specification chain too deep"));
    }

    match ty {
        SignatureType::Primitive(primitive) => Ok(ParameterTypeInfo::simple(primitive.name())),
        SignatureType::Named { handle, .. } => match *handle {
            EntityHandle::TypeDefinition(row) => Ok(ParameterTypeInfo::simple(
                name_without_backticks(&module.type_definition(row)?.name),
            )),
            EntityHandle::TypeReference(row) => Ok(ParameterTypeInfo::simple(
                name_without_backticks(&module.type_reference(row)?.name),
            )),
            EntityHandle::TypeSpecification(row) => {
                let specification = module.type_specification(row)?;
                let decoded = decode_type(specification.signature.as_bytes())?;
                parameter_type_info(module, &decoded, depth + 1)
            }
        },
        SignatureType::SzArray(element) | SignatureType::Array { element, .. } => {
            Ok(parameter_type_info(module, element, depth + 1)?.into_array())
        }
        SignatureType::Pointer(inner)
        | SignatureType::ByRef(inner)
        | SignatureType::Pinned(inner)
        | SignatureType::Modified {
            unmodified: inner, ..
        } => parameter_type_info(module, inner, depth + 1),
        SignatureType::GenericInstantiation { generic, .. } => {
            parameter_type_info(module, generic, depth + 1)
        }
        SignatureType::GenericTypeParameter(_)
        | SignatureType::GenericMethodParameter(_)
        | SignatureType::FunctionPointer(_) => Ok(ParameterTypeInfo::complex()),
    }
}

/// Appends the dotted name of a base type or interface to `parts`. Generic
/// instantiations resolve to their generic type; other specifications yield
/// nothing.
fn base_type_name_parts<'m>(
    module: &'m ModuleMetadata,
    handle: EntityHandle,
    parts: &mut Vec<&'m str>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_CHAIN_DEPTH {
        return Err(SymbolTreeError::bad_image("base type chain too deep"));
    }

    match handle {
        EntityHandle::TypeDefinition(row) => {
            let definition = module.type_definition(row)?;
            match definition.declaring_type {
                Some(declaring) => {
                    base_type_name_parts(
                        module,
                        EntityHandle::TypeDefinition(declaring),
                        parts,
                        depth + 1,
                    )?;
                }
                None => push_namespace(parts, &definition.namespace),
            }
            parts.push(name_without_backticks(&definition.name));
        }
        EntityHandle::TypeReference(row) => {
            let reference = module.type_reference(row)?;
            match &reference.resolution_scope {
                ResolutionScope::TypeReference(declaring) => {
                    base_type_name_parts(
                        module,
                        EntityHandle::TypeReference(*declaring),
                        parts,
                        depth + 1,
                    )?;
                }
                ResolutionScope::Module | ResolutionScope::AssemblyReference(_) => {
                    push_namespace(parts, &reference.namespace)
                }
            }
            parts.push(name_without_backticks(&reference.name));
        }
        EntityHandle::TypeSpecification(row) => {
            let specification = module.type_specification(row)?;
            if let SignatureType::GenericInstantiation { generic, .. } =
                decode_type(specification.signature.as_bytes())?
            {
                if let SignatureType::Named { handle, .. } = *generic {
                    base_type_name_parts(module, handle, parts, depth + 1)?;
                }
            }
        }
    }
    Ok(())
}

fn push_namespace<'m>(parts: &mut Vec<&'m str>, namespace: &'m str) {
    parts.extend(namespace.split('.').filter(|segment| !segment.is_empty()));
}
