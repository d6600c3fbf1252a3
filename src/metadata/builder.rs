//! Programmatic construction of metadata images.

use uuid::Uuid;

use super::signature::{encode_method_signature, encode_type, MethodSignature, SignatureType};
use super::{
    EntityHandle, MetadataImage, MethodDefinition, ModuleMetadata, ResolutionScope,
    TypeDefinition, TypeReference, TypeSpecification,
};

pub struct ImageBuilder {
    name: String,
    modules: Vec<ModuleMetadata>,
}

impl ImageBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modules: Vec::new(),
        }
    }

    pub fn with_module(mut self, module: ModuleMetadata) -> Self {
        self.modules.push(module);
        self
    }

    pub fn build(self) -> MetadataImage {
        MetadataImage::new(self.name, self.modules)
    }
}

/// Appends rows to the tables of one module. Row-adding methods return the
/// new row (or its handle) for use in later rows.
pub struct ModuleBuilder {
    module: ModuleMetadata,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            module: ModuleMetadata {
                name: name.into(),
                mvid: Uuid::new_v4(),
                type_definitions: Vec::new(),
                type_references: Vec::new(),
                type_specifications: Vec::new(),
                method_definitions: Vec::new(),
            },
        }
    }

    pub fn with_mvid(mut self, mvid: Uuid) -> Self {
        self.module.mvid = mvid;
        self
    }

    pub fn add_type(&mut self, namespace: &str, name: &str, attributes: u32) -> u32 {
        self.push_type(TypeDefinition {
            name: name.to_string(),
            namespace: namespace.to_string(),
            attributes,
            declaring_type: None,
            base_type: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
        })
    }

    pub fn add_nested_type(&mut self, declaring_type: u32, name: &str, attributes: u32) -> u32 {
        self.push_type(TypeDefinition {
            name: name.to_string(),
            namespace: String::new(),
            attributes,
            declaring_type: Some(declaring_type),
            base_type: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
        })
    }

    fn push_type(&mut self, definition: TypeDefinition) -> u32 {
        self.module.type_definitions.push(definition);
        (self.module.type_definitions.len() - 1) as u32
    }

    fn type_mut(&mut self, row: u32) -> Option<&mut TypeDefinition> {
        self.module.type_definitions.get_mut(row as usize)
    }

    pub fn set_base_type(&mut self, row: u32, base_type: EntityHandle) -> &mut Self {
        if let Some(definition) = self.type_mut(row) {
            definition.base_type = Some(base_type);
        }
        self
    }

    pub fn add_interface(&mut self, row: u32, interface: EntityHandle) -> &mut Self {
        if let Some(definition) = self.type_mut(row) {
            definition.interfaces.push(interface);
        }
        self
    }

    pub fn add_type_reference(
        &mut self,
        namespace: &str,
        name: &str,
        resolution_scope: ResolutionScope,
    ) -> EntityHandle {
        self.module.type_references.push(TypeReference {
            name: name.to_string(),
            namespace: namespace.to_string(),
            resolution_scope,
        });
        EntityHandle::TypeReference((self.module.type_references.len() - 1) as u32)
    }

    pub fn add_type_specification(&mut self, signature: &SignatureType) -> EntityHandle {
        self.add_raw_type_specification(encode_type(signature))
    }

    /// Adds a type specification with an arbitrary (possibly malformed) blob.
    pub fn add_raw_type_specification(&mut self, blob: Vec<u8>) -> EntityHandle {
        self.module.type_specifications.push(TypeSpecification {
            signature: blob.into(),
        });
        EntityHandle::TypeSpecification((self.module.type_specifications.len() - 1) as u32)
    }

    pub fn add_method(
        &mut self,
        declaring_type: u32,
        name: &str,
        attributes: u32,
        signature: &MethodSignature,
        custom_attribute_count: u32,
    ) -> u32 {
        self.add_raw_method(
            declaring_type,
            name,
            attributes,
            encode_method_signature(signature),
            custom_attribute_count,
        )
    }

    pub fn add_raw_method(
        &mut self,
        declaring_type: u32,
        name: &str,
        attributes: u32,
        signature: Vec<u8>,
        custom_attribute_count: u32,
    ) -> u32 {
        self.module.method_definitions.push(MethodDefinition {
            name: name.to_string(),
            attributes,
            signature: signature.into(),
            custom_attribute_count,
        });
        let row = (self.module.method_definitions.len() - 1) as u32;
        if let Some(definition) = self.type_mut(declaring_type) {
            definition.methods.push(row);
        }
        row
    }

    pub fn build(self) -> ModuleMetadata {
        self.module
    }
}
