use std::collections::BTreeMap;

use crate::symbols::{AssemblyDef, AssemblySymbol, SymbolDef, SymbolKind, SymbolRef};

use super::{name_without_backticks, MetadataImage, ModuleMetadata, NamespaceDefinition};

/// Symbols declared by a metadata image: namespaces, public types (nested
/// included) and their public methods. Namespaces spread over several
/// modules are merged.
#[derive(Debug, Clone)]
pub struct MetadataAssembly {
    assembly: AssemblyDef,
}

#[derive(Default)]
struct NamespaceBuilder {
    namespaces: BTreeMap<String, NamespaceBuilder>,
    types: Vec<SymbolDef>,
}

impl NamespaceBuilder {
    fn merge(
        &mut self,
        module: &ModuleMetadata,
        namespace: &NamespaceDefinition,
        nested: &BTreeMap<u32, Vec<u32>>,
    ) {
        for (name, child) in &namespace.namespaces {
            self.namespaces
                .entry(name.clone())
                .or_default()
                .merge(module, child, nested);
        }
        self.types.extend(
            namespace
                .type_definitions
                .iter()
                .filter_map(|&row| type_symbol(module, row, nested, 0)),
        );
    }

    fn into_symbol(self, name: &str) -> SymbolDef {
        let namespace = if name.is_empty() {
            SymbolDef::global_namespace()
        } else {
            SymbolDef::namespace(name)
        };
        let namespaces: Vec<SymbolDef> = self
            .namespaces
            .into_iter()
            .map(|(child_name, child)| child.into_symbol(&child_name))
            .collect();
        namespace.with_members(namespaces).with_members(self.types)
    }
}

fn arity(raw_name: &str) -> u32 {
    raw_name
        .rsplit_once('`')
        .and_then(|(_, digits)| digits.parse().ok())
        .unwrap_or(0)
}

fn type_symbol(
    module: &ModuleMetadata,
    row: u32,
    nested: &BTreeMap<u32, Vec<u32>>,
    depth: usize,
) -> Option<SymbolDef> {
    let definition = module.type_definitions.get(row as usize)?;
    // Declaring-type cycles only occur in corrupt images.
    if !definition.is_public() || depth > 64 {
        return None;
    }

    let kind = if definition.is_interface() {
        SymbolKind::Interface
    } else {
        SymbolKind::Class
    };
    let mut symbol = SymbolDef::new(name_without_backticks(&definition.name), kind)
        .with_arity(arity(&definition.name));

    for &method_row in &definition.methods {
        if let Some(method) = module.method_definitions.get(method_row as usize) {
            if method.is_public() {
                symbol = symbol.with_member(SymbolDef::method(method.name.clone()));
            }
        }
    }

    if let Some(children) = nested.get(&row) {
        symbol = symbol.with_members(
            children
                .iter()
                .filter_map(|&child| type_symbol(module, child, nested, depth + 1)),
        );
    }

    Some(symbol)
}

impl MetadataAssembly {
    pub fn from_image(image: &MetadataImage) -> Self {
        let mut root = NamespaceBuilder::default();
        for module in &image.modules {
            let nested = module.nested_types();
            root.merge(module, &module.global_namespace(), &nested);
        }

        Self {
            assembly: AssemblyDef::new(image.name.clone(), root.into_symbol("")),
        }
    }
}

impl AssemblySymbol for MetadataAssembly {
    fn name(&self) -> &str {
        self.assembly.name()
    }

    fn global_namespace(&self) -> SymbolRef {
        self.assembly.global_namespace()
    }
}
