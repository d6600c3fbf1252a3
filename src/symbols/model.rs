use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{is_identifier, Accessibility, AssemblySymbol, Symbol, SymbolKind, SymbolRef};

/// In-memory symbol. Immutable once shared; builder methods consume `self`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolDef {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(default = "default_accessibility")]
    pub accessibility: Accessibility,
    /// Number of generic type parameters
    #[serde(default)]
    pub arity: u32,
    /// Overrides the identifier check done by `can_be_referenced_by_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenceable: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Arc<SymbolDef>>,
}

fn default_accessibility() -> Accessibility {
    Accessibility::Public
}

impl SymbolDef {
    pub fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        Self {
            name: name.into(),
            kind,
            accessibility: Accessibility::Public,
            arity: 0,
            referenceable: None,
            members: Vec::new(),
        }
    }

    pub fn global_namespace() -> Self {
        Self::new("", SymbolKind::Namespace).with_accessibility(Accessibility::NotApplicable)
    }

    pub fn namespace(name: impl Into<String>) -> Self {
        Self::new(name, SymbolKind::Namespace).with_accessibility(Accessibility::NotApplicable)
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::new(name, SymbolKind::Class)
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name, SymbolKind::Interface)
    }

    pub fn method(name: impl Into<String>) -> Self {
        Self::new(name, SymbolKind::Method)
    }

    pub fn with_accessibility(mut self, accessibility: Accessibility) -> Self {
        self.accessibility = accessibility;
        self
    }

    pub fn with_arity(mut self, arity: u32) -> Self {
        self.arity = arity;
        self
    }

    pub fn with_referenceable(mut self, referenceable: bool) -> Self {
        self.referenceable = Some(referenceable);
        self
    }

    pub fn with_member(mut self, member: SymbolDef) -> Self {
        self.members.push(Arc::new(member));
        self
    }

    pub fn with_members(mut self, members: impl IntoIterator<Item = SymbolDef>) -> Self {
        self.members.extend(members.into_iter().map(Arc::new));
        self
    }
}

impl Symbol for SymbolDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SymbolKind {
        self.kind
    }

    fn declared_accessibility(&self) -> Accessibility {
        self.accessibility
    }

    fn can_be_referenced_by_name(&self) -> bool {
        self.referenceable.unwrap_or_else(|| is_identifier(&self.name))
    }

    fn get_members(&self) -> Vec<SymbolRef> {
        self.members
            .iter()
            .map(|member| member.clone() as SymbolRef)
            .collect()
    }

    fn get_members_named(&self, name: &str) -> Vec<SymbolRef> {
        self.members
            .iter()
            .filter(|member| member.name == name)
            .map(|member| member.clone() as SymbolRef)
            .collect()
    }
}

/// In-memory assembly: a name plus a global namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyDef {
    pub name: String,
    pub global_namespace: Arc<SymbolDef>,
}

impl AssemblyDef {
    pub fn new(name: impl Into<String>, global_namespace: SymbolDef) -> Self {
        Self {
            name: name.into(),
            global_namespace: Arc::new(global_namespace),
        }
    }

    /// Loads an assembly description from JSON.
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl AssemblySymbol for AssemblyDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn global_namespace(&self) -> SymbolRef {
        self.global_namespace.clone()
    }
}
