//! The symbol-query surface the index binds against.
//!
//! Index construction and queries only ever read symbols through [`Symbol`]
//! and [`AssemblySymbol`]. [`model`] provides a plain in-memory
//! implementation used for source assemblies and by
//! [`crate::metadata::MetadataAssembly`].

pub mod lazy;
pub mod model;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use lazy::LazyAssembly;
pub use model::{AssemblyDef, SymbolDef};

pub type SymbolRef = Arc<dyn Symbol>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Namespace,
    Class,
    Struct,
    Interface,
    Enum,
    Delegate,
    Method,
    Property,
    Field,
    Event,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Namespace => "namespace",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::Enum => "enum",
            SymbolKind::Delegate => "delegate",
            SymbolKind::Method => "method",
            SymbolKind::Property => "property",
            SymbolKind::Field => "field",
            SymbolKind::Event => "event",
        }
    }

    pub fn is_namespace(&self) -> bool {
        matches!(self, SymbolKind::Namespace)
    }

    pub fn is_type(&self) -> bool {
        matches!(
            self,
            SymbolKind::Class
                | SymbolKind::Struct
                | SymbolKind::Interface
                | SymbolKind::Enum
                | SymbolKind::Delegate
        )
    }

    pub fn is_namespace_or_type(&self) -> bool {
        self.is_namespace() || self.is_type()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accessibility {
    NotApplicable,
    Private,
    ProtectedAndInternal,
    Protected,
    Internal,
    ProtectedOrInternal,
    Public,
}

impl Accessibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Accessibility::NotApplicable => "not_applicable",
            Accessibility::Private => "private",
            Accessibility::ProtectedAndInternal => "private protected",
            Accessibility::Protected => "protected",
            Accessibility::Internal => "internal",
            Accessibility::ProtectedOrInternal => "protected internal",
            Accessibility::Public => "public",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Accessibility::Public),
            "private" => Some(Accessibility::Private),
            "protected" => Some(Accessibility::Protected),
            "internal" => Some(Accessibility::Internal),
            "protected internal" => Some(Accessibility::ProtectedOrInternal),
            "private protected" => Some(Accessibility::ProtectedAndInternal),
            _ => None,
        }
    }
}

/// A named program entity. Non-container symbols return no members.
pub trait Symbol: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn kind(&self) -> SymbolKind;
    fn declared_accessibility(&self) -> Accessibility;

    /// False for names that cannot be looked up by identifier
    /// (constructors, operators, compiler-synthesized members).
    fn can_be_referenced_by_name(&self) -> bool;

    fn get_members(&self) -> Vec<SymbolRef>;

    fn get_members_named(&self, name: &str) -> Vec<SymbolRef> {
        self.get_members()
            .into_iter()
            .filter(|member| member.name() == name)
            .collect()
    }
}

pub trait AssemblySymbol: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn global_namespace(&self) -> SymbolRef;
}

/// Whether `name` is a plain identifier (letter or underscore, then letters,
/// digits or underscores).
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("List"));
        assert!(is_identifier("_field1"));
        assert!(is_identifier("Ünïcode"));
        assert!(!is_identifier(""));
        assert!(!is_identifier(".ctor"));
        assert!(!is_identifier("<Main>$"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("IFoo.Bar"));
    }

    #[test]
    fn test_kind_classification() {
        assert!(SymbolKind::Namespace.is_namespace_or_type());
        assert!(SymbolKind::Delegate.is_type());
        assert!(!SymbolKind::Method.is_namespace_or_type());
    }

    #[test]
    fn test_accessibility_from_str() {
        assert_eq!(Accessibility::from_str("public"), Some(Accessibility::Public));
        assert_eq!(
            Accessibility::from_str("protected internal"),
            Some(Accessibility::ProtectedOrInternal)
        );
        assert_eq!(Accessibility::from_str("friend"), None);
    }
}
