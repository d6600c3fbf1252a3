//! End-to-end lookups over indices built from metadata images and source
//! assemblies.

use std::sync::Arc;

use symbol_tree_index::checksum::Checksum;
use symbol_tree_index::metadata::signature::{MethodSignature, PrimitiveTypeCode, SignatureType};
use symbol_tree_index::metadata::{
    method_attributes, type_attributes, EntityHandle, ImageBuilder, MetadataAssembly,
    MetadataImage, ModuleBuilder,
};
use symbol_tree_index::symbols::{
    Accessibility, AssemblyDef, AssemblySymbol, LazyAssembly, Symbol, SymbolDef, SymbolKind,
};
use symbol_tree_index::tree::{serialize, ExtensionMethodInfo};
use symbol_tree_index::{MetadataExtractor, SourceExtractor, SymbolTreeInfo};
use tokio_util::sync::CancellationToken;

fn metadata_info(image: &MetadataImage) -> SymbolTreeInfo {
    MetadataExtractor::new()
        .create_info(image, Checksum::create(b"image"), &CancellationToken::new())
        .unwrap()
}

fn metadata_assembly(image: &MetadataImage) -> LazyAssembly {
    LazyAssembly::ready(Arc::new(MetadataAssembly::from_image(image)))
}

fn source_info(assembly: &AssemblyDef, include_internal: bool) -> SymbolTreeInfo {
    SourceExtractor::new(include_internal)
        .create_info(assembly, Checksum::create(b"source"), &CancellationToken::new())
        .unwrap()
}

fn names(symbols: &[Arc<dyn Symbol>]) -> Vec<String> {
    symbols.iter().map(|symbol| symbol.name().to_string()).collect()
}

mod lookups {
    use super::*;

    fn single_class_image() -> MetadataImage {
        let mut module = ModuleBuilder::new("n.dll");
        module.add_type("N", "C", type_attributes::PUBLIC);
        ImageBuilder::new("N").with_module(module.build()).build()
    }

    #[tokio::test]
    async fn test_exact_lookup_binds_type() {
        let image = single_class_image();
        let info = metadata_info(&image);
        let assembly = metadata_assembly(&image);
        let cancel = CancellationToken::new();

        let found = info.find_exact("C", false, &assembly, &cancel).await.unwrap();
        assert_eq!(names(&found), vec!["C"]);
        assert_eq!(found[0].kind(), SymbolKind::Class);

        let wrong_case = info.find_exact("c", false, &assembly, &cancel).await.unwrap();
        assert!(wrong_case.is_empty());

        let ignore_case = info.find_exact("c", true, &assembly, &cancel).await.unwrap();
        assert_eq!(names(&ignore_case), vec!["C"]);
    }

    #[tokio::test]
    async fn test_stale_node_fails_to_bind() {
        let version1 = AssemblyDef::new(
            "App",
            SymbolDef::global_namespace().with_member(
                SymbolDef::namespace("App")
                    .with_member(SymbolDef::class("X"))
                    .with_member(SymbolDef::class("Y")),
            ),
        );
        let version2 = AssemblyDef::new(
            "App",
            SymbolDef::global_namespace()
                .with_member(SymbolDef::namespace("App").with_member(SymbolDef::class("Y"))),
        );
        let info = source_info(&version1, true);
        let current: Arc<dyn AssemblySymbol> = Arc::new(version2);
        let cancel = CancellationToken::new();

        let stale = info
            .find_exact("X", false, &LazyAssembly::ready(current.clone()), &cancel)
            .await
            .unwrap();
        assert!(stale.is_empty());

        let root = current.global_namespace();
        let x = info.find_node_indices("X", false);
        assert!(info.bind(x[0], &root).is_empty());

        let still_there = info
            .find_exact("Y", false, &LazyAssembly::ready(current), &cancel)
            .await
            .unwrap();
        assert_eq!(names(&still_there), vec!["Y"]);
    }

    #[tokio::test]
    async fn test_derived_types_bind_against_metadata() {
        let mut module = ModuleBuilder::new("shapes.dll");
        let shape = module.add_type("Shapes", "Shape", type_attributes::PUBLIC | type_attributes::ABSTRACT);
        let circle = module.add_type("Shapes", "Circle", type_attributes::PUBLIC);
        let square = module.add_type("Shapes", "Square", type_attributes::PUBLIC);
        module.set_base_type(circle, EntityHandle::TypeDefinition(shape));
        module.set_base_type(square, EntityHandle::TypeDefinition(shape));
        let image = ImageBuilder::new("Shapes").with_module(module.build()).build();

        let info = metadata_info(&image);
        let derived = info
            .find_derived_types("Shape", &metadata_assembly(&image), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(names(&derived), vec!["Circle", "Square"]);
    }

    #[tokio::test]
    async fn test_derived_types_with_shared_names() {
        let mut module = ModuleBuilder::new("lib.dll");
        let base = module.add_type("Lib", "Base", type_attributes::PUBLIC);
        let first = module.add_type("N", "C", type_attributes::PUBLIC);
        let second = module.add_type("M", "C", type_attributes::PUBLIC);
        let clashing = module.add_type("X", "Foo", type_attributes::PUBLIC);
        module.add_type("Foo", "Thing", type_attributes::PUBLIC);
        for derived in [first, second, clashing] {
            module.set_base_type(derived, EntityHandle::TypeDefinition(base));
        }
        let image = ImageBuilder::new("Lib").with_module(module.build()).build();

        let info = metadata_info(&image);
        let derived = info
            .find_derived_types("Base", &metadata_assembly(&image), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(names(&derived), vec!["C", "C", "Foo"]);
        assert!(derived.iter().all(|symbol| symbol.kind() == SymbolKind::Class));
    }

    #[test]
    fn test_binary_search_matches_linear_scan() {
        let assembly = AssemblyDef::new(
            "App",
            SymbolDef::global_namespace()
                .with_member(
                    SymbolDef::namespace("One")
                        .with_member(SymbolDef::class("Foo"))
                        .with_member(SymbolDef::class("foo"))
                        .with_member(SymbolDef::class("Bar")),
                )
                .with_member(
                    SymbolDef::namespace("Two")
                        .with_member(SymbolDef::class("FOO"))
                        .with_member(SymbolDef::class("Foo").with_member(SymbolDef::method("foo"))),
                ),
        );
        let info = source_info(&assembly, true);

        for query in ["Foo", "foo", "FOO", "fOo", "Bar", "bar", "Missing"] {
            let exact: Vec<usize> = (1..info.node_count())
                .filter(|&i| info.name(i) == query)
                .collect();
            let folded: Vec<usize> = (1..info.node_count())
                .filter(|&i| info.name(i).to_lowercase() == query.to_lowercase())
                .collect();

            assert_eq!(info.find_node_indices(query, false), exact, "exact {}", query);
            assert_eq!(info.find_node_indices(query, true), folded, "ignore case {}", query);
        }
    }
}

mod extraction {
    use super::*;

    const EXTENSION: u32 = method_attributes::PUBLIC | method_attributes::STATIC;

    #[test]
    fn test_extension_method_buckets() {
        let mut module = ModuleBuilder::new("ext.dll");
        let ext = module.add_type(
            "Lib.Extensions",
            "IntExtensions",
            type_attributes::PUBLIC | type_attributes::STATIC_CLASS,
        );
        let returns_bool = |receiver| {
            MethodSignature::new(SignatureType::Primitive(PrimitiveTypeCode::Boolean), vec![receiver])
        };
        module.add_method(
            ext,
            "IsFoo",
            EXTENSION,
            &returns_bool(SignatureType::Primitive(PrimitiveTypeCode::Int32)),
            1,
        );
        module.add_method(
            ext,
            "IsAnything",
            EXTENSION,
            &returns_bool(SignatureType::GenericMethodParameter(0)).with_generic_parameters(1),
            1,
        );
        let info = metadata_info(&ImageBuilder::new("Lib").with_module(module.build()).build());

        assert!(info.contains_extension_methods());
        assert_eq!(
            info.extension_methods_for("Int32"),
            &[ExtensionMethodInfo::new("Lib.Extensions.IntExtensions", "IsFoo")]
        );
        assert_eq!(
            info.complex_extension_methods(),
            &[ExtensionMethodInfo::new("Lib.Extensions.IntExtensions", "IsAnything")]
        );
        assert!(info.extension_methods_for("String").is_empty());
    }

    #[test]
    fn test_generic_arity_is_stripped() {
        let mut module = ModuleBuilder::new("generic.dll");
        module.add_type("N", "Foo`2", type_attributes::PUBLIC);
        module.add_type("N", "Bar", type_attributes::PUBLIC);
        let info = metadata_info(&ImageBuilder::new("N").with_module(module.build()).build());

        let foo = info.find_node_indices("Foo", false);
        assert_eq!(foo.len(), 1);
        assert_eq!(info.full_name(foo[0]), "N.Foo");
        assert_eq!(info.find_node_indices("Bar", false).len(), 1);
    }

    #[test]
    fn test_accessibility_modes() {
        let assembly = AssemblyDef::new(
            "App",
            SymbolDef::global_namespace().with_member(
                SymbolDef::namespace("App").with_member(
                    SymbolDef::class("Service")
                        .with_member(SymbolDef::method("Open"))
                        .with_member(SymbolDef::method("Shared").with_accessibility(Accessibility::Internal))
                        .with_member(SymbolDef::method("Hidden").with_accessibility(Accessibility::Private)),
                ),
            ),
        );

        let with_internal = source_info(&assembly, true);
        assert_eq!(with_internal.find_node_indices("Shared", false).len(), 1);
        assert!(with_internal.find_node_indices("Hidden", false).is_empty());

        let public_only = source_info(&assembly, false);
        assert_eq!(public_only.find_node_indices("Open", false).len(), 1);
        assert!(public_only.find_node_indices("Shared", false).is_empty());
        assert!(public_only.find_node_indices("Hidden", false).is_empty());
    }

    #[test]
    fn test_builds_are_bit_identical() {
        let build = || {
            let mut module = ModuleBuilder::new("m.dll");
            module.add_type("B", "item", type_attributes::PUBLIC);
            module.add_type("A", "Item", type_attributes::PUBLIC);
            module.add_type("A.Inner", "Item`1", type_attributes::PUBLIC);
            ImageBuilder::new("Lib").with_module(module.build()).build()
        };

        // Separate images differ only in module version ids, which are not indexed.
        let first = metadata_info(&build());
        let second = metadata_info(&build());

        assert_eq!(first.nodes(), second.nodes());
        assert_eq!(first.concatenated_names(), second.concatenated_names());
        assert_eq!(serialize(&first), serialize(&second));
    }
}
