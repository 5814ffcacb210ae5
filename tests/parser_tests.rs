//! Declaration parser integration tests

use std::io::Write;

use tempfile::NamedTempFile;

use c_macro_irgen::{
    ArraySize, DerivedDecl, PPConfig, Parser, Preprocessor, SourceFile, StorageClass, TypeSpec,
};

/// Helper to parse source and return the translation unit with its preprocessor
fn parse_source(source: &str) -> (SourceFile, Preprocessor) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file.flush().unwrap();

    let config = PPConfig {
        include_paths: vec![],
        predefined: vec![],
        keep_comments: false,
        debug_pp: false,
    };

    let mut pp = Preprocessor::new(config);
    pp.process_file(file.path()).unwrap();

    let unit = {
        let mut parser = Parser::new(&mut pp).unwrap();
        parser.parse().unwrap()
    };
    (unit, pp)
}

fn name_of(pp: &Preprocessor, id: c_macro_irgen::InternedStr) -> String {
    pp.interner().get(id).to_string()
}

#[test]
fn test_empty_source() {
    let (unit, _pp) = parse_source("");
    assert!(unit.decls.is_empty());
}

#[test]
fn test_function_declaration() {
    let (unit, pp) = parse_source("extern int add(int a, int b);");
    assert_eq!(unit.decls.len(), 1);

    let decl = &unit.decls[0];
    assert_eq!(decl.specs.storage, Some(StorageClass::Extern));

    let declarator = &decl.declarators[0];
    assert_eq!(name_of(&pp, declarator.name.unwrap()), "add");
    match &declarator.derived[0] {
        DerivedDecl::Function(params) => {
            assert_eq!(params.params.len(), 2);
            assert!(!params.is_variadic);
        }
        other => panic!("expected function declarator, got {:?}", other),
    }
}

#[test]
fn test_variadic_function() {
    let (unit, _pp) = parse_source("int printf(const char *fmt, ...);");
    match &unit.decls[0].declarators[0].derived[0] {
        DerivedDecl::Function(params) => {
            assert_eq!(params.params.len(), 1);
            assert!(params.is_variadic);
        }
        other => panic!("expected function declarator, got {:?}", other),
    }
}

#[test]
fn test_typedef_then_use() {
    let (unit, pp) = parse_source(
        "typedef unsigned long size_type;\n\
         size_type length;\n",
    );
    assert_eq!(unit.decls.len(), 2);
    assert!(unit.decls[0].specs.is_typedef());

    // 2つ目の宣言では typedef 名が型指定子として解決される
    match &unit.decls[1].specs.type_specs[0] {
        TypeSpec::TypedefName(id) => assert_eq!(name_of(&pp, *id), "size_type"),
        other => panic!("expected typedef name, got {:?}", other),
    }
}

#[test]
fn test_typedef_struct_with_pointer_alias() {
    let (unit, pp) = parse_source("typedef struct node { struct node *next; } Node, *PNode;");
    let decl = &unit.decls[0];
    assert_eq!(decl.declarators.len(), 2);
    assert_eq!(name_of(&pp, decl.declarators[0].name.unwrap()), "Node");
    assert_eq!(name_of(&pp, decl.declarators[1].name.unwrap()), "PNode");
    assert!(matches!(
        decl.declarators[1].derived[0],
        DerivedDecl::Pointer(_)
    ));
}

#[test]
fn test_struct_members_and_bitfields() {
    let (unit, _pp) = parse_source(
        "struct flags {\n\
         \tunsigned int ready : 1;\n\
         \tunsigned int : 3;\n\
         \tint value;\n\
         };",
    );
    let spec = match &unit.decls[0].specs.type_specs[0] {
        TypeSpec::Struct(s) => s,
        other => panic!("expected struct, got {:?}", other),
    };
    let members = spec.members.as_ref().unwrap();
    assert_eq!(members.len(), 3);

    // ready : 1
    assert!(members[0].declarators[0].bitfield.is_some());
    // 無名ビットフィールド
    assert!(members[1].declarators[0].declarator.is_none());
    // 通常メンバー
    assert!(members[2].declarators[0].bitfield.is_none());
}

#[test]
fn test_packed_attribute_via_macro() {
    let (unit, _pp) = parse_source(
        "#define PACKED __attribute__((packed))\n\
         struct PACKED wire_header { int tag; };",
    );
    let spec = match &unit.decls[0].specs.type_specs[0] {
        TypeSpec::Struct(s) => s,
        other => panic!("expected struct, got {:?}", other),
    };
    assert_eq!(spec.packing, 1);
}

#[test]
fn test_enum_values_from_macros() {
    let (unit, _pp) = parse_source(
        "#define BASE 100\n\
         enum codes { OK = BASE, WARN, FAIL = BASE + 10 };",
    );
    let spec = match &unit.decls[0].specs.type_specs[0] {
        TypeSpec::Enum(e) => e,
        other => panic!("expected enum, got {:?}", other),
    };
    let enums = spec.enumerators.as_ref().unwrap();
    assert_eq!(enums[0].resolved, 100);
    assert_eq!(enums[1].resolved, 101);
    assert_eq!(enums[2].resolved, 110);
}

#[test]
fn test_function_pointer_array() {
    let (unit, _pp) = parse_source("void (*handlers[8])(int);");
    let derived = &unit.decls[0].declarators[0].derived;

    // 名前から外側へ: 配列 → ポインタ → 関数
    assert!(matches!(derived[0], DerivedDecl::Array(_)));
    assert!(matches!(derived[1], DerivedDecl::Pointer(_)));
    assert!(matches!(derived[2], DerivedDecl::Function(_)));
}

#[test]
fn test_array_sizes() {
    let (unit, _pp) = parse_source("int fixed[16];\nint open[];\n");
    match &unit.decls[0].declarators[0].derived[0] {
        DerivedDecl::Array(a) => assert!(matches!(a.size, ArraySize::Fixed(_))),
        other => panic!("expected array, got {:?}", other),
    }
    match &unit.decls[1].declarators[0].derived[0] {
        DerivedDecl::Array(a) => assert!(matches!(a.size, ArraySize::Unspecified)),
        other => panic!("expected array, got {:?}", other),
    }
}

#[test]
fn test_qualifiers() {
    let (unit, _pp) = parse_source("const volatile int reg;");
    let q = &unit.decls[0].specs.qualifiers;
    assert!(q.is_const);
    assert!(q.is_volatile);
    assert!(!q.is_restrict);
}

#[test]
fn test_inline_function_body_skipped() {
    let (unit, pp) = parse_source(
        "static inline int clamp(int v) { if (v < 0) return 0; return v; }\n\
         int after;\n",
    );
    assert_eq!(unit.decls.len(), 2);
    assert!(unit.decls[0].specs.is_inline);
    assert_eq!(
        name_of(&pp, unit.decls[1].declarators[0].name.unwrap()),
        "after"
    );
}

#[test]
fn test_forward_declaration_then_definition() {
    let (unit, _pp) = parse_source(
        "struct buf;\n\
         struct buf { char *data; };\n",
    );
    let forward = match &unit.decls[0].specs.type_specs[0] {
        TypeSpec::Struct(s) => s,
        other => panic!("expected struct, got {:?}", other),
    };
    assert!(!forward.is_complete());

    let complete = match &unit.decls[1].specs.type_specs[0] {
        TypeSpec::Struct(s) => s,
        other => panic!("expected struct, got {:?}", other),
    };
    assert!(complete.is_complete());
}

#[test]
fn test_initializers_skipped() {
    let (unit, _pp) = parse_source("int table[] = {1, 2, 3}, scalar = 4;");
    assert_eq!(unit.decls[0].declarators.len(), 2);
}
