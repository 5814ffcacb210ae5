//! Preprocessor integration tests

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tempfile::{NamedTempFile, TempDir};

use c_macro_irgen::{CompileError, PPConfig, PPError, Preprocessor, TokenKind};

/// Helper to create a preprocessor from source string
fn preprocess_with(source: &str, config: PPConfig) -> (Preprocessor, NamedTempFile) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file.flush().unwrap();

    let mut pp = Preprocessor::new(config);
    pp.process_file(file.path()).unwrap();
    (pp, file)
}

fn preprocess(source: &str) -> (Preprocessor, NamedTempFile) {
    let config = PPConfig {
        include_paths: vec![],
        predefined: vec![],
        keep_comments: false,
        debug_pp: false,
    };
    preprocess_with(source, config)
}

/// Helper to collect all tokens with their formatted text
fn collect_tokens(pp: &mut Preprocessor) -> Vec<(TokenKind, String)> {
    let mut tokens = Vec::new();
    loop {
        let token = pp.next_token().unwrap();
        if matches!(token.kind, TokenKind::Eof) {
            break;
        }
        let text = token.kind.format(pp.interner());
        tokens.push((token.kind, text));
    }
    tokens
}

fn token_texts(pp: &mut Preprocessor) -> Vec<String> {
    collect_tokens(pp).into_iter().map(|(_, t)| t).collect()
}

#[test]
fn test_simple_tokens() {
    let (mut pp, _f) = preprocess("int x;");
    let tokens = collect_tokens(&mut pp);

    assert_eq!(tokens.len(), 3);
    assert_eq!(tokens[0].1, "int");
    assert_eq!(tokens[1].1, "x");
    assert!(matches!(tokens[2].0, TokenKind::Semi));
}

#[test]
fn test_nested_function_macros() {
    let (mut pp, _f) = preprocess(
        "#define TWICE(x) ((x) * 2)\n\
         #define QUAD(x) TWICE(TWICE(x))\n\
         int n = QUAD(3);",
    );
    let texts = token_texts(&mut pp);

    // int n = ( ( ( ( 3 ) * 2 ) ) * 2 ) ;
    assert_eq!(texts[0], "int");
    assert_eq!(texts[1], "n");
    let joined = texts.join(" ");
    assert!(joined.contains("( ( ( ( 3 ) * 2 ) ) * 2 )"), "{}", joined);
}

#[test]
fn test_include_tree() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("inner.h"), "int inner_var;\n").unwrap();
    fs::write(
        dir.path().join("outer.h"),
        "#include \"inner.h\"\nint outer_var;\n",
    )
    .unwrap();
    let main_path = dir.path().join("main.c");
    fs::write(&main_path, "#include \"outer.h\"\nint main_var;\n").unwrap();

    let mut pp = Preprocessor::new(PPConfig::default());
    pp.process_file(&main_path).unwrap();
    let texts = token_texts(&mut pp);

    // Quoted includes resolve relative to the including file
    assert_eq!(
        texts,
        vec!["int", "inner_var", ";", "int", "outer_var", ";", "int", "main_var", ";"]
    );
}

#[test]
fn test_include_search_path_order() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    fs::write(first.path().join("common.h"), "int from_first;\n").unwrap();
    fs::write(second.path().join("common.h"), "int from_second;\n").unwrap();

    let config = PPConfig {
        include_paths: vec![
            PathBuf::from(first.path()),
            PathBuf::from(second.path()),
        ],
        ..Default::default()
    };
    let (mut pp, _f) = preprocess_with("#include <common.h>\n", config);
    let texts = token_texts(&mut pp);

    assert_eq!(texts[1], "from_first");
}

#[test]
fn test_include_memoization_single_definition() {
    // The same header included twice replays its expanded tokens
    // without re-executing its directives.
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("twice.h"),
        "#define MARKER 7\nint marker_slot;\n",
    )
    .unwrap();
    let main_path = dir.path().join("main.c");
    fs::write(
        &main_path,
        "#include \"twice.h\"\n#include \"twice.h\"\nint tail;\n",
    )
    .unwrap();

    let mut pp = Preprocessor::new(PPConfig::default());
    pp.process_file(&main_path).unwrap();
    let texts = token_texts(&mut pp);

    let slots = texts.iter().filter(|t| *t == "marker_slot").count();
    assert_eq!(slots, 2);
    assert_eq!(texts.last().map(String::as_str), Some(";"));
}

#[test]
fn test_include_not_found() {
    let (mut pp, _f) = {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"#include \"no_such_header.h\"\n").unwrap();
        file.flush().unwrap();
        let mut pp = Preprocessor::new(PPConfig {
            include_paths: vec![],
            ..Default::default()
        });
        pp.process_file(file.path()).unwrap();
        (pp, file)
    };

    let err = loop {
        match pp.next_token() {
            Ok(t) if matches!(t.kind, TokenKind::Eof) => panic!("expected error"),
            Ok(_) => continue,
            Err(e) => break e,
        }
    };
    assert!(matches!(
        err,
        CompileError::Preprocess {
            kind: PPError::IncludeNotFound(_),
            ..
        }
    ));
}

#[test]
fn test_predefined_macros_drive_conditionals() {
    let config = PPConfig {
        predefined: vec![
            ("VERSION".to_string(), Some("3".to_string())),
            ("FEATURE_X".to_string(), None),
        ],
        ..Default::default()
    };
    let (mut pp, _f) = preprocess_with(
        "#if defined(FEATURE_X) && VERSION >= 2\nint enabled;\n#else\nint disabled;\n#endif\n",
        config,
    );
    let texts = token_texts(&mut pp);

    assert_eq!(texts[1], "enabled");
}

#[test]
fn test_conditional_macro_interplay() {
    let (mut pp, _f) = preprocess(
        "#define LEVEL 2\n\
         #if LEVEL == 1\n\
         #define NAME one\n\
         #elif LEVEL == 2\n\
         #define NAME two\n\
         #else\n\
         #define NAME other\n\
         #endif\n\
         int NAME;",
    );
    let texts = token_texts(&mut pp);

    assert_eq!(texts, vec!["int", "two", ";"]);
}

#[test]
fn test_file_macro_in_included_header() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("who.h"), "const char *p = __FILE__;\n").unwrap();
    let main_path = dir.path().join("main.c");
    fs::write(&main_path, "#include \"who.h\"\n").unwrap();

    let mut pp = Preprocessor::new(PPConfig::default());
    pp.process_file(&main_path).unwrap();
    let texts = token_texts(&mut pp);

    // __FILE__ expands to the header's own path
    assert!(texts.iter().any(|t| t.contains("who.h")), "{:?}", texts);
}

#[test]
fn test_stringify_and_paste_through_file() {
    let (mut pp, _f) = preprocess(
        "#define TAG(n) var ## n\n\
         #define STR(x) #x\n\
         int TAG(3);\n\
         const char *s = STR(hello world);",
    );
    let texts = token_texts(&mut pp);

    assert!(texts.contains(&"var3".to_string()));
    assert!(texts.iter().any(|t| t.contains("hello world")));
}

#[test]
fn test_error_directive_in_dead_branch_ignored() {
    let (mut pp, _f) = preprocess(
        "#if 0\n#error should not fire\n#endif\nint ok;\n",
    );
    let texts = token_texts(&mut pp);

    assert_eq!(texts, vec!["int", "ok", ";"]);
}

#[test]
fn test_keep_comments_attaches_to_tokens() {
    let config = PPConfig {
        keep_comments: true,
        ..Default::default()
    };
    let (mut pp, _f) = preprocess_with("/* width in pixels */\nint width;\n", config);

    let first = pp.next_token().unwrap();
    assert!(matches!(first.kind, TokenKind::KwInt));
    assert_eq!(first.leading_comments.len(), 1);
    assert!(first.leading_comments[0].text.contains("width in pixels"));
}

#[test]
fn test_macro_table_after_processing() {
    let (mut pp, _f) = preprocess(
        "#define A 1\n#define B(x) x\n#undef A\n#define C 3\nint x;\n",
    );
    pp.collect_tokens().unwrap();

    let interner = pp.interner();
    let names: Vec<&str> = pp
        .macros()
        .user_defined()
        .map(|(name, _)| interner.get(*name))
        .collect();
    assert!(!names.contains(&"A"));
    assert!(names.contains(&"B"));
    assert!(names.contains(&"C"));
}
