//! Lexer integration tests

use std::path::PathBuf;

use c_macro_irgen::{FileRegistry, Lexer, StringInterner, TokenKind};

/// Helper to tokenize a source string (Newline tokens dropped)
fn tokenize(source: &str) -> (Vec<TokenKind>, StringInterner) {
    let mut files = FileRegistry::new();
    let file_id = files.register(PathBuf::from("test.h"));
    let mut interner = StringInterner::new();

    let mut kinds = Vec::new();
    {
        let mut lexer = Lexer::new(source.as_bytes(), file_id, &mut interner);
        loop {
            let token = lexer.next_token().unwrap();
            match token.kind {
                TokenKind::Eof => break,
                TokenKind::Newline => continue,
                kind => kinds.push(kind),
            }
        }
    }
    (kinds, interner)
}

#[test]
fn test_keywords_vs_identifiers() {
    let (kinds, interner) = tokenize("typedef struct mything mything_t;");
    assert!(matches!(kinds[0], TokenKind::KwTypedef));
    assert!(matches!(kinds[1], TokenKind::KwStruct));
    match (&kinds[2], &kinds[3]) {
        (TokenKind::Ident(a), TokenKind::Ident(b)) => {
            assert_eq!(interner.get(*a), "mything");
            assert_eq!(interner.get(*b), "mything_t");
        }
        other => panic!("expected two identifiers, got {:?}", other),
    }
    assert!(matches!(kinds[4], TokenKind::Semi));
}

#[test]
fn test_integer_literals() {
    let (kinds, _) = tokenize("0 42 0x1F 010 0xFFFFFFFFFFFFFFFFULL");
    assert!(matches!(kinds[0], TokenKind::IntLit(0)));
    assert!(matches!(kinds[1], TokenKind::IntLit(42)));
    assert!(matches!(kinds[2], TokenKind::IntLit(0x1F)));
    assert!(matches!(kinds[3], TokenKind::IntLit(8)));
    // 符号なしサフィックス付きは UIntLit
    assert!(matches!(kinds[4], TokenKind::UIntLit(u64::MAX)));
}

#[test]
fn test_char_and_string_literals() {
    let (kinds, _) = tokenize("'a' '\\n' \"hi\\tthere\"");
    assert!(matches!(kinds[0], TokenKind::CharLit(b'a')));
    assert!(matches!(kinds[1], TokenKind::CharLit(b'\n')));
    match &kinds[2] {
        TokenKind::StringLit(bytes) => assert_eq!(bytes, b"hi\tthere"),
        other => panic!("expected string literal, got {:?}", other),
    }
}

#[test]
fn test_multi_char_operators() {
    let (kinds, _) = tokenize("<< >> <= >= == != && || -> ... ##");
    let expected = [
        TokenKind::LtLt,
        TokenKind::GtGt,
        TokenKind::LtEq,
        TokenKind::GtEq,
        TokenKind::EqEq,
        TokenKind::BangEq,
        TokenKind::AmpAmp,
        TokenKind::PipePipe,
        TokenKind::Arrow,
        TokenKind::Ellipsis,
        TokenKind::HashHash,
    ];
    assert_eq!(kinds.len(), expected.len());
    for (got, want) in kinds.iter().zip(expected.iter()) {
        assert_eq!(got, want);
    }
}

#[test]
fn test_line_and_column_tracking() {
    let mut files = FileRegistry::new();
    let file_id = files.register(PathBuf::from("test.h"));
    let mut interner = StringInterner::new();
    let mut lexer = Lexer::new(b"int x;\nchar c;", file_id, &mut interner);

    let first = lexer.next_token().unwrap();
    assert_eq!(first.loc.line, 1);
    assert_eq!(first.loc.column, 1);

    // 2行目へ: int x; Newline char
    let mut token = first;
    while !matches!(token.kind, TokenKind::KwChar) {
        token = lexer.next_token().unwrap();
    }
    assert_eq!(token.loc.line, 2);
    assert_eq!(token.loc.column, 1);
}

#[test]
fn test_attribute_keyword() {
    let (kinds, _) = tokenize("__attribute__((packed))");
    assert!(matches!(kinds[0], TokenKind::KwAttribute));
    assert!(matches!(kinds[1], TokenKind::LParen));
}
