//! トークンソースの抽象化
//!
//! 宣言パーサはプリプロセッサの出力を直接読むのが基本だが、
//! 既にメモリ上にあるトークン列（テストや部分パース）からも読めるように
//! 供給側をトレイトで抽象化する。

use crate::error::Result;
use crate::intern::StringInterner;
use crate::source::{FileRegistry, SourceLocation};
use crate::token::{Token, TokenKind};

/// トークンを供給するソースの抽象化
pub trait TokenSource {
    /// 次のトークンを取得
    fn next_token(&mut self) -> Result<Token>;

    /// StringInterner への参照を取得
    fn interner(&self) -> &StringInterner;

    /// StringInterner への可変参照を取得
    fn interner_mut(&mut self) -> &mut StringInterner;

    /// FileRegistry への参照を取得
    fn files(&self) -> &FileRegistry;
}

/// 固定トークン列からトークンを供給する実装
pub struct TokenSlice {
    tokens: Vec<Token>,
    pos: usize,
    interner: StringInterner,
    files: FileRegistry,
    eof_loc: SourceLocation,
}

impl TokenSlice {
    /// 新しい TokenSlice を作成
    pub fn new(tokens: Vec<Token>, interner: StringInterner, files: FileRegistry) -> Self {
        let eof_loc = tokens.last().map(|t| t.loc.clone()).unwrap_or_default();

        Self {
            tokens,
            pos: 0,
            interner,
            files,
            eof_loc,
        }
    }

    /// 残りトークン数を取得
    pub fn remaining(&self) -> usize {
        self.tokens.len().saturating_sub(self.pos)
    }
}

impl TokenSource for TokenSlice {
    fn next_token(&mut self) -> Result<Token> {
        if self.pos < self.tokens.len() {
            let token = self.tokens[self.pos].clone();
            self.pos += 1;
            Ok(token)
        } else {
            Ok(Token::new(TokenKind::Eof, self.eof_loc.clone()))
        }
    }

    fn interner(&self) -> &StringInterner {
        &self.interner
    }

    fn interner_mut(&mut self) -> &mut StringInterner {
        &mut self.interner
    }

    fn files(&self) -> &FileRegistry {
        &self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_token_slice_empty() {
        let interner = StringInterner::new();
        let mut files = FileRegistry::new();
        files.register(PathBuf::from("test.h"));

        let mut slice = TokenSlice::new(vec![], interner, files);

        let token = slice.next_token().unwrap();
        assert!(matches!(token.kind, TokenKind::Eof));
        // EOF後も安定してEOFを返す
        let token = slice.next_token().unwrap();
        assert!(matches!(token.kind, TokenKind::Eof));
    }

    #[test]
    fn test_token_slice_tokens() {
        let mut interner = StringInterner::new();
        let mut files = FileRegistry::new();
        let file_id = files.register(PathBuf::from("test.h"));
        let loc = SourceLocation::new(file_id, 1, 1);

        let n = interner.intern("n");
        let tokens = vec![
            Token::new(TokenKind::Ident(n), loc.clone()),
            Token::new(TokenKind::Plus, loc.clone()),
            Token::new(TokenKind::IntLit(42), loc.clone()),
        ];

        let mut slice = TokenSlice::new(tokens, interner, files);

        assert_eq!(slice.remaining(), 3);

        assert!(matches!(slice.next_token().unwrap().kind, TokenKind::Ident(_)));
        assert!(matches!(slice.next_token().unwrap().kind, TokenKind::Plus));
        assert!(matches!(slice.next_token().unwrap().kind, TokenKind::IntLit(42)));
        assert!(matches!(slice.next_token().unwrap().kind, TokenKind::Eof));

        assert_eq!(slice.remaining(), 0);
    }
}
