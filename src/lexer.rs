//! 字句解析器
//!
//! 単一バッファ用のレキサー。プリプロセッサは入力スタック上に同等の
//! スキャナを持つが、マクロ本体や `-D` 値など既にメモリ上にある断片の
//! トークン化にはこちらを使う。
//!
//! 2つのモードを持つ:
//! - 通常モード: 空白をスキップする
//! - ディレクティブ定義モード (`return_spaces`): 空白を `Space` トークン
//!   として返す。`#define FOO(x)`（関数マクロ）と `#define FOO (x)`
//!   （本体が `(x)` のオブジェクトマクロ）の区別に必要。

use crate::error::{CompileError, LexError, Result};
use crate::intern::StringInterner;
use crate::source::{FileId, SourceLocation};
use crate::token::{Comment, CommentKind, Token, TokenKind};

/// レキサー
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    file_id: FileId,
    interner: &'a mut StringInterner,
    /// スペース/タブをトークンとして返すかどうか
    return_spaces: bool,
}

impl<'a> Lexer<'a> {
    /// 新しいレキサーを作成
    pub fn new(source: &'a [u8], file_id: FileId, interner: &'a mut StringInterner) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            column: 1,
            file_id,
            interner,
            return_spaces: false,
        }
    }

    /// 空白をトークンとして返すかどうかを設定
    pub fn set_return_spaces(&mut self, enabled: bool) {
        self.return_spaces = enabled;
    }

    /// 現在位置を取得
    pub fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.file_id, self.line, self.column)
    }

    /// 次のトークンを取得
    pub fn next_token(&mut self) -> Result<Token> {
        let mut leading_comments = Vec::new();

        loop {
            if self.return_spaces {
                if let Some(c) = self.peek() {
                    if c == b' ' || c == b'\t' {
                        let loc = self.current_location();
                        // 連続する空白は1つのSpaceトークンにまとめる
                        while let Some(c) = self.peek() {
                            if c == b' ' || c == b'\t' {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                        return Ok(Token::with_comments(TokenKind::Space, loc, leading_comments));
                    }
                }
            } else {
                self.skip_whitespace();
            }

            match (self.peek(), self.peek_n(1)) {
                (Some(b'/'), Some(b'/')) => {
                    let comment = self.scan_line_comment();
                    leading_comments.push(comment);
                }
                (Some(b'/'), Some(b'*')) => {
                    let comment = self.scan_block_comment()?;
                    leading_comments.push(comment);
                }
                _ => break,
            }
        }

        let loc = self.current_location();
        let kind = self.scan_token_kind()?;

        Ok(Token::with_comments(kind, loc, leading_comments))
    }

    /// 現在の文字をピーク
    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    /// n文字先をピーク
    fn peek_n(&self, n: usize) -> Option<u8> {
        self.source.get(self.pos + n).copied()
    }

    /// 1文字進める
    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// 空白をスキップ（改行は含まない - ディレクティブ終端のため）
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c == b' ' || c == b'\t' || c == b'\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// 行コメントをスキャン
    fn scan_line_comment(&mut self) -> Comment {
        let loc = self.current_location();
        self.advance(); // /
        self.advance(); // /

        let start = self.pos;
        while self.peek().is_some_and(|c| c != b'\n') {
            self.advance();
        }
        let text = String::from_utf8_lossy(&self.source[start..self.pos]).to_string();

        Comment::new(CommentKind::Line, text, loc)
    }

    /// ブロックコメントをスキャン
    fn scan_block_comment(&mut self) -> Result<Comment> {
        let loc = self.current_location();
        self.advance(); // /
        self.advance(); // *

        let start = self.pos;
        loop {
            match (self.peek(), self.peek_n(1)) {
                (Some(b'*'), Some(b'/')) => {
                    let text = String::from_utf8_lossy(&self.source[start..self.pos]).to_string();
                    self.advance(); // *
                    self.advance(); // /
                    return Ok(Comment::new(CommentKind::Block, text, loc));
                }
                (Some(_), _) => {
                    self.advance();
                }
                (None, _) => {
                    return Err(CompileError::Lex {
                        loc,
                        kind: LexError::UnterminatedComment,
                    });
                }
            }
        }
    }

    /// トークン種別をスキャン
    fn scan_token_kind(&mut self) -> Result<TokenKind> {
        let Some(c) = self.peek() else {
            return Ok(TokenKind::Eof);
        };

        match c {
            // 改行は独立したトークン（ディレクティブの終端）
            b'\n' => {
                self.advance();
                Ok(TokenKind::Newline)
            }

            // 識別子またはキーワード
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.scan_identifier(),

            // 数値リテラル
            b'0'..=b'9' => self.scan_number(),

            // 文字列リテラル
            b'"' => self.scan_string(),

            // 文字リテラル
            b'\'' => self.scan_char(),

            // 演算子・区切り記号
            b'+' => self.scan_follow(&[(b'+', TokenKind::PlusPlus)], TokenKind::Plus),
            b'-' => self.scan_follow(
                &[(b'-', TokenKind::MinusMinus), (b'>', TokenKind::Arrow)],
                TokenKind::Minus,
            ),
            b'*' => {
                self.advance();
                Ok(TokenKind::Star)
            }
            b'/' => {
                self.advance();
                Ok(TokenKind::Slash)
            }
            b'%' => {
                self.advance();
                Ok(TokenKind::Percent)
            }
            b'&' => self.scan_follow(&[(b'&', TokenKind::AmpAmp)], TokenKind::Amp),
            b'|' => self.scan_follow(&[(b'|', TokenKind::PipePipe)], TokenKind::Pipe),
            b'^' => {
                self.advance();
                Ok(TokenKind::Caret)
            }
            b'~' => {
                self.advance();
                Ok(TokenKind::Tilde)
            }
            b'!' => self.scan_follow(&[(b'=', TokenKind::BangEq)], TokenKind::Bang),
            b'<' => self.scan_lt(),
            b'>' => self.scan_gt(),
            b'=' => self.scan_follow(&[(b'=', TokenKind::EqEq)], TokenKind::Eq),
            b'?' => {
                self.advance();
                Ok(TokenKind::Question)
            }
            b':' => {
                self.advance();
                Ok(TokenKind::Colon)
            }
            b'.' => self.scan_dot(),
            b',' => {
                self.advance();
                Ok(TokenKind::Comma)
            }
            b';' => {
                self.advance();
                Ok(TokenKind::Semi)
            }
            b'(' => {
                self.advance();
                Ok(TokenKind::LParen)
            }
            b')' => {
                self.advance();
                Ok(TokenKind::RParen)
            }
            b'[' => {
                self.advance();
                Ok(TokenKind::LBracket)
            }
            b']' => {
                self.advance();
                Ok(TokenKind::RBracket)
            }
            b'{' => {
                self.advance();
                Ok(TokenKind::LBrace)
            }
            b'}' => {
                self.advance();
                Ok(TokenKind::RBrace)
            }
            b'#' => self.scan_follow(&[(b'#', TokenKind::HashHash)], TokenKind::Hash),

            _ => {
                let loc = self.current_location();
                self.advance();
                Err(CompileError::Lex {
                    loc,
                    kind: LexError::InvalidChar(c as char),
                })
            }
        }
    }

    /// 1文字目を消費し、後続文字で複合演算子を判定
    fn scan_follow(
        &mut self,
        continuations: &[(u8, TokenKind)],
        default: TokenKind,
    ) -> Result<TokenKind> {
        self.advance();
        for (next, kind) in continuations {
            if self.peek() == Some(*next) {
                self.advance();
                return Ok(kind.clone());
            }
        }
        Ok(default)
    }

    fn scan_lt(&mut self) -> Result<TokenKind> {
        self.advance();
        match self.peek() {
            Some(b'<') => {
                self.advance();
                Ok(TokenKind::LtLt)
            }
            Some(b'=') => {
                self.advance();
                Ok(TokenKind::LtEq)
            }
            _ => Ok(TokenKind::Lt),
        }
    }

    fn scan_gt(&mut self) -> Result<TokenKind> {
        self.advance();
        match self.peek() {
            Some(b'>') => {
                self.advance();
                Ok(TokenKind::GtGt)
            }
            Some(b'=') => {
                self.advance();
                Ok(TokenKind::GtEq)
            }
            _ => Ok(TokenKind::Gt),
        }
    }

    fn scan_dot(&mut self) -> Result<TokenKind> {
        self.advance();
        if self.peek() == Some(b'.') && self.peek_n(1) == Some(b'.') {
            self.advance();
            self.advance();
            Ok(TokenKind::Ellipsis)
        } else {
            Ok(TokenKind::Dot)
        }
    }

    /// 識別子またはキーワードをスキャン
    fn scan_identifier(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.advance();
            } else {
                break;
            }
        }

        let text = std::str::from_utf8(&self.source[start..self.pos])
            .unwrap_or_default();

        if let Some(kw) = TokenKind::from_keyword(text) {
            Ok(kw)
        } else {
            let interned = self.interner.intern(text);
            Ok(TokenKind::Ident(interned))
        }
    }

    /// 数値リテラルをスキャン
    ///
    /// 16進/8進/2進/10進/浮動小数点を単一経路で処理し、サフィックスを
    /// 取り除いた上で値を即時パースする。
    fn scan_number(&mut self) -> Result<TokenKind> {
        let loc = self.current_location();
        let start = self.pos;

        if self.peek() == Some(b'0') {
            self.advance();
            match self.peek() {
                Some(b'x') | Some(b'X') => {
                    self.advance();
                    let digits = self.pos;
                    while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                        self.advance();
                    }
                    if self.pos == digits {
                        return Err(CompileError::Lex {
                            loc,
                            kind: LexError::InvalidNumber("0x".to_string()),
                        });
                    }
                    return self.finish_integer(start, loc);
                }
                Some(b'b') | Some(b'B') => {
                    self.advance();
                    let digits = self.pos;
                    while matches!(self.peek(), Some(b'0') | Some(b'1')) {
                        self.advance();
                    }
                    if self.pos == digits {
                        return Err(CompileError::Lex {
                            loc,
                            kind: LexError::InvalidNumber("0b".to_string()),
                        });
                    }
                    return self.finish_integer(start, loc);
                }
                Some(b'0'..=b'7') => {
                    while self.peek().is_some_and(|c| matches!(c, b'0'..=b'7')) {
                        self.advance();
                    }
                    return self.finish_integer(start, loc);
                }
                Some(b'.') | Some(b'e') | Some(b'E') => {
                    return self.scan_float_from(start, loc);
                }
                _ => {
                    return self.finish_integer(start, loc);
                }
            }
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        if matches!(self.peek(), Some(b'.') | Some(b'e') | Some(b'E')) {
            return self.scan_float_from(start, loc);
        }

        self.finish_integer(start, loc)
    }

    /// 浮動小数点数をスキャン
    fn scan_float_from(&mut self, start: usize, loc: SourceLocation) -> Result<TokenKind> {
        if self.peek() == Some(b'.') {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            self.advance();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.advance();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        if matches!(self.peek(), Some(b'f') | Some(b'F') | Some(b'l') | Some(b'L')) {
            self.advance();
        }

        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or_default();
        let value: f64 = text
            .trim_end_matches(|c| c == 'f' || c == 'F' || c == 'l' || c == 'L')
            .parse()
            .map_err(|_| CompileError::Lex {
                loc: loc.clone(),
                kind: LexError::InvalidNumber(text.to_string()),
            })?;

        Ok(TokenKind::FloatLit(value))
    }

    /// 整数リテラルの仕上げ（サフィックス処理）
    fn finish_integer(&mut self, start: usize, loc: SourceLocation) -> Result<TokenKind> {
        let digits_end = self.pos;

        let mut is_unsigned = false;
        let mut long_count = 0u32;
        loop {
            match self.peek() {
                Some(b'u') | Some(b'U') => {
                    is_unsigned = true;
                    self.advance();
                }
                Some(b'l') | Some(b'L') => {
                    long_count += 1;
                    self.advance();
                }
                _ => break,
            }
        }

        let text = std::str::from_utf8(&self.source[start..digits_end]).unwrap_or_default();
        let (num_text, radix) = if let Some(hex) = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
        {
            (hex, 16)
        } else if let Some(bin) = text
            .strip_prefix("0b")
            .or_else(|| text.strip_prefix("0B"))
        {
            (bin, 2)
        } else if text.len() > 1 && text.starts_with('0') {
            (&text[1..], 8)
        } else {
            (text, 10)
        };

        if is_unsigned || long_count >= 2 {
            let value = u64::from_str_radix(num_text, radix).map_err(|_| CompileError::Lex {
                loc: loc.clone(),
                kind: LexError::InvalidNumber(text.to_string()),
            })?;
            Ok(TokenKind::UIntLit(value))
        } else {
            let value = i64::from_str_radix(num_text, radix).map_err(|_| CompileError::Lex {
                loc: loc.clone(),
                kind: LexError::InvalidNumber(text.to_string()),
            })?;
            Ok(TokenKind::IntLit(value))
        }
    }

    /// 文字列リテラルをスキャン
    fn scan_string(&mut self) -> Result<TokenKind> {
        let loc = self.current_location();
        self.advance(); // "

        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.advance();
                    return Ok(TokenKind::StringLit(bytes));
                }
                Some(b'\\') => {
                    self.advance();
                    let escaped = self.scan_escape_sequence(&loc)?;
                    bytes.push(escaped);
                }
                Some(b'\n') | None => {
                    return Err(CompileError::Lex {
                        loc,
                        kind: LexError::UnterminatedString,
                    });
                }
                Some(c) => {
                    self.advance();
                    bytes.push(c);
                }
            }
        }
    }

    /// 文字リテラルをスキャン
    fn scan_char(&mut self) -> Result<TokenKind> {
        let loc = self.current_location();
        self.advance(); // '

        let value = match self.peek() {
            Some(b'\'') => {
                return Err(CompileError::Lex {
                    loc,
                    kind: LexError::EmptyCharLit,
                });
            }
            Some(b'\\') => {
                self.advance();
                self.scan_escape_sequence(&loc)?
            }
            Some(c) => {
                self.advance();
                c
            }
            None => {
                return Err(CompileError::Lex {
                    loc,
                    kind: LexError::UnterminatedChar,
                });
            }
        };

        if self.peek() != Some(b'\'') {
            return Err(CompileError::Lex {
                loc,
                kind: LexError::UnterminatedChar,
            });
        }
        self.advance(); // '

        Ok(TokenKind::CharLit(value))
    }

    /// エスケープシーケンスをスキャン
    fn scan_escape_sequence(&mut self, loc: &SourceLocation) -> Result<u8> {
        match self.peek() {
            Some(b'n') => {
                self.advance();
                Ok(b'\n')
            }
            Some(b't') => {
                self.advance();
                Ok(b'\t')
            }
            Some(b'r') => {
                self.advance();
                Ok(b'\r')
            }
            Some(b'\\') => {
                self.advance();
                Ok(b'\\')
            }
            Some(b'\'') => {
                self.advance();
                Ok(b'\'')
            }
            Some(b'"') => {
                self.advance();
                Ok(b'"')
            }
            Some(b'a') => {
                self.advance();
                Ok(0x07)
            }
            Some(b'b') => {
                self.advance();
                Ok(0x08)
            }
            Some(b'f') => {
                self.advance();
                Ok(0x0C)
            }
            Some(b'v') => {
                self.advance();
                Ok(0x0B)
            }
            Some(b'x') => {
                self.advance();
                self.scan_hex_escape(loc)
            }
            Some(c @ b'0'..=b'7') => self.scan_octal_escape(c),
            Some(c) => Err(CompileError::Lex {
                loc: loc.clone(),
                kind: LexError::InvalidEscape(c as char),
            }),
            None => Err(CompileError::Lex {
                loc: loc.clone(),
                kind: LexError::UnterminatedString,
            }),
        }
    }

    /// 16進エスケープをスキャン
    fn scan_hex_escape(&mut self, loc: &SourceLocation) -> Result<u8> {
        let mut value = 0u8;
        let mut count = 0;

        while let Some(c) = self.peek() {
            if let Some(digit) = (c as char).to_digit(16) {
                value = value.wrapping_mul(16).wrapping_add(digit as u8);
                self.advance();
                count += 1;
                if count >= 2 {
                    break;
                }
            } else {
                break;
            }
        }

        if count == 0 {
            return Err(CompileError::Lex {
                loc: loc.clone(),
                kind: LexError::InvalidEscape('x'),
            });
        }

        Ok(value)
    }

    /// 8進エスケープをスキャン
    fn scan_octal_escape(&mut self, first: u8) -> Result<u8> {
        let mut value = first - b'0';
        self.advance();

        for _ in 0..2 {
            if let Some(c @ b'0'..=b'7') = self.peek() {
                value = value * 8 + (c - b'0');
                self.advance();
            } else {
                break;
            }
        }

        Ok(value)
    }
}
