use crate::source::{FileRegistry, SourceLocation};
use crate::token::TokenKind;
use std::fmt;
use std::path::PathBuf;

/// エラー表示用のロケーション（ファイル名解決付き）
pub struct DisplayLocation<'a> {
    pub loc: &'a SourceLocation,
    pub files: &'a FileRegistry,
}

impl<'a> fmt::Display for DisplayLocation<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.files.get_path(self.loc.file_id);
        write!(f, "{}:{}:{}", path.display(), self.loc.line, self.loc.column)
    }
}

/// レキサーエラー
#[derive(Debug)]
pub enum LexError {
    /// 閉じられていないブロックコメント
    UnterminatedComment,
    /// 閉じられていない文字列リテラル
    UnterminatedString,
    /// 閉じられていない文字リテラル
    UnterminatedChar,
    /// 空の文字リテラル
    EmptyCharLit,
    /// 不正な文字
    InvalidChar(char),
    /// 不正なエスケープシーケンス
    InvalidEscape(char),
    /// 不正な数値リテラル
    InvalidNumber(String),
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnterminatedComment => write!(f, "unterminated block comment"),
            LexError::UnterminatedString => write!(f, "unterminated string literal"),
            LexError::UnterminatedChar => write!(f, "unterminated character literal"),
            LexError::EmptyCharLit => write!(f, "empty character literal"),
            LexError::InvalidChar(c) => write!(f, "invalid character: {:?}", c),
            LexError::InvalidEscape(c) => write!(f, "invalid escape sequence: \\{}", c),
            LexError::InvalidNumber(s) => write!(f, "invalid number: {}", s),
        }
    }
}

/// プリプロセッサエラー
#[derive(Debug)]
pub enum PPError {
    /// 不正なディレクティブ
    InvalidDirective(String),
    /// インクルードファイルが見つからない
    IncludeNotFound(PathBuf),
    /// 対応する#ifがない#endif
    UnmatchedEndif,
    /// 対応する#endifがない
    MissingEndif,
    /// 対応する#ifがない#else
    UnmatchedElse,
    /// #elifが#elseの後に出現
    ElifAfterElse,
    /// 関数マクロの引数の数が一致しない
    MacroArgCount {
        name: String,
        expected: usize,
        found: usize,
    },
    /// ビルトイン（コールバック）マクロに引数リストが渡された
    CallbackWithArgs(String),
    /// 展開要求されたマクロが未定義
    MacroNotDefined(String),
    /// 不正なマクロパラメータリスト
    InvalidMacroParams(String),
    /// #if の条件式エラー
    InvalidCondition(String),
    /// #error ディレクティブに到達
    ErrorDirective(String),
    /// ファイル読み込みエラー
    IoError(PathBuf, String),
}

impl fmt::Display for PPError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PPError::InvalidDirective(s) => write!(f, "invalid directive: #{}", s),
            PPError::IncludeNotFound(p) => write!(f, "include file not found: {}", p.display()),
            PPError::UnmatchedEndif => write!(f, "#endif without matching #if"),
            PPError::MissingEndif => write!(f, "missing #endif"),
            PPError::UnmatchedElse => write!(f, "#else without matching #if"),
            PPError::ElifAfterElse => write!(f, "#elif after #else"),
            PPError::MacroArgCount {
                name,
                expected,
                found,
            } => write!(
                f,
                "macro '{}' expects {} argument(s), got {}",
                name, expected, found
            ),
            PPError::CallbackWithArgs(s) => {
                write!(f, "builtin macro '{}' cannot take an argument list", s)
            }
            PPError::MacroNotDefined(s) => write!(f, "macro '{}' is not defined", s),
            PPError::InvalidMacroParams(s) => write!(f, "invalid macro parameter list: {}", s),
            PPError::InvalidCondition(s) => write!(f, "invalid preprocessor condition: {}", s),
            PPError::ErrorDirective(s) => write!(f, "#error {}", s),
            PPError::IoError(p, e) => write!(f, "I/O error reading {}: {}", p.display(), e),
        }
    }
}

/// パースエラー
#[derive(Debug)]
pub enum ParseError {
    /// 予期しないトークン
    UnexpectedToken { expected: String, found: TokenKind },
    /// 予期しないファイル終端
    UnexpectedEof,
    /// 宣言エラー
    InvalidDeclaration(String),
    /// 完全定義済みタグの再定義
    TagRedefinition(String),
    /// 定数式として評価できない
    NotConstant(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken { expected, found } => {
                write!(f, "expected {}, found {:?}", expected, found)
            }
            ParseError::UnexpectedEof => write!(f, "unexpected end of file"),
            ParseError::InvalidDeclaration(s) => write!(f, "invalid declaration: {}", s),
            ParseError::TagRedefinition(s) => write!(f, "'{}' is redefined", s),
            ParseError::NotConstant(s) => write!(f, "expression is not constant: {}", s),
        }
    }
}

/// 統合エラー型
#[derive(Debug)]
pub enum CompileError {
    /// レキサーエラー
    Lex { loc: SourceLocation, kind: LexError },
    /// プリプロセッサエラー
    Preprocess { loc: SourceLocation, kind: PPError },
    /// パースエラー
    Parse { loc: SourceLocation, kind: ParseError },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex { loc, kind } => {
                write!(f, "{}:{}:{}: lexer error: {}", loc.file_id.as_u32(), loc.line, loc.column, kind)
            }
            CompileError::Preprocess { loc, kind } => {
                write!(f, "{}:{}:{}: preprocessor error: {}", loc.file_id.as_u32(), loc.line, loc.column, kind)
            }
            CompileError::Parse { loc, kind } => {
                write!(f, "{}:{}:{}: parse error: {}", loc.file_id.as_u32(), loc.line, loc.column, kind)
            }
        }
    }
}

impl std::error::Error for CompileError {}

impl CompileError {
    /// エラーが発生した位置を取得
    pub fn loc(&self) -> &SourceLocation {
        match self {
            CompileError::Lex { loc, .. } => loc,
            CompileError::Preprocess { loc, .. } => loc,
            CompileError::Parse { loc, .. } => loc,
        }
    }

    /// ファイル名を解決してエラーメッセージをフォーマット
    pub fn format_with_files(&self, files: &FileRegistry) -> String {
        match self {
            CompileError::Lex { loc, kind } => {
                let disp = DisplayLocation { loc, files };
                format!("{}: lexer error: {}", disp, kind)
            }
            CompileError::Preprocess { loc, kind } => {
                let disp = DisplayLocation { loc, files };
                format!("{}: preprocessor error: {}", disp, kind)
            }
            CompileError::Parse { loc, kind } => {
                let disp = DisplayLocation { loc, files };
                format!("{}: parse error: {}", disp, kind)
            }
        }
    }
}

/// Result型エイリアス
pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FileId;

    #[test]
    fn test_pp_error_display() {
        let err = PPError::MacroArgCount {
            name: "ADD".to_string(),
            expected: 2,
            found: 1,
        };
        assert_eq!(format!("{}", err), "macro 'ADD' expects 2 argument(s), got 1");
    }

    #[test]
    fn test_tag_redefinition_display() {
        let err = ParseError::TagRedefinition("S".to_string());
        assert_eq!(format!("{}", err), "'S' is redefined");
    }

    #[test]
    fn test_compile_error_display() {
        let loc = SourceLocation::new(FileId::default(), 10, 5);
        let err = CompileError::Lex {
            loc,
            kind: LexError::InvalidChar('$'),
        };
        assert!(format!("{}", err).contains("invalid character"));
    }

    #[test]
    fn test_format_with_files() {
        let mut files = FileRegistry::new();
        let id = files.register(std::path::PathBuf::from("wrapper.h"));
        let err = CompileError::Preprocess {
            loc: SourceLocation::new(id, 3, 1),
            kind: PPError::UnmatchedEndif,
        };
        let msg = err.format_with_files(&files);
        assert!(msg.starts_with("wrapper.h:3:1"));
        assert!(msg.contains("#endif without matching #if"));
    }
}
