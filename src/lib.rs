//! C Macro IR Generator
//!
//! C言語のヘッダーファイルをプリプロセスし、宣言（struct / union / enum /
//! typedef / 関数・変数宣言）を言語非依存のIRとして抽出するライブラリ。
//! 出力IRは他言語バインディング生成器の入力となる。

pub mod ast;
pub mod error;
pub mod intern;
pub mod ir_json;
pub mod lexer;
pub mod macro_def;
pub mod parser;
pub mod pp_expr;
pub mod preprocessor;
pub mod source;
pub mod token;
pub mod token_source;

// 主要な型を再エクスポート
pub use ast::*;
pub use error::{CompileError, DisplayLocation, LexError, PPError, ParseError, Result};
pub use intern::{InternedStr, StringInterner};
pub use ir_json::{dump_macros, source_file_to_json, MacroDump};
pub use lexer::Lexer;
pub use macro_def::{BuiltinMacro, MacroDef, MacroKind, MacroTable};
pub use parser::{AttrEffect, GrammarExt, Parser};
pub use pp_expr::PPExprEvaluator;
pub use preprocessor::{PPConfig, Preprocessor};
pub use source::{FileId, FileRegistry, SourceLocation};
pub use token::{Comment, CommentKind, Token, TokenKind};
pub use token_source::{TokenSlice, TokenSource};
