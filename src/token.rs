use crate::intern::{InternedStr, StringInterner};
use crate::source::SourceLocation;

/// コメント種別
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentKind {
    /// 行コメント: // ...
    Line,
    /// ブロックコメント: /* ... */
    Block,
}

/// コメント
///
/// トークンの leading_comments として保持される（コメント保持モード）。
#[derive(Debug, Clone)]
pub struct Comment {
    pub kind: CommentKind,
    pub text: String,
    pub loc: SourceLocation,
}

impl Comment {
    /// 新しいコメントを作成
    pub fn new(kind: CommentKind, text: String, loc: SourceLocation) -> Self {
        Self { kind, text, loc }
    }
}

/// トークン種別
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // === リテラル ===
    /// 整数リテラル
    IntLit(i64),
    /// 符号なし整数リテラル
    UIntLit(u64),
    /// 浮動小数点リテラル
    FloatLit(f64),
    /// 文字リテラル
    CharLit(u8),
    /// 文字列リテラル
    StringLit(Vec<u8>),

    // === 識別子 ===
    Ident(InternedStr),

    // === キーワード ===
    // ストレージクラス
    KwAuto,
    KwExtern,
    KwRegister,
    KwStatic,
    KwTypedef,
    // 型指定子
    KwChar,
    KwDouble,
    KwFloat,
    KwInt,
    KwLong,
    KwShort,
    KwSigned,
    KwUnsigned,
    KwVoid,
    KwBool,
    // 型修飾子
    KwConst,
    KwVolatile,
    KwRestrict,
    // 構造体・共用体・列挙
    KwStruct,
    KwUnion,
    KwEnum,
    // 制御フロー（宣言の終端検出に使用）
    KwBreak,
    KwCase,
    KwContinue,
    KwDefault,
    KwDo,
    KwElse,
    KwFor,
    KwGoto,
    KwIf,
    KwReturn,
    KwSwitch,
    KwWhile,
    // その他
    KwInline,
    KwSizeof,
    // GNU拡張（packing フック用）
    KwAttribute,

    // === 演算子 ===
    Plus,       // +
    Minus,      // -
    Star,       // *
    Slash,      // /
    Percent,    // %
    Amp,        // &
    Pipe,       // |
    Caret,      // ^
    Tilde,      // ~
    LtLt,       // <<
    GtGt,       // >>
    Bang,       // !
    AmpAmp,     // &&
    PipePipe,   // ||
    Lt,         // <
    Gt,         // >
    LtEq,       // <=
    GtEq,       // >=
    EqEq,       // ==
    BangEq,     // !=
    Eq,         // =
    PlusPlus,   // ++
    MinusMinus, // --
    Question,   // ?
    Colon,      // :
    Arrow,      // ->
    Dot,        // .
    Ellipsis,   // ...

    // === 区切り記号 ===
    Comma,      // ,
    Semi,       // ;
    LParen,     // (
    RParen,     // )
    LBracket,   // [
    RBracket,   // ]
    LBrace,     // {
    RBrace,     // }

    // === プリプロセッサ用 ===
    Hash,       // #
    HashHash,   // ##

    // === 特殊 ===
    /// ファイル終端
    Eof,
    /// 改行（ディレクティブの終端検出用）
    Newline,
    /// 空白（ディレクティブ定義モードでのみ生成される）
    Space,
}

impl TokenKind {
    /// キーワード文字列からTokenKindへの変換
    pub fn from_keyword(s: &str) -> Option<TokenKind> {
        match s {
            // ストレージクラス
            "auto" => Some(TokenKind::KwAuto),
            "extern" => Some(TokenKind::KwExtern),
            "register" => Some(TokenKind::KwRegister),
            "static" => Some(TokenKind::KwStatic),
            "typedef" => Some(TokenKind::KwTypedef),
            // 型指定子
            "char" => Some(TokenKind::KwChar),
            "double" => Some(TokenKind::KwDouble),
            "float" => Some(TokenKind::KwFloat),
            "int" => Some(TokenKind::KwInt),
            "long" => Some(TokenKind::KwLong),
            "short" => Some(TokenKind::KwShort),
            "signed" => Some(TokenKind::KwSigned),
            "unsigned" => Some(TokenKind::KwUnsigned),
            "void" => Some(TokenKind::KwVoid),
            "_Bool" => Some(TokenKind::KwBool),
            // 型修飾子
            "const" => Some(TokenKind::KwConst),
            "volatile" => Some(TokenKind::KwVolatile),
            "restrict" => Some(TokenKind::KwRestrict),
            // 構造体・共用体・列挙
            "struct" => Some(TokenKind::KwStruct),
            "union" => Some(TokenKind::KwUnion),
            "enum" => Some(TokenKind::KwEnum),
            // 制御フロー
            "break" => Some(TokenKind::KwBreak),
            "case" => Some(TokenKind::KwCase),
            "continue" => Some(TokenKind::KwContinue),
            "default" => Some(TokenKind::KwDefault),
            "do" => Some(TokenKind::KwDo),
            "else" => Some(TokenKind::KwElse),
            "for" => Some(TokenKind::KwFor),
            "goto" => Some(TokenKind::KwGoto),
            "if" => Some(TokenKind::KwIf),
            "return" => Some(TokenKind::KwReturn),
            "switch" => Some(TokenKind::KwSwitch),
            "while" => Some(TokenKind::KwWhile),
            // その他
            "inline" => Some(TokenKind::KwInline),
            "__inline" => Some(TokenKind::KwInline),
            "__inline__" => Some(TokenKind::KwInline),
            "sizeof" => Some(TokenKind::KwSizeof),
            // GNU拡張
            "__attribute__" => Some(TokenKind::KwAttribute),
            "__attribute" => Some(TokenKind::KwAttribute),
            _ => None,
        }
    }

    /// キーワードトークンかどうか
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::KwAuto
                | TokenKind::KwExtern
                | TokenKind::KwRegister
                | TokenKind::KwStatic
                | TokenKind::KwTypedef
                | TokenKind::KwChar
                | TokenKind::KwDouble
                | TokenKind::KwFloat
                | TokenKind::KwInt
                | TokenKind::KwLong
                | TokenKind::KwShort
                | TokenKind::KwSigned
                | TokenKind::KwUnsigned
                | TokenKind::KwVoid
                | TokenKind::KwBool
                | TokenKind::KwConst
                | TokenKind::KwVolatile
                | TokenKind::KwRestrict
                | TokenKind::KwStruct
                | TokenKind::KwUnion
                | TokenKind::KwEnum
                | TokenKind::KwBreak
                | TokenKind::KwCase
                | TokenKind::KwContinue
                | TokenKind::KwDefault
                | TokenKind::KwDo
                | TokenKind::KwElse
                | TokenKind::KwFor
                | TokenKind::KwGoto
                | TokenKind::KwIf
                | TokenKind::KwReturn
                | TokenKind::KwSwitch
                | TokenKind::KwWhile
                | TokenKind::KwInline
                | TokenKind::KwSizeof
                | TokenKind::KwAttribute
        )
    }

    /// トークンを文字列に変換
    pub fn format(&self, interner: &StringInterner) -> String {
        match self {
            // リテラル
            TokenKind::Ident(id) => interner.get(*id).to_string(),
            TokenKind::IntLit(n) => n.to_string(),
            TokenKind::UIntLit(n) => format!("{}u", n),
            TokenKind::FloatLit(v) => v.to_string(),
            TokenKind::CharLit(c) => format!("'{}'", escape_char(*c)),
            TokenKind::StringLit(s) => format!("\"{}\"", escape_string(s)),
            // キーワード
            TokenKind::KwAuto => "auto".to_string(),
            TokenKind::KwExtern => "extern".to_string(),
            TokenKind::KwRegister => "register".to_string(),
            TokenKind::KwStatic => "static".to_string(),
            TokenKind::KwTypedef => "typedef".to_string(),
            TokenKind::KwChar => "char".to_string(),
            TokenKind::KwDouble => "double".to_string(),
            TokenKind::KwFloat => "float".to_string(),
            TokenKind::KwInt => "int".to_string(),
            TokenKind::KwLong => "long".to_string(),
            TokenKind::KwShort => "short".to_string(),
            TokenKind::KwSigned => "signed".to_string(),
            TokenKind::KwUnsigned => "unsigned".to_string(),
            TokenKind::KwVoid => "void".to_string(),
            TokenKind::KwBool => "_Bool".to_string(),
            TokenKind::KwConst => "const".to_string(),
            TokenKind::KwVolatile => "volatile".to_string(),
            TokenKind::KwRestrict => "restrict".to_string(),
            TokenKind::KwStruct => "struct".to_string(),
            TokenKind::KwUnion => "union".to_string(),
            TokenKind::KwEnum => "enum".to_string(),
            TokenKind::KwBreak => "break".to_string(),
            TokenKind::KwCase => "case".to_string(),
            TokenKind::KwContinue => "continue".to_string(),
            TokenKind::KwDefault => "default".to_string(),
            TokenKind::KwDo => "do".to_string(),
            TokenKind::KwElse => "else".to_string(),
            TokenKind::KwFor => "for".to_string(),
            TokenKind::KwGoto => "goto".to_string(),
            TokenKind::KwIf => "if".to_string(),
            TokenKind::KwReturn => "return".to_string(),
            TokenKind::KwSwitch => "switch".to_string(),
            TokenKind::KwWhile => "while".to_string(),
            TokenKind::KwInline => "inline".to_string(),
            TokenKind::KwSizeof => "sizeof".to_string(),
            TokenKind::KwAttribute => "__attribute__".to_string(),
            // 演算子
            TokenKind::Plus => "+".to_string(),
            TokenKind::Minus => "-".to_string(),
            TokenKind::Star => "*".to_string(),
            TokenKind::Slash => "/".to_string(),
            TokenKind::Percent => "%".to_string(),
            TokenKind::Amp => "&".to_string(),
            TokenKind::Pipe => "|".to_string(),
            TokenKind::Caret => "^".to_string(),
            TokenKind::Tilde => "~".to_string(),
            TokenKind::LtLt => "<<".to_string(),
            TokenKind::GtGt => ">>".to_string(),
            TokenKind::Bang => "!".to_string(),
            TokenKind::AmpAmp => "&&".to_string(),
            TokenKind::PipePipe => "||".to_string(),
            TokenKind::Lt => "<".to_string(),
            TokenKind::Gt => ">".to_string(),
            TokenKind::LtEq => "<=".to_string(),
            TokenKind::GtEq => ">=".to_string(),
            TokenKind::EqEq => "==".to_string(),
            TokenKind::BangEq => "!=".to_string(),
            TokenKind::Eq => "=".to_string(),
            TokenKind::PlusPlus => "++".to_string(),
            TokenKind::MinusMinus => "--".to_string(),
            TokenKind::Question => "?".to_string(),
            TokenKind::Colon => ":".to_string(),
            TokenKind::Arrow => "->".to_string(),
            TokenKind::Dot => ".".to_string(),
            TokenKind::Ellipsis => "...".to_string(),
            // 区切り記号
            TokenKind::Comma => ",".to_string(),
            TokenKind::Semi => ";".to_string(),
            TokenKind::LParen => "(".to_string(),
            TokenKind::RParen => ")".to_string(),
            TokenKind::LBracket => "[".to_string(),
            TokenKind::RBracket => "]".to_string(),
            TokenKind::LBrace => "{".to_string(),
            TokenKind::RBrace => "}".to_string(),
            // プリプロセッサ用
            TokenKind::Hash => "#".to_string(),
            TokenKind::HashHash => "##".to_string(),
            // 特殊
            TokenKind::Newline => "\n".to_string(),
            TokenKind::Eof => "".to_string(),
            TokenKind::Space => " ".to_string(),
        }
    }
}

/// 文字をエスケープ
fn escape_char(c: u8) -> String {
    match c {
        b'\n' => "\\n".to_string(),
        b'\r' => "\\r".to_string(),
        b'\t' => "\\t".to_string(),
        b'\\' => "\\\\".to_string(),
        b'\'' => "\\'".to_string(),
        c if c.is_ascii_graphic() || c == b' ' => (c as char).to_string(),
        c => format!("\\x{:02x}", c),
    }
}

/// 文字列をエスケープ
fn escape_string(s: &[u8]) -> String {
    s.iter()
        .map(|&c| if c == b'"' { "\\\"".to_string() } else { escape_char(c) })
        .collect()
}

/// 位置情報付きトークン
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: SourceLocation,
    /// このトークンの直前にあったコメント群
    pub leading_comments: Vec<Comment>,
}

impl Token {
    /// 新しいトークンを作成
    pub fn new(kind: TokenKind, loc: SourceLocation) -> Self {
        Self {
            kind,
            loc,
            leading_comments: Vec::new(),
        }
    }

    /// コメント付きでトークンを作成
    pub fn with_comments(kind: TokenKind, loc: SourceLocation, comments: Vec<Comment>) -> Self {
        Self {
            kind,
            loc,
            leading_comments: comments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(TokenKind::from_keyword("int"), Some(TokenKind::KwInt));
        assert_eq!(TokenKind::from_keyword("typedef"), Some(TokenKind::KwTypedef));
        assert_eq!(TokenKind::from_keyword("foo"), None);
    }

    #[test]
    fn test_attribute_variants() {
        assert_eq!(
            TokenKind::from_keyword("__attribute__"),
            Some(TokenKind::KwAttribute)
        );
        assert_eq!(
            TokenKind::from_keyword("__attribute"),
            Some(TokenKind::KwAttribute)
        );
    }

    #[test]
    fn test_is_keyword() {
        assert!(TokenKind::KwStruct.is_keyword());
        assert!(!TokenKind::Semi.is_keyword());
        assert!(!TokenKind::IntLit(1).is_keyword());
    }

    #[test]
    fn test_format_string_lit() {
        let interner = StringInterner::new();
        let kind = TokenKind::StringLit(b"a\"b".to_vec());
        assert_eq!(kind.format(&interner), "\"a\\\"b\"");
    }
}
