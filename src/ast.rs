//! 宣言レベルの中間表現
//!
//! ヘッダファイルの宣言（struct / union / enum / typedef / 変数・関数宣言）
//! を閉じた直和型で表現する。文や関数本体は扱わない。
//! 消費側（バインディング生成器）は各enumを網羅的にマッチする。

use crate::intern::InternedStr;
use crate::source::SourceLocation;
use crate::token::Comment;

/// デフォルトの構造体パッキング（バイト単位）
pub const DEFAULT_PACKING: u32 = 4;

/// 翻訳単位（ファイル全体）
#[derive(Debug, Clone, Default)]
pub struct SourceFile {
    pub decls: Vec<Declaration>,
}

/// 宣言
///
/// 指定子列 + 宣言子リスト。`typedef struct {...} Foo, *PFoo;` のような
/// 複数宣言子もここに収まる。
#[derive(Debug, Clone)]
pub struct Declaration {
    pub specs: DeclSpecs,
    pub declarators: Vec<Declarator>,
    pub loc: SourceLocation,
    pub comments: Vec<Comment>,
}

/// 宣言指定子
#[derive(Debug, Clone, Default)]
pub struct DeclSpecs {
    pub storage: Option<StorageClass>,
    pub type_specs: Vec<TypeSpec>,
    pub qualifiers: TypeQualifiers,
    pub is_inline: bool,
}

impl DeclSpecs {
    /// typedef宣言かどうか
    pub fn is_typedef(&self) -> bool {
        matches!(self.storage, Some(StorageClass::Typedef))
    }
}

/// ストレージクラス
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Typedef,
    Extern,
    Static,
    Auto,
    Register,
}

/// 型指定子
#[derive(Debug, Clone)]
pub enum TypeSpec {
    Void,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Signed,
    Unsigned,
    Bool,
    Struct(StructSpec),
    Union(StructSpec),
    Enum(EnumSpec),
    TypedefName(InternedStr),
}

/// 型修飾子
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeQualifiers {
    pub is_const: bool,
    pub is_volatile: bool,
    pub is_restrict: bool,
}

impl TypeQualifiers {
    pub fn is_empty(&self) -> bool {
        !self.is_const && !self.is_volatile && !self.is_restrict
    }
}

/// 構造体/共用体指定
///
/// `members` が None なら前方参照（不完全型）。
#[derive(Debug, Clone)]
pub struct StructSpec {
    pub name: Option<InternedStr>,
    pub members: Option<Vec<StructMember>>,
    /// バイト単位のパッキング
    pub packing: u32,
    pub loc: SourceLocation,
}

impl StructSpec {
    /// 完全定義（本体付き）かどうか
    pub fn is_complete(&self) -> bool {
        self.members.is_some()
    }
}

/// 構造体メンバー
#[derive(Debug, Clone)]
pub struct StructMember {
    pub specs: DeclSpecs,
    pub declarators: Vec<StructDeclarator>,
}

/// 構造体メンバー宣言子
///
/// `int : 3;` のような無名ビットフィールドでは declarator が None。
#[derive(Debug, Clone)]
pub struct StructDeclarator {
    pub declarator: Option<Declarator>,
    pub bitfield: Option<Box<Expr>>,
}

/// 列挙型指定
#[derive(Debug, Clone)]
pub struct EnumSpec {
    pub name: Option<InternedStr>,
    pub enumerators: Option<Vec<Enumerator>>,
    pub packing: u32,
    pub loc: SourceLocation,
}

impl EnumSpec {
    pub fn is_complete(&self) -> bool {
        self.enumerators.is_some()
    }
}

/// 列挙子
///
/// `value` は明示された式（`= expr`）、`resolved` は自動インクリメントを
/// 適用した後の確定値。
#[derive(Debug, Clone)]
pub struct Enumerator {
    pub name: InternedStr,
    pub value: Option<Box<Expr>>,
    pub resolved: i64,
    pub loc: SourceLocation,
}

/// 宣言子
///
/// `derived` は名前から外側へ向かう派生の列。
/// 例: `int *a[10]` → name=a, derived=[Array(10), Pointer]
#[derive(Debug, Clone)]
pub struct Declarator {
    pub name: Option<InternedStr>,
    pub derived: Vec<DerivedDecl>,
    pub loc: SourceLocation,
}

/// 派生宣言子（ポインタ、配列、関数）
#[derive(Debug, Clone)]
pub enum DerivedDecl {
    /// ポインタ1段。段ごとに修飾子を持つ
    Pointer(TypeQualifiers),
    Array(ArrayDecl),
    Function(ParamList),
}

/// 配列宣言子
#[derive(Debug, Clone)]
pub struct ArrayDecl {
    pub size: ArraySize,
    pub qualifiers: TypeQualifiers,
    pub is_static: bool,
}

/// 配列長
#[derive(Debug, Clone)]
pub enum ArraySize {
    /// 明示された長さ: `[N]`
    Fixed(Box<Expr>),
    /// 長さ未指定: `[]`
    Unspecified,
    /// 可変長配列: `[*]`
    Vla,
}

/// パラメータリスト
#[derive(Debug, Clone)]
pub struct ParamList {
    pub params: Vec<ParamDecl>,
    pub is_variadic: bool,
}

/// パラメータ宣言
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub specs: DeclSpecs,
    pub declarator: Option<Declarator>,
    pub loc: SourceLocation,
}

/// 定数式
///
/// enum値・ビットフィールド幅・配列長に現れる式のみを対象とした
/// 限定的な式表現。
#[derive(Debug, Clone)]
pub enum Expr {
    Ident(InternedStr, SourceLocation),
    IntLit(i64, SourceLocation),
    UIntLit(u64, SourceLocation),
    CharLit(u8, SourceLocation),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        loc: SourceLocation,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        loc: SourceLocation,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        loc: SourceLocation,
    },
}

impl Expr {
    /// 式の位置情報を取得
    pub fn loc(&self) -> &SourceLocation {
        match self {
            Expr::Ident(_, loc) => loc,
            Expr::IntLit(_, loc) => loc,
            Expr::UIntLit(_, loc) => loc,
            Expr::CharLit(_, loc) => loc,
            Expr::Unary { loc, .. } => loc,
            Expr::Binary { loc, .. } => loc,
            Expr::Conditional { loc, .. } => loc,
        }
    }
}

/// 単項演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    BitNot,
    LogNot,
}

/// 二項演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogAnd,
    LogOr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::StringInterner;

    #[test]
    fn test_type_qualifiers_is_empty() {
        let empty = TypeQualifiers::default();
        assert!(empty.is_empty());

        let with_const = TypeQualifiers {
            is_const: true,
            ..Default::default()
        };
        assert!(!with_const.is_empty());
    }

    #[test]
    fn test_struct_spec_completeness() {
        let mut interner = StringInterner::new();
        let s = interner.intern("S");

        let forward = StructSpec {
            name: Some(s),
            members: None,
            packing: DEFAULT_PACKING,
            loc: SourceLocation::default(),
        };
        assert!(!forward.is_complete());

        let complete = StructSpec {
            name: Some(s),
            members: Some(vec![]),
            packing: DEFAULT_PACKING,
            loc: SourceLocation::default(),
        };
        assert!(complete.is_complete());
    }

    #[test]
    fn test_is_typedef() {
        let plain = DeclSpecs::default();
        assert!(!plain.is_typedef());

        let td = DeclSpecs {
            storage: Some(StorageClass::Typedef),
            ..Default::default()
        };
        assert!(td.is_typedef());
    }

    #[test]
    fn test_declarator_derived_order() {
        let mut interner = StringInterner::new();
        let a = interner.intern("a");

        // int *a[10] : 名前側から Array, Pointer の順
        let decl = Declarator {
            name: Some(a),
            derived: vec![
                DerivedDecl::Array(ArrayDecl {
                    size: ArraySize::Fixed(Box::new(Expr::IntLit(
                        10,
                        SourceLocation::default(),
                    ))),
                    qualifiers: TypeQualifiers::default(),
                    is_static: false,
                }),
                DerivedDecl::Pointer(TypeQualifiers::default()),
            ],
            loc: SourceLocation::default(),
        };

        assert!(matches!(decl.derived[0], DerivedDecl::Array(_)));
        assert!(matches!(decl.derived[1], DerivedDecl::Pointer(_)));
    }
}
