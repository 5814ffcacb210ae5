//! IRのJSON出力
//!
//! 宣言IRを下流のバインディング生成器向けにJSONへ変換する。識別子は
//! インターナーで文字列に解決し、位置情報はファイルパス付きで埋め込む。
//! マクロテーブルのダンプ（--dump-macros）もここで行う。

use serde::Serialize;
use serde_json::{json, Value};

use crate::ast::*;
use crate::intern::{InternedStr, StringInterner};
use crate::macro_def::{MacroKind, MacroTable};
use crate::source::{FileRegistry, SourceLocation};

/// 翻訳単位全体をJSONに変換
pub fn source_file_to_json(
    unit: &SourceFile,
    interner: &StringInterner,
    files: &FileRegistry,
) -> Value {
    let ctx = JsonCtx { interner, files };
    json!({
        "decls": unit.decls.iter().map(|d| ctx.declaration(d)).collect::<Vec<_>>(),
    })
}

struct JsonCtx<'a> {
    interner: &'a StringInterner,
    files: &'a FileRegistry,
}

impl<'a> JsonCtx<'a> {
    fn name(&self, id: InternedStr) -> Value {
        Value::String(self.interner.get(id).to_string())
    }

    fn opt_name(&self, id: Option<InternedStr>) -> Value {
        match id {
            Some(id) => self.name(id),
            None => Value::Null,
        }
    }

    fn loc(&self, loc: &SourceLocation) -> Value {
        json!({
            "file": self.files.get_path(loc.file_id).display().to_string(),
            "line": loc.line,
            "column": loc.column,
        })
    }

    fn declaration(&self, decl: &Declaration) -> Value {
        let comments: Vec<String> = decl
            .comments
            .iter()
            .map(|c| c.text.trim().to_string())
            .collect();
        json!({
            "specs": self.specs(&decl.specs),
            "declarators": decl.declarators.iter().map(|d| self.declarator(d)).collect::<Vec<_>>(),
            "loc": self.loc(&decl.loc),
            "comments": comments,
        })
    }

    fn specs(&self, specs: &DeclSpecs) -> Value {
        let storage = match specs.storage {
            Some(StorageClass::Typedef) => Some("typedef"),
            Some(StorageClass::Extern) => Some("extern"),
            Some(StorageClass::Static) => Some("static"),
            Some(StorageClass::Auto) => Some("auto"),
            Some(StorageClass::Register) => Some("register"),
            None => None,
        };
        json!({
            "storage": storage,
            "type": specs.type_specs.iter().map(|t| self.type_spec(t)).collect::<Vec<_>>(),
            "qualifiers": self.qualifiers(&specs.qualifiers),
            "is_inline": specs.is_inline,
        })
    }

    fn qualifiers(&self, q: &TypeQualifiers) -> Value {
        let mut out = Vec::new();
        if q.is_const {
            out.push("const");
        }
        if q.is_volatile {
            out.push("volatile");
        }
        if q.is_restrict {
            out.push("restrict");
        }
        json!(out)
    }

    fn type_spec(&self, spec: &TypeSpec) -> Value {
        match spec {
            TypeSpec::Void => json!("void"),
            TypeSpec::Char => json!("char"),
            TypeSpec::Short => json!("short"),
            TypeSpec::Int => json!("int"),
            TypeSpec::Long => json!("long"),
            TypeSpec::Float => json!("float"),
            TypeSpec::Double => json!("double"),
            TypeSpec::Signed => json!("signed"),
            TypeSpec::Unsigned => json!("unsigned"),
            TypeSpec::Bool => json!("bool"),
            TypeSpec::Struct(s) => self.struct_spec("struct", s),
            TypeSpec::Union(s) => self.struct_spec("union", s),
            TypeSpec::Enum(e) => self.enum_spec(e),
            TypeSpec::TypedefName(id) => json!({
                "kind": "typedef_name",
                "name": self.name(*id),
            }),
        }
    }

    fn struct_spec(&self, kind: &str, spec: &StructSpec) -> Value {
        json!({
            "kind": kind,
            "name": self.opt_name(spec.name),
            "complete": spec.is_complete(),
            "packing": spec.packing,
            "members": spec.members.as_ref().map(|members| {
                members.iter().map(|m| self.member(m)).collect::<Vec<_>>()
            }),
            "loc": self.loc(&spec.loc),
        })
    }

    fn member(&self, member: &StructMember) -> Value {
        json!({
            "specs": self.specs(&member.specs),
            "declarators": member.declarators.iter().map(|d| {
                json!({
                    "declarator": d.declarator.as_ref().map(|dd| self.declarator(dd)),
                    "bitfield": d.bitfield.as_ref().map(|e| self.expr(e)),
                })
            }).collect::<Vec<_>>(),
        })
    }

    fn enum_spec(&self, spec: &EnumSpec) -> Value {
        json!({
            "kind": "enum",
            "name": self.opt_name(spec.name),
            "complete": spec.is_complete(),
            "packing": spec.packing,
            "enumerators": spec.enumerators.as_ref().map(|enums| {
                enums.iter().map(|e| json!({
                    "name": self.name(e.name),
                    "value": e.resolved,
                })).collect::<Vec<_>>()
            }),
            "loc": self.loc(&spec.loc),
        })
    }

    fn declarator(&self, decl: &Declarator) -> Value {
        json!({
            "name": self.opt_name(decl.name),
            "derived": decl.derived.iter().map(|d| self.derived(d)).collect::<Vec<_>>(),
        })
    }

    fn derived(&self, derived: &DerivedDecl) -> Value {
        match derived {
            DerivedDecl::Pointer(q) => json!({
                "kind": "pointer",
                "qualifiers": self.qualifiers(q),
            }),
            DerivedDecl::Array(a) => {
                let size = match &a.size {
                    ArraySize::Fixed(expr) => self.expr(expr),
                    ArraySize::Unspecified => Value::Null,
                    ArraySize::Vla => json!("*"),
                };
                json!({
                    "kind": "array",
                    "size": size,
                    "qualifiers": self.qualifiers(&a.qualifiers),
                    "is_static": a.is_static,
                })
            }
            DerivedDecl::Function(params) => json!({
                "kind": "function",
                "params": params.params.iter().map(|p| json!({
                    "specs": self.specs(&p.specs),
                    "declarator": p.declarator.as_ref().map(|d| self.declarator(d)),
                })).collect::<Vec<_>>(),
                "is_variadic": params.is_variadic,
            }),
        }
    }

    fn expr(&self, expr: &Expr) -> Value {
        match expr {
            Expr::Ident(id, _) => json!({ "ident": self.name(*id) }),
            Expr::IntLit(v, _) => json!(v),
            Expr::UIntLit(v, _) => json!(v),
            Expr::CharLit(c, _) => json!(*c as i64),
            Expr::Unary { op, operand, .. } => json!({
                "op": unary_op_str(*op),
                "operand": self.expr(operand),
            }),
            Expr::Binary { op, lhs, rhs, .. } => json!({
                "op": bin_op_str(*op),
                "lhs": self.expr(lhs),
                "rhs": self.expr(rhs),
            }),
            Expr::Conditional {
                cond,
                then_expr,
                else_expr,
                ..
            } => json!({
                "op": "?:",
                "cond": self.expr(cond),
                "then": self.expr(then_expr),
                "else": self.expr(else_expr),
            }),
        }
    }
}

fn unary_op_str(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Plus => "+",
        UnaryOp::Minus => "-",
        UnaryOp::BitNot => "~",
        UnaryOp::LogNot => "!",
    }
}

fn bin_op_str(op: BinOp) -> &'static str {
    match op {
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
        BinOp::Lt => "<",
        BinOp::Gt => ">",
        BinOp::Le => "<=",
        BinOp::Ge => ">=",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::BitAnd => "&",
        BinOp::BitXor => "^",
        BinOp::BitOr => "|",
        BinOp::LogAnd => "&&",
        BinOp::LogOr => "||",
    }
}

/// --dump-macros 用のマクロ定義1件
#[derive(Debug, Serialize)]
pub struct MacroDump {
    pub name: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<String>>,
    pub is_variadic: bool,
    pub body: String,
}

/// ユーザー定義マクロをダンプする（名前順で安定）
pub fn dump_macros(macros: &MacroTable, interner: &StringInterner) -> Vec<MacroDump> {
    let mut dumps: Vec<MacroDump> = macros
        .user_defined()
        .map(|(name, def)| {
            let (kind, params, is_variadic) = match &def.kind {
                MacroKind::Object => ("object", None, false),
                MacroKind::Function {
                    params,
                    is_variadic,
                } => (
                    "function",
                    Some(
                        params
                            .iter()
                            .map(|p| interner.get(*p).to_string())
                            .collect(),
                    ),
                    *is_variadic,
                ),
                MacroKind::Builtin(_) => ("builtin", None, false),
            };
            let body = def
                .body
                .iter()
                .map(|t| t.kind.format(interner))
                .collect::<Vec<_>>()
                .join(" ");
            MacroDump {
                name: interner.get(*name).to_string(),
                kind,
                params,
                is_variadic,
                body,
            }
        })
        .collect();
    dumps.sort_by(|a, b| a.name.cmp(&b.name));
    dumps
}
