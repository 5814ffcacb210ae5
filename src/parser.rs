//! C宣言パーサー
//!
//! 再帰下降でヘッダファイルの宣言をパースし、宣言レベルのIRを構築する。
//! 文・関数本体は対象外（inline関数定義の本体は読み飛ばす）。
//!
//! typedef名はセッション内のテーブルで管理し、typedef宣言を処理した時点で
//! 登録する。以降の識別子は使用位置でこのテーブルを引いて型名かどうかを
//! 判別する（レキサーへのフィードバック）。

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

use crate::ast::*;
use crate::error::{CompileError, ParseError, Result};
use crate::intern::{InternedStr, StringInterner};
use crate::preprocessor::Preprocessor;
use crate::source::{FileRegistry, SourceLocation};
use crate::token::TokenKind;
use crate::token_source::TokenSource;

/// タグの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Struct,
    Union,
    Enum,
}

/// タグテーブルのエントリ
///
/// `complete` は本体付き定義を見たかどうか。完全定義済みタグへの
/// 2度目の本体付き定義は再定義エラーになる。
#[derive(Debug, Clone, Copy)]
pub struct TagEntry {
    pub kind: TagKind,
    pub complete: bool,
}

/// 属性がIRに与える効果
#[derive(Debug, Clone, Copy)]
pub enum AttrEffect {
    /// struct/union/enum のパッキングを変更する
    SetPacking(u32),
}

/// 構築時に登録する文法拡張の規則表
///
/// `__attribute__((...))` の属性名から IR への効果を引く。未登録の属性は
/// 括弧の対応を取りながら読み飛ばされる。派生ではなく合成で拡張する。
pub struct GrammarExt {
    attributes: HashMap<String, AttrEffect>,
}

impl GrammarExt {
    /// 規則なしの拡張を作成
    pub fn empty() -> Self {
        Self {
            attributes: HashMap::new(),
        }
    }

    /// 属性規則を登録
    pub fn register_attribute(&mut self, name: &str, effect: AttrEffect) {
        self.attributes.insert(name.to_string(), effect);
    }

    fn lookup(&self, name: &str) -> Option<AttrEffect> {
        // __packed__ と packed を同一視する
        self.attributes.get(name.trim_matches('_')).copied()
    }
}

impl Default for GrammarExt {
    /// packed属性のみを認識するデフォルト規則表
    fn default() -> Self {
        let mut ext = Self::empty();
        ext.register_attribute("packed", AttrEffect::SetPacking(1));
        ext
    }
}

/// 属性列から収集した効果
#[derive(Debug, Clone, Copy, Default)]
struct AttrState {
    packing: Option<u32>,
}

impl AttrState {
    fn merge(self, other: AttrState) -> AttrState {
        AttrState {
            packing: other.packing.or(self.packing),
        }
    }
}

/// パーサー
///
/// 汎用のトークンソースから宣言をパースする。
/// `S` は `TokenSource` トレイトを実装する任意の型。
pub struct Parser<'a, S: TokenSource> {
    source: &'a mut S,
    current: crate::token::Token,
    ext: GrammarExt,
    /// typedef名のセット
    typedefs: HashSet<InternedStr>,
    /// struct/union/enum のタグテーブル
    tags: HashMap<InternedStr, TagEntry>,
    /// 解決済みの列挙定数（後続の定数式から参照できる）
    enum_constants: HashMap<InternedStr, i64>,
}

/// Preprocessor 専用のコンストラクタ
impl<'a> Parser<'a, Preprocessor> {
    /// 新しいパーサーを作成（Preprocessor専用）
    pub fn new(pp: &'a mut Preprocessor) -> Result<Self> {
        Self::from_source(pp)
    }
}

impl<'a, S: TokenSource> Parser<'a, S> {
    /// トークンソースからパーサーを作成
    pub fn from_source(source: &'a mut S) -> Result<Self> {
        Self::with_ext(source, GrammarExt::default())
    }

    /// 文法拡張を指定してパーサーを作成
    pub fn with_ext(source: &'a mut S, ext: GrammarExt) -> Result<Self> {
        let current = source.next_token()?;

        // GCC builtin types を事前登録
        let mut typedefs = HashSet::new();
        typedefs.insert(source.interner_mut().intern("__builtin_va_list"));

        Ok(Self {
            source,
            current,
            ext,
            typedefs,
            tags: HashMap::new(),
            enum_constants: HashMap::new(),
        })
    }

    /// StringInterner への参照を取得
    pub fn interner(&self) -> &StringInterner {
        self.source.interner()
    }

    /// typedef名のセットを取得
    pub fn typedefs(&self) -> &HashSet<InternedStr> {
        &self.typedefs
    }

    /// 解決済みの列挙定数を取得
    pub fn enum_constants(&self) -> &HashMap<InternedStr, i64> {
        &self.enum_constants
    }

    /// 翻訳単位をパース
    pub fn parse(&mut self) -> Result<SourceFile> {
        let mut decls = Vec::new();

        while !self.is_eof() {
            decls.push(self.parse_external_decl()?);
        }

        Ok(SourceFile { decls })
    }

    /// ストリーミング形式でパース
    ///
    /// 各宣言を順次パースして結果をコールバックに渡す。エラーの場合は
    /// 次の ';' または '}' まで読み飛ばして継続する。コールバックが
    /// `ControlFlow::Break(())` を返すと処理を中断する。
    pub fn parse_each<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(
            Result<Declaration>,
            &SourceLocation,
            &FileRegistry,
            &StringInterner,
        ) -> ControlFlow<()>,
    {
        while !self.is_eof() {
            let loc = self.current.loc.clone();
            let result = self.parse_external_decl();
            let failed = result.is_err();
            let files = self.source.files();
            let interner = self.source.interner();
            if callback(result, &loc, files, interner).is_break() {
                break;
            }
            if failed {
                self.synchronize()?;
            }
        }
        Ok(())
    }

    /// エラー後の同期: 次の ';' または '}' の直後まで読み飛ばす
    ///
    /// 同期中の字句エラーは読み捨てる（エラーを起こした文字は消費済み
    /// なので再試行で先に進む）。
    fn synchronize(&mut self) -> Result<()> {
        loop {
            match self.current.kind {
                TokenKind::Semi | TokenKind::RBrace => {
                    if self.advance().is_err() {
                        continue;
                    }
                    return Ok(());
                }
                TokenKind::Eof => return Ok(()),
                _ => {
                    if self.advance().is_err() {
                        continue;
                    }
                }
            }
        }
    }

    /// 外部宣言をパース
    fn parse_external_decl(&mut self) -> Result<Declaration> {
        let comments = self.current.leading_comments.clone();
        let loc = self.current.loc.clone();

        let specs = self.parse_decl_specs()?;

        // ; のみの場合（struct S {...}; など宣言子なしの宣言）
        if self.check(&TokenKind::Semi) {
            self.advance()?;
            return Ok(Declaration {
                specs,
                declarators: Vec::new(),
                loc,
                comments,
            });
        }

        let mut declarators = Vec::new();
        loop {
            let declarator = self.parse_declarator()?;
            self.collect_attributes()?;
            // 初期化子は読み飛ばす（宣言レベルのIRには含めない）
            if self.check(&TokenKind::Eq) {
                self.skip_initializer()?;
            }
            declarators.push(declarator);

            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance()?;
        }

        // inline関数定義: 本体は対象外なので読み飛ばして宣言として扱う
        if self.check(&TokenKind::LBrace) {
            self.skip_balanced_braces()?;
        } else {
            self.expect(&TokenKind::Semi, ";")?;
        }

        // typedef の場合、次のトークンが型名として分類される前に名前を登録
        if specs.is_typedef() {
            for d in &declarators {
                if let Some(name) = d.name {
                    self.typedefs.insert(name);
                }
            }
        }

        Ok(Declaration {
            specs,
            declarators,
            loc,
            comments,
        })
    }

    /// 宣言指定子をパース
    fn parse_decl_specs(&mut self) -> Result<DeclSpecs> {
        let mut specs = DeclSpecs::default();

        loop {
            match &self.current.kind {
                // ストレージクラス
                TokenKind::KwTypedef => {
                    specs.storage = Some(StorageClass::Typedef);
                    self.advance()?;
                }
                TokenKind::KwExtern => {
                    specs.storage = Some(StorageClass::Extern);
                    self.advance()?;
                }
                TokenKind::KwStatic => {
                    specs.storage = Some(StorageClass::Static);
                    self.advance()?;
                }
                TokenKind::KwAuto => {
                    specs.storage = Some(StorageClass::Auto);
                    self.advance()?;
                }
                TokenKind::KwRegister => {
                    specs.storage = Some(StorageClass::Register);
                    self.advance()?;
                }
                // inline
                TokenKind::KwInline => {
                    specs.is_inline = true;
                    self.advance()?;
                }
                // 型修飾子
                TokenKind::KwConst => {
                    specs.qualifiers.is_const = true;
                    self.advance()?;
                }
                TokenKind::KwVolatile => {
                    specs.qualifiers.is_volatile = true;
                    self.advance()?;
                }
                TokenKind::KwRestrict => {
                    specs.qualifiers.is_restrict = true;
                    self.advance()?;
                }
                // 型指定子
                TokenKind::KwVoid => {
                    specs.type_specs.push(TypeSpec::Void);
                    self.advance()?;
                }
                TokenKind::KwChar => {
                    specs.type_specs.push(TypeSpec::Char);
                    self.advance()?;
                }
                TokenKind::KwShort => {
                    specs.type_specs.push(TypeSpec::Short);
                    self.advance()?;
                }
                TokenKind::KwInt => {
                    specs.type_specs.push(TypeSpec::Int);
                    self.advance()?;
                }
                TokenKind::KwLong => {
                    specs.type_specs.push(TypeSpec::Long);
                    self.advance()?;
                }
                TokenKind::KwFloat => {
                    specs.type_specs.push(TypeSpec::Float);
                    self.advance()?;
                }
                TokenKind::KwDouble => {
                    specs.type_specs.push(TypeSpec::Double);
                    self.advance()?;
                }
                TokenKind::KwSigned => {
                    specs.type_specs.push(TypeSpec::Signed);
                    self.advance()?;
                }
                TokenKind::KwUnsigned => {
                    specs.type_specs.push(TypeSpec::Unsigned);
                    self.advance()?;
                }
                TokenKind::KwBool => {
                    specs.type_specs.push(TypeSpec::Bool);
                    self.advance()?;
                }
                // 構造体・共用体・列挙
                TokenKind::KwStruct => {
                    specs.type_specs.push(self.parse_struct_or_union(true)?);
                }
                TokenKind::KwUnion => {
                    specs.type_specs.push(self.parse_struct_or_union(false)?);
                }
                TokenKind::KwEnum => {
                    specs.type_specs.push(self.parse_enum()?);
                }
                // 指定子位置の __attribute__ はパッキング対象がないので
                // 効果を捨てて読み飛ばす
                TokenKind::KwAttribute => {
                    self.collect_attributes()?;
                }
                // typedef名（型指定子が未出現の場合のみ。既に型があれば
                // これは宣言子の名前）
                TokenKind::Ident(id)
                    if specs.type_specs.is_empty() && self.typedefs.contains(id) =>
                {
                    let id = *id;
                    specs.type_specs.push(TypeSpec::TypedefName(id));
                    self.advance()?;
                }
                _ => break,
            }
        }

        Ok(specs)
    }

    /// 構造体/共用体をパース
    fn parse_struct_or_union(&mut self, is_struct: bool) -> Result<TypeSpec> {
        let loc = self.current.loc.clone();
        self.advance()?; // struct/union

        // struct __attribute__((packed)) name { ... }
        let mut attrs = self.collect_attributes()?;

        let name = self.current_ident();
        if name.is_some() {
            self.advance()?;
        }

        let members = if self.check(&TokenKind::LBrace) {
            self.advance()?;
            let mut members = Vec::new();
            while !self.check(&TokenKind::RBrace) {
                members.push(self.parse_struct_member()?);
            }
            self.expect(&TokenKind::RBrace, "}")?;
            // struct {...} __attribute__((packed)) 形式
            attrs = attrs.merge(self.collect_attributes()?);
            Some(members)
        } else {
            None
        };

        let kind = if is_struct {
            TagKind::Struct
        } else {
            TagKind::Union
        };
        if let Some(tag) = name {
            self.record_tag(tag, kind, members.is_some(), &loc)?;
        }

        let spec = StructSpec {
            name,
            members,
            packing: attrs.packing.unwrap_or(DEFAULT_PACKING),
            loc,
        };
        if is_struct {
            Ok(TypeSpec::Struct(spec))
        } else {
            Ok(TypeSpec::Union(spec))
        }
    }

    /// タグテーブルへの登録と再定義チェック
    ///
    /// 本体なしの参照は不完全エントリを作り、本体付き定義は不完全エントリを
    /// 完全に昇格する。完全定義済みタグへの2度目の本体付き定義はエラー。
    fn record_tag(
        &mut self,
        tag: InternedStr,
        kind: TagKind,
        complete: bool,
        loc: &SourceLocation,
    ) -> Result<()> {
        match self.tags.get(&tag) {
            Some(entry) if entry.complete && complete => Err(CompileError::Parse {
                loc: loc.clone(),
                kind: ParseError::TagRedefinition(self.source.interner().get(tag).to_string()),
            }),
            Some(entry) if entry.complete => Ok(()),
            _ => {
                self.tags.insert(tag, TagEntry { kind, complete });
                Ok(())
            }
        }
    }

    /// 構造体メンバーをパース
    fn parse_struct_member(&mut self) -> Result<StructMember> {
        let specs = self.parse_decl_specs()?;
        let mut declarators = Vec::new();

        loop {
            // int : 3; のような無名ビットフィールドでは宣言子がない
            let declarator = if self.check(&TokenKind::Colon) || self.check(&TokenKind::Semi) {
                None
            } else {
                Some(self.parse_declarator()?)
            };

            self.collect_attributes()?;

            let bitfield = if self.check(&TokenKind::Colon) {
                self.advance()?;
                Some(Box::new(self.parse_conditional_expr()?))
            } else {
                None
            };

            declarators.push(StructDeclarator {
                declarator,
                bitfield,
            });

            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance()?;
        }

        self.expect(&TokenKind::Semi, ";")?;

        Ok(StructMember { specs, declarators })
    }

    /// 列挙型をパース
    ///
    /// 自動インクリメント: カウンタは 0 から始まり、`= expr` があれば
    /// 定数評価した値で上書きし、そこから続きを数える。
    fn parse_enum(&mut self) -> Result<TypeSpec> {
        let loc = self.current.loc.clone();
        self.advance()?; // enum

        let mut attrs = self.collect_attributes()?;

        let name = self.current_ident();
        if name.is_some() {
            self.advance()?;
        }

        let enumerators = if self.check(&TokenKind::LBrace) {
            self.advance()?;
            let mut enums = Vec::new();
            let mut next_value = 0i64;
            while !self.check(&TokenKind::RBrace) {
                let eloc = self.current.loc.clone();
                let ename = self.expect_ident()?;
                let value = if self.check(&TokenKind::Eq) {
                    self.advance()?;
                    Some(Box::new(self.parse_conditional_expr()?))
                } else {
                    None
                };

                let resolved = match &value {
                    Some(expr) => self.const_eval(expr)?,
                    None => next_value,
                };
                next_value = resolved.wrapping_add(1);
                self.enum_constants.insert(ename, resolved);

                enums.push(Enumerator {
                    name: ename,
                    value,
                    resolved,
                    loc: eloc,
                });
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance()?;
            }
            self.expect(&TokenKind::RBrace, "}")?;
            attrs = attrs.merge(self.collect_attributes()?);
            Some(enums)
        } else {
            None
        };

        if let Some(tag) = name {
            self.record_tag(tag, TagKind::Enum, enumerators.is_some(), &loc)?;
        }

        Ok(TypeSpec::Enum(EnumSpec {
            name,
            enumerators,
            packing: attrs.packing.unwrap_or(DEFAULT_PACKING),
            loc,
        }))
    }

    /// 宣言子をパース
    fn parse_declarator(&mut self) -> Result<Declarator> {
        let loc = self.current.loc.clone();
        let mut derived = Vec::new();

        // ポインタ。段ごとに修飾子を持つ
        let mut pointers = Vec::new();
        while self.check(&TokenKind::Star) {
            self.advance()?;
            let qualifiers = self.parse_type_qualifiers()?;
            pointers.push(DerivedDecl::Pointer(qualifiers));
        }

        // 直接宣言子
        let (name, inner_derived) = self.parse_direct_declarator()?;
        derived.extend(inner_derived);
        // ポインタは後置修飾より外側
        derived.extend(pointers);

        Ok(Declarator { name, derived, loc })
    }

    /// 直接宣言子をパース
    ///
    /// 返す派生列は名前側から外側へ向かう順。
    fn parse_direct_declarator(&mut self) -> Result<(Option<InternedStr>, Vec<DerivedDecl>)> {
        let mut derived = Vec::new();

        // ( declarator ) または識別子
        let name = if self.check(&TokenKind::LParen) {
            self.advance()?;
            let inner = self.parse_declarator()?;
            self.expect(&TokenKind::RParen, ")")?;
            derived = inner.derived;
            inner.name
        } else if let Some(id) = self.current_ident() {
            self.advance()?;
            Some(id)
        } else {
            None
        };

        // 配列・関数の後置修飾
        loop {
            if self.check(&TokenKind::LBracket) {
                derived.push(self.parse_array_declarator()?);
            } else if self.check(&TokenKind::LParen) {
                derived.push(self.parse_function_declarator()?);
            } else {
                break;
            }
        }

        Ok((name, derived))
    }

    /// 配列宣言子をパース
    fn parse_array_declarator(&mut self) -> Result<DerivedDecl> {
        self.advance()?; // [

        let mut qualifiers = TypeQualifiers::default();
        let mut is_static = false;

        loop {
            match &self.current.kind {
                TokenKind::KwStatic => {
                    is_static = true;
                    self.advance()?;
                }
                TokenKind::KwConst => {
                    qualifiers.is_const = true;
                    self.advance()?;
                }
                TokenKind::KwVolatile => {
                    qualifiers.is_volatile = true;
                    self.advance()?;
                }
                TokenKind::KwRestrict => {
                    qualifiers.is_restrict = true;
                    self.advance()?;
                }
                _ => break,
            }
        }

        let size = if self.check(&TokenKind::RBracket) {
            ArraySize::Unspecified
        } else if self.check(&TokenKind::Star) {
            self.advance()?;
            ArraySize::Vla
        } else {
            ArraySize::Fixed(Box::new(self.parse_conditional_expr()?))
        };

        self.expect(&TokenKind::RBracket, "]")?;

        Ok(DerivedDecl::Array(ArrayDecl {
            size,
            qualifiers,
            is_static,
        }))
    }

    /// 関数宣言子をパース
    fn parse_function_declarator(&mut self) -> Result<DerivedDecl> {
        self.advance()?; // (

        if self.check(&TokenKind::RParen) {
            self.advance()?;
            return Ok(DerivedDecl::Function(ParamList {
                params: Vec::new(),
                is_variadic: false,
            }));
        }

        let mut params = Vec::new();
        let mut is_variadic = false;

        loop {
            if self.check(&TokenKind::Ellipsis) {
                is_variadic = true;
                self.advance()?;
                break;
            }

            let loc = self.current.loc.clone();
            let specs = self.parse_decl_specs()?;
            let declarator = if self.check(&TokenKind::Comma) || self.check(&TokenKind::RParen) {
                None
            } else {
                Some(self.parse_declarator()?)
            };

            self.collect_attributes()?;

            params.push(ParamDecl {
                specs,
                declarator,
                loc,
            });

            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance()?;
        }

        self.expect(&TokenKind::RParen, ")")?;

        Ok(DerivedDecl::Function(ParamList { params, is_variadic }))
    }

    /// 型修飾子をパース
    fn parse_type_qualifiers(&mut self) -> Result<TypeQualifiers> {
        let mut qualifiers = TypeQualifiers::default();

        loop {
            match &self.current.kind {
                TokenKind::KwConst => {
                    qualifiers.is_const = true;
                    self.advance()?;
                }
                TokenKind::KwVolatile => {
                    qualifiers.is_volatile = true;
                    self.advance()?;
                }
                TokenKind::KwRestrict => {
                    qualifiers.is_restrict = true;
                    self.advance()?;
                }
                _ => break,
            }
        }

        Ok(qualifiers)
    }

    /// `__attribute__((...))` の並びを読み、登録済みの効果を収集する
    fn collect_attributes(&mut self) -> Result<AttrState> {
        let mut state = AttrState::default();

        while self.check(&TokenKind::KwAttribute) {
            self.advance()?; // __attribute__
            self.expect(&TokenKind::LParen, "(")?;
            self.expect(&TokenKind::LParen, "(")?;

            loop {
                match &self.current.kind {
                    TokenKind::RParen => break,
                    TokenKind::Comma => {
                        self.advance()?;
                    }
                    TokenKind::Ident(id) => {
                        let effect = {
                            let name = self.source.interner().get(*id);
                            self.ext.lookup(name)
                        };
                        self.advance()?;
                        // aligned(4) のような引数付き属性は括弧ごと読み飛ばす
                        if self.check(&TokenKind::LParen) {
                            self.skip_balanced_parens()?;
                        }
                        if let Some(AttrEffect::SetPacking(n)) = effect {
                            state.packing = Some(n);
                        }
                    }
                    TokenKind::Eof => {
                        return Err(CompileError::Parse {
                            loc: self.current.loc.clone(),
                            kind: ParseError::UnexpectedEof,
                        });
                    }
                    // const 等のキーワードも属性名として現れる。効果なし
                    _ => {
                        self.advance()?;
                        if self.check(&TokenKind::LParen) {
                            self.skip_balanced_parens()?;
                        }
                    }
                }
            }

            self.expect(&TokenKind::RParen, ")")?;
            self.expect(&TokenKind::RParen, ")")?;
        }

        Ok(state)
    }

    /// 対応の取れた括弧を読み飛ばす（開き括弧の位置から呼ぶ）
    fn skip_balanced_parens(&mut self) -> Result<()> {
        self.expect(&TokenKind::LParen, "(")?;
        let mut depth = 1;
        while depth > 0 {
            match self.current.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth -= 1,
                TokenKind::Eof => {
                    return Err(CompileError::Parse {
                        loc: self.current.loc.clone(),
                        kind: ParseError::UnexpectedEof,
                    });
                }
                _ => {}
            }
            self.advance()?;
        }
        Ok(())
    }

    /// 対応の取れた波括弧を読み飛ばす（開き波括弧の位置から呼ぶ）
    fn skip_balanced_braces(&mut self) -> Result<()> {
        self.expect(&TokenKind::LBrace, "{")?;
        let mut depth = 1;
        while depth > 0 {
            match self.current.kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => depth -= 1,
                TokenKind::Eof => {
                    return Err(CompileError::Parse {
                        loc: self.current.loc.clone(),
                        kind: ParseError::UnexpectedEof,
                    });
                }
                _ => {}
            }
            self.advance()?;
        }
        Ok(())
    }

    /// 初期化子を読み飛ばす（= の位置から呼ぶ）
    fn skip_initializer(&mut self) -> Result<()> {
        self.advance()?; // =
        let mut depth = 0;
        loop {
            match self.current.kind {
                TokenKind::LBrace | TokenKind::LParen => depth += 1,
                TokenKind::RBrace | TokenKind::RParen => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                TokenKind::Semi | TokenKind::Eof => return Ok(()),
                TokenKind::Comma if depth == 0 => return Ok(()),
                _ => {}
            }
            self.advance()?;
        }
    }

    // ---- 定数式 ----

    /// 条件式（三項演算子まで）をパース
    fn parse_conditional_expr(&mut self) -> Result<Expr> {
        let loc = self.current.loc.clone();
        let cond = self.parse_binary_expr(1)?;

        if self.check(&TokenKind::Question) {
            self.advance()?;
            let then_expr = self.parse_conditional_expr()?;
            self.expect(&TokenKind::Colon, ":")?;
            let else_expr = self.parse_conditional_expr()?;
            Ok(Expr::Conditional {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                loc,
            })
        } else {
            Ok(cond)
        }
    }

    /// 二項式を優先順位法でパース
    fn parse_binary_expr(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.parse_unary_expr()?;

        while let Some((op, prec)) = binary_op_of(&self.current.kind) {
            if prec < min_prec {
                break;
            }
            let loc = self.current.loc.clone();
            self.advance()?;
            let rhs = self.parse_binary_expr(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                loc,
            };
        }

        Ok(lhs)
    }

    /// 単項式をパース
    fn parse_unary_expr(&mut self) -> Result<Expr> {
        let loc = self.current.loc.clone();
        let op = match self.current.kind {
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Minus => Some(UnaryOp::Minus),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Bang => Some(UnaryOp::LogNot),
            _ => None,
        };

        if let Some(op) = op {
            self.advance()?;
            let operand = self.parse_unary_expr()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                loc,
            });
        }

        self.parse_primary_expr()
    }

    /// 一次式をパース
    fn parse_primary_expr(&mut self) -> Result<Expr> {
        let loc = self.current.loc.clone();
        match self.current.kind {
            TokenKind::IntLit(v) => {
                self.advance()?;
                Ok(Expr::IntLit(v, loc))
            }
            TokenKind::UIntLit(v) => {
                self.advance()?;
                Ok(Expr::UIntLit(v, loc))
            }
            TokenKind::CharLit(c) => {
                self.advance()?;
                Ok(Expr::CharLit(c, loc))
            }
            TokenKind::Ident(id) => {
                self.advance()?;
                Ok(Expr::Ident(id, loc))
            }
            TokenKind::LParen => {
                self.advance()?;
                let expr = self.parse_conditional_expr()?;
                self.expect(&TokenKind::RParen, ")")?;
                Ok(expr)
            }
            _ => Err(CompileError::Parse {
                loc,
                kind: ParseError::UnexpectedToken {
                    expected: "constant expression".to_string(),
                    found: self.current.kind.clone(),
                },
            }),
        }
    }

    /// 定数式を評価する
    ///
    /// 識別子は解決済みの列挙定数のみ参照できる。
    fn const_eval(&self, expr: &Expr) -> Result<i64> {
        match expr {
            Expr::IntLit(v, _) => Ok(*v),
            Expr::UIntLit(v, _) => Ok(*v as i64),
            Expr::CharLit(c, _) => Ok(*c as i64),
            Expr::Ident(id, loc) => {
                self.enum_constants
                    .get(id)
                    .copied()
                    .ok_or_else(|| CompileError::Parse {
                        loc: loc.clone(),
                        kind: ParseError::NotConstant(
                            self.source.interner().get(*id).to_string(),
                        ),
                    })
            }
            Expr::Unary { op, operand, .. } => {
                let v = self.const_eval(operand)?;
                Ok(match op {
                    UnaryOp::Plus => v,
                    UnaryOp::Minus => v.wrapping_neg(),
                    UnaryOp::BitNot => !v,
                    UnaryOp::LogNot => (v == 0) as i64,
                })
            }
            Expr::Binary { op, lhs, rhs, loc } => {
                let l = self.const_eval(lhs)?;
                let r = self.const_eval(rhs)?;
                match op {
                    BinOp::Mul => Ok(l.wrapping_mul(r)),
                    BinOp::Div => {
                        if r == 0 {
                            Err(CompileError::Parse {
                                loc: loc.clone(),
                                kind: ParseError::NotConstant("division by zero".to_string()),
                            })
                        } else {
                            Ok(l.wrapping_div(r))
                        }
                    }
                    BinOp::Mod => {
                        if r == 0 {
                            Err(CompileError::Parse {
                                loc: loc.clone(),
                                kind: ParseError::NotConstant("modulo by zero".to_string()),
                            })
                        } else {
                            Ok(l.wrapping_rem(r))
                        }
                    }
                    BinOp::Add => Ok(l.wrapping_add(r)),
                    BinOp::Sub => Ok(l.wrapping_sub(r)),
                    BinOp::Shl => Ok(l.wrapping_shl(r as u32)),
                    BinOp::Shr => Ok(l.wrapping_shr(r as u32)),
                    BinOp::Lt => Ok((l < r) as i64),
                    BinOp::Gt => Ok((l > r) as i64),
                    BinOp::Le => Ok((l <= r) as i64),
                    BinOp::Ge => Ok((l >= r) as i64),
                    BinOp::Eq => Ok((l == r) as i64),
                    BinOp::Ne => Ok((l != r) as i64),
                    BinOp::BitAnd => Ok(l & r),
                    BinOp::BitXor => Ok(l ^ r),
                    BinOp::BitOr => Ok(l | r),
                    BinOp::LogAnd => Ok((l != 0 && r != 0) as i64),
                    BinOp::LogOr => Ok((l != 0 || r != 0) as i64),
                }
            }
            Expr::Conditional {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                if self.const_eval(cond)? != 0 {
                    self.const_eval(then_expr)
                } else {
                    self.const_eval(else_expr)
                }
            }
        }
    }

    // ---- ヘルパー ----

    /// 現在のトークンが指定の種別かどうか
    fn check(&self, kind: &TokenKind) -> bool {
        self.current.kind == *kind
    }

    /// 現在のトークンが識別子ならそのIDを返す
    fn current_ident(&self) -> Option<InternedStr> {
        if let TokenKind::Ident(id) = self.current.kind {
            Some(id)
        } else {
            None
        }
    }

    /// 識別子を要求して消費
    fn expect_ident(&mut self) -> Result<InternedStr> {
        match self.current.kind {
            TokenKind::Ident(id) => {
                self.advance()?;
                Ok(id)
            }
            _ => Err(CompileError::Parse {
                loc: self.current.loc.clone(),
                kind: ParseError::UnexpectedToken {
                    expected: "identifier".to_string(),
                    found: self.current.kind.clone(),
                },
            }),
        }
    }

    /// 指定の種別を要求して消費
    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<()> {
        if self.check(kind) {
            self.advance()?;
            Ok(())
        } else {
            Err(CompileError::Parse {
                loc: self.current.loc.clone(),
                kind: ParseError::UnexpectedToken {
                    expected: what.to_string(),
                    found: self.current.kind.clone(),
                },
            })
        }
    }

    /// 次のトークンへ進む
    fn advance(&mut self) -> Result<()> {
        self.current = self.source.next_token()?;
        Ok(())
    }

    /// 入力の終端に達したか
    fn is_eof(&self) -> bool {
        matches!(self.current.kind, TokenKind::Eof)
    }
}

/// 二項演算子と優先順位（大きいほど強い）
fn binary_op_of(kind: &TokenKind) -> Option<(BinOp, u8)> {
    match kind {
        TokenKind::PipePipe => Some((BinOp::LogOr, 1)),
        TokenKind::AmpAmp => Some((BinOp::LogAnd, 2)),
        TokenKind::Pipe => Some((BinOp::BitOr, 3)),
        TokenKind::Caret => Some((BinOp::BitXor, 4)),
        TokenKind::Amp => Some((BinOp::BitAnd, 5)),
        TokenKind::EqEq => Some((BinOp::Eq, 6)),
        TokenKind::BangEq => Some((BinOp::Ne, 6)),
        TokenKind::Lt => Some((BinOp::Lt, 7)),
        TokenKind::Gt => Some((BinOp::Gt, 7)),
        TokenKind::LtEq => Some((BinOp::Le, 7)),
        TokenKind::GtEq => Some((BinOp::Ge, 7)),
        TokenKind::LtLt => Some((BinOp::Shl, 8)),
        TokenKind::GtGt => Some((BinOp::Shr, 8)),
        TokenKind::Plus => Some((BinOp::Add, 9)),
        TokenKind::Minus => Some((BinOp::Sub, 9)),
        TokenKind::Star => Some((BinOp::Mul, 10)),
        TokenKind::Slash => Some((BinOp::Div, 10)),
        TokenKind::Percent => Some((BinOp::Mod, 10)),
        _ => None,
    }
}
