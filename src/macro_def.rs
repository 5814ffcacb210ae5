//! マクロ定義と管理
//!
//! プリプロセッサのマクロ定義を表現し、マクロテーブルで管理する。
//! `__DATE__` などのビルトインマクロは展開時に値を計算するため、
//! 固定の本体トークン列ではなく [`BuiltinMacro`] として保持する。

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::intern::{InternedStr, StringInterner};
use crate::source::{FileRegistry, SourceLocation};
use crate::token::{Comment, Token, TokenKind};

/// ビルトインマクロの種類
///
/// いずれも引数リストを取らない。`__DATE__(x)` のような呼び出しはエラー。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinMacro {
    /// `__DATE__` : "Mmm dd yyyy"
    Date,
    /// `__TIME__` : "hh:mm:ss"
    Time,
    /// `__FILE__` : 展開位置のファイル名
    File,
    /// `__LINE__` : 展開位置の行番号
    Line,
}

impl BuiltinMacro {
    /// 展開位置に応じた置換トークンを生成
    pub fn expand(self, loc: &SourceLocation, files: &FileRegistry) -> Token {
        let kind = match self {
            BuiltinMacro::Date => {
                let (year, month, day) = current_civil_date();
                let text = format!("{} {:02} {}", MONTH_ABBREV[month as usize - 1], day, year);
                TokenKind::StringLit(text.into_bytes())
            }
            BuiltinMacro::Time => {
                let (hour, min, sec) = current_time_of_day();
                let text = format!("{:02}:{:02}:{:02}", hour, min, sec);
                TokenKind::StringLit(text.into_bytes())
            }
            BuiltinMacro::File => {
                let path = files.get_path(loc.file_id);
                TokenKind::StringLit(path.display().to_string().into_bytes())
            }
            BuiltinMacro::Line => TokenKind::IntLit(loc.line as i64),
        };
        Token::new(kind, loc.clone())
    }
}

const MONTH_ABBREV: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Unix時刻から (年, 月, 日) を計算する（UTC）
fn current_civil_date() -> (i64, u32, u32) {
    let days = (epoch_seconds() / 86_400) as i64;
    // Howard Hinnant の civil_from_days
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if m <= 2 { y + 1 } else { y };
    (year, m, d)
}

/// Unix時刻から (時, 分, 秒) を計算する（UTC）
fn current_time_of_day() -> (u32, u32, u32) {
    let secs = epoch_seconds() % 86_400;
    ((secs / 3_600) as u32, (secs / 60 % 60) as u32, (secs % 60) as u32)
}

/// マクロ定義の種類
#[derive(Debug, Clone, PartialEq)]
pub enum MacroKind {
    /// オブジェクトマクロ: #define FOO value
    Object,
    /// 関数マクロ: #define FOO(a, b) ...
    Function {
        params: Vec<InternedStr>,
        is_variadic: bool,
    },
    /// 展開時に値を計算するビルトインマクロ
    Builtin(BuiltinMacro),
}

/// マクロ定義
#[derive(Debug, Clone)]
pub struct MacroDef {
    /// マクロ名
    pub name: InternedStr,
    /// マクロの種類
    pub kind: MacroKind,
    /// 置換トークン列（ビルトインでは空）
    pub body: Vec<Token>,
    /// 定義された位置
    pub def_loc: SourceLocation,
    /// 定義前のコメント群
    pub leading_comments: Vec<Comment>,
    /// このマクロの展開が現在進行中かどうか（再帰ガード）
    pub expanding: bool,
}

impl MacroDef {
    /// 新しいオブジェクトマクロを作成
    pub fn object(name: InternedStr, body: Vec<Token>, def_loc: SourceLocation) -> Self {
        Self {
            name,
            kind: MacroKind::Object,
            body,
            def_loc,
            leading_comments: Vec::new(),
            expanding: false,
        }
    }

    /// 新しい関数マクロを作成
    pub fn function(
        name: InternedStr,
        params: Vec<InternedStr>,
        is_variadic: bool,
        body: Vec<Token>,
        def_loc: SourceLocation,
    ) -> Self {
        Self {
            name,
            kind: MacroKind::Function {
                params,
                is_variadic,
            },
            body,
            def_loc,
            leading_comments: Vec::new(),
            expanding: false,
        }
    }

    /// 新しいビルトインマクロを作成
    pub fn builtin(name: InternedStr, builtin: BuiltinMacro) -> Self {
        Self {
            name,
            kind: MacroKind::Builtin(builtin),
            body: Vec::new(),
            def_loc: SourceLocation::default(),
            leading_comments: Vec::new(),
            expanding: false,
        }
    }

    /// コメント付きで作成
    pub fn with_comments(mut self, comments: Vec<Comment>) -> Self {
        self.leading_comments = comments;
        self
    }

    /// 関数マクロかどうか
    pub fn is_function(&self) -> bool {
        matches!(self.kind, MacroKind::Function { .. })
    }

    /// ビルトインマクロかどうか
    pub fn is_builtin(&self) -> bool {
        matches!(self.kind, MacroKind::Builtin(_))
    }

    /// パラメータ数を取得（オブジェクト/ビルトインなら0）
    pub fn param_count(&self) -> usize {
        match &self.kind {
            MacroKind::Function { params, .. } => params.len(),
            _ => 0,
        }
    }

    /// 可変引数マクロかどうか
    pub fn is_variadic(&self) -> bool {
        matches!(
            self.kind,
            MacroKind::Function {
                is_variadic: true,
                ..
            }
        )
    }
}

/// マクロテーブル
#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<InternedStr, MacroDef>,
}

impl MacroTable {
    /// 新しいマクロテーブルを作成
    pub fn new() -> Self {
        Self {
            macros: HashMap::new(),
        }
    }

    /// ビルトインマクロを登録したテーブルを作成
    pub fn with_builtins(interner: &mut StringInterner) -> Self {
        let mut table = Self::new();
        for (name, builtin) in [
            ("__DATE__", BuiltinMacro::Date),
            ("__TIME__", BuiltinMacro::Time),
            ("__FILE__", BuiltinMacro::File),
            ("__LINE__", BuiltinMacro::Line),
        ] {
            let id = interner.intern(name);
            table.define(MacroDef::builtin(id, builtin));
        }
        table
    }

    /// マクロを定義（既存の定義があれば黙って置き換え、古い定義を返す）
    pub fn define(&mut self, def: MacroDef) -> Option<MacroDef> {
        self.macros.insert(def.name, def)
    }

    /// マクロを削除（削除された定義があれば返す。未定義の#undefはエラーではない）
    pub fn undefine(&mut self, name: InternedStr) -> Option<MacroDef> {
        self.macros.remove(&name)
    }

    /// マクロ定義を取得
    pub fn get(&self, name: InternedStr) -> Option<&MacroDef> {
        self.macros.get(&name)
    }

    /// マクロ定義を可変で取得（再帰ガードのフラグ操作用）
    pub fn get_mut(&mut self, name: InternedStr) -> Option<&mut MacroDef> {
        self.macros.get_mut(&name)
    }

    /// マクロが定義されているかどうか
    pub fn is_defined(&self, name: InternedStr) -> bool {
        self.macros.contains_key(&name)
    }

    /// 全マクロをイテレート
    pub fn iter(&self) -> impl Iterator<Item = (&InternedStr, &MacroDef)> {
        self.macros.iter()
    }

    /// ユーザー定義マクロのみをイテレート
    pub fn user_defined(&self) -> impl Iterator<Item = (&InternedStr, &MacroDef)> {
        self.macros.iter().filter(|(_, def)| !def.is_builtin())
    }

    /// マクロ数を返す
    pub fn len(&self) -> usize {
        self.macros.len()
    }

    /// テーブルが空かどうか
    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}
