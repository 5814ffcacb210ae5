//! C Macro IR Generator CLI
//!
//! Cヘッダーをプリプロセスしてパースし、宣言IRをJSON形式で出力する

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use std::ops::ControlFlow;

use clap::Parser as ClapParser;
use c_macro_irgen::{
    dump_macros, source_file_to_json, CompileError, FileId, PPConfig, Parser, Preprocessor,
    SourceLocation, TokenKind,
};

/// コマンドライン引数
#[derive(ClapParser)]
#[command(name = "c-macro-irgen")]
#[command(version, about = "C header to language-neutral IR generator")]
struct Cli {
    /// 入力Cヘッダーファイル
    input: PathBuf,

    /// インクルードパス (-I)
    #[arg(short = 'I', long = "include")]
    include: Vec<PathBuf>,

    /// マクロ定義 (-D)
    #[arg(short = 'D', long = "define")]
    define: Vec<String>,

    /// 出力ファイル（省略時は標準出力）
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// プリプロセッサ出力のみ (cc -E 相当)
    #[arg(short = 'E')]
    preprocess_only: bool,

    /// マクロテーブルをJSONでダンプ
    #[arg(long = "dump-macros")]
    dump_macros: bool,

    /// ストリーミングモード（逐次パース、エラー時にソースコード表示）
    #[arg(long = "streaming")]
    streaming: bool,

    /// コメントをトークンに保持する
    #[arg(long = "keep-comments")]
    keep_comments: bool,

    /// プリプロセッサデバッグ出力
    #[arg(long = "debug-pp")]
    debug_pp: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // プリプロセッサ設定（-I 未指定ならデフォルトの検索パスを使う）
    let include_paths = if cli.include.is_empty() {
        PPConfig::default().include_paths
    } else {
        cli.include
    };
    let config = PPConfig {
        include_paths,
        predefined: parse_defines(&cli.define),
        keep_comments: cli.keep_comments,
        debug_pp: cli.debug_pp,
    };

    // プリプロセッサを初期化してファイルを処理
    let mut pp = Preprocessor::new(config);
    if let Err(e) = pp.process_file(&cli.input) {
        return Err(format_error(&e, &pp).into());
    }

    if cli.preprocess_only {
        // -E: プリプロセス結果のみ出力
        output_preprocessed(&mut pp, cli.output.as_ref())?;
    } else if cli.dump_macros {
        // --dump-macros: 全トークンを読み切ってからマクロテーブルをダンプ
        run_dump_macros(&mut pp, cli.output.as_ref())?;
    } else if cli.streaming {
        // --streaming: ストリーミングモード
        run_streaming(&mut pp)?;
    } else {
        // 通常: パースしてJSON出力
        let unit = {
            let mut parser = match Parser::new(&mut pp) {
                Ok(p) => p,
                Err(e) => return Err(format_error(&e, &pp).into()),
            };
            match parser.parse() {
                Ok(unit) => unit,
                Err(e) => return Err(format_error(&e, &pp).into()),
            }
        };

        let value = source_file_to_json(&unit, pp.interner(), pp.files());
        let text = serde_json::to_string_pretty(&value)?;
        write_output(cli.output.as_ref(), &text)?;
    }

    Ok(())
}

/// テキストをファイルまたは標準出力へ書き出す
fn write_output(output: Option<&PathBuf>, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = output {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", text)?;
        writer.flush()?;
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", text)?;
        handle.flush()?;
    }
    Ok(())
}

/// マクロテーブルをJSONでダンプ
fn run_dump_macros(
    pp: &mut Preprocessor,
    output: Option<&PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    // #define はトークンを読み進める過程で登録されるため、先に全部読む
    if let Err(e) = pp.collect_tokens() {
        return Err(format_error(&e, pp).into());
    }

    let dumps = dump_macros(pp.macros(), pp.interner());
    let text = serde_json::to_string_pretty(&dumps)?;
    write_output(output, &text)
}

/// ストリーミングモードで実行
fn run_streaming(pp: &mut Preprocessor) -> Result<(), Box<dyn std::error::Error>> {
    let mut parser = match Parser::new(pp) {
        Ok(p) => p,
        Err(e) => return Err(format_error(&e, pp).into()),
    };

    // ストリーミング出力用
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let mut count = 0usize;
    let mut last_error: Option<(CompileError, SourceLocation)> = None;

    // parse_each でパースし、宣言ごとに即座にJSONを1行出力
    parser.parse_each(|result, loc, files, interner| {
        match result {
            Ok(decl) => {
                let unit = c_macro_irgen::SourceFile { decls: vec![decl] };
                let value = source_file_to_json(&unit, interner, files);
                match serde_json::to_string(&value["decls"][0]) {
                    Ok(line) => {
                        if let Err(e) = writeln!(handle, "{}", line) {
                            eprintln!("Output error: {}", e);
                            return ControlFlow::Break(());
                        }
                    }
                    Err(e) => {
                        eprintln!("Output error: {}", e);
                        return ControlFlow::Break(());
                    }
                }
                count += 1;
                ControlFlow::Continue(())
            }
            Err(e) => {
                last_error = Some((e, loc.clone()));
                ControlFlow::Break(())
            }
        }
    });

    drop(handle);

    // エラーがあった場合、詳細を表示
    if let Some((error, _decl_start_loc)) = last_error {
        // エラー内の実際の位置を使う
        let error_loc = error.loc();

        eprintln!("\n=== Parse Error ===");
        eprintln!(
            "Location: {}:{}:{}",
            pp.files().get_path(error_loc.file_id).display(),
            error_loc.line,
            error_loc.column
        );
        eprintln!("Error: {}", format_error(&error, pp));

        // ソースコードのコンテキストを表示
        show_source_context(pp, error_loc);

        return Err("Parse failed".into());
    }

    eprintln!("\nSuccessfully parsed {} declarations", count);
    Ok(())
}

/// エラー箇所のソースコードコンテキストを表示
fn show_source_context(pp: &Preprocessor, loc: &SourceLocation) {
    let path = pp.files().get_path(loc.file_id);

    // ファイルを読み込み
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Could not read source file: {}", e);
            return;
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    let target_line = loc.line as usize;

    // エラー行の前後2行を表示
    let start = target_line.saturating_sub(3);
    let end = (target_line + 2).min(lines.len());

    eprintln!("\nSource context:");
    eprintln!("{}:{}:{}", path.display(), loc.line, loc.column);
    eprintln!("{}", "-".repeat(60));

    for i in start..end {
        let line_num = i + 1;
        let marker = if line_num == target_line { ">>>" } else { "   " };
        eprintln!("{} {:4} | {}", marker, line_num, lines[i]);

        // エラー行の場合、カラム位置を矢印で示す
        if line_num == target_line && loc.column > 0 {
            let spaces = " ".repeat(loc.column as usize + 7);
            eprintln!("{}^", spaces);
        }
    }
    eprintln!("{}", "-".repeat(60));
}

/// エラーをファイル名付きでフォーマット
fn format_error(e: &CompileError, pp: &Preprocessor) -> String {
    e.format_with_files(pp.files())
}

/// プリプロセス結果を出力（GCC互換の行マーカー付き）
///
/// 行マーカーはファイル変更時と文の開始時のみ出力する。
/// 文中のマクロ展開による位置の飛びは無視する。
fn output_preprocessed(
    pp: &mut Preprocessor,
    output: Option<&PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut out: Box<dyn Write> = if let Some(path) = output {
        Box::new(BufWriter::new(File::create(path)?))
    } else {
        Box::new(io::stdout().lock())
    };

    let mut last_file: Option<FileId> = None;
    let mut last_output_line = 0u32;
    let mut need_space = false;
    let mut at_statement_start = true;
    let mut brace_depth = 0i32;
    let mut file_stack: Vec<FileId> = Vec::new();

    loop {
        let token = match pp.next_token() {
            Ok(t) => t,
            Err(e) => return Err(format_error(&e, pp).into()),
        };

        if matches!(token.kind, TokenKind::Eof) {
            break;
        }

        let current_file = token.loc.file_id;
        let current_line = token.loc.line;

        // 文の開始時のみファイル/行の変更をチェック
        if at_statement_start && brace_depth == 0 {
            if last_file != Some(current_file) {
                if need_space {
                    writeln!(out)?;
                }

                // GCCフラグ: 1 = ファイルに入る、2 = ファイルに戻る
                let flag = if last_file.is_none() {
                    ""
                } else if file_stack.contains(&current_file) {
                    while file_stack.last() != Some(&current_file) {
                        file_stack.pop();
                    }
                    " 2"
                } else {
                    if let Some(prev) = last_file {
                        file_stack.push(prev);
                    }
                    " 1"
                };

                let path = pp.files().get_path(current_file);
                writeln!(out, "# {} \"{}\"{}", current_line, path.display(), flag)?;
                last_file = Some(current_file);
                last_output_line = current_line;
                need_space = false;
            } else if current_line > last_output_line {
                // 同一ファイル内で行が進んだ
                if need_space {
                    writeln!(out)?;
                }
                let gap = current_line - last_output_line;
                if gap <= 8 {
                    // 小さいギャップは空行で埋める
                    for _ in 1..gap {
                        writeln!(out)?;
                    }
                } else {
                    // 大きいギャップは行マーカーを使う
                    let path = pp.files().get_path(current_file);
                    writeln!(out, "# {} \"{}\"", current_line, path.display())?;
                }
                need_space = false;
                last_output_line = current_line;
            }
            at_statement_start = false;
        }

        // ブレース深度を更新
        match token.kind {
            TokenKind::LBrace => brace_depth += 1,
            TokenKind::RBrace => brace_depth -= 1,
            _ => {}
        }

        // トークン間のスペース（セミコロン、カンマ、閉じ括弧の前は不要）
        if need_space
            && !matches!(
                token.kind,
                TokenKind::Semi
                    | TokenKind::Comma
                    | TokenKind::RParen
                    | TokenKind::RBracket
                    | TokenKind::RBrace
            )
        {
            write!(out, " ")?;
        }

        // 開き括弧の後はスペース不要
        let suppress_next_space = matches!(token.kind, TokenKind::LParen | TokenKind::LBracket);

        write!(out, "{}", token.kind.format(pp.interner()))?;
        need_space = !suppress_next_space;

        // トップレベルのセミコロンで改行
        if brace_depth == 0 && matches!(token.kind, TokenKind::Semi) {
            writeln!(out)?;
            last_output_line += 1;
            need_space = false;
            at_statement_start = true;
        }
    }

    if need_space {
        writeln!(out)?;
    }
    Ok(())
}

/// -D オプションをパース（NAME または NAME=VALUE 形式）
fn parse_defines(defines: &[String]) -> Vec<(String, Option<String>)> {
    defines
        .iter()
        .map(|s| {
            if let Some(pos) = s.find('=') {
                let (name, value) = s.split_at(pos);
                (name.to_string(), Some(value[1..].to_string()))
            } else {
                (s.clone(), None)
            }
        })
        .collect()
}
