//! CLI driver: lex → parse → lower to HIR → const-eval → lower to MIR →
//! optimize → register-allocate/emit → relabel (spec.md §6).

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use sysyrv::asm::{emit, relabel};
use sysyrv::error::{self, CompileError};
use sysyrv::mir;
use sysyrv::support::Interner;
use sysyrv::{ast, lexer, parser};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ErrorFormat {
    Human,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum EmitIr {
    Hir,
    Mir,
}

/// `prog [-S] INPUT [-o OUTPUT]` (spec.md §6), plus two ambient
/// developer-ergonomics flags not named in the source grammar.
#[derive(Parser)]
#[command(name = "sysyrv", version, about = "Compile a small C-like language to RISC-V-style assembly")]
struct Cli {
    /// Source file to compile.
    input: PathBuf,

    /// Accepted and ignored — assembly is the only output mode.
    #[arg(short = 'S')]
    #[allow(dead_code)]
    asm_only: bool,

    /// Write assembly here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Diagnostic rendering for a fatal compile error.
    #[arg(long, value_enum, default_value = "human")]
    error_format: ErrorFormat,

    /// Dump an intermediate form to stderr and keep compiling.
    #[arg(long, value_enum)]
    emit_ir: Option<EmitIr>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.input) {
        Ok(s) => s,
        Err(e) => {
            let err = CompileError::io(format!("failed to read {}: {e}", cli.input.display()));
            report(&err, cli.error_format, &cli.input.display().to_string(), "");
            return ExitCode::FAILURE;
        }
    };

    match compile(&source, cli.emit_ir) {
        Ok(asm) => match write_output(&cli.output, &asm) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("io error: {e}");
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            report(&err, cli.error_format, &cli.input.display().to_string(), &source);
            ExitCode::FAILURE
        }
    }
}

fn compile(source: &str, emit_ir: Option<EmitIr>) -> error::Result<String> {
    let tokens = lexer::tokenize(source)?;

    let mut interner = Interner::new();
    let ast_cu = parser::parse(tokens, &mut interner)?;

    let mut hir_cu = ast::lower::lower_comp_unit(&ast_cu, &mut interner)?;
    hir_cu.const_eval();
    if emit_ir == Some(EmitIr::Hir) {
        eprintln!("{hir_cu:#?}");
    }

    let mut mir_cu = mir::lower_comp_unit(&hir_cu);
    for item in &mut mir_cu.items {
        if let mir::Item::Func(f) = item {
            mir::optimize::optimize(f);
        }
    }
    if emit_ir == Some(EmitIr::Mir) {
        eprintln!("{mir_cu:#?}");
    }

    let (mut file, num_labels) = emit::emit_comp_unit(&mir_cu);
    // Run twice (spec.md §4.6): one pass threads jumps and drops dead
    // fallthroughs, which can expose a second round of the same.
    relabel::relabel(&mut file, num_labels);
    relabel::relabel(&mut file, num_labels);

    Ok(file.to_string())
}

fn report(err: &CompileError, format: ErrorFormat, filename: &str, source: &str) {
    match format {
        ErrorFormat::Human => error::report_error(err, filename, source),
        ErrorFormat::Json => error::report_error_machine(err),
    }
}

fn write_output(output: &Option<PathBuf>, asm: &str) -> std::io::Result<()> {
    match output {
        Some(path) => fs::write(path, asm),
        None => std::io::stdout().lock().write_all(asm.as_bytes()),
    }
}
