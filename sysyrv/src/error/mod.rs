//! Error types and diagnostic reporting.
//!
//! Every error the compiler can produce is fatal (spec.md §7): there is no
//! warning machinery here, unlike the teacher's `CompileWarning` — a
//! lexical, syntactic, name, type, or constant-evaluation error aborts
//! the whole compilation. Internal invariant violations (a malformed MIR
//! statement, an unreachable match arm) are compiler bugs and use
//! `panic!`/`assert!` directly rather than going through this type.

use crate::ast::Span;
use ariadne::{Color, Label, Report, ReportKind, Source};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{message}")]
    Lex { message: String, span: Span },

    #[error("{message}")]
    Parse { message: String, span: Span },

    #[error("{message}")]
    Name { message: String, span: Span },

    #[error("{message}")]
    Type { message: String, span: Span },

    #[error("{message}")]
    ConstEval { message: String, span: Span },

    #[error("{message}")]
    Io { message: String },
}

impl CompileError {
    pub fn lex(message: impl Into<String>, span: Span) -> Self {
        CompileError::Lex { message: message.into(), span }
    }

    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        CompileError::Parse { message: message.into(), span }
    }

    pub fn name(message: impl Into<String>, span: Span) -> Self {
        CompileError::Name { message: message.into(), span }
    }

    pub fn ty(message: impl Into<String>, span: Span) -> Self {
        CompileError::Type { message: message.into(), span }
    }

    pub fn const_eval(message: impl Into<String>, span: Span) -> Self {
        CompileError::ConstEval { message: message.into(), span }
    }

    pub fn io(message: impl Into<String>) -> Self {
        CompileError::Io { message: message.into() }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Lex { span, .. }
            | CompileError::Parse { span, .. }
            | CompileError::Name { span, .. }
            | CompileError::Type { span, .. }
            | CompileError::ConstEval { span, .. } => Some(*span),
            CompileError::Io { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CompileError::Lex { message, .. }
            | CompileError::Parse { message, .. }
            | CompileError::Name { message, .. }
            | CompileError::Type { message, .. }
            | CompileError::ConstEval { message, .. }
            | CompileError::Io { message } => message,
        }
    }

    fn kind_label(&self) -> &'static str {
        match self {
            CompileError::Lex { .. } => "lex error",
            CompileError::Parse { .. } => "parse error",
            CompileError::Name { .. } => "name error",
            CompileError::Type { .. } => "type error",
            CompileError::ConstEval { .. } => "constant-evaluation error",
            CompileError::Io { .. } => "io error",
        }
    }
}

/// Pretty-print an error to stderr with the offending source snippet.
pub fn report_error(err: &CompileError, filename: &str, source: &str) {
    let Some(span) = err.span() else {
        eprintln!("{}: {}", err.kind_label(), err.message());
        return;
    };

    let range = span.start..span.end.max(span.start + 1);
    let report = Report::build(ReportKind::Error, (filename, range.clone()))
        .with_message(format!("{}: {}", err.kind_label(), err.message()))
        .with_label(
            Label::new((filename, range))
                .with_message(err.message())
                .with_color(Color::Red),
        )
        .finish();

    let _ = report.eprint((filename, Source::from(source)));
}

#[derive(Serialize)]
struct MachineError<'a> {
    kind: &'static str,
    message: &'a str,
    start: Option<usize>,
    end: Option<usize>,
}

/// Emit a machine-readable (JSON) diagnostic to stderr, for tooling that
/// wants to consume compiler output programmatically.
pub fn report_error_machine(err: &CompileError) {
    let payload = MachineError {
        kind: err.kind_label(),
        message: err.message(),
        start: err.span().map(|s| s.start),
        end: err.span().map(|s| s.end),
    };
    match serde_json::to_string(&payload) {
        Ok(json) => eprintln!("{json}"),
        Err(_) => eprintln!("{{\"kind\":\"io error\",\"message\":\"failed to serialize diagnostic\"}}"),
    }
}
