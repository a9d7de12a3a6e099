//! Error taxonomy for the DSL front end.
//!
//! Structural failures (`SyntaxError`, `BindError`, `ValidationError`) abort
//! processing of the case they belong to. Rule failures (`CompileError`,
//! `EvaluationError`) are collected per rule by the lineage evaluator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::{Diagnostic, Phase};

/// Line/column position in source text (both 1-based)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePos {
    pub offset: usize,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourcePos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

// =============================================================================
// Tokenizer / parser
// =============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyntaxError {
    #[error("unterminated string starting at {0}")]
    UnterminatedString(SourcePos),

    #[error("invalid escape sequence '\\{ch}' at {pos}")]
    InvalidEscape { ch: char, pos: SourcePos },

    #[error("unbalanced parentheses: '(' at {0} is never closed")]
    UnclosedParen(SourcePos),

    #[error("unbalanced parentheses: unexpected ')' at {0}")]
    UnexpectedCloseParen(SourcePos),

    #[error("unexpected token '{text}' at {pos}")]
    UnexpectedToken { text: String, pos: SourcePos },

    #[error("unexpected end of input")]
    UnexpectedEof,
}

impl SyntaxError {
    /// Position of the failure, if the error has one
    pub fn position(&self) -> Option<SourcePos> {
        match self {
            SyntaxError::UnterminatedString(pos)
            | SyntaxError::UnclosedParen(pos)
            | SyntaxError::UnexpectedCloseParen(pos) => Some(*pos),
            SyntaxError::InvalidEscape { pos, .. } | SyntaxError::UnexpectedToken { pos, .. } => {
                Some(*pos)
            }
            SyntaxError::UnexpectedEof => None,
        }
    }
}

// =============================================================================
// Binder
// =============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BindError {
    #[error("missing required '{key}' at {path}")]
    MissingKey { key: String, path: String },

    #[error("expected a (kyc-case ...) form at {path}, found {found}")]
    NotACase { path: String, found: String },

    #[error("malformed clause at {path}: {message}")]
    Malformed { path: String, message: String },
}

// =============================================================================
// Validator / serializer
// =============================================================================

/// Validation failed with at least one error-severity finding
#[derive(Debug, Error, Clone)]
#[error("validation failed for case '{case_name}'")]
pub struct ValidationError {
    pub case_name: String,
    pub findings: Vec<Diagnostic>,
}

impl ValidationError {
    pub fn error_count(&self) -> usize {
        self.findings.iter().filter(|f| f.is_error()).count()
    }

    /// Phases with at least one error, in phase order
    pub fn failed_phases(&self) -> Vec<Phase> {
        [Phase::Bind, Phase::Grammar, Phase::Semantic, Phase::Ontology]
            .into_iter()
            .filter(|phase| self.findings.iter().any(|f| f.is_error() && f.code.phase() == *phase))
            .collect()
    }
}

/// Internal invariant violation while rendering a model
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SerializationError {
    #[error("cannot serialize non-finite percentage {value} for '{name}'")]
    NonFinitePercent { name: String, value: f64 },

    #[error("case name must not be empty")]
    EmptyCaseName,
}

// =============================================================================
// Lineage rules
// =============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("syntax error in rule for {derived_code}: {message}")]
    Syntax {
        derived_code: String,
        message: String,
    },

    #[error("unknown identifier '{identifier}' in rule for {derived_code}")]
    UnknownIdentifier {
        derived_code: String,
        identifier: String,
    },

    #[error("unknown function '{function}' in rule for {derived_code}")]
    UnknownFunction {
        derived_code: String,
        function: String,
    },

    #[error("rule for {derived_code} nests deeper than {limit} levels")]
    TooDeep { derived_code: String, limit: usize },
}

impl CompileError {
    pub fn derived_code(&self) -> &str {
        match self {
            CompileError::Syntax { derived_code, .. }
            | CompileError::UnknownIdentifier { derived_code, .. }
            | CompileError::UnknownFunction { derived_code, .. }
            | CompileError::TooDeep { derived_code, .. } => derived_code,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("identifier '{0}' is not in the environment")]
    MissingIdentifier(String),

    #[error("type mismatch: {op} cannot apply to {left} and {right}")]
    TypeMismatch {
        op: String,
        left: String,
        right: String,
    },

    #[error("type mismatch: {op} expects {expected}, got {found}")]
    UnexpectedType {
        op: String,
        expected: String,
        found: String,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("{function}() of an empty list")]
    EmptyAggregate { function: String },

    #[error("rule was not compiled: {0}")]
    NotCompiled(String),
}
