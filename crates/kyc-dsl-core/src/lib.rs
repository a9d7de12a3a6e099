//! kyc-dsl-core: KYC case language front-end and derivation rules
//!
//! This crate contains the pure DSL logic with NO database dependencies:
//! - Tokenizer and parser for the S-expression case notation
//! - Binder from AST to the typed `Case` model
//! - Three-phase validator (grammar, semantic, ontology)
//! - Canonical serializer and content hashing
//! - Rule compiler and lineage evaluator for derived attributes
//!
//! Persistence, amendments and ontology loading live in the `kyc-dsl` crate.

pub mod ast;
pub mod binder;
pub mod diagnostics;
pub mod error;
pub mod hash;
pub mod lineage;
pub mod model;
pub mod parser;
pub mod serializer;
pub mod token;
pub mod validator;

// Re-export commonly used types
pub use ast::AstNode;
pub use binder::{bind, bind_all, BoundCase, SourceIndex};
pub use diagnostics::{Diagnostic, DiagnosticCode, Phase, Severity};
pub use error::{
    BindError, CompileError, EvaluationError, SerializationError, SourcePos, SyntaxError,
    ValidationError,
};
pub use hash::ContentHash;
pub use lineage::{explain_result, Environment, EvaluationResult, LineageEvaluator, Value};
pub use model::{
    AttributeSource, AttributeSources, Case, CaseFunction, Controller, DerivedAttributeDefinition,
    DocumentRef, DocumentRequirement, NaturePurpose, OwnershipStake, OwnershipStructure, SourceTier,
    TokenState,
};
pub use parser::{parse, parse_source};
pub use serializer::serialize;
pub use token::{tokenize, Token, TokenKind};
pub use validator::{
    OntologyResolver, ValidationReport, Validator, DEFAULT_OWNERSHIP_TOLERANCE, GRAMMAR_VERSION,
};
