//! Derived attributes: rule compilation and evaluation with lineage
//!
//! Each [`DerivedAttributeDefinition`](crate::model::DerivedAttributeDefinition)
//! carries a rule expression over attribute codes. The evaluator compiles the
//! rules up front, runs them in caller order against an [`Environment`], and
//! records the inputs each rule read so a derived value can be explained.

mod compiler;
mod evaluator;
mod rule_parser;
mod value;

pub use compiler::{
    compile_rule, CompiledRule, BUILTIN_FUNCTIONS, MAX_NESTING_DEPTH, MAX_RULE_LENGTH,
};
pub use evaluator::{explain_result, EvaluationResult, LineageEvaluator};
pub use rule_parser::{parse_rule, BinaryOp, Expr, UnaryOp};
pub use value::{Environment, Value};
