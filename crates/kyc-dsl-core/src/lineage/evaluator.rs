//! Derivation evaluator with lineage capture
//!
//! Rules run in the order the caller supplies. Each successful result is
//! written back into the environment so later rules in the same batch see it.
//! Failures are recorded per result and never abort the batch.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::compiler::{compile_rule, CompiledRule};
use super::rule_parser::{BinaryOp, Expr, UnaryOp};
use super::value::{Environment, Value};
use crate::error::{CompileError, EvaluationError};
use crate::model::DerivedAttributeDefinition;

/// Outcome of one rule evaluation, including the inputs it read
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub derived_code: String,
    pub value: Option<Value>,
    pub success: bool,
    pub error: Option<String>,
    /// Environment entries the rule referenced, as they were when it ran
    pub inputs: BTreeMap<String, Value>,
    pub rule: String,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationResult {
    fn failed(
        derived_code: &str,
        rule: &str,
        inputs: BTreeMap<String, Value>,
        error: String,
    ) -> Self {
        Self {
            derived_code: derived_code.to_string(),
            value: None,
            success: false,
            error: Some(error),
            inputs,
            rule: rule.to_string(),
            evaluated_at: Utc::now(),
        }
    }
}

/// Human-readable account of how a derived value was produced
pub fn explain_result(result: &EvaluationResult) -> String {
    let mut out = match (&result.value, &result.error) {
        (Some(value), _) if result.success => format!("{} = {}\n", result.derived_code, value),
        (_, Some(error)) => format!("{} failed: {}\n", result.derived_code, error),
        _ => format!("{} failed\n", result.derived_code),
    };
    out.push_str(&format!("  Rule: {}\n", result.rule));
    if result.inputs.is_empty() {
        out.push_str("  Inputs: (none)\n");
    } else {
        out.push_str("  Inputs:\n");
        for (name, value) in &result.inputs {
            out.push_str(&format!("    {} = {}\n", name, value));
        }
    }
    out.push_str(&format!("  Evaluated at: {}\n", result.evaluated_at.to_rfc3339()));
    out
}

pub struct LineageEvaluator {
    env: Environment,
    initial: Environment,
    programs: BTreeMap<String, CompiledRule>,
    /// Failed compiles, keyed by code, with the rule text that failed
    compile_errors: BTreeMap<String, (String, CompileError)>,
    results: Vec<EvaluationResult>,
}

impl LineageEvaluator {
    pub fn new(env: Environment) -> Self {
        Self {
            initial: env.clone(),
            env,
            programs: BTreeMap::new(),
            compile_errors: BTreeMap::new(),
            results: Vec::new(),
        }
    }

    /// Compile every definition. Failures are collected and returned without
    /// stopping the remaining rules.
    pub fn compile_derivations(
        &mut self,
        definitions: &[DerivedAttributeDefinition],
    ) -> Vec<CompileError> {
        let targets: Vec<&DerivedAttributeDefinition> = definitions.iter().collect();
        self.compile_batch(&targets, definitions)
    }

    /// Compile `targets`; identifiers resolve against the environment and
    /// the codes derived anywhere in `batch`.
    fn compile_batch(
        &mut self,
        targets: &[&DerivedAttributeDefinition],
        batch: &[DerivedAttributeDefinition],
    ) -> Vec<CompileError> {
        let mut errors = Vec::new();
        for def in targets {
            let compiled = compile_rule(&def.derived_code, &def.rule, |id| {
                self.env.contains_key(id) || batch.iter().any(|d| d.derived_code == id)
            });
            match compiled {
                Ok(program) => {
                    tracing::debug!(derived_code = %def.derived_code, "compiled rule");
                    self.compile_errors.remove(&def.derived_code);
                    self.programs.insert(def.derived_code.clone(), program);
                }
                Err(e) => {
                    tracing::warn!(
                        derived_code = %def.derived_code,
                        error = %e,
                        "rule failed to compile"
                    );
                    self.programs.remove(&def.derived_code);
                    self.compile_errors
                        .insert(def.derived_code.clone(), (def.rule.clone(), e.clone()));
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Evaluate definitions in the given order. Anything not yet compiled
    /// (or whose rule text changed) is compiled first.
    pub fn evaluate(
        &mut self,
        definitions: &[DerivedAttributeDefinition],
    ) -> Vec<EvaluationResult> {
        let stale: Vec<&DerivedAttributeDefinition> = definitions
            .iter()
            .filter(|d| {
                let program = self.programs.get(&d.derived_code);
                match (program, self.compile_errors.get(&d.derived_code)) {
                    (Some(program), _) => program.rule != d.rule,
                    (None, Some((rule, _))) => *rule != d.rule,
                    (None, None) => true,
                }
            })
            .collect();
        if !stale.is_empty() {
            self.compile_batch(&stale, definitions);
        }

        let mut batch = Vec::with_capacity(definitions.len());
        for def in definitions {
            let result = self.evaluate_one(def);
            if let (true, Some(value)) = (result.success, &result.value) {
                self.env.insert(def.derived_code.clone(), value.clone());
            }
            batch.push(result);
        }

        let failures = batch.iter().filter(|r| !r.success).count();
        tracing::info!(rules = batch.len(), failures, "evaluated derivations");

        self.results.extend(batch.iter().cloned());
        batch
    }

    fn evaluate_one(&self, def: &DerivedAttributeDefinition) -> EvaluationResult {
        let program = match self.programs.get(&def.derived_code) {
            Some(program) => program,
            None => {
                let reason = self
                    .compile_errors
                    .get(&def.derived_code)
                    .map(|(_, e)| e.to_string())
                    .unwrap_or_else(|| def.derived_code.clone());
                let error = EvaluationError::NotCompiled(reason);
                return EvaluationResult::failed(
                    &def.derived_code,
                    &def.rule,
                    BTreeMap::new(),
                    error.to_string(),
                );
            }
        };

        let inputs: BTreeMap<String, Value> = program
            .references
            .iter()
            .filter_map(|id| self.env.get(id).map(|v| (id.clone(), v.clone())))
            .collect();

        match eval(&program.expr, &self.env) {
            Ok(value) => EvaluationResult {
                derived_code: def.derived_code.clone(),
                value: Some(value),
                success: true,
                error: None,
                inputs,
                rule: program.rule.clone(),
                evaluated_at: Utc::now(),
            },
            Err(e) => {
                tracing::debug!(
                    derived_code = %def.derived_code,
                    error = %e,
                    "rule evaluation failed"
                );
                EvaluationResult::failed(&def.derived_code, &program.rule, inputs, e.to_string())
            }
        }
    }

    /// Every result since construction or the last reset
    pub fn results(&self) -> &[EvaluationResult] {
        &self.results
    }

    pub fn value(&self, code: &str) -> Option<&Value> {
        self.env.get(code)
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Restore the seeded environment and drop recorded results. Compiled
    /// programs are kept.
    pub fn reset(&mut self) {
        self.env = self.initial.clone();
        self.results.clear();
    }
}

// =============================================================================
// INTERPRETER
// =============================================================================

fn eval(expr: &Expr, env: &Environment) -> Result<Value, EvaluationError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(id) => env
            .get(id)
            .cloned()
            .ok_or_else(|| EvaluationError::MissingIdentifier(id.clone())),
        Expr::List(items) => items
            .iter()
            .map(|e| eval(e, env))
            .collect::<Result<_, _>>()
            .map(Value::List),
        Expr::Unary(UnaryOp::Not, inner) => {
            Ok(Value::Bool(!expect_bool("!", eval(inner, env)?)?))
        }
        Expr::Unary(UnaryOp::Neg, inner) => {
            Ok(Value::Number(-expect_number("-", eval(inner, env)?)?))
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            // right side only runs when the left is true
            let left = expect_bool("&&", eval(lhs, env)?)?;
            Ok(Value::Bool(left && expect_bool("&&", eval(rhs, env)?)?))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let left = expect_bool("||", eval(lhs, env)?)?;
            Ok(Value::Bool(left || expect_bool("||", eval(rhs, env)?)?))
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, eval(lhs, env)?, eval(rhs, env)?),
        Expr::Call(name, args) => {
            let args = args.iter().map(|e| eval(e, env)).collect::<Result<Vec<_>, _>>()?;
            call(name, args)
        }
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvaluationError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(op, &left, &right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::In => contains(op, &left, &right).map(Value::Bool),
        BinaryOp::NotIn => contains(op, &left, &right).map(|found| Value::Bool(!found)),
        BinaryOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (a, b) => Err(mismatch(op, &a, &b)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (a, b) = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => (*a, *b),
                _ => return Err(mismatch(op, &left, &right)),
            };
            match op {
                BinaryOp::Sub => Ok(Value::Number(a - b)),
                BinaryOp::Mul => Ok(Value::Number(a * b)),
                _ if b == 0.0 => Err(EvaluationError::DivisionByZero),
                BinaryOp::Div => Ok(Value::Number(a / b)),
                _ => Ok(Value::Number(a % b)),
            }
        }
        BinaryOp::And => Ok(Value::Bool(expect_bool("&&", left)? && expect_bool("&&", right)?)),
        BinaryOp::Or => Ok(Value::Bool(expect_bool("||", left)? || expect_bool("||", right)?)),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Ordering, EvaluationError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            a.partial_cmp(b).ok_or_else(|| mismatch(op, left, right))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(mismatch(op, left, right)),
    }
}

fn contains(op: BinaryOp, needle: &Value, haystack: &Value) -> Result<bool, EvaluationError> {
    match (needle, haystack) {
        (_, Value::List(items)) => Ok(items.contains(needle)),
        (Value::String(n), Value::String(h)) => Ok(h.contains(n.as_str())),
        _ => Err(mismatch(op, needle, haystack)),
    }
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, EvaluationError> {
    match name {
        "len" => match args.first() {
            Some(Value::List(items)) => Ok(Value::Number(items.len() as f64)),
            Some(Value::String(s)) => Ok(Value::Number(s.chars().count() as f64)),
            Some(other) => Err(unexpected("len", "list or string", other)),
            None => Err(EvaluationError::EmptyAggregate { function: name.to_string() }),
        },
        "sum" => {
            let numbers = numbers(name, aggregate_items(args))?;
            Ok(Value::Number(numbers.iter().sum()))
        }
        "min" | "max" => {
            let numbers = numbers(name, aggregate_items(args))?;
            let pick = if name == "min" { f64::min } else { f64::max };
            numbers
                .into_iter()
                .reduce(pick)
                .map(Value::Number)
                .ok_or_else(|| EvaluationError::EmptyAggregate { function: name.to_string() })
        }
        other => Err(EvaluationError::UnexpectedType {
            op: "call".to_string(),
            expected: "min, max, len or sum".to_string(),
            found: other.to_string(),
        }),
    }
}

/// A single list argument aggregates over its items
fn aggregate_items(mut args: Vec<Value>) -> Vec<Value> {
    if let [Value::List(_)] = args.as_slice() {
        if let Some(Value::List(items)) = args.pop() {
            return items;
        }
    }
    args
}

fn numbers(function: &str, items: Vec<Value>) -> Result<Vec<f64>, EvaluationError> {
    items
        .into_iter()
        .map(|v| match v {
            Value::Number(n) => Ok(n),
            other => Err(unexpected(function, "number", &other)),
        })
        .collect()
}

fn expect_bool(op: &str, value: Value) -> Result<bool, EvaluationError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(unexpected(op, "boolean", &other)),
    }
}

fn expect_number(op: &str, value: Value) -> Result<f64, EvaluationError> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(unexpected(op, "number", &other)),
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> EvaluationError {
    EvaluationError::TypeMismatch {
        op: op.symbol().to_string(),
        left: left.kind().to_string(),
        right: right.kind().to_string(),
    }
}

fn unexpected(op: &str, expected: &str, found: &Value) -> EvaluationError {
    EvaluationError::UnexpectedType {
        op: op.to_string(),
        expected: expected.to_string(),
        found: found.kind().to_string(),
    }
}
