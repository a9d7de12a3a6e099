//! Ahead-of-time rule compilation
//!
//! Compiling checks what can be known without running the rule: syntax,
//! nesting depth, function names and arity, and that every identifier is
//! either present in the environment or derived by the same batch.

use std::collections::BTreeSet;

use super::rule_parser::{parse_rule, Expr};
use crate::error::CompileError;

/// Longest accepted rule text, in bytes
pub const MAX_RULE_LENGTH: usize = 1024;

/// Deepest accepted bracket nesting, and longest accepted chain of prefix
/// operators
pub const MAX_NESTING_DEPTH: usize = 32;

/// Aggregates callable from rules
pub const BUILTIN_FUNCTIONS: &[&str] = &["min", "max", "len", "sum"];

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledRule {
    pub derived_code: String,
    pub rule: String,
    pub expr: Expr,
    /// Identifiers the rule reads, sorted
    pub references: BTreeSet<String>,
}

/// Compile one rule. `is_known` answers whether an identifier will be
/// available when the rule runs.
pub fn compile_rule(
    derived_code: &str,
    rule: &str,
    is_known: impl Fn(&str) -> bool,
) -> Result<CompiledRule, CompileError> {
    if rule.len() > MAX_RULE_LENGTH {
        return Err(CompileError::Syntax {
            derived_code: derived_code.to_string(),
            message: format!("rule is longer than {} bytes", MAX_RULE_LENGTH),
        });
    }
    if nesting_depth(rule) > MAX_NESTING_DEPTH {
        return Err(CompileError::TooDeep {
            derived_code: derived_code.to_string(),
            limit: MAX_NESTING_DEPTH,
        });
    }

    let expr = parse_rule(rule).map_err(|message| CompileError::Syntax {
        derived_code: derived_code.to_string(),
        message,
    })?;

    if prefix_depth(&expr) > MAX_NESTING_DEPTH {
        return Err(CompileError::TooDeep {
            derived_code: derived_code.to_string(),
            limit: MAX_NESTING_DEPTH,
        });
    }

    check_calls(derived_code, &expr)?;

    let mut references = BTreeSet::new();
    collect_identifiers(&expr, &mut references);
    if let Some(missing) = references.iter().find(|id| !is_known(id.as_str())) {
        return Err(CompileError::UnknownIdentifier {
            derived_code: derived_code.to_string(),
            identifier: missing.clone(),
        });
    }

    Ok(CompiledRule {
        derived_code: derived_code.to_string(),
        rule: rule.to_string(),
        expr,
        references,
    })
}

/// Bracket depth outside string literals
fn nesting_depth(rule: &str) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for c in rule.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' => {
                depth += 1;
                max = max.max(depth);
            }
            ')' | ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}

/// Most `!`/`-` operators stacked on any path through the tree
fn prefix_depth(expr: &Expr) -> usize {
    let mut max = 0;
    let mut pending = vec![(expr, 0usize)];
    while let Some((node, depth)) = pending.pop() {
        max = max.max(depth);
        match node {
            Expr::Unary(_, inner) => pending.push((inner, depth + 1)),
            Expr::Binary(_, lhs, rhs) => {
                pending.push((lhs, depth));
                pending.push((rhs, depth));
            }
            Expr::Call(_, items) | Expr::List(items) => {
                pending.extend(items.iter().map(|e| (e, depth)))
            }
            Expr::Literal(_) | Expr::Ident(_) => {}
        }
    }
    max
}

fn check_calls(derived_code: &str, expr: &Expr) -> Result<(), CompileError> {
    match expr {
        Expr::Call(name, args) => {
            if !BUILTIN_FUNCTIONS.contains(&name.as_str()) {
                return Err(CompileError::UnknownFunction {
                    derived_code: derived_code.to_string(),
                    function: name.clone(),
                });
            }
            let arity_ok = match name.as_str() {
                "len" | "sum" => args.len() == 1,
                _ => !args.is_empty(),
            };
            if !arity_ok {
                return Err(CompileError::Syntax {
                    derived_code: derived_code.to_string(),
                    message: format!("{}() called with {} arguments", name, args.len()),
                });
            }
            args.iter().try_for_each(|a| check_calls(derived_code, a))
        }
        Expr::List(items) => items.iter().try_for_each(|a| check_calls(derived_code, a)),
        Expr::Unary(_, inner) => check_calls(derived_code, inner),
        Expr::Binary(_, lhs, rhs) => {
            check_calls(derived_code, lhs)?;
            check_calls(derived_code, rhs)
        }
        Expr::Literal(_) | Expr::Ident(_) => Ok(()),
    }
}

fn collect_identifiers(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Ident(id) => {
            out.insert(id.clone());
        }
        Expr::Call(_, items) | Expr::List(items) => {
            for item in items {
                collect_identifiers(item, out);
            }
        }
        Expr::Unary(_, inner) => collect_identifiers(inner, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_identifiers(lhs, out);
            collect_identifiers(rhs, out);
        }
        Expr::Literal(_) => {}
    }
}
