//! Parser: token stream to AST
//!
//! ## Pipeline
//!
//! ```text
//! Source -> tokenize() -> Vec<Token> -> parse() -> Vec<AstNode> (one per top-level form)
//! ```
//!
//! Nesting is handled with an explicit stack so deeply nested input cannot
//! exhaust the call stack.

use crate::ast::AstNode;
use crate::error::SyntaxError;
use crate::token::{tokenize, Token, TokenKind};

// ============================================================================
// Public API
// ============================================================================

/// Build one AST per top-level form
pub fn parse(tokens: &[Token]) -> Result<Vec<AstNode>, SyntaxError> {
    let mut forms = Vec::new();
    // Open lists, innermost last
    let mut stack: Vec<Vec<AstNode>> = Vec::new();

    for token in tokens {
        match token.kind {
            TokenKind::OpenParen => stack.push(Vec::new()),
            TokenKind::CloseParen => {
                let items = stack
                    .pop()
                    .ok_or(SyntaxError::UnexpectedCloseParen(token.pos))?;
                let node = AstNode::List(items);
                match stack.last_mut() {
                    Some(parent) => parent.push(node),
                    None => forms.push(node),
                }
            }
            TokenKind::Atom | TokenKind::QuotedString => match stack.last_mut() {
                Some(parent) => parent.push(AstNode::Atom(token.text.clone())),
                None => {
                    return Err(SyntaxError::UnexpectedToken {
                        text: token.text.clone(),
                        pos: token.pos,
                    })
                }
            },
        }
    }

    if !stack.is_empty() {
        return Err(SyntaxError::UnexpectedEof);
    }
    Ok(forms)
}

/// Tokenize and parse in one step
pub fn parse_source(source: &str) -> Result<Vec<AstNode>, SyntaxError> {
    let tokens = tokenize(source)?;
    parse(&tokens)
}

// ============================================================================
// Tests
// ============================================================================
