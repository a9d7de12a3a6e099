//! Generic nested-list AST
//!
//! The parser makes no semantic judgement: every form is either an atom or a
//! list of forms. Quoted strings become atoms holding their decoded value.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AstNode {
    Atom(String),
    List(Vec<AstNode>),
}

impl AstNode {
    pub fn atom(text: impl Into<String>) -> Self {
        AstNode::Atom(text.into())
    }

    pub fn as_atom(&self) -> Option<&str> {
        match self {
            AstNode::Atom(s) => Some(s),
            AstNode::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AstNode]> {
        match self {
            AstNode::List(items) => Some(items),
            AstNode::Atom(_) => None,
        }
    }

    /// Head keyword of a clause: the leading atom of a list
    pub fn head(&self) -> Option<&str> {
        self.as_list()?.first()?.as_atom()
    }

    /// Everything after the head of a list; empty for atoms
    pub fn args(&self) -> &[AstNode] {
        match self {
            AstNode::List(items) if !items.is_empty() => &items[1..],
            _ => &[],
        }
    }

    /// Sub-clauses (list arguments) whose head matches `key`
    pub fn clauses<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a AstNode> + 'a {
        self.args().iter().filter(move |n| n.head() == Some(key))
    }

    /// Compact single-line rendering, used in error messages
    pub fn to_dsl_string(&self) -> String {
        match self {
            AstNode::Atom(s) => crate::serializer::render_atom(s),
            AstNode::List(items) => {
                let inner: Vec<String> = items.iter().map(|n| n.to_dsl_string()).collect();
                format!("({})", inner.join(" "))
            }
        }
    }
}
