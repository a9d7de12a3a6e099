//! Tokenizer for KYC DSL source text
//!
//! Produces a flat stream of parens, bareword atoms and quoted strings.
//! Comments are dropped: `;` runs to end of line anywhere outside a string,
//! `#` does the same when it is the first non-blank character of a line.
//!
//! Paren balance is checked here so that unbalanced input is reported with the
//! position of the offending paren rather than as a premature end of input.

use serde::{Deserialize, Serialize};

use crate::error::{SourcePos, SyntaxError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    OpenParen,
    CloseParen,
    Atom,
    QuotedString,
}

/// A token with its text and start position.
///
/// For `QuotedString` the text is the decoded value (quotes removed, escapes
/// applied).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: SourcePos,
}

/// Tokenize DSL source text
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Tokenizer::new(source).run()
}

struct Tokenizer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    offset: usize,
    line: u32,
    column: u32,
    at_line_start: bool,
    open_parens: Vec<SourcePos>,
    tokens: Vec<Token>,
}

impl<'a> Tokenizer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            offset: 0,
            line: 1,
            column: 1,
            at_line_start: true,
            open_parens: Vec::new(),
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        while let Some(ch) = self.peek_char() {
            let pos = self.pos();
            match ch {
                '(' => {
                    self.bump();
                    self.open_parens.push(pos);
                    self.push(TokenKind::OpenParen, "(".to_string(), pos);
                }
                ')' => {
                    self.bump();
                    if self.open_parens.pop().is_none() {
                        return Err(SyntaxError::UnexpectedCloseParen(pos));
                    }
                    self.push(TokenKind::CloseParen, ")".to_string(), pos);
                }
                '"' => {
                    let text = self.read_string(pos)?;
                    self.push(TokenKind::QuotedString, text, pos);
                }
                ';' => self.skip_line(),
                '#' if self.at_line_start => self.skip_line(),
                c if c.is_whitespace() => {
                    self.bump();
                }
                _ => {
                    let text = self.read_atom();
                    self.push(TokenKind::Atom, text, pos);
                }
            }
        }

        match self.open_parens.pop() {
            Some(pos) => Err(SyntaxError::UnclosedParen(pos)),
            None => Ok(self.tokens),
        }
    }

    fn push(&mut self, kind: TokenKind, text: String, pos: SourcePos) {
        self.at_line_start = false;
        self.tokens.push(Token { kind, text, pos });
    }

    fn read_string(&mut self, start: SourcePos) -> Result<String, SyntaxError> {
        self.bump(); // consume opening "
        let mut out = String::new();

        loop {
            let escape_pos = self.pos();
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some(ch) => {
                        return Err(SyntaxError::InvalidEscape {
                            ch,
                            pos: escape_pos,
                        })
                    }
                    None => return Err(SyntaxError::UnterminatedString(start)),
                },
                Some(ch) => out.push(ch),
                None => return Err(SyntaxError::UnterminatedString(start)),
            }
        }
    }

    fn read_atom(&mut self) -> String {
        let mut out = String::new();
        while let Some(ch) = self.peek_char() {
            if is_delimiter(ch) {
                break;
            }
            out.push(ch);
            self.bump();
        }
        out
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn pos(&self) -> SourcePos {
        SourcePos {
            offset: self.offset,
            line: self.line,
            column: self.column,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let (i, ch) = self.chars.next()?;
        self.offset = i + ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
            self.at_line_start = true;
        } else {
            self.column += 1;
        }
        Some(ch)
    }
}

/// Characters that terminate a bareword atom
pub(crate) fn is_delimiter(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | ';')
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_form() {
        let tokens = tokenize(r#"(kyc-token "pending")"#).unwrap();
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![
                TokenKind::OpenParen,
                TokenKind::Atom,
                TokenKind::QuotedString,
                TokenKind::CloseParen
            ]
        );
        assert_eq!(tokens[1].text, "kyc-token");
        assert_eq!(tokens[2].text, "pending");
    }

    #[test]
    fn test_positions_track_lines() {
        let tokens = tokenize("(a\n  b)").unwrap();
        assert_eq!(tokens[2].text, "b");
        assert_eq!(tokens[2].pos.line, 2);
        assert_eq!(tokens[2].pos.column, 3);
        assert_eq!(tokens[2].pos.offset, 5);
    }

    #[test]
    fn test_escape_sequences() {
        let tokens = tokenize(r#"("a \"quoted\" \\ value\n")"#).unwrap();
        assert_eq!(tokens[1].text, "a \"quoted\" \\ value\n");
    }

    #[test]
    fn test_empty_string() {
        let tokens = tokenize(r#"(x "")"#).unwrap();
        assert_eq!(tokens[2].kind, TokenKind::QuotedString);
        assert_eq!(tokens[2].text, "");
    }

    #[test]
    fn test_comments_skipped() {
        let source = "; leading comment\n# hash comment\n(a ; trailing\n b)";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::OpenParen,
                TokenKind::Atom,
                TokenKind::Atom,
                TokenKind::CloseParen
            ]
        );
    }

    #[test]
    fn test_hash_inside_line_is_atom() {
        let tokens = tokenize("(ref #42)").unwrap();
        assert_eq!(tokens[2].text, "#42");
    }

    #[test]
    fn test_semicolon_inside_string_kept() {
        let tokens = tokenize(r#"("a;b")"#).unwrap();
        assert_eq!(tokens[1].text, "a;b");
    }

    #[test]
    fn test_percent_atom() {
        let tokens = tokenize("(owner A 60%)").unwrap();
        assert_eq!(tokens[3].text, "60%");
    }

    #[test]
    fn test_error_unclosed_string() {
        let err = tokenize("(a \"never ends)").unwrap_err();
        match err {
            SyntaxError::UnterminatedString(pos) => {
                assert_eq!(pos.line, 1);
                assert_eq!(pos.column, 4);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_error_unclosed_paren() {
        let err = tokenize("(a\n  (b c)").unwrap_err();
        assert_eq!(
            err,
            SyntaxError::UnclosedParen(SourcePos {
                offset: 0,
                line: 1,
                column: 1
            })
        );
    }

    #[test]
    fn test_error_extra_close_paren() {
        let err = tokenize("(a))").unwrap_err();
        match err {
            SyntaxError::UnexpectedCloseParen(pos) => assert_eq!(pos.column, 4),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_error_invalid_escape() {
        let err = tokenize(r#"("bad \q")"#).unwrap_err();
        assert!(matches!(err, SyntaxError::InvalidEscape { ch: 'q', .. }));
    }

    #[test]
    fn test_unicode_in_strings() {
        let tokens = tokenize("(nature \"Société Générale\")").unwrap();
        assert_eq!(tokens[2].text, "Société Générale");
    }
}
