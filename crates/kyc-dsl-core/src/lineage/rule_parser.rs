//! Rule-expression parser
//!
//! Precedence, loosest first: `||`/`or`, `&&`/`and`, `!`/`not`, comparisons
//! and `in`/`not in`, `+ -`, `* / %`, unary `-`.
//!
//! ```text
//! TAX_RESIDENCY_COUNTRY in ["IR", "KP", "SY"] || PEP_STATUS == true
//! max(UBO_PERCENT) >= 25 && len(UBO_NAME) > 3
//! ```

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag},
    character::complete::{
        alpha1, alphanumeric1, char, digit1, multispace0, multispace1, none_of, satisfy,
    },
    combinator::{all_consuming, cut, map, not, opt, peek, recognize, value, verify},
    error::{context, ContextError, ParseError as NomParseError},
    multi::{fold_many0, many0_count, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

impl Expr {
    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }
}

const RESERVED: &[&str] = &["true", "false", "and", "or", "not", "in"];

// ============================================================================
// Public API
// ============================================================================

/// Parse a complete rule expression
pub fn parse_rule(input: &str) -> Result<Expr, String> {
    match all_consuming(delimited(
        multispace0::<_, nom::error::VerboseError<&str>>,
        expr,
        multispace0,
    ))(input)
    {
        Ok((_, e)) => Ok(e),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(nom::error::convert_error(input, e))
        }
        Err(nom::Err::Incomplete(_)) => Err("Incomplete input".to_string()),
    }
}

// ============================================================================
// Operators by precedence
// ============================================================================

fn expr<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    or_expr(input)
}

fn or_expr<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, first) = and_expr(input)?;
    fold_many0(
        preceded(ws(alt((tag("||"), keyword("or")))), cut(and_expr)),
        move || first.clone(),
        |acc, rhs| Expr::binary(BinaryOp::Or, acc, rhs),
    )(input)
}

fn and_expr<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, first) = not_expr(input)?;
    fold_many0(
        preceded(ws(alt((tag("&&"), keyword("and")))), cut(not_expr)),
        move || first.clone(),
        |acc, rhs| Expr::binary(BinaryOp::And, acc, rhs),
    )(input)
}

// Prefix chains are counted, not recursed, so a long run of `!` cannot
// exhaust the stack.
fn not_expr<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let bang = terminated(tag("!"), not(char('=')));
    let (input, count) = many0_count(ws(alt((bang, keyword("not")))))(input)?;
    let (input, inner) = comparison(input)?;
    Ok((input, prefixed(UnaryOp::Not, count, inner)))
}

fn comparison<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, lhs) = sum(input)?;
    let (input, rest) = opt(pair(ws(comparison_op), cut(sum)))(input)?;
    match rest {
        Some((op, rhs)) => Ok((input, Expr::binary(op, lhs, rhs))),
        None => Ok((input, lhs)),
    }
}

fn comparison_op<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, BinaryOp, E> {
    alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Gt, tag(">")),
        value(BinaryOp::In, keyword("in")),
        value(BinaryOp::NotIn, tuple((keyword("not"), multispace1, keyword("in")))),
    ))(input)
}

fn sum<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, first) = product(input)?;
    fold_many0(
        pair(
            ws(alt((value(BinaryOp::Add, char('+')), value(BinaryOp::Sub, char('-'))))),
            cut(product),
        ),
        move || first.clone(),
        |acc, (op, rhs)| Expr::binary(op, acc, rhs),
    )(input)
}

fn product<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, first) = unary(input)?;
    fold_many0(
        pair(
            ws(alt((
                value(BinaryOp::Mul, char('*')),
                value(BinaryOp::Div, char('/')),
                value(BinaryOp::Rem, char('%')),
            ))),
            cut(unary),
        ),
        move || first.clone(),
        |acc, (op, rhs)| Expr::binary(op, acc, rhs),
    )(input)
}

fn unary<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, count) = many0_count(ws(char('-')))(input)?;
    let (input, inner) = primary(input)?;
    Ok((input, prefixed(UnaryOp::Neg, count, inner)))
}

fn prefixed(op: UnaryOp, count: usize, inner: Expr) -> Expr {
    (0..count).fold(inner, |e, _| Expr::Unary(op, Box::new(e)))
}

// ============================================================================
// Primaries
// ============================================================================

fn primary<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    ws(context(
        "value",
        alt((
            map(number_literal, |n| Expr::Literal(Value::Number(n))),
            map(string_literal, |s| Expr::Literal(Value::String(s))),
            value(Expr::Literal(Value::Bool(true)), keyword("true")),
            value(Expr::Literal(Value::Bool(false)), keyword("false")),
            list_literal,
            delimited(char('('), expr, cut(ws(char(')')))),
            call,
            map(identifier, |id| Expr::Ident(id.to_string())),
        )),
    ))(input)
}

fn call<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, name) = terminated(identifier, peek(ws(char('('))))(input)?;
    let (input, args) = delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), expr),
        cut(ws(char(')'))),
    )(input)?;
    Ok((input, Expr::Call(name.to_string(), args)))
}

fn list_literal<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    map(
        delimited(
            char('['),
            separated_list0(ws(char(',')), expr),
            context("closing ']'", cut(ws(char(']')))),
        ),
        Expr::List,
    )(input)
}

fn number_literal<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, f64, E> {
    // digits with an optional fraction always parse as f64
    map(recognize(pair(digit1, opt(pair(char('.'), digit1)))), |s: &str| {
        s.parse::<f64>().unwrap_or_default()
    })(input)
}

// String literals with escape sequences
fn string_literal<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, String, E> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                none_of("\"\\"),
                '\\',
                alt((
                    value('\n', char('n')),
                    value('\r', char('r')),
                    value('\t', char('t')),
                    value('\\', char('\\')),
                    value('"', char('"')),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn identifier<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    verify(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0_count(alt((alphanumeric1, tag("_")))),
        )),
        |id: &str| !RESERVED.contains(&id),
    )(input)
}

/// A word that is not the prefix of a longer identifier
fn keyword<'a, E: NomParseError<&'a str>>(
    word: &'static str,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
    terminated(tag(word), not(satisfy(|c: char| c.is_alphanumeric() || c == '_')))
}

fn ws<'a, O, E: NomParseError<&'a str>, F>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

// ============================================================================
// Tests
// ============================================================================
