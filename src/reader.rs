use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, digit1, multispace0, not_line_ending},
    combinator::{cut, opt, recognize},
    error::ErrorKind,
    multi::many0,
    sequence::{pair, preceded},
};

use crate::ast::{SYMBOL_SPECIAL_CHARS, Value};
use crate::evaluator::SourceLoader;
use crate::syntax::{SyntaxNode, read_expressions, read_value};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseConfig {
    /// Accept `;` line comments
    pub handle_comments: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
        }
    }
}

const NUMBER_TAG: &str = "expr|number|regex";
const SYMBOL_TAG: &str = "expr|symbol|regex";
const STRING_TAG: &str = "expr|string|regex";
const SEXPR_TAG: &str = "expr|sexpr|>";
const QEXPR_TAG: &str = "expr|qexpr|>";

/// Convert nom parsing errors to structured parse errors
fn parse_error(input: &str, error: nom::Err<nom::error::Error<&str>>) -> ParseError {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            match e.code {
                ErrorKind::TooLarge => ParseError::with_context(
                    ParseErrorKind::TooDeeplyNested,
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                    input,
                    position,
                ),
                _ if e.input.is_empty() => ParseError::with_context(
                    ParseErrorKind::Incomplete,
                    "Unexpected end of input",
                    input,
                    position,
                ),
                ErrorKind::Char => ParseError::with_context(
                    ParseErrorKind::InvalidSyntax,
                    format!("Expected closing delimiter at position {position}"),
                    input,
                    position,
                ),
                _ => ParseError::with_context(
                    ParseErrorKind::InvalidSyntax,
                    format!("Invalid syntax at position {position}"),
                    input,
                    position,
                ),
            }
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input")
        }
    }
}

/// Parse an integer token
fn parse_number(input: &str) -> IResult<&str, SyntaxNode> {
    let (input, digits) = recognize(pair(opt(char('-')), digit1)).parse(input)?;
    Ok((input, SyntaxNode::leaf(NUMBER_TAG, digits)))
}

/// Parse a symbol (identifier)
fn parse_symbol(input: &str) -> IResult<&str, SyntaxNode> {
    let (input, name) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
            .parse(input)?;
    Ok((input, SyntaxNode::leaf(SYMBOL_TAG, name)))
}

/// Parse a string literal, keeping its quotes and escapes as written
fn parse_string(input: &str) -> IResult<&str, SyntaxNode> {
    let (body, _) = char('"').parse(input)?;

    let mut chars = body.char_indices();
    while let Some((offset, ch)) = chars.next() {
        match ch {
            '"' => {
                let end = 1 + offset + 1;
                return Ok((&input[end..], SyntaxNode::leaf(STRING_TAG, &input[..end])));
            }
            '\\' => {
                chars.next();
            }
            _ => {}
        }
    }

    // Reached end of input without finding closing quote
    Err(nom::Err::Failure(nom::error::Error::new(
        &input[input.len()..],
        ErrorKind::Char,
    )))
}

/// Parse a `;` comment running to the end of the line
fn parse_comment(input: &str, config: ParseConfig) -> IResult<&str, SyntaxNode> {
    if !config.handle_comments {
        return Err(nom::Err::Error(nom::error::Error::new(input, ErrorKind::Tag)));
    }
    let (input, text) = recognize(pair(char(';'), not_line_ending)).parse(input)?;
    Ok((input, SyntaxNode::leaf("comment", text)))
}

/// Parse a delimited list of expressions
fn parse_list<'a>(
    input: &'a str,
    (open, close): (char, char),
    tag: &str,
    config: ParseConfig,
    depth: usize,
) -> IResult<&'a str, SyntaxNode> {
    let (input, _) = char(open).parse(input)?;
    let (input, items) = many0(|input| parse_node(input, config, depth + 1)).parse(input)?;
    // Past the opening delimiter there is no alternative to backtrack to
    let (input, _) = cut(preceded(multispace0, char(close))).parse(input)?;

    let mut children = Vec::with_capacity(items.len() + 2);
    children.push(SyntaxNode::punctuation(open));
    children.extend(items);
    children.push(SyntaxNode::punctuation(close));
    Ok((input, SyntaxNode::branch(tag, children)))
}

/// Parse one expression or comment, skipping leading whitespace
fn parse_node(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, SyntaxNode> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    preceded(
        multispace0,
        alt((
            |input| parse_list(input, ('(', ')'), SEXPR_TAG, config, depth),
            |input| parse_list(input, ('{', '}'), QEXPR_TAG, config, depth),
            parse_string,
            parse_number,
            parse_symbol,
            |input| parse_comment(input, config),
        )),
    )
    .parse(input)
}

/// Parse a whole program into a root syntax node
pub fn parse_program(input: &str) -> Result<SyntaxNode, Error> {
    parse_program_with_config(input, &ParseConfig::default())
}

/// Parse a whole program into a root syntax node with explicit reader options
pub fn parse_program_with_config(input: &str, config: &ParseConfig) -> Result<SyntaxNode, Error> {
    let config = *config;
    let (remaining, nodes) = many0(|input| parse_node(input, config, 0))
        .parse(input)
        .map_err(|e| Error::ParseError(parse_error(input, e)))?;

    let remaining = remaining.trim_start_matches([' ', '\t', '\r', '\n']);
    if !remaining.is_empty() {
        let position = input.len() - remaining.len();
        return Err(Error::ParseError(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!("Unexpected input at position {position}"),
            input,
            position,
        )));
    }

    Ok(SyntaxNode::root(nodes))
}

/// Parse a line as a single S-expression of all its top-level expressions.
///
/// This is how interactive input is read: `+ 1 2` needs no outer parentheses.
///
/// ```
/// use lispy::ast::{sexpr, sym, val};
/// use lispy::reader::parse;
///
/// assert_eq!(parse("+ 1 2").unwrap(), sexpr(vec![sym("+"), val(1), val(2)]));
/// ```
pub fn parse(input: &str) -> Result<Value, Error> {
    parse_program(input).map(|root| read_value(&root))
}

/// Parse source text into its top-level expressions, each evaluated on its own
pub fn parse_expressions(input: &str, config: &ParseConfig) -> Result<Vec<Value>, Error> {
    parse_program_with_config(input, config).map(|root| read_expressions(&root))
}

/// Reads source files from the file system for `load`
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader {
    pub config: ParseConfig,
}

impl SourceLoader for FileLoader {
    fn load(&self, path: &str) -> Result<Vec<Value>, Error> {
        let source = std::fs::read_to_string(path).map_err(|e| Error::Io(e.to_string()))?;
        parse_expressions(&source, &self.config)
    }
}
