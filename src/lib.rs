//! Lispy - a small Lisp evaluator built around S-expressions and Q-expressions
//!
//! This crate implements the evaluation core of a dynamically-typed Lisp: a value
//! model, a chain of lexical environments, a registry of builtin operations and a
//! recursive evaluator that applies builtins and user-defined closures, including
//! partial application (currying) and variadic parameter binding.
//!
//! ```lisp
//! + 1 2 3                          ; 6
//! head {1 2 3}                     ; {1}
//! def {add} (lambda {x y} {+ x y})
//! (add 1) 2                        ; 3, via a partially applied closure
//! (lambda {x & xs} {xs}) 1 2 3     ; {2 3}
//! ```
//!
//! ## Values, not exceptions
//!
//! Failures are first-class [`ast::Value::Error`] values. Inside an S-expression the
//! first failing element (left to right) becomes the result of the whole expression.
//! Builtins are ordinary Rust functions returning `Result<Value, Error>`; an `Err` is
//! turned into an error value at the application boundary.
//!
//! ## Modules
//!
//! - `ast`: the [`ast::Value`] type and construction helpers
//! - `syntax`: the generic syntax tree consumed by the evaluator core and its
//!   conversion into values
//! - `reader`: text to syntax tree parsing (feature `reader`, on by default)
//! - `evaluator`: environments, the evaluator and the application protocol
//! - `builtinops`: the builtin operation registry

use std::fmt;

use crate::builtinops::Arity;

/// Maximum list nesting accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 128;

/// Default maximum evaluation depth before an expression is abandoned with an error
/// Each nested evaluation (sub-expression, closure body, `eval`/`if` branch) counts as one level
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, mismatched delimiters)
    InvalidSyntax,
    /// Input ended before the expression was complete (unterminated string, unclosed list)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Input left over after the last complete expression
    TrailingContent,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let start = floor_char_boundary(input, error_offset.saturating_sub(20));
        let context_str: String = input[start..].chars().take(MAX_CONTEXT).collect();

        let mut display_context = String::new();
        if start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        // Keep the snippet on a single line
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        let found = input
            .get(floor_char_boundary(input, error_offset)..)
            .and_then(|rest| rest.chars().next())
            .map(String::from);

        Self::new(kind, message, Some(display_context), found)
    }
}

fn floor_char_boundary(input: &str, mut offset: usize) -> usize {
    offset = offset.min(input.len());
    while !input.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// Error types for the interpreter
///
/// The `Display` form of each variant is the message carried by the language-level
/// error value it becomes.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    EvalError(String),
    TypeError {
        function: String,
        position: usize,
        expected: &'static str,
        got: &'static str,
    },
    UnboundSymbol(String),
    ArityError {
        function: String,
        expected: Arity,
        got: usize,
    },
    /// A closure received more arguments than it has formals
    TooManyArguments {
        expected: usize,
        got: usize,
    },
    /// A `&` formal that is not followed by exactly one symbol
    InvalidFormals,
    NotAFunction,
    DivisionByZero,
    DepthExceeded(usize),
    Io(String),
}

impl Error {
    pub fn arity_error(function: impl Into<String>, expected: Arity, got: usize) -> Self {
        Error::ArityError {
            function: function.into(),
            expected,
            got,
        }
    }

    /// Type mismatch for the argument at 1-based `position`
    pub fn type_error(
        function: impl Into<String>,
        position: usize,
        expected: &'static str,
        got: &ast::Value,
    ) -> Self {
        Error::TypeError {
            function: function.into(),
            position,
            expected,
            got: got.kind_name(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::EvalError(msg) => write!(f, "{msg}"),
            Error::TypeError {
                function,
                position,
                expected,
                got,
            } => write!(
                f,
                "Function '{function}' passed incorrect type for argument {position}. Got {got}, expected {expected}."
            ),
            Error::UnboundSymbol(name) => write!(f, "Symbol '{name}' not bounded"),
            Error::ArityError {
                function,
                expected,
                got,
            } => write!(
                f,
                "Function '{function}' passed incorrect number of arguments. Got {got}, expected {expected}."
            ),
            Error::TooManyArguments { expected, got } => write!(
                f,
                "Function passed too many arguments. Got {got}, expected {expected}"
            ),
            Error::InvalidFormals => {
                write!(f, "Function format invalid: '&' not followed by single symbol")
            }
            Error::NotAFunction => write!(f, "S-expression does not start with function"),
            Error::DivisionByZero => write!(f, "Division by zero"),
            Error::DepthExceeded(max) => {
                write!(f, "Evaluation depth limit exceeded (max: {max})")
            }
            Error::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
mod stack;
pub mod syntax;

#[cfg(feature = "reader")]
pub mod reader;
