//! This module defines the core value type of the language and helper functions for
//! building values. The main enum, [`Value`], is a closed sum over every datum and
//! every intermediate evaluation result: integers, strings, symbols, S-expressions,
//! Q-expressions, functions and errors. Ergonomic helpers such as [`val`], [`sym`],
//! [`sexpr`] and [`nil`] are provided for convenient construction in code and tests.
//! Equality is structural, except that builtins compare by identity and closures
//! ignore their captured bindings.

use std::rc::Rc;

use crate::builtinops::Builtin;
use crate::evaluator::Bindings;

/// Type alias for number values in interpreter
pub(crate) type NumberType = i64;

/// Formal parameter that makes the following formal collect all remaining arguments
pub const VARIADIC_MARKER: &str = "&";

/// Allowed non-alphanumeric characters in symbol names
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "_+-*/\\=<>!&^%";

/// Core value type in interpreter
///
/// To build values, use the helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for `{}`
/// - `val([1, 2, 3])` for homogeneous Q-expressions
/// - `sexpr(vec![sym("+"), val(1), val(2)])` for evaluable expressions
#[derive(Clone)]
pub enum Value {
    /// Numbers (integers only)
    Number(NumberType),
    /// String literals
    String(String),
    /// Unresolved identifiers, looked up when evaluated
    Symbol(String),
    /// Evaluable expression lists
    SExpr(Vec<Value>),
    /// Quoted lists, never evaluated automatically
    QExpr(Vec<Value>),
    /// Builtins and closures
    Function(Function),
    /// First-class failure carrying its message
    Error(String),
}

/// A callable value
#[derive(Clone, Debug, PartialEq)]
pub enum Function {
    Builtin(Builtin),
    /// Shared until a call needs to bind into it, then copied on write
    Closure(Rc<Closure>),
}

/// User-defined function (formals, body, bindings made by earlier partial applications)
#[derive(Clone)]
pub struct Closure {
    pub(crate) formals: Vec<String>,
    pub(crate) body: Vec<Value>,
    pub(crate) env: Bindings,
}

impl Closure {
    /// Create a closure with an empty captured environment
    pub fn new(formals: Vec<String>, body: Vec<Value>) -> Self {
        Closure {
            formals,
            body,
            env: Bindings::new(),
        }
    }

    pub fn formals(&self) -> &[String] {
        &self.formals
    }

    /// Arguments already bound by partial application
    pub fn env(&self) -> &Bindings {
        &self.env
    }
}

// Captured environments take no part in closure equality
impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        self.formals == other.formals && self.body == other.body
    }
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut bound: Vec<&String> = self.env.keys().collect();
        bound.sort();
        write!(
            f,
            "Closure(formals={:?}, body={:?}, bound={bound:?})",
            self.formals, self.body
        )
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_items(
            f: &mut std::fmt::Formatter<'_>,
            label: &str,
            items: &[Value],
        ) -> std::fmt::Result {
            write!(f, "{label}(")?;
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{v:?}")?;
            }
            write!(f, ")")
        }

        match self {
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String(\"{s}\")"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::SExpr(items) => write_items(f, "SExpr", items),
            Value::QExpr(items) => write_items(f, "QExpr", items),
            Value::Function(Function::Builtin(builtin)) => write!(f, "Builtin({})", builtin.id()),
            Value::Function(Function::Closure(closure)) => write!(f, "{closure:?}"),
            Value::Error(msg) => write!(f, "Error(\"{msg}\")"),
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Number(NumberType::from(b))
    }
}

impl From<crate::Error> for Value {
    fn from(error: crate::Error) -> Self {
        Value::Error(error.to_string())
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(n as NumberType)
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType); // Special case - no casting
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::QExpr(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::QExpr(arr.into_iter().map(|x| x.into()).collect())
    }
}

/// Helper function for creating symbols - works great in mixed lists!
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating Values - works great in mixed lists!
/// Lists become Q-expressions; use [`sexpr`] for evaluable lists.
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper function for creating S-expressions
pub fn sexpr(items: Vec<Value>) -> Value {
    Value::SExpr(items)
}

/// Helper function for the empty Q-expression `{}`
pub fn nil() -> Value {
    Value::QExpr(vec![])
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_items(
            f: &mut std::fmt::Formatter<'_>,
            open: char,
            items: &[Value],
            close: char,
        ) -> std::fmt::Result {
            write!(f, "{open}")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, "{close}")
        }

        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Value::Symbol(s) => write!(f, "{s}"),
            Value::SExpr(items) => write_items(f, '(', items, ')'),
            Value::QExpr(items) => write_items(f, '{', items, '}'),
            Value::Function(Function::Builtin(builtin)) => {
                write!(f, "<builtin:{}>", builtin.id())
            }
            Value::Function(Function::Closure(closure)) => {
                write!(f, "(\\ {{{}}} ", closure.formals.join(" "))?;
                write_items(f, '{', &closure.body, '}')?;
                write!(f, ")")
            }
            Value::Error(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl Value {
    /// Name of this value's kind as used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::Symbol(_) => "Symbol",
            Value::SExpr(_) => "S-Expression",
            Value::QExpr(_) => "Q-Expression",
            Value::Function(_) => "Function",
            Value::Error(_) => "Error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::SExpr(a), Value::SExpr(b)) => a == b,
            (Value::QExpr(a), Value::QExpr(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false, // Different variants are never equal
        }
    }
}
