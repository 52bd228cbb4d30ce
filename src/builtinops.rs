//! Built-in operations registry.
//!
//! This module provides the catalog of primitive operations installed into every root
//! environment, with per-operation arity metadata and the implementations of the pure
//! builtins.
//!
//! ```lisp
//! + 1 2 3            ; arithmetic
//! join {1} {2 3}     ; list operations
//! == {1 2} {1 2}     ; structural equality
//! ```
//!
//! ## Functions vs Forms
//!
//! - **Functions**: Only see their (already evaluated) arguments (e.g. `+`, `head`, `==`)
//! - **Forms**: Also receive the calling environment and evaluation depth, because they
//!   bind names, evaluate Q-expressions or perform I/O (`eval`, `if`, `def`, `lambda`,
//!   `load`, `print`)
//!
//! Forms live in the evaluator and are referenced from the registry here.
//!
//! ## Error Handling
//!
//! Every builtin validates its own arguments and reports problems as [`Error`]s,
//! which become error values at the application boundary:
//!
//! - **Arity Checking**: validated from the registry's [`Arity`] before the call
//! - **Type Safety**: non-numeric operands to arithmetic name the offending position
//! - **Overflow Detection**: arithmetic uses checked operations
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** following [`OperationFn`] (or [`FormFn`] if it needs
//!    the environment)
//! 2. **Add to BUILTIN_OPS** with its identifier and arity
//! 3. **Add tests** covering edge cases and error conditions

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::Error;
use crate::ast::{NumberType, Value};
use crate::evaluator::{
    Environment, eval_define, eval_if, eval_lambda, eval_load, eval_print, eval_qexpr,
};

/// Number of arguments an operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub(crate) fn validate(self, function: &str, got: usize) -> Result<(), Error> {
        let ok = match self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::arity_error(function, self, got))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Any => write!(f, "any number"),
        }
    }
}

/// Canonical builtin signature: owns its evaluated arguments
pub type OperationFn = fn(Vec<Value>) -> Result<Value, Error>;

/// Builtin signature for operations that need the calling environment and current depth
pub type FormFn = fn(Vec<Value>, &mut Environment<'_>, usize) -> Result<Value, Error>;

/// Represents the implementation of a builtin
#[derive(Clone, Copy)]
pub enum OpKind {
    Function(OperationFn),
    Form(FormFn),
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::Form(_) => write!(f, "Form(<fn>)"),
        }
    }
}

/// Definition of a registered builtin operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The symbol this operation is bound to in a fresh global environment
    pub id: &'static str,
    pub kind: OpKind,
    pub arity: Arity,
}

impl BuiltinOp {
    pub fn is_form(&self) -> bool {
        matches!(self.kind, OpKind::Form(_))
    }
}

/// Registration serial handed to the next embedder builtin; 0 marks registry primitives
static NEXT_REGISTRATION: AtomicUsize = AtomicUsize::new(1);

/// A builtin function value
///
/// Two builtin values are equal exactly when they were created for the same primitive,
/// however many times they have been copied. Registry primitives are identified by
/// their id. Each embedder registration is a primitive of its own, even when it reuses
/// the name of an existing builtin.
#[derive(Clone)]
pub struct Builtin {
    id: Cow<'static, str>,
    registration: usize,
    pub(crate) kind: OpKind,
    pub(crate) arity: Arity,
}

impl Builtin {
    pub(crate) fn from_op(op: &'static BuiltinOp) -> Self {
        Builtin {
            id: Cow::Borrowed(op.id),
            registration: 0,
            kind: op.kind,
            arity: op.arity,
        }
    }

    /// A builtin provided by the embedding application
    pub(crate) fn custom(id: impl Into<String>, func: OperationFn, arity: Arity) -> Self {
        Builtin {
            id: Cow::Owned(id.into()),
            registration: NEXT_REGISTRATION.fetch_add(1, Ordering::Relaxed),
            kind: OpKind::Function(func),
            arity,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.registration == other.registration
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({}, {:?})", self.id, self.arity)
    }
}

//
// Argument helpers
//

/// Encode a comparison result as the language's truth value
fn truth(b: bool) -> Value {
    Value::from(b)
}

fn numeric_args(function: &str, args: &[Value]) -> Result<Vec<NumberType>, Error> {
    args.iter()
        .enumerate()
        .map(|(i, arg)| match arg {
            Value::Number(n) => Ok(*n),
            other => Err(Error::type_error(function, i + 1, "Number", other)),
        })
        .collect()
}

/// Take the items of the single Q-expression argument of `function`
pub(crate) fn single_qexpr(function: &str, args: Vec<Value>) -> Result<Vec<Value>, Error> {
    let got = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(Value::QExpr(items)), None) => Ok(items),
        (Some(other), None) => Err(Error::type_error(function, 1, "Q-Expression", &other)),
        _ => Err(Error::arity_error(function, Arity::Exact(1), got)),
    }
}

fn non_empty_qexpr(function: &str, args: Vec<Value>) -> Result<Vec<Value>, Error> {
    let items = single_qexpr(function, args)?;
    if items.is_empty() {
        return Err(Error::EvalError(format!("Function '{function}' passed {{}}!")));
    }
    Ok(items)
}

//
// Builtin Function Implementations
//

#[derive(Debug, Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
            ArithOp::Pow => "^",
        }
    }

    fn apply(self, lhs: NumberType, rhs: NumberType) -> Result<NumberType, Error> {
        let overflow = |what: &str| Error::EvalError(format!("Integer overflow in {what}"));
        match self {
            ArithOp::Add => lhs.checked_add(rhs).ok_or_else(|| overflow("addition")),
            ArithOp::Sub => lhs.checked_sub(rhs).ok_or_else(|| overflow("subtraction")),
            ArithOp::Mul => lhs
                .checked_mul(rhs)
                .ok_or_else(|| overflow("multiplication")),
            ArithOp::Div | ArithOp::Rem if rhs == 0 => Err(Error::DivisionByZero),
            ArithOp::Div => lhs.checked_div(rhs).ok_or_else(|| overflow("division")),
            ArithOp::Rem => lhs.checked_rem(rhs).ok_or_else(|| overflow("modulo")),
            ArithOp::Pow if rhs == 0 => Ok(1),
            ArithOp::Pow => {
                let exponent = u32::try_from(rhs).map_err(|_| {
                    if rhs < 0 {
                        Error::EvalError("Function '^' passed negative exponent".to_owned())
                    } else {
                        overflow("exponentiation")
                    }
                })?;
                lhs.checked_pow(exponent)
                    .ok_or_else(|| overflow("exponentiation"))
            }
        }
    }
}

/// Left fold of `op` over integer arguments; `-` with one operand negates it
fn arithmetic(op: ArithOp, args: Vec<Value>) -> Result<Value, Error> {
    let numbers = numeric_args(op.symbol(), &args)?;
    let Some((&first, rest)) = numbers.split_first() else {
        return Err(Error::arity_error(op.symbol(), Arity::AtLeast(1), 0));
    };

    if rest.is_empty() && matches!(op, ArithOp::Sub) {
        return first
            .checked_neg()
            .map(Value::Number)
            .ok_or_else(|| Error::EvalError("Integer overflow in negation".into()));
    }

    rest.iter()
        .try_fold(first, |acc, &n| op.apply(acc, n))
        .map(Value::Number)
}

macro_rules! arithmetic_op {
    ($name:ident, $op:expr) => {
        fn $name(args: Vec<Value>) -> Result<Value, Error> {
            arithmetic($op, args)
        }
    };
}

arithmetic_op!(builtin_add, ArithOp::Add);
arithmetic_op!(builtin_sub, ArithOp::Sub);
arithmetic_op!(builtin_mul, ArithOp::Mul);
arithmetic_op!(builtin_div, ArithOp::Div);
arithmetic_op!(builtin_rem, ArithOp::Rem);
arithmetic_op!(builtin_pow, ArithOp::Pow);

// Macro to generate integer ordering functions
macro_rules! ordering_op {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(args: Vec<Value>) -> Result<Value, Error> {
            match numeric_args($op_str, &args)?.as_slice() {
                [lhs, rhs] => Ok(truth(lhs $op rhs)),
                other => Err(Error::arity_error($op_str, Arity::Exact(2), other.len())),
            }
        }
    };
}

ordering_op!(builtin_gt, >, ">");
ordering_op!(builtin_lt, <, "<");
ordering_op!(builtin_ge, >=, ">=");
ordering_op!(builtin_le, <=, "<=");

fn builtin_eq(args: Vec<Value>) -> Result<Value, Error> {
    match args.as_slice() {
        [lhs, rhs] => Ok(truth(lhs == rhs)),
        other => Err(Error::arity_error("==", Arity::Exact(2), other.len())),
    }
}

fn builtin_ne(args: Vec<Value>) -> Result<Value, Error> {
    match args.as_slice() {
        [lhs, rhs] => Ok(truth(lhs != rhs)),
        other => Err(Error::arity_error("!=", Arity::Exact(2), other.len())),
    }
}

fn builtin_list(args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::QExpr(args))
}

fn builtin_head(args: Vec<Value>) -> Result<Value, Error> {
    let mut items = non_empty_qexpr("head", args)?;
    items.truncate(1);
    Ok(Value::QExpr(items))
}

fn builtin_tail(args: Vec<Value>) -> Result<Value, Error> {
    let mut items = non_empty_qexpr("tail", args)?;
    items.remove(0);
    Ok(Value::QExpr(items))
}

fn builtin_join(args: Vec<Value>) -> Result<Value, Error> {
    let mut joined = Vec::new();
    for (i, arg) in args.into_iter().enumerate() {
        match arg {
            Value::QExpr(items) => joined.extend(items),
            other => return Err(Error::type_error("join", i + 1, "Q-Expression", &other)),
        }
    }
    Ok(Value::QExpr(joined))
}

// The pair is kept as-is: `cons 0 {1 2}` is `{0 {1 2}}`
fn builtin_cons(args: Vec<Value>) -> Result<Value, Error> {
    match <[Value; 2]>::try_from(args) {
        Ok(pair) => Ok(Value::QExpr(pair.into())),
        Err(args) => Err(Error::arity_error("cons", Arity::Exact(2), args.len())),
    }
}

fn builtin_len(args: Vec<Value>) -> Result<Value, Error> {
    let items = single_qexpr("len", args)?;
    NumberType::try_from(items.len())
        .map(Value::Number)
        .map_err(|_| Error::EvalError("Integer overflow in len".into()))
}

fn builtin_error(args: Vec<Value>) -> Result<Value, Error> {
    let got = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(Value::String(message)), None) => Ok(Value::Error(message)),
        (Some(other), None) => Err(Error::type_error("error", 1, "String", &other)),
        _ => Err(Error::arity_error("error", Arity::Exact(1), got)),
    }
}

/// Global registry of all builtin operations, in installation order
static BUILTIN_OPS: &[BuiltinOp] = &[
    // Arithmetic operations
    BuiltinOp {
        id: "+",
        kind: OpKind::Function(builtin_add),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "-",
        kind: OpKind::Function(builtin_sub),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "*",
        kind: OpKind::Function(builtin_mul),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "/",
        kind: OpKind::Function(builtin_div),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "%",
        kind: OpKind::Function(builtin_rem),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "^",
        kind: OpKind::Function(builtin_pow),
        arity: Arity::AtLeast(1),
    },
    // List operations
    BuiltinOp {
        id: "list",
        kind: OpKind::Function(builtin_list),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "head",
        kind: OpKind::Function(builtin_head),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "tail",
        kind: OpKind::Function(builtin_tail),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "join",
        kind: OpKind::Function(builtin_join),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        id: "cons",
        kind: OpKind::Function(builtin_cons),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "len",
        kind: OpKind::Function(builtin_len),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "eval",
        kind: OpKind::Form(eval_qexpr),
        arity: Arity::Exact(1),
    },
    // Comparison operations
    BuiltinOp {
        id: "==",
        kind: OpKind::Function(builtin_eq),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "!=",
        kind: OpKind::Function(builtin_ne),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: ">",
        kind: OpKind::Function(builtin_gt),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "<",
        kind: OpKind::Function(builtin_lt),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: ">=",
        kind: OpKind::Function(builtin_ge),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        id: "<=",
        kind: OpKind::Function(builtin_le),
        arity: Arity::Exact(2),
    },
    // Control flow
    BuiltinOp {
        id: "if",
        kind: OpKind::Form(eval_if),
        arity: Arity::Exact(3),
    },
    // Binding
    BuiltinOp {
        id: "def",
        kind: OpKind::Form(eval_define),
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        id: "lambda",
        kind: OpKind::Form(eval_lambda),
        arity: Arity::Exact(2),
    },
    // I/O
    BuiltinOp {
        id: "load",
        kind: OpKind::Form(eval_load),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        id: "print",
        kind: OpKind::Form(eval_print),
        arity: Arity::Any,
    },
    BuiltinOp {
        id: "error",
        kind: OpKind::Function(builtin_error),
        arity: Arity::Exact(1),
    },
];

/// Lazy static map from id to BuiltinOp (private - use find_builtin_op)
static BUILTIN_INDEX: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.id, op)).collect());

/// Get all builtin operations (for internal use by evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}

/// Find a builtin operation by its identifier
pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_INDEX.get(id).copied()
}
