use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::Error;
use crate::MAX_EVAL_DEPTH;
use crate::ast::{Closure, Function, VARIADIC_MARKER, Value};
use crate::builtinops::{Arity, Builtin, OpKind, OperationFn, get_builtin_ops, single_qexpr};
use crate::stack::ensure_sufficient_stack;

/// Local name-to-value mapping of one environment frame
pub type Bindings = HashMap<String, Value>;

/// Source of parsed top-level expressions for the `load` builtin
pub trait SourceLoader {
    /// Read and parse `path`, returning each top-level expression in order
    fn load(&self, path: &str) -> Result<Vec<Value>, Error>;
}

/// Loader for hosts that cannot read source files
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSourceLoader;

impl SourceLoader for NoSourceLoader {
    fn load(&self, path: &str) -> Result<Vec<Value>, Error> {
        Err(Error::Io(format!("no source loader available for '{path}'")))
    }
}

/// Evaluator limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalConfig {
    /// Nested evaluations allowed before an expression fails with a depth error
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            max_depth: MAX_EVAL_DEPTH,
        }
    }
}

/// Interpreter context shared by every environment of one interpreter
///
/// Holds the output sink used by `print` and `load`, the loader `load` reads source
/// files through, and the evaluator limits.
pub struct Host {
    output: RefCell<Box<dyn Write>>,
    loader: Box<dyn SourceLoader>,
    config: EvalConfig,
}

impl Host {
    pub fn new(output: impl Write + 'static, loader: impl SourceLoader + 'static) -> Self {
        Host {
            output: RefCell::new(Box::new(output)),
            loader: Box::new(loader),
            config: EvalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> EvalConfig {
        self.config
    }

    /// Write `line` and a newline to the output sink
    pub fn write_line(&self, line: &str) -> Result<(), Error> {
        let mut output = self.output.borrow_mut();
        writeln!(output, "{line}")
            .and_then(|()| output.flush())
            .map_err(|e| Error::Io(e.to_string()))
    }

    pub fn load(&self, path: &str) -> Result<Vec<Value>, Error> {
        self.loader.load(path)
    }
}

impl Default for Host {
    /// Standard output, with files read through [`crate::reader::FileLoader`] when the
    /// reader is compiled in
    fn default() -> Self {
        #[cfg(feature = "reader")]
        let host = Host::new(io::stdout(), crate::reader::FileLoader::default());
        #[cfg(not(feature = "reader"))]
        let host = Host::new(io::stdout(), NoSourceLoader);
        host
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// In-memory output sink whose clones share one buffer
///
/// Useful for capturing what `print` and `load` write:
///
/// ```
/// use lispy::evaluator::{Host, NoSourceLoader, SharedBuffer, create_global_env_with_host};
///
/// let output = SharedBuffer::new();
/// let env = create_global_env_with_host(Host::new(output.clone(), NoSourceLoader));
/// env.host().write_line("hello").unwrap();
/// assert_eq!(output.contents(), "hello\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Environment for variable bindings
///
/// A frame of local bindings plus a borrowed link to the enclosing frame. Frames
/// created for closure calls live on the Rust stack for the duration of the call,
/// so the chain always points outward to frames that outlive it.
#[derive(Clone)]
pub struct Environment<'p> {
    bindings: Bindings,
    parent: Option<&'p Environment<'p>>,
    host: Rc<Host>,
}

impl Environment<'static> {
    /// Create an empty root environment (no builtins installed)
    pub fn new(host: Rc<Host>) -> Self {
        Environment {
            bindings: Bindings::new(),
            parent: None,
            host,
        }
    }
}

impl<'p> Environment<'p> {
    /// Create a frame holding `bindings` whose lookups fall back to `parent`
    pub fn with_parent(bindings: Bindings, parent: &'p Environment<'p>) -> Self {
        Environment {
            bindings,
            parent: Some(parent),
            host: Rc::clone(&parent.host),
        }
    }

    /// Bind `name` in this frame, replacing any local binding; parents are untouched
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .get(name)
            .or_else(|| self.parent.and_then(|parent| parent.get(name)))
    }

    /// Look up `name` through the chain, returning a copy of the bound value
    pub fn lookup(&self, name: &str) -> Result<Value, Error> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::UnboundSymbol(name.to_owned()))
    }

    pub fn host(&self) -> &Rc<Host> {
        &self.host
    }

    pub fn parent(&self) -> Option<&'p Environment<'p>> {
        self.parent
    }

    /// Register a custom builtin function in the environment.
    ///
    /// The function receives its evaluated arguments and any `Err` it returns becomes
    /// an error value in the language. Each registration is a distinct builtin: it
    /// compares equal only to copies of itself, even when it shadows an existing name.
    ///
    /// # Example
    /// ```
    /// use lispy::evaluator::{create_global_env, eval};
    /// use lispy::ast::{Value, sexpr, sym, val};
    /// use lispy::Error;
    ///
    /// fn double(args: Vec<Value>) -> Result<Value, Error> {
    ///     match args.as_slice() {
    ///         [Value::Number(n)] => Ok(Value::Number(n * 2)),
    ///         _ => Err(Error::EvalError("double takes one number".into())),
    ///     }
    /// }
    ///
    /// let mut env = create_global_env();
    /// env.register_builtin_function("double", double);
    /// assert_eq!(eval(sexpr(vec![sym("double"), val(21)]), &mut env), val(42));
    /// ```
    pub fn register_builtin_function(&mut self, name: &str, func: OperationFn) {
        let builtin = Builtin::custom(name, func, Arity::Any);
        self.define(name, Value::Function(Function::Builtin(builtin)));
    }

    /// Get all bindings in this environment and its parents
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();

        // Start with parent bindings (so they can be overridden by local bindings)
        if let Some(parent) = self.parent {
            bindings.extend(parent.get_all_bindings());
        }

        for (name, value) in &self.bindings {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl fmt::Debug for Environment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.bindings.keys().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

/// Evaluate an expression (public API)
///
/// Never fails at the Rust level: every failure is returned as [`Value::Error`].
pub fn eval(expr: Value, env: &mut Environment<'_>) -> Value {
    eval_with_depth_tracking(expr, env, 0)
}

/// Apply a function value to already evaluated arguments in the caller's environment
pub fn apply(func: Function, args: Vec<Value>, env: &mut Environment<'_>) -> Value {
    apply_with_depth(func, args, env, 0)
}

/// Evaluate an expression with depth tracking to bound recursion
fn eval_with_depth_tracking(expr: Value, env: &mut Environment<'_>, depth: usize) -> Value {
    let max_depth = env.host.config().max_depth;
    if depth >= max_depth {
        warn!(max_depth, "evaluation depth limit reached");
        return Error::DepthExceeded(max_depth).into();
    }
    match expr {
        Value::Symbol(name) => env.lookup(&name).unwrap_or_else(Value::from),
        Value::SExpr(items) => ensure_sufficient_stack(|| eval_sexpr(items, env, depth)),
        // Self-evaluating forms
        Value::Number(_)
        | Value::String(_)
        | Value::QExpr(_)
        | Value::Function(_)
        | Value::Error(_) => expr,
    }
}

/// Reduce an S-expression: evaluate every item, surface the first error, then apply
fn eval_sexpr(items: Vec<Value>, env: &mut Environment<'_>, depth: usize) -> Value {
    let mut results: Vec<Value> = items
        .into_iter()
        .map(|item| eval_with_depth_tracking(item, env, depth + 1))
        .collect();

    if let Some(index) = results.iter().position(Value::is_error) {
        return results.swap_remove(index);
    }

    let mut results = results.into_iter();
    match (results.next(), results.len()) {
        (None, _) => unit(),
        // A lone item is reduced once more
        (Some(single), 0) => eval_with_depth_tracking(single, env, depth + 1),
        (Some(Value::Function(func)), _) => apply_with_depth(func, results.collect(), env, depth),
        (Some(_), _) => Error::NotAFunction.into(),
    }
}

fn apply_with_depth(
    func: Function,
    args: Vec<Value>,
    env: &mut Environment<'_>,
    depth: usize,
) -> Value {
    match func {
        Function::Builtin(builtin) => call_builtin(&builtin, args, env, depth),
        Function::Closure(closure) => call_closure(closure, args, env, depth),
    }
}

fn call_builtin(
    builtin: &Builtin,
    args: Vec<Value>,
    env: &mut Environment<'_>,
    depth: usize,
) -> Value {
    let result = builtin
        .arity
        .validate(builtin.id(), args.len())
        .and_then(|()| match builtin.kind {
            OpKind::Function(func) => func(args),
            OpKind::Form(form) => form(args, env, depth),
        });
    result.unwrap_or_else(Value::from)
}

/// Bind arguments to formals, then either run the body or return the partial closure
fn call_closure(
    closure: Rc<Closure>,
    args: Vec<Value>,
    env: &mut Environment<'_>,
    depth: usize,
) -> Value {
    let given = args.len();
    trace!(given, depth, "closure call");
    let mut closure = Rc::unwrap_or_clone(closure);
    let total = closure.formals.len();
    let mut formals = std::mem::take(&mut closure.formals).into_iter();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let Some(formal) = formals.next() else {
            return Error::TooManyArguments {
                expected: total,
                got: given,
            }
            .into();
        };

        if formal == VARIADIC_MARKER {
            let rest = match variadic_formal(&mut formals) {
                Ok(rest) => rest,
                Err(e) => return e.into(),
            };
            let collected = std::iter::once(arg).chain(args.by_ref()).collect();
            closure.env.insert(rest, Value::QExpr(collected));
            break;
        }

        closure.env.insert(formal, arg);
    }

    let mut remaining = formals.peekable();
    match remaining.peek() {
        None => {}
        // Arguments ran out right at `&`: the tail is empty and the call can proceed
        Some(first) if first == VARIADIC_MARKER => {
            remaining.next();
            match variadic_formal(&mut remaining) {
                Ok(rest) => closure.env.insert(rest, Value::QExpr(Vec::new())),
                Err(e) => return e.into(),
            };
        }
        Some(_) => {
            let remaining: Vec<String> = remaining.collect();
            trace!(remaining = remaining.len(), "partial application");
            closure.formals = remaining;
            return Value::Function(Function::Closure(Rc::new(closure)));
        }
    }

    trace!("closure saturated");
    let Closure { body, env: bindings, .. } = closure;
    let mut frame = Environment::with_parent(bindings, env);
    eval_with_depth_tracking(Value::SExpr(body), &mut frame, depth + 1)
}

/// Take the single formal that must follow `&`
fn variadic_formal(formals: &mut impl Iterator<Item = String>) -> Result<String, Error> {
    match (formals.next(), formals.next()) {
        (Some(rest), None) => Ok(rest),
        _ => Err(Error::InvalidFormals),
    }
}

fn unit() -> Value {
    Value::SExpr(Vec::new())
}

/// Evaluate the items of a Q-expression as an S-expression
fn eval_quoted(items: Vec<Value>, env: &mut Environment<'_>, depth: usize) -> Value {
    eval_with_depth_tracking(Value::SExpr(items), env, depth + 1)
}

/// `eval {expr...}`
pub(crate) fn eval_qexpr(
    args: Vec<Value>,
    env: &mut Environment<'_>,
    depth: usize,
) -> Result<Value, Error> {
    let items = single_qexpr("eval", args)?;
    Ok(eval_quoted(items, env, depth))
}

/// `if cond {then} {else}`; only the chosen branch is evaluated
pub(crate) fn eval_if(
    args: Vec<Value>,
    env: &mut Environment<'_>,
    depth: usize,
) -> Result<Value, Error> {
    let got = args.len();
    let [condition, then_branch, else_branch] = <[Value; 3]>::try_from(args)
        .map_err(|_| Error::arity_error("if", Arity::Exact(3), got))?;

    let condition = match condition {
        Value::Number(n) => n != 0,
        other => return Err(Error::type_error("if", 1, "Number", &other)),
    };
    let branch = match (condition, then_branch, else_branch) {
        (true, Value::QExpr(items), Value::QExpr(_))
        | (false, Value::QExpr(_), Value::QExpr(items)) => items,
        (_, Value::QExpr(_), other) => {
            return Err(Error::type_error("if", 3, "Q-Expression", &other));
        }
        (_, other, _) => return Err(Error::type_error("if", 2, "Q-Expression", &other)),
    };

    Ok(eval_quoted(branch, env, depth))
}

/// `def {a b ...} va vb ...` binds each symbol in the environment the call runs in
pub(crate) fn eval_define(
    args: Vec<Value>,
    env: &mut Environment<'_>,
    _depth: usize,
) -> Result<Value, Error> {
    let mut args = args.into_iter();
    let names = match args.next() {
        Some(Value::QExpr(names)) => names,
        Some(other) => return Err(Error::type_error("def", 1, "Q-Expression", &other)),
        None => return Err(Error::arity_error("def", Arity::AtLeast(2), 0)),
    };

    let names = names
        .into_iter()
        .map(|name| match name {
            Value::Symbol(name) => Ok(name),
            other => Err(Error::EvalError(format!(
                "Function 'def' cannot define non-symbol. Got {}, expected Symbol.",
                other.kind_name()
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if names.len() != args.len() {
        return Err(Error::EvalError(format!(
            "Function 'def' passed incorrect number of values to symbols. Got {}, expected {}.",
            args.len(),
            names.len()
        )));
    }

    for (name, value) in names.into_iter().zip(args) {
        trace!(%name, "def");
        env.define(name, value);
    }
    Ok(unit())
}

/// `lambda {formals} {body}`
pub(crate) fn eval_lambda(
    args: Vec<Value>,
    _env: &mut Environment<'_>,
    _depth: usize,
) -> Result<Value, Error> {
    let got = args.len();
    let [formals, body] = <[Value; 2]>::try_from(args)
        .map_err(|_| Error::arity_error("lambda", Arity::Exact(2), got))?;

    let formals = match formals {
        Value::QExpr(formals) => formals,
        other => return Err(Error::type_error("lambda", 1, "Q-Expression", &other)),
    };
    let body = match body {
        Value::QExpr(body) => body,
        other => return Err(Error::type_error("lambda", 2, "Q-Expression", &other)),
    };

    let formals = formals
        .into_iter()
        .map(|formal| match formal {
            Value::Symbol(name) => Ok(name),
            other => Err(Error::EvalError(format!(
                "Cannot define non-symbol. Got {}, expected Symbol.",
                other.kind_name()
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Value::Function(Function::Closure(Rc::new(Closure::new(
        formals, body,
    )))))
}

/// `load "file"` evaluates each top-level expression of a source file for its effects.
///
/// Failures of individual expressions are written to the output and do not stop the
/// load; only a file that cannot be read or parsed makes `load` itself fail.
pub(crate) fn eval_load(
    args: Vec<Value>,
    env: &mut Environment<'_>,
    depth: usize,
) -> Result<Value, Error> {
    let path = match args.as_slice() {
        [Value::String(path)] => path.clone(),
        [other] => return Err(Error::type_error("load", 1, "String", other)),
        other => return Err(Error::arity_error("load", Arity::Exact(1), other.len())),
    };

    let host = Rc::clone(&env.host);
    debug!(%path, "loading source");
    let expressions = host
        .load(&path)
        .map_err(|e| Error::EvalError(format!("Could not load '{path}': {e}")))?;

    let total = expressions.len();
    let mut failed = 0;
    for expr in expressions {
        let result = eval_with_depth_tracking(expr, env, depth + 1);
        if result.is_error() {
            failed += 1;
            host.write_line(&result.to_string())?;
        }
    }

    debug!(%path, total, failed, "source loaded");
    Ok(unit())
}

/// `print a b ...` writes its arguments separated by spaces
pub(crate) fn eval_print(
    args: Vec<Value>,
    env: &mut Environment<'_>,
    _depth: usize,
) -> Result<Value, Error> {
    let line = args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    env.host.write_line(&line)?;
    Ok(unit())
}

/// Create a global environment with built-in functions, printing to stdout
pub fn create_global_env() -> Environment<'static> {
    create_global_env_with_host(Host::default())
}

/// Create a global environment with built-in functions around an explicit host
pub fn create_global_env_with_host(host: Host) -> Environment<'static> {
    let mut env = Environment::new(Rc::new(host));

    for builtin_op in get_builtin_ops() {
        env.define(
            builtin_op.id,
            Value::Function(Function::Builtin(Builtin::from_op(builtin_op))),
        );
    }

    env
}

#[cfg(all(test, feature = "reader"))]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sexpr, sym, val};
    use crate::reader::{ParseConfig, parse, parse_expressions};

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),
        /// Error value whose message contains the given text
        ErrorContaining(&'static str),
        /// Any function value, displayed as given
        FunctionDisplayed(&'static str),
    }
    use TestResult::*;

    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    fn run(env: &mut Environment<'_>, source: &str) -> Value {
        eval(parse(source).unwrap(), env)
    }

    fn check(env: &mut Environment<'_>, cases: Vec<(&str, TestResult)>) {
        for (i, (source, expected)) in cases.into_iter().enumerate() {
            let actual = run(env, source);
            match expected {
                EvalResult(expected) => {
                    assert_eq!(actual, expected, "case {} `{source}`", i + 1);
                }
                ErrorContaining(text) => match &actual {
                    Value::Error(msg) => assert!(
                        msg.contains(text),
                        "case {} `{source}`: error {msg:?} should contain {text:?}",
                        i + 1
                    ),
                    other => panic!("case {} `{source}`: expected error, got {other}", i + 1),
                },
                FunctionDisplayed(text) => match &actual {
                    Value::Function(_) => {
                        assert_eq!(actual.to_string(), text, "case {} `{source}`", i + 1);
                    }
                    other => panic!("case {} `{source}`: expected function, got {other}", i + 1),
                },
            }
        }
    }

    /// Host whose `load` reads from in-memory sources
    struct MapLoader(HashMap<&'static str, &'static str>);

    impl SourceLoader for MapLoader {
        fn load(&self, path: &str) -> Result<Vec<Value>, Error> {
            let source = self
                .0
                .get(path)
                .ok_or_else(|| Error::Io(format!("{path}: not found")))?;
            parse_expressions(source, &ParseConfig::default())
        }
    }

    fn captured_env(sources: &[(&'static str, &'static str)]) -> (Environment<'static>, SharedBuffer) {
        let output = SharedBuffer::new();
        let loader = MapLoader(sources.iter().copied().collect());
        (
            create_global_env_with_host(Host::new(output.clone(), loader)),
            output,
        )
    }

    #[test]
    fn test_comprehensive_evaluation() {
        let mut env = create_global_env();
        let cases = vec![
            // Self-evaluating and trivial forms
            ("42", success(42)),
            ("\"hi\"", success("hi")),
            ("{1 2}", success([1, 2])),
            ("", EvalResult(sexpr(vec![]))),
            ("()", EvalResult(sexpr(vec![]))),
            ("(((5)))", success(5)),
            // Arithmetic
            ("+ 1 2 3", success(6)),
            ("(+ 1 2 3)", success(6)),
            ("- 10 (* 2 3)", success(4)),
            ("- 7", success(-7)),
            ("/ 7 2", success(3)),
            ("% 7 2", success(1)),
            ("^ 2 3 2", success(64)),
            ("^ 9 0", success(1)),
            ("/ 1 0", ErrorContaining("Division by zero")),
            ("% 1 0", ErrorContaining("Division by zero")),
            (
                "+ 1 {2}",
                ErrorContaining("Function '+' passed incorrect type for argument 2"),
            ),
            ("+", EvalResult(env.lookup("+").unwrap())),
            // List operations
            ("list 1 2 (+ 1 2)", success([1, 2, 3])),
            // A lone builtin is reduced to itself, not called
            ("list", EvalResult(env.lookup("list").unwrap())),
            ("list 1", success([1])),
            ("head {1 2 3}", success([1])),
            ("tail {1 2 3}", success([2, 3])),
            ("join {1} {2} {3}", success([1, 2, 3])),
            ("cons 0 {1 2}", success([val(0), val([1, 2])])),
            ("len {1 2 3}", success(3)),
            ("eval {+ 1 2}", success(3)),
            ("eval (head {(+ 1 2) 4})", success(3)),
            ("eval {}", EvalResult(sexpr(vec![]))),
            ("head {}", ErrorContaining("Function 'head' passed {}!")),
            (
                "head {1} {2}",
                ErrorContaining(
                    "Function 'head' passed incorrect number of arguments. Got 2, expected 1.",
                ),
            ),
            (
                "eval 1",
                ErrorContaining("Function 'eval' passed incorrect type for argument 1"),
            ),
            // Comparison
            ("> 2 1", success(1)),
            ("<= 2 1", success(0)),
            ("== {1 2} {1 2}", success(1)),
            ("!= {1 2} {1 2}", success(0)),
            ("== + +", success(1)),
            ("== + -", success(0)),
            ("== \"a\" \"a\"", success(1)),
            ("> {1} 2", ErrorContaining("incorrect type for argument 1")),
            // Control
            ("if (> 2 1) {+ 1 1} {error \"no\"}", success(2)),
            ("if 0 {1} {2}", success(2)),
            ("if 1 {1} {head {}}", success(1)),
            ("if 0 {1} {}", EvalResult(sexpr(vec![]))),
            (
                "if {} {1} {2}",
                ErrorContaining("Function 'if' passed incorrect type for argument 1. Got Q-Expression, expected Number."),
            ),
            ("if 1 1 {2}", ErrorContaining("argument 2")),
            ("if 1 {1} 2", ErrorContaining("argument 3")),
            // Errors as values
            ("error \"boom\"", ErrorContaining("boom")),
            ("zzz", ErrorContaining("Symbol 'zzz' not bounded")),
            ("1 2", ErrorContaining("S-expression does not start with function")),
            ("{+} 1", ErrorContaining("S-expression does not start with function")),
            // First error wins, later ones are never observed
            ("+ 1 (head {})", ErrorContaining("Function 'head' passed {}!")),
            ("+ (error \"first\") (error \"second\")", ErrorContaining("first")),
            ("list zzz (/ 1 0)", ErrorContaining("zzz")),
            // Closures, currying and variadics
            ("(lambda {x y} {+ x y}) 1 2", success(3)),
            ("((lambda {x y} {+ x y}) 1) 2", success(3)),
            ("(lambda {x y} {+ x y}) 1", FunctionDisplayed("(\\ {y} {+ x y})")),
            ("lambda {x} {x}", FunctionDisplayed("(\\ {x} {x})")),
            ("(lambda {x & xs} {xs}) 1 2 3", success([2, 3])),
            ("(lambda {x & xs} {xs}) 1", EvalResult(nil())),
            ("(lambda {& xs} {len xs}) 1 2 3 4", success(4)),
            ("(lambda {f & xs} {f xs}) len 1 2", success(2)),
            (
                "(lambda {x} {x}) 1 2",
                ErrorContaining("Function passed too many arguments. Got 2, expected 1"),
            ),
            (
                "(lambda {x &} {x}) 1 2",
                ErrorContaining("Function format invalid: '&' not followed by single symbol"),
            ),
            (
                "(lambda {x & a b} {a}) 1",
                ErrorContaining("Function format invalid: '&' not followed by single symbol"),
            ),
            (
                "(lambda {& a b} {a}) 1",
                ErrorContaining("Function format invalid"),
            ),
            ("lambda {1} {x}", ErrorContaining("Cannot define non-symbol")),
            ("lambda {x} x", ErrorContaining("Symbol 'x' not bounded")),
            ("lambda {x} 1", ErrorContaining("argument 2")),
        ];
        check(&mut env, cases);
    }

    #[test]
    fn test_definitions_and_scoping() {
        let mut env = create_global_env();
        let cases = vec![
            ("def {x} 10", EvalResult(sexpr(vec![]))),
            ("x", success(10)),
            ("def {a b} 1 2", EvalResult(sexpr(vec![]))),
            ("+ a b", success(3)),
            ("def {a b} 1", ErrorContaining("Function 'def' passed incorrect number of values")),
            ("def {1} 1", ErrorContaining("cannot define non-symbol")),
            ("def y 1", ErrorContaining("Symbol 'y' not bounded")),
            // Currying through def
            ("def {add} (lambda {x y} {+ x y})", EvalResult(sexpr(vec![]))),
            ("def {add1} (add 1)", EvalResult(sexpr(vec![]))),
            ("add1 5", success(6)),
            ("add1 10", success(11)),
            ("add 2 3", success(5)),
            ("== (add 1) (add 2)", success(1)),
            ("== add1 add", success(0)),
            // Bound values are copies
            ("def {xs} {1 2}", EvalResult(sexpr(vec![]))),
            ("def {ys} xs", EvalResult(sexpr(vec![]))),
            ("def {xs} {3}", EvalResult(sexpr(vec![]))),
            ("ys", success([1, 2])),
            // Recursion through the global binding
            (
                "def {len2} (lambda {l} {if (== l {}) {0} {+ 1 (len2 (tail l))}})",
                EvalResult(sexpr(vec![])),
            ),
            ("len2 {1 2 3}", success(3)),
            // Closure bodies see the caller's bindings
            ("def {peek} (lambda {_} {secret})", EvalResult(sexpr(vec![]))),
            ("def {outer} (lambda {secret} {peek 0})", EvalResult(sexpr(vec![]))),
            ("outer 7", success(7)),
            ("peek 0", ErrorContaining("Symbol 'secret' not bounded")),
            // def inside a body binds in the call frame only
            ("def {local} (lambda {v} {def {inner} v})", EvalResult(sexpr(vec![]))),
            ("local 3", EvalResult(sexpr(vec![]))),
            ("inner", ErrorContaining("Symbol 'inner' not bounded")),
            // Parameters shadow globals without touching them
            ("(lambda {x} {* x 2}) 4", success(8)),
            ("x", success(10)),
        ];
        check(&mut env, cases);
    }

    #[test]
    fn test_print_output() {
        let (mut env, output) = captured_env(&[]);
        assert_eq!(run(&mut env, "print \"a\" 1 {x (y)}"), sexpr(vec![]));
        assert_eq!(run(&mut env, "print head"), sexpr(vec![]));
        // A lone function is returned, not called
        assert_eq!(run(&mut env, "print"), env.lookup("print").unwrap());
        assert_eq!(output.contents(), "\"a\" 1 {x (y)}\n<builtin:head>\n");
    }

    #[test]
    fn test_load_evaluates_each_expression() {
        let (mut env, output) = captured_env(&[
            (
                "lib.lspy",
                "; helpers\n(def {z} 5)\n(undefined)\n(print z)\n(def {double} (lambda {n} {* n 2}))",
            ),
            ("broken.lspy", "(def {w} 1"),
        ]);

        assert_eq!(run(&mut env, "load \"lib.lspy\""), sexpr(vec![]));
        assert_eq!(
            output.contents(),
            "Error: Symbol 'undefined' not bounded\n5\n"
        );
        assert_eq!(run(&mut env, "double z"), val(10));

        match run(&mut env, "load \"broken.lspy\"") {
            Value::Error(msg) => assert!(msg.starts_with("Could not load 'broken.lspy'"), "{msg}"),
            other => panic!("expected load error, got {other}"),
        }
        match run(&mut env, "load \"missing.lspy\"") {
            Value::Error(msg) => assert!(msg.contains("not found"), "{msg}"),
            other => panic!("expected load error, got {other}"),
        }
        assert!(run(&mut env, "load 1").is_error());
        assert!(run(&mut env, "w").is_error());
    }

    #[test]
    fn test_depth_limit() {
        let output = SharedBuffer::new();
        let host = Host::new(output, NoSourceLoader).with_config(EvalConfig { max_depth: 64 });
        let mut env = create_global_env_with_host(host);

        run(&mut env, "def {forever} (lambda {x} {forever x})");
        assert_eq!(
            run(&mut env, "forever 1"),
            Value::Error("Evaluation depth limit exceeded (max: 64)".to_owned())
        );
        // The environment stays usable afterwards
        assert_eq!(run(&mut env, "+ 1 1"), val(2));
    }

    #[test]
    fn test_deep_recursion_within_default_limit() {
        let mut env = create_global_env();
        run(
            &mut env,
            "def {count} (lambda {n} {if (== n 0) {0} {+ 1 (count (- n 1))}})",
        );
        assert_eq!(run(&mut env, "count 1000"), val(1000));
    }

    #[test]
    fn test_runaway_recursion_hits_default_limit() {
        let mut env = create_global_env();
        run(&mut env, "def {loop} (lambda {n} {loop (+ n 1)})");
        assert_eq!(
            run(&mut env, "loop 0"),
            Value::from(Error::DepthExceeded(MAX_EVAL_DEPTH))
        );
        assert_eq!(
            run(&mut env, "loop 0").to_string(),
            format!("Error: Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})")
        );
    }

    #[test]
    fn test_apply_and_environment_api() {
        let mut env = create_global_env();
        let Value::Function(plus) = env.lookup("+").unwrap() else {
            panic!("+ should be a function");
        };
        assert_eq!(apply(plus, vec![val(1), val(2)], &mut env), val(3));

        let Value::Function(add) = run(&mut env, "lambda {x y} {+ x y}") else {
            panic!("lambda should produce a function");
        };
        let Value::Function(partial) = apply(add, vec![val(1)], &mut env) else {
            panic!("partial application should produce a function");
        };
        assert_eq!(apply(partial, vec![val(41)], &mut env), val(42));

        let mut frame_bindings = Bindings::new();
        frame_bindings.insert("local".to_owned(), val(1));
        let frame = Environment::with_parent(frame_bindings, &env);
        assert_eq!(frame.lookup("local").unwrap(), val(1));
        assert!(frame.lookup("head").is_ok());
        assert!(frame.parent().is_some());
        assert_eq!(
            frame.lookup("nope").unwrap_err(),
            Error::UnboundSymbol("nope".to_owned())
        );

        let names: Vec<String> = frame.get_all_bindings().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"local".to_owned()));
        assert!(names.contains(&"lambda".to_owned()));
        assert!(names.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_register_builtin_function() {
        fn sum_lengths(args: Vec<Value>) -> Result<Value, Error> {
            let mut total = 0;
            for (i, arg) in args.iter().enumerate() {
                match arg {
                    Value::QExpr(items) => total += items.len() as i64,
                    other => return Err(Error::type_error("sum-lengths", i + 1, "Q-Expression", other)),
                }
            }
            Ok(Value::Number(total))
        }

        let mut env = create_global_env();
        env.register_builtin_function("sum-lengths", sum_lengths);
        check(
            &mut env,
            vec![
                ("sum-lengths {1 2} {} {3}", success(3)),
                ("sum-lengths {}", success(0)),
                ("sum-lengths 1", ErrorContaining("Function 'sum-lengths' passed incorrect type")),
                ("== sum-lengths sum-lengths", success(1)),
                ("== sum-lengths len", success(0)),
            ],
        );
        assert_eq!(
            run(&mut env, "(lambda {f} {f {1}}) sum-lengths"),
            val(1)
        );
        assert_eq!(sym("sum-lengths").to_string(), "sum-lengths");
    }

    #[test]
    fn test_registered_builtin_shadowing_a_primitive() {
        fn always_99(_: Vec<Value>) -> Result<Value, Error> {
            Ok(Value::Number(99))
        }

        let mut env = create_global_env();
        run(&mut env, "def {oldhead} head");
        env.register_builtin_function("head", always_99);
        check(
            &mut env,
            vec![
                ("head {1}", success(99)),
                ("oldhead {1}", success([1])),
                ("== oldhead head", success(0)),
                ("== head head", success(1)),
            ],
        );

        // Registering the same function again under the same name is a new builtin
        run(&mut env, "def {first} head");
        env.register_builtin_function("head", always_99);
        check(&mut env, vec![("== first head", success(0))]);
    }
}
