use lispy::ast::{Function, Value, sexpr, sym};
use lispy::evaluator::{self, Environment};
use lispy::reader::parse;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;

fn main() {
    init_tracing();

    let files: Vec<String> = std::env::args().skip(1).collect();
    let result = panic::catch_unwind(|| {
        if files.is_empty() {
            run_repl();
        } else {
            run_files(&files);
        }
    });

    if let Err(panic_info) = result {
        eprintln!("The interpreter encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Log to stderr when `RUST_LOG` is set, e.g. `RUST_LOG=lispy=trace`
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

/// Load each file in order, reporting failures, then exit
fn run_files(files: &[String]) {
    let mut env = evaluator::create_global_env();
    for file in files {
        let result = evaluator::eval(
            sexpr(vec![sym("load"), Value::String(file.clone())]),
            &mut env,
        );
        if result.is_error() {
            println!("{result}");
        }
    }
}

fn run_repl() {
    println!("Lispy Version 0.1.0");
    println!("Enter expressions like: + 1 2, or (def {{x}} 10)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let mut env = evaluator::create_global_env();

    loop {
        match rl.readline("lispy> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&env);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match parse(line) {
                    Ok(expr) => println!("{}", evaluator::eval(expr, &mut env)),
                    Err(e) => println!("{e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("Lispy commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("A line is one S-expression; outer parentheses are optional.");
    println!("Q-expressions {{...}} are quoted lists and are never evaluated automatically.");
    println!();
    println!("Builtins:");
    println!("  Arithmetic: + - * / % ^");
    println!("  Lists:      list head tail join cons len eval");
    println!("  Comparison: == != > < >= <=");
    println!("  Control:    if");
    println!("  Binding:    def lambda");
    println!("  I/O:        load print error");
    println!();
    println!("Examples:");
    println!("  + 1 2 3");
    println!("  def {{add}} (lambda {{x y}} {{+ x y}})");
    println!("  (add 1) 2");
    println!("  (lambda {{x & xs}} {{xs}}) 1 2 3");
    println!("  load \"prelude.lspy\"");
    println!();
}

fn print_environment(env: &Environment<'_>) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate built-in functions, closures and plain values
    let mut builtins = Vec::new();
    let mut closures = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Function(Function::Builtin(builtin)) => builtins.push((name, builtin)),
            Value::Function(Function::Closure(closure)) => closures.push((name, closure)),
            _ => user_defined.push((name, value)),
        }
    }

    if !builtins.is_empty() {
        println!("Built-in functions ({}):", builtins.len());
        for (name, builtin) in builtins {
            println!("  {name:<10} takes {}", builtin.arity());
        }
        println!();
    }

    if !closures.is_empty() {
        println!("Functions ({}):", closures.len());
        for (name, closure) in closures {
            let mut bound: Vec<&String> = closure.env().keys().collect();
            bound.sort();
            if bound.is_empty() {
                println!("  {name} {{{}}}", closure.formals().join(" "));
            } else {
                println!(
                    "  {name} {{{}}}, already bound: {}",
                    closure.formals().join(" "),
                    bound.iter().map(|b| b.as_str()).collect::<Vec<_>>().join(" ")
                );
            }
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
