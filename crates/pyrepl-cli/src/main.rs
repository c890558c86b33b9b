use std::{
    cell::RefCell,
    io::{self, Write},
    process::ExitCode,
    rc::Rc,
};

use pyrepl::{Flags, Namespace, ProfilingTracer, ReplError, ReplSession, StderrTracer, Value};

const USAGE: &str = "usage: pyrepl [--trace | --profile] [--var NAME=JSON]... [FILE]";

fn main() -> ExitCode {
    let mut trace = false;
    let mut profile = false;
    let mut path = None;
    let mut host_vars = Namespace::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--trace" => trace = true,
            "--profile" => profile = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                return ExitCode::SUCCESS;
            }
            "--var" => match args.next().as_deref().map(parse_host_var) {
                Some(Ok((name, value))) => {
                    host_vars.insert(name, value);
                }
                Some(Err(msg)) => {
                    eprintln!("{msg}");
                    return ExitCode::FAILURE;
                }
                None => {
                    eprintln!("{USAGE}");
                    return ExitCode::FAILURE;
                }
            },
            _ if path.is_none() && !arg.starts_with('-') => path = Some(arg),
            _ => {
                eprintln!("{USAGE}");
                return ExitCode::FAILURE;
            }
        }
    }

    if trace && profile {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    }

    let mut session = ReplSession::new(Flags::from_env());
    let profiler = profile.then(|| Rc::new(RefCell::new(ProfilingTracer::new())));
    if trace {
        session = session.with_tracer(Rc::new(RefCell::new(StderrTracer::new())));
    } else if let Some(profiler) = &profiler {
        session = session.with_tracer(profiler.clone());
    }

    let code = match path {
        Some(path) => run_file(&mut session, &path, &host_vars),
        None => {
            interactive(&mut session, &host_vars);
            ExitCode::SUCCESS
        }
    };
    if let Some(profiler) = profiler {
        eprintln!("profile: {}", profiler.borrow().report());
    }
    code
}

fn run_file(session: &mut ReplSession, path: &str, host_vars: &Namespace) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading {path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = execute_snippet(session, &source, host_vars) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn interactive(session: &mut ReplSession, host_vars: &Namespace) {
    let mut source = String::new();
    loop {
        let prompt = if source.is_empty() { ">>> " } else { "... " };
        let Some(line) = read_line(prompt) else {
            println!();
            break;
        };

        if source.is_empty() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(command) = line.trim().strip_prefix(':') {
                match meta_command(session, command, host_vars) {
                    Flow::Continue => continue,
                    Flow::Quit => break,
                }
            }
        } else {
            source.push('\n');
        }
        source.push_str(&line);

        if needs_more_input(&source, &line) {
            continue;
        }

        if let Err(err) = execute_snippet(session, &source, host_vars) {
            eprintln!("{err}");
        }
        source.clear();
    }
}

enum Flow {
    Continue,
    Quit,
}

/// Runs one snippet, printing each result and sending the printed text back.
fn execute_snippet(session: &mut ReplSession, source: &str, host_vars: &Namespace) -> Result<(), ReplError> {
    session.run(source, host_vars, |value| {
        let text = value.py_repr();
        println!("{text}");
        Value::from(text)
    })
}

/// Parses a `NAME=JSON` host variable, exposed to code under the session's scope prefix.
fn parse_host_var(spec: &str) -> Result<(String, Value), String> {
    let (name, json) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=JSON, got {spec:?}"))?;
    let json: serde_json::Value =
        serde_json::from_str(json).map_err(|err| format!("invalid JSON for {name}: {err}"))?;
    Ok((name.to_owned(), Value::from_json(&json)))
}

fn meta_command(session: &mut ReplSession, command: &str, host_vars: &Namespace) -> Flow {
    let (name, rest) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
    let rest = rest.trim();
    match name {
        "quit" | "q" | "exit" => return Flow::Quit,
        "retain" => match rest.to_lowercase().as_str() {
            "" => println!(
                "Variable retention is set to {}.",
                if session.retain() { "ON" } else { "OFF" }
            ),
            "on" | "true" | "yes" | "1" => println!("{}", session.set_retain(true)),
            "off" | "false" | "no" | "0" => println!("{}", session.set_retain(false)),
            other => eprintln!("expected on or off, got {other:?}"),
        },
        "dis" => match session.disassemble(rest, host_vars) {
            Ok(listing) => {
                for row in listing {
                    println!("{row}");
                }
            }
            Err(err) => eprintln!("{err}"),
        },
        "scope" => {
            if !session.retain() {
                println!("Variable retention is OFF; nothing is kept between submissions.");
            }
            let scope = session.scope();
            for name in scope.global_names() {
                if let Some(value) = scope.get_global(&name) {
                    println!("{name} = {}", value.py_repr());
                }
            }
        }
        _ => eprintln!("unknown command :{name} (try :retain, :dis, :scope, :quit)"),
    }
    Flow::Continue
}

/// Heuristic multiline detector for interactive input.
///
/// Open brackets and trailing backslashes continue the snippet; once a block
/// has been opened with `:`, input continues until an empty line.
fn needs_more_input(source: &str, last_line: &str) -> bool {
    let trimmed = source.trim_end();
    if trimmed.ends_with('\\') {
        return true;
    }

    let mut balance = 0i32;
    for ch in trimmed.chars() {
        match ch {
            '(' | '[' | '{' => balance += 1,
            ')' | ']' | '}' => balance -= 1,
            _ => {}
        }
    }
    if balance > 0 {
        return true;
    }

    let opened_block = trimmed.lines().any(|line| line.trim_end().ends_with(':'));
    opened_block && !last_line.trim().is_empty()
}

/// Reads one line from stdin after printing a prompt.
///
/// Returns `None` on EOF (Ctrl+D).
fn read_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    if io::stdout().flush().is_err() {
        return None;
    }
    let mut input = String::new();
    let read = io::stdin().read_line(&mut input).ok()?;
    if read == 0 {
        return None;
    }
    Some(input.trim_end_matches(['\r', '\n']).to_owned())
}

#[cfg(test)]
mod tests {
    use pyrepl::Value;

    use super::{needs_more_input, parse_host_var};

    #[test]
    fn host_vars_are_decoded_from_json() {
        let (name, value) = parse_host_var("guild={\"id\": 7, \"tags\": [\"a\"]}").unwrap();
        assert_eq!(name, "guild");
        assert_eq!(value.py_repr(), "{'id': 7, 'tags': ['a']}");
        assert_eq!(parse_host_var("n=3").unwrap().1, Value::Int(3));
        assert!(parse_host_var("novalue").is_err());
        assert!(parse_host_var("bad={").is_err());
    }

    #[test]
    fn blocks_wait_for_an_empty_line() {
        assert!(needs_more_input("def f():", "def f():"));
        assert!(needs_more_input("def f():\n    return 1", "    return 1"));
        assert!(!needs_more_input("def f():\n    return 1\n", ""));
    }

    #[test]
    fn brackets_and_backslashes_continue() {
        assert!(needs_more_input("x = [1,", "x = [1,"));
        assert!(needs_more_input("x = 1 + \\", "x = 1 + \\"));
        assert!(!needs_more_input("x = [1, 2]", "x = [1, 2]"));
    }
}
