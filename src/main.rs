use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use rustyline::{error::ReadlineError, Editor};
use tracing_subscriber::EnvFilter;

use dialogue_rs::{
    runtime::{AsyncCall, Choice},
    text::{revealed_prefix, Typewriter, TypewriterStep},
    value::{ValueType, Variant},
    Compiler, CompilerOpts, DialogEvent, MemberRegistry, MemoryHost, Runtime, RuntimeState,
};

const USAGE: &str = "Usage: dialogue-rs [--registry <file>] [--section <name>] [--disassemble] \
[--emit <file>] [--strict] [--json-diagnostics] <script>";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<_> = std::env::args().skip(1).collect();
    let registry_file = consume_arg_with_value(&mut args, "--registry");
    let section = consume_arg_with_value(&mut args, "--section").unwrap_or_else(|| "start".into());
    let emit_file = consume_arg_with_value(&mut args, "--emit");
    let disassemble = consume_flag(&mut args, "--disassemble");
    let strict = consume_flag(&mut args, "--strict");
    let json_diagnostics = consume_flag(&mut args, "--json-diagnostics");
    let file = consume_arg(&mut args, |arg| {
        if arg.starts_with("--") {
            None
        } else {
            Some(arg.to_string())
        }
    });
    let file = match (file, args.is_empty()) {
        (Some(file), true) => file,
        _ => {
            if !args.is_empty() {
                eprintln!("Unrecognized arguments: {:?}", args);
            }
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    };

    let registry = match registry_file {
        Some(path) => {
            let json = std::fs::read_to_string(path).into_diagnostic()?;
            MemberRegistry::from_json(&json).into_diagnostic()?
        }
        None => MemberRegistry::new(),
    };
    let opts = if strict {
        CompilerOpts::default().with_strict_warnings()
    } else {
        CompilerOpts::default()
    };

    let path = std::fs::canonicalize(&file).into_diagnostic()?;
    let source = std::fs::read_to_string(&path).into_diagnostic()?;
    let compilation = Compiler::compile_source(&path.to_string_lossy(), &source, &registry, &opts);
    let failed = compilation.has_errors();
    if json_diagnostics {
        println!(
            "{}",
            serde_json::to_string_pretty(&compilation.records()).into_diagnostic()?
        );
    } else {
        for diagnostic in compilation.diagnostics {
            println!("{:?}", diagnostic.into_report());
        }
    }
    if failed {
        std::process::exit(70);
    }
    let script = compilation.script;

    if let Some(emit_file) = emit_file {
        std::fs::write(emit_file, script.to_json().into_diagnostic()?).into_diagnostic()?;
    }
    if disassemble {
        script.disassemble(&file);
        return Ok(());
    }
    if json_diagnostics {
        return Ok(());
    }

    play(&script, &registry, &section)
}

fn consume_arg<T, F: Fn(&str) -> Option<T>>(args: &mut Vec<String>, predicate: F) -> Option<T> {
    let found = args
        .iter()
        .enumerate()
        .filter_map(|(idx, arg)| predicate(arg).map(|val| (idx, val)))
        .next();

    if let Some((idx, val)) = found {
        args.remove(idx);
        Some(val)
    } else {
        None
    }
}

fn consume_flag(args: &mut Vec<String>, flag: &str) -> bool {
    consume_arg(args, |arg| (arg == flag).then(|| true)).unwrap_or(false)
}

fn consume_arg_with_value(args: &mut Vec<String>, flag: &str) -> Option<String> {
    let idx = args.iter().position(|arg| arg == flag)?;
    if idx + 1 >= args.len() {
        eprintln!("{} needs a value", flag);
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }
    args.remove(idx);
    Some(args.remove(idx))
}

fn zero_value(value_type: ValueType) -> Variant {
    match value_type {
        ValueType::Float => Variant::Float(0.0),
        ValueType::Bool => Variant::Bool(false),
        ValueType::String => Variant::string(""),
        ValueType::Void | ValueType::Undefined => Variant::Void,
    }
}

/// A host for playing scripts at the terminal: registry variables start at
/// their zero value, calls are echoed, and awaited calls are answered by the
/// player.
fn console_host(registry: &MemberRegistry) -> MemoryHost {
    let mut host = MemoryHost::new();
    for def in registry.variables.values() {
        host = host.with_variable(&def.name, zero_value(def.value_type));
    }
    for def in registry.functions.values() {
        let name = def.name.clone();
        let result = zero_value(def.return_type);
        host = if def.awaitable {
            host.with_async_function(def.clone(), move |args| {
                print_call(&name, args);
                Ok(AsyncCall::Pending)
            })
        } else {
            host.with_function(def.clone(), move |args| {
                print_call(&name, args);
                Ok(result.clone())
            })
        };
    }
    host
}

fn print_call(name: &str, args: &[Variant]) {
    let args: Vec<_> = args
        .iter()
        .map(|arg| serde_json::to_string(arg).unwrap_or_default())
        .collect();
    println!("{}", format!("call {}({})", name, args.join(", ")).dimmed());
}

fn play(
    script: &dialogue_rs::ScriptData,
    registry: &MemberRegistry,
    section: &str,
) -> Result<()> {
    let mut host = console_host(registry);
    let mut runtime = Runtime::new(script)?;
    runtime.start_script(section)?;
    let mut rl = Editor::<()>::new();

    loop {
        match runtime.state() {
            RuntimeState::Running => {
                let events = runtime.advance(&mut host)?;
                let shows_line = events
                    .iter()
                    .any(|event| matches!(event, DialogEvent::LineStarted { .. }));
                events.iter().for_each(print_event);
                runtime.recycle(events);
                let waiting = shows_line && runtime.state() == RuntimeState::Running;
                if waiting && read(&mut rl, "")?.is_none() {
                    return Ok(());
                }
            }
            RuntimeState::AwaitingChoice => {
                let input = match read(&mut rl, "> ")? {
                    Some(input) => input,
                    None => return Ok(()),
                };
                let selected = match input.trim().parse::<usize>() {
                    Ok(index) => runtime.select_choice(index),
                    Err(_) => {
                        println!("{}", "Enter the number of a choice".red());
                        continue;
                    }
                };
                if let Err(error) = selected {
                    println!("{:?}", miette::Report::new(error));
                }
            }
            RuntimeState::AwaitingAsyncCall => {
                let name = runtime.pending_function().unwrap_or_default().to_string();
                let return_type = registry
                    .function(&name)
                    .map_or(ValueType::Void, |def| def.return_type);
                let prompt = format!("{} returns {} = ", name, return_type);
                let input = match read(&mut rl, &prompt)? {
                    Some(input) => input,
                    None => return Ok(()),
                };
                let value = match input.trim() {
                    "" => zero_value(return_type),
                    typed => serde_json::from_str(typed).unwrap_or_else(|_| Variant::string(typed)),
                };
                runtime.complete_async_call(Ok(value))?;
            }
            RuntimeState::Idle | RuntimeState::Ended => return Ok(()),
        }
    }
}

/// Reads a line; `None` once the player interrupts or closes input.
fn read(rl: &mut Editor<()>, prompt: &str) -> Result<Option<String>> {
    match rl.readline(prompt) {
        Ok(line) => Ok(Some(line)),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
        Err(err) => Err(err).into_diagnostic(),
    }
}

fn print_event(event: &DialogEvent) {
    match event {
        DialogEvent::LineStarted {
            speakers,
            text,
            timeline,
        } => {
            if !speakers.is_empty() {
                print!("{}: ", speakers.join(", ").bold());
            }
            let mut shown = 0;
            for step in Typewriter::new(text, timeline) {
                match step {
                    TypewriterStep::Reveal(until) => {
                        let end = revealed_prefix(text, until).len();
                        print!("{}", &text[shown..end]);
                        shown = end;
                    }
                    TypewriterStep::Event(event) => {
                        print!("{}", format!("<{}>", event).dimmed())
                    }
                }
            }
            println!("{}", &text[shown..]);
        }
        DialogEvent::ChoicePresented { choices } => {
            for (idx, Choice { text, enabled, .. }) in choices.iter().enumerate() {
                let entry = format!("  {}) {}", idx, text);
                if *enabled {
                    println!("{}", entry.cyan());
                } else {
                    println!("{}", entry.dimmed().strikethrough());
                }
            }
        }
        DialogEvent::ScriptEnded => println!("{}", "-- end --".dimmed()),
        other => println!("{}", other.to_string().dimmed()),
    }
}
