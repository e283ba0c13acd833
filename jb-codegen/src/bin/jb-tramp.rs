use std::io;

use codegen::{
    CallPlan, SymbolIdentity, TagSignature, TrampolineTarget, assemble, decode_descriptor,
    demangle, encode_descriptor, mangle, plan_call,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

// Placeholder addresses so listings are stable between runs.
const SAMPLE_TARGET: TrampolineTarget = TrampolineTarget {
    env: 0x0000_7f00_0000_1000,
    dispatcher: 0x0000_7f00_0000_2000,
    function: 0x0000_0000_0040_3000,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("repl") | Some("--repl") => run_repl(),
        Some("-h") | Some("--help") => {
            print_usage();
            Ok(())
        }
        Some(_) => {
            let output = run_command(&args).map_err(io::Error::other)?;
            println!("{output}");
            Ok(())
        }
    }
}

fn print_usage() {
    println!("Usage:");
    println!("  jb-tramp                              (defaults to REPL)");
    println!("  jb-tramp decode <descriptor>");
    println!("  jb-tramp demangle <symbol>");
    println!("  jb-tramp mangle <class/Name> <method> [(short-signature)]");
    println!("  jb-tramp plan <descriptor | tags:ret>");
    println!("  jb-tramp asm <descriptor | tags:ret>");
    println!();
    println!("descriptors get the implicit env/receiver arguments; tag forms are used as-is");
}

fn run_repl() -> Result<(), Box<dyn std::error::Error>> {
    println!("jb-tramp REPL");
    println!("history: up/down arrows, commands: .help, .quit");
    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("jb-tramp> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(action) = handle_repl_command(line) {
                    if action == ReplAction::Break {
                        break;
                    }
                    continue;
                }
                let _ = editor.add_history_entry(line);
                let words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
                match run_command(&words) {
                    Ok(output) => println!("{output}"),
                    Err(err) => println!("error: {err}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("bye");
                break;
            }
            Err(err) => {
                return Err(Box::new(io::Error::other(err.to_string())));
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReplAction {
    Continue,
    Break,
}

fn handle_repl_command(line: &str) -> Option<ReplAction> {
    match line {
        ".quit" | ".exit" => Some(ReplAction::Break),
        ".help" => {
            print_usage();
            Some(ReplAction::Continue)
        }
        _ if line.starts_with('.') => {
            println!("unknown command: {line}");
            Some(ReplAction::Continue)
        }
        _ => None,
    }
}

fn run_command(words: &[String]) -> Result<String, String> {
    let (command, rest) = words
        .split_first()
        .ok_or_else(|| "missing command".to_string())?;
    let arg = |index: usize, name: &str| required_arg(command, rest, index, name);

    match command.as_str() {
        "decode" => {
            let signature = decode_descriptor(arg(0, "descriptor")?).map_err(|e| e.to_string())?;
            let canonical = encode_descriptor(&signature).map_err(|e| e.to_string())?;
            Ok(format!("tags: {signature}\ncanonical: {canonical}"))
        }
        "demangle" => {
            let identity = demangle(arg(0, "symbol")?).map_err(|e| e.to_string())?;
            Ok(format!(
                "class: {}\nmethod: {}\nshort signature: {}",
                identity.class_name,
                identity.method_name,
                identity.short_signature.as_deref().unwrap_or("-")
            ))
        }
        "mangle" => {
            let identity = SymbolIdentity {
                class_name: arg(0, "class")?.to_string(),
                method_name: arg(1, "method")?.to_string(),
                short_signature: rest.get(2).cloned(),
            };
            mangle(&identity).map_err(|e| e.to_string())
        }
        "plan" => {
            let signature = parse_stub_signature(arg(0, "signature")?)?;
            let plan = plan_call(&signature).map_err(|e| e.to_string())?;
            Ok(format_plan(&plan))
        }
        "asm" => {
            let signature = parse_stub_signature(arg(0, "signature")?)?;
            let code = assemble(&signature, SAMPLE_TARGET).map_err(|e| e.to_string())?;
            Ok(format_words(&code))
        }
        other => Err(format!("unknown command: {other}")),
    }
}

fn required_arg<'a>(
    command: &str,
    rest: &'a [String],
    index: usize,
    name: &str,
) -> Result<&'a str, String> {
    rest.get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("missing {name} for '{command}'"))
}

fn parse_stub_signature(text: &str) -> Result<TagSignature, String> {
    if text.starts_with('(') {
        let signature = decode_descriptor(text).map_err(|e| e.to_string())?;
        return Ok(signature.with_jni_prefix());
    }
    let (args, ret) = text
        .split_once(':')
        .ok_or_else(|| format!("expected '<tags>:<ret>' or a descriptor, got '{text}'"))?;
    let mut ret_chars = ret.chars();
    let (Some(ret), None) = (ret_chars.next(), ret_chars.next()) else {
        return Err(format!("return tag must be one character, got '{ret}'"));
    };
    TagSignature::parse_tags(args, ret).map_err(|e| e.to_string())
}

fn format_plan(plan: &CallPlan) -> String {
    let mut out = format!("signature: {}\n", plan.signature);
    for (index, placement) in plan.placements.iter().enumerate() {
        out.push_str(&format!(
            "  arg {index:>2} '{}': {} -> {}\n",
            placement.tag, placement.src, placement.dst
        ));
    }
    let frame = &plan.frame;
    out.push_str(&format!(
        "frame: size={} shape={:?} outgoing={} record@{} tags@{}",
        frame.size, frame.shape, frame.outgoing_bytes, frame.record_offset, frame.tags_offset
    ));
    out
}

fn format_words(code: &[u8]) -> String {
    code.chunks_exact(4)
        .enumerate()
        .map(|(index, chunk)| {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            format!("{:04x}: {word:08x}", index * 4)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
