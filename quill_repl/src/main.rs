use std::path::PathBuf;

use clap::Parser;
use codesnake::{Block, CodeWidth, Label, LineIndex};
use quill::{reader::Reader, Config, Context, Error, Value};
use rustyline::error::ReadlineError;
use yansi::Paint;

/// Evaluate quill source, from a file or interactively.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// File to run. Starts a REPL when absent.
    file: Option<PathBuf>,
    /// Print the bytecode of every form instead of only its value.
    #[arg(short, long)]
    disassemble: bool,
    /// Compile without running anything.
    #[arg(short, long)]
    compile_only: bool,
    /// Instructions each top-level form may execute.
    #[arg(long)]
    fuel: Option<i32>,
    /// Deepest form nesting the compiler accepts.
    #[arg(long, default_value_t = quill::compiler::DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

fn report(name: &str, src: &str, err: &Error) {
    let Some(span) = err.span() else {
        eprintln!("{}: {err}", "error".red().bold());
        return;
    };
    let idx = LineIndex::new(src);
    let label = Label::new(span)
        .with_text(err.to_string().red().to_string())
        .with_style(|s| s.red().to_string());
    eprintln!("{}: {err}", "error".red().bold());
    match Block::new(&idx, [label]) {
        Some(block) => {
            let block = block.map_code(|c| CodeWidth::new(c, c.len()));
            eprintln!("{}[{name}]", block.prologue());
            eprint!("{block}");
            eprintln!("{}", block.epilogue());
        }
        None => eprintln!("  at {name}"),
    }
}

fn run(ctx: &mut Context, args: &Args, src: &str) -> Result<(), Error> {
    let mut last = Value::Nil;
    for form in Reader::new(src) {
        let form = form?;
        if args.disassemble || args.compile_only {
            let def = ctx.compile_form(&form)?;
            if args.disassemble {
                print!("{def}");
            }
            if args.compile_only {
                continue;
            }
        }
        last = ctx.eval_form(&form)?;
    }
    if !args.compile_only {
        println!("{}", last.to_string().green());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut ctx = Context::new(Config {
        max_depth: args.max_depth,
        fuel: args.fuel,
        ..Config::default()
    });

    if let Some(path) = &args.file {
        let src = std::fs::read_to_string(path)?;
        let name = path.display().to_string();
        if let Err(err) = run(&mut ctx, &args, &src) {
            report(&name, &src, &err);
            std::process::exit(1);
        }
        return Ok(());
    }

    let mut readline = rustyline::DefaultEditor::new()?;
    loop {
        match readline.readline(">> ") {
            Ok(input) => {
                readline.add_history_entry(input.as_str())?;
                if let Err(err) = run(&mut ctx, &args, &input) {
                    report("repl", &input, &err);
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}
