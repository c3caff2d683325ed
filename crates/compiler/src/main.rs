//! Aria compiler CLI.
//!
//! A thin driver over [`aria_compiler::Pipeline`]: parses flags, builds a
//! [`CompilerConfig`], runs the pipeline, and renders diagnostics. Linking
//! the emitted `.ll` into an executable is out of scope (spec §1) — this
//! binary stops at textual IR, the way the library itself does.

use aria_compiler::config::Predefine;
use aria_compiler::{CompileError, CompilerConfig, Pipeline};
use clap::Parser as ClapParser;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "ariac")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Aria compiler - compile .aria programs to LLVM IR", long_about = None)]
struct Cli {
    /// Source file to compile
    input: PathBuf,

    /// Output file (defaults to the input's stem with a `.ll` extension)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Emit textual LLVM IR (the only output form this compiler produces)
    #[arg(long = "emit-llvm")]
    emit_llvm: bool,

    /// Emit preprocessed source to stdout and exit
    #[arg(short = 'E')]
    preprocess_only: bool,

    /// Verbose phase logs
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Disable strict parser mode (on by default, spec §6.3)
    #[arg(long = "no-strict", action = clap::ArgAction::SetFalse, default_value_t = true)]
    strict: bool,

    /// Additional include search path, repeatable
    #[arg(short = 'I', value_name = "dir")]
    include: Vec<PathBuf>,

    /// Predefine a preprocessor constant, `NAME` or `NAME=VALUE`
    #[arg(short = 'D', value_name = "NAME[=VAL]")]
    define: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .init();
    }

    if cli.preprocess_only {
        run_preprocess_only(&cli);
        return;
    }

    run_compile(&cli);
}

fn parse_define(raw: &str) -> Predefine {
    match raw.split_once('=') {
        Some((name, value)) => Predefine { name: name.to_string(), value: Some(value.to_string()) },
        None => Predefine { name: raw.to_string(), value: None },
    }
}

fn build_config(cli: &Cli) -> CompilerConfig {
    let mut config = CompilerConfig::new().with_strict(cli.strict).with_env_search_paths();
    for dir in &cli.include {
        config = config.with_search_path(dir.clone());
    }
    for raw in &cli.define {
        let pre = parse_define(raw);
        config = config.with_predefine(pre.name, pre.value);
    }
    config.emit_llvm = cli.emit_llvm || config.emit_llvm;
    config
}

fn run_preprocess_only(cli: &Cli) {
    use aria_compiler::preprocessor::Preprocessor;
    use aria_core::SourceMap;
    use std::fs;

    let text = match fs::read_to_string(&cli.input) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: reading '{}': {e}", cli.input.display());
            process::exit(1);
        }
    };
    let mut sources = SourceMap::new();
    let file = sources.add(&cli.input, text);
    let mut pp = Preprocessor::new(&sources);
    for raw in &cli.define {
        let pre = parse_define(raw);
        pp.predefine(pre.name, pre.value.unwrap_or_default());
    }
    match pp.expand(file) {
        Ok(expanded) => {
            print!("{}", expanded.text);
            process::exit(0);
        }
        Err(msg) => {
            eprintln!("error: {msg}");
            process::exit(1);
        }
    }
}

fn run_compile(cli: &Cli) {
    let config = build_config(cli);
    let mut pipeline = Pipeline::new();

    match pipeline.compile(&cli.input, &config) {
        Ok(ir) => {
            if config.emit_llvm {
                let output = cli
                    .output
                    .clone()
                    .unwrap_or_else(|| cli.input.with_extension("ll"));
                if let Err(e) = std::fs::write(&output, &ir) {
                    eprintln!("error: writing '{}': {e}", output.display());
                    process::exit(1);
                }
                println!("Wrote {}", output.display());
            }
            process::exit(0);
        }
        Err(CompileError::Diagnostics(diags)) => {
            let mut engine = aria_core::DiagnosticEngine::new();
            for d in diags {
                engine.push(d);
            }
            eprint!("{}", engine.render(pipeline.sources()));
            process::exit(1);
        }
        Err(CompileError::Io(msg)) => {
            eprintln!("error: {msg}");
            process::exit(1);
        }
    }
}
