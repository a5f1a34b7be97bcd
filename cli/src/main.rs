use std::{
    fs,
    path::{Path, PathBuf},
};

use cairn_compiler::{
    Stack,
    reporter::{
        DiffReporter, DotReporter, Reporter as _, StackIrReporter, diff::render_diff,
    },
};
use cairn_config::Context;
use cairn_graph::StackIr;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use miette::{Context as _, IntoDiagnostic as _, Result};
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, prelude::*};

#[derive(Parser)]
#[command(name = "cairn")]
#[command(version)]
#[command(about = "Compose a deployment topology from an image and build inputs")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv, -vvvv).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compose the stack and print its graph.
    Synth(SynthArgs),
    /// Compose the stack and report only whether it succeeded.
    Check(InputArgs),
    /// Compose the stack and print what changed against a previous synth.
    Diff(DiffArgs),
}

#[derive(Args)]
struct InputArgs {
    /// Set a build input (e.g. `imageUri=registry.example/app:1.0`). Repeatable.
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
    context: Vec<String>,

    /// JSON inputs document, overridden by environment and `-c` values.
    #[arg(long = "inputs", value_name = "FILE")]
    inputs: Option<PathBuf>,
}

#[derive(Args)]
struct SynthArgs {
    #[command(flatten)]
    inputs: InputArgs,

    /// Select the emitted output.
    #[arg(long = "emit", value_enum, default_value_t = EmitKind::Json)]
    emit: EmitKind,

    /// Write the output to a file instead of stdout.
    #[arg(long = "out", value_name = "FILE")]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct DiffArgs {
    #[command(flatten)]
    inputs: InputArgs,

    /// Graph IR written by an earlier `cairn synth`.
    #[arg(long = "against", value_name = "PRIOR")]
    against: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmitKind {
    Json,
    Dot,
}

fn main() -> Result<()> {
    miette::set_panic_hook();
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Command::Synth(args) => synth(args),
        Command::Check(args) => check(args),
        Command::Diff(args) => diff(args),
    }
}

fn init_tracing(verbose: u8) -> Result<()> {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::try_from_default_env().into_diagnostic()?
    } else {
        let cairn_level = match verbose {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        };
        EnvFilter::new(format!("error,cairn={cairn_level},cairn_={cairn_level}"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().with_writer(std::io::stderr))
        .with(ErrorLayer::default())
        .init();

    Ok(())
}

fn synth(args: SynthArgs) -> Result<()> {
    let stack = compose(&args.inputs)?;
    let rendered = match args.emit {
        EmitKind::Json => StackIrReporter.emit(&stack)?,
        EmitKind::Dot => DotReporter.emit(&stack)?,
    };
    write_output(args.out.as_deref(), &rendered)
}

fn check(args: InputArgs) -> Result<()> {
    let stack = compose(&args)?;
    println!(
        "ok: {} resources, digest {}",
        stack.graph().len(),
        stack.digest()
    );
    Ok(())
}

fn diff(args: DiffArgs) -> Result<()> {
    let prior = fs::read_to_string(&args.against)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read `{}`", args.against.display()))?;
    let ir: StackIr = serde_json::from_str(&prior)
        .into_diagnostic()
        .wrap_err_with(|| format!("`{}` is not a graph IR document", args.against.display()))?;
    let (previous, _) = ir
        .into_parts()
        .into_diagnostic()
        .wrap_err_with(|| format!("`{}` does not describe a valid graph", args.against.display()))?;

    let stack = compose(&args.inputs)?;
    let changes = DiffReporter::new(previous).emit(&stack)?;
    print!("{}", render_diff(&changes));
    Ok(())
}

/// Layer the inputs file, `CAIRN_CONTEXT_*` variables and `-c` pairs, then
/// compose.
fn compose(args: &InputArgs) -> Result<Stack> {
    let mut context = match &args.inputs {
        Some(path) => {
            tracing::debug!(path = %path.display(), "reading inputs document");
            let raw = fs::read_to_string(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read `{}`", path.display()))?;
            Context::from_json_str(&raw)
                .into_diagnostic()
                .wrap_err_with(|| format!("invalid inputs file `{}`", path.display()))?
        }
        None => Context::new(),
    };
    context.apply_env(std::env::vars()).into_diagnostic()?;
    for pair in &args.context {
        context.set_pair(pair).into_diagnostic()?;
    }

    let stack = cairn_compiler::compose_context(context).wrap_err("composition failed")?;
    Ok(stack)
}

fn write_output(out: Option<&Path>, rendered: &str) -> Result<()> {
    match out {
        Some(path) => fs::write(path, rendered)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write `{}`", path.display())),
        None => {
            print!("{rendered}");
            Ok(())
        }
    }
}
