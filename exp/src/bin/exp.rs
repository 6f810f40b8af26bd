use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use exp::CompileError;

/// Compile an exp source file to x86-64 assembly.
#[derive(Parser)]
#[command(name = "exp", version, about)]
struct Cli {
    /// Source file, e.g. `program.exp`.
    source: PathBuf,

    /// Output path; defaults to the source with an `.s` extension.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("EXP_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match exp::compile_file(&cli.source, cli.output.as_deref()) {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(CompileError::Reported(errors)) => {
            for error in &errors {
                eprintln!("{}", error.display_with_path(&cli.source));
            }
            Ok(ExitCode::FAILURE)
        }
        Err(CompileError::Io(error)) => Err(error)
            .with_context(|| format!("failed to compile `{}`", cli.source.display())),
    }
}
