//! Texset CLI - build, validate and inspect texture set definitions.

mod commands;
mod definition;
mod image_source;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "texset")]
#[command(author, version, about = "Packed texture set compiler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a definition into packed textures and parameters
    Build(commands::build::BuildArgs),

    /// Check a definition's packing and report every problem
    Validate(commands::validate::ValidateArgs),

    /// List processed textures, packing and data ids
    Info(commands::info::InfoArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    tracing_log::LogTracer::init().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build(args) => commands::build::run(args),
        Commands::Validate(args) => commands::validate::run(args),
        Commands::Info(args) => commands::info::run(args),
    }
}
