use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use stela::build::build_site;
use stela::config::{Config, Mode};
use stela::report;

/// Static site generator for Markdown blogs with TOML front matter.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory to search for `stela.toml` (defaults to the current
    /// directory; ancestors are searched too)
    #[arg(long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the site
    Build {
        /// Include draft posts in the output
        #[arg(long)]
        drafts: bool,

        /// Promote broken references and render failures from warnings
        /// to fatal errors
        #[arg(long)]
        strict: bool,

        /// Output directory (overrides the configured one)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            drafts,
            strict,
            out,
        } => {
            let root = cli.root.unwrap_or_else(|| PathBuf::from("."));
            let config = match Config::from_directory(
                &root,
                out,
                Mode { strict, drafts },
            ) {
                Ok(config) => config,
                Err(err) => {
                    report::error(&err);
                    return ExitCode::FAILURE;
                }
            };

            match build_site(&config) {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    report::error(&err);
                    ExitCode::from(err.exit_code())
                }
            }
        }
    }
}
