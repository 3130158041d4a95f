use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use pneumonia_pipeline::cli::Cli;

fn main() -> ExitCode {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "pneumonia_pipeline=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.run() {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
