// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap, hands a config to one Layer 2
// use case and prints what comes back. No pipeline logic here.
//
// Exit codes: 0 on success; 1 when `download` finds an
// incomplete dataset. Errors propagate to main as anyhow::Error.
//
// Ctrl-C sets one shared CancelToken: the running stage stops at
// its next batch or chunk boundary. A second Ctrl-C exits at once.

pub mod commands;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

use crate::data::acquirer::AcquisitionStatus;
use crate::domain::cancel::CancelToken;
use crate::domain::report::StopReason;
use crate::domain::traits::ArchiveSource;
use crate::infra::kaggle::KaggleSource;
use commands::{CatalogArgs, CheckArgs, Commands, DownloadArgs, EvaluateArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "pneumonia-pipeline",
    version,
    about = "Acquire the chest X-ray pneumonia dataset, batch it and train a CNN classifier."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the subcommand and map its result to an exit code.
    pub fn run(self) -> Result<ExitCode> {
        let cancel = CancelToken::new();
        install_interrupt_handler(cancel.clone());

        match self.command {
            Commands::Download(args) => run_download(args, KaggleSource::new(), &cancel),
            Commands::Catalog(args)  => run_catalog(args),
            Commands::Check(args)    => run_check(args),
            Commands::Train(args)    => run_train(args, &cancel),
            Commands::Evaluate(args) => run_evaluate(args, &cancel),
        }
    }
}

fn install_interrupt_handler(cancel: CancelToken) {
    let installed = ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            eprintln!("Interrupted again; exiting now.");
            std::process::exit(130);
        }
        eprintln!("Interrupt received; stopping after the current batch (Ctrl-C again to force).");
        cancel.cancel();
    });
    if let Err(e) = installed {
        tracing::warn!("Ctrl-C handler not installed: {}", e);
    }
}

fn run_download<S: ArchiveSource>(args: DownloadArgs, source: S, cancel: &CancelToken) -> Result<ExitCode> {
    use crate::application::download_use_case::DownloadUseCase;

    let data_dir = args.data_dir.clone();
    let outcome = DownloadUseCase::new(args.into())
        .with_cancel(cancel.clone())
        .execute_with(source)?;
    println!("{}", outcome.listing);
    println!("{}", outcome.acquisition.integrity);

    if outcome.is_complete() {
        println!("Dataset complete: {} images.", outcome.acquisition.integrity.total_images());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}", incomplete_hint(&outcome.acquisition.status, &data_dir));
        Ok(ExitCode::FAILURE)
    }
}

fn incomplete_hint(status: &AcquisitionStatus, data_dir: &std::path::Path) -> String {
    match status {
        AcquisitionStatus::NotAvailable => "Dataset incomplete. Re-run with --download to fetch it.".to_string(),
        _ => format!(
            "Dataset at '{}' is still incomplete after downloading; the archive lacks some split/class directories.",
            data_dir.display()
        ),
    }
}

fn run_catalog(args: CatalogArgs) -> Result<ExitCode> {
    use crate::data::catalog::MetadataCatalog;

    let builder = MetadataCatalog::new();
    let catalog = builder.build(&args.data_dir)?;
    print!("{}", builder.summarize(&catalog));
    Ok(ExitCode::SUCCESS)
}

fn run_check(args: CheckArgs) -> Result<ExitCode> {
    use crate::application::check_use_case::CheckUseCase;

    let report = CheckUseCase::new(args.into()).execute()?;
    print!("{report}");
    if report.passed() {
        println!("Pipeline check passed.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Pipeline check failed: at least one split produced no batch.");
        Ok(ExitCode::FAILURE)
    }
}

fn run_train(args: TrainArgs, cancel: &CancelToken) -> Result<ExitCode> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Training on images in: {}", args.data_dir.display());
    let model_dir = args.model_dir.clone();
    let outcome = TrainUseCase::new(args.into()).with_cancel(cancel.clone()).execute()?;

    let best = &outcome.best.metadata;
    match outcome.history.stop_reason() {
        Some(StopReason::EarlyStopped { epoch }) => println!("Early stop after epoch {epoch}."),
        _ => println!("Trained {} epochs.", outcome.history.len()),
    }
    println!(
        "Best artifact: epoch {} ({}={:.4}) saved to {}",
        best.epoch,
        best.metric_name,
        best.metric_value,
        model_dir.display()
    );
    if let Some(report) = outcome.report {
        println!("Test: {report}");
    }
    Ok(ExitCode::SUCCESS)
}

fn run_evaluate(args: EvaluateArgs, cancel: &CancelToken) -> Result<ExitCode> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let name = args.artifact.clone();
    let report = EvaluateUseCase::new(args.into()).with_cancel(cancel.clone()).execute()?;
    println!("{name}: {report}");
    Ok(ExitCode::SUCCESS)
}
