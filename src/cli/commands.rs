// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Five subcommands, one per pipeline stage:
//
//   download — inspect (default) or fetch the Kaggle dataset
//   catalog  — per-split/class counts and imbalance
//   check    — build sequences and look at one batch each
//   train    — full pipeline, best/final artifacts on disk
//   evaluate — score a stored artifact on the test split
//
// Each Args struct converts into its application-layer config
// through `From`, so Layer 2 never sees clap types.

use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::application::{
    check_use_case::CheckConfig,
    download_use_case::DownloadConfig,
    evaluate_use_case::EvaluateConfig,
    train_use_case::TrainConfig,
};
use crate::data::{acquirer::DEFAULT_DATASET_ID, augment::AugmentationConfig, batcher::DEFAULT_PREFETCH};
use crate::ml::model::XrayCnnConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect the local dataset, or fetch it from Kaggle with --download
    Download(DownloadArgs),

    /// Print per-split/class image counts and imbalance ratios
    Catalog(CatalogArgs),

    /// Build the batch sequences and inspect the first batch of each split
    Check(CheckArgs),

    /// Train the CNN and save best/final artifacts
    Train(TrainArgs),

    /// Evaluate a saved artifact on the test split
    Evaluate(EvaluateArgs),
}

// ─── download ────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Actually download; without it the data directory is only inspected
    #[arg(long)]
    pub download: bool,

    /// Where the split directories live (or will be placed)
    #[arg(long, default_value = "data/raw/chest_xray")]
    pub data_dir: PathBuf,

    /// Kaggle dataset identifier, "owner/name"
    #[arg(long, default_value = DEFAULT_DATASET_ID)]
    pub dataset: String,

    /// Extra attempts after a transient network failure
    #[arg(long, default_value_t = 2)]
    pub retries: usize,

    /// Seconds to wait between attempts
    #[arg(long, default_value_t = 2)]
    pub retry_delay_secs: u64,
}

impl From<DownloadArgs> for DownloadConfig {
    fn from(a: DownloadArgs) -> Self {
        DownloadConfig {
            data_dir:       a.data_dir,
            dataset_id:     a.dataset,
            allow_download: a.download,
            retries:        a.retries,
            retry_delay:    Duration::from_secs(a.retry_delay_secs),
        }
    }
}

// ─── catalog ─────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct CatalogArgs {
    #[arg(long, default_value = "data/raw/chest_xray")]
    pub data_dir: PathBuf,
}

// ─── check ───────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[arg(long, default_value = "data/raw/chest_xray")]
    pub data_dir: PathBuf,

    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,

    /// Side length images are resized to
    #[arg(long, default_value_t = 128)]
    pub image_size: u32,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl From<CheckArgs> for CheckConfig {
    fn from(a: CheckArgs) -> Self {
        CheckConfig {
            data_dir:   a.data_dir,
            batch_size: a.batch_size,
            image_size: a.image_size,
            seed:       a.seed,
        }
    }
}

// ─── train ───────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long, default_value = "data/raw/chest_xray")]
    pub data_dir: PathBuf,

    /// Download the dataset first if it is missing
    #[arg(long)]
    pub download: bool,

    #[arg(long, default_value = DEFAULT_DATASET_ID)]
    pub dataset: String,

    /// Where best/final artifacts, history and metrics are written
    #[arg(long, default_value = "models/pneumonia")]
    pub model_dir: PathBuf,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// Side length images are resized to
    #[arg(long, default_value_t = 224)]
    pub image_size: u32,

    #[arg(long, default_value_t = 50)]
    pub epochs: usize,

    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// Epochs without val_loss improvement before stopping (0 = never stop early)
    #[arg(long, default_value_t = 5)]
    pub patience: usize,

    /// Train with an unweighted loss
    #[arg(long)]
    pub no_class_weights: bool,

    /// Disable flips, rotations and brightness jitter on train batches
    #[arg(long)]
    pub no_augment: bool,

    /// Skip the test-split evaluation after training
    #[arg(long)]
    pub no_evaluate: bool,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Batches decoded ahead of the training loop
    #[arg(long, default_value_t = DEFAULT_PREFETCH)]
    pub prefetch: usize,

    /// Channels of the first conv block (doubles per block)
    #[arg(long, default_value_t = 8)]
    pub base_channels: usize,

    #[arg(long, default_value_t = 3)]
    pub num_blocks: usize,

    #[arg(long, default_value_t = 64)]
    pub hidden: usize,

    #[arg(long, default_value_t = 0.3)]
    pub dropout: f64,
}

impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            data_dir:          a.data_dir,
            dataset_id:        a.dataset,
            allow_download:    a.download,
            model_dir:         a.model_dir,
            batch_size:        a.batch_size,
            image_size:        a.image_size,
            epochs:            a.epochs,
            lr:                a.lr,
            patience:          a.patience,
            use_class_weights: !a.no_class_weights,
            seed:              a.seed,
            prefetch:          a.prefetch,
            evaluate:          !a.no_evaluate,
            augmentation:      if a.no_augment { AugmentationConfig::none() } else { AugmentationConfig::default() },
            model:             XrayCnnConfig::new()
                .with_base_channels(a.base_channels)
                .with_num_blocks(a.num_blocks)
                .with_hidden(a.hidden)
                .with_dropout(a.dropout),
        }
    }
}

// ─── evaluate ────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[arg(long, default_value = "data/raw/chest_xray")]
    pub data_dir: PathBuf,

    #[arg(long, default_value = "models/pneumonia")]
    pub model_dir: PathBuf,

    /// Artifact name inside the model directory ("best" or "final")
    #[arg(long, default_value = "best")]
    pub artifact: String,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    #[arg(long, default_value_t = DEFAULT_PREFETCH)]
    pub prefetch: usize,
}

impl From<EvaluateArgs> for EvaluateConfig {
    fn from(a: EvaluateArgs) -> Self {
        EvaluateConfig {
            data_dir:   a.data_dir,
            model_dir:  a.model_dir,
            artifact:   a.artifact,
            batch_size: a.batch_size,
            prefetch:   a.prefetch,
        }
    }
}
