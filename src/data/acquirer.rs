// ============================================================
// Layer 4 — Dataset Acquirer
// ============================================================
// Makes sure <target_dir>/<split>/<class>/ exists and is populated.
//
//   ensure(dataset_id, target_dir, allow_download)
//       │
//       ├── verify() complete?          → AlreadyPresent (no network)
//       ├── allow_download == false     → NotAvailable
//       └── download
//             1. staging dir next to target_dir
//             2. ArchiveSource::fetch  → staging/archive.zip
//             3. unzip                 → staging/extracted/
//             4. delete archive
//             5. locate the dataset root inside the extraction
//             6. rename it onto target_dir (single step)
//             7. verify() again
//
// Everything before step 6 happens inside the staging directory,
// which is removed when it goes out of scope, so a failed attempt
// leaves target_dir exactly as it was.

use std::collections::VecDeque;
use std::fmt;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::data::catalog::is_image_file;
use crate::domain::cancel::CancelToken;
use crate::domain::error::{PipelineError, Result, Stage};
use crate::domain::record::{Label, Split};
use crate::domain::traits::ArchiveSource;

/// Default dataset identifier on Kaggle.
pub const DEFAULT_DATASET_ID: &str = "paultimothymooney/chest-xray-pneumonia";

const ARCHIVE_NAME:   &str  = "archive.zip";
const EXTRACTED_NAME: &str  = "extracted";
const EXPLORE_FILES:  usize = 5;

// ─── Integrity Report ─────────────────────────────────────────────────────────

/// Result of checking one required split/class directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairCheck {
    pub split:       Split,
    pub label:       Label,
    pub path:        PathBuf,
    pub exists:      bool,
    pub image_count: usize,
}

impl PairCheck {
    pub fn passed(&self) -> bool {
        self.exists && self.image_count > 0
    }
}

/// Pass/fail for each of the six required split/class pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub root:   PathBuf,
    pub checks: Vec<PairCheck>,
}

impl IntegrityReport {
    pub fn is_complete(&self) -> bool {
        self.checks.iter().all(PairCheck::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PairCheck> + '_ {
        self.checks.iter().filter(|c| !c.passed())
    }

    pub fn total_images(&self) -> usize {
        self.checks.iter().map(|c| c.image_count).sum()
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Integrity check for '{}':", self.root.display())?;
        for check in &self.checks {
            let pair = format!("{}/{}", check.split.dir_name(), check.label.dir_name());
            match (check.exists, check.image_count) {
                (false, _) => writeln!(f, "  [FAIL] {pair}: missing directory")?,
                (true, 0)  => writeln!(f, "  [FAIL] {pair}: no images")?,
                (true, n)  => writeln!(f, "  [ OK ] {pair}: {n} images")?,
            }
        }
        if self.is_complete() {
            write!(f, "Dataset complete ({} images)", self.total_images())
        } else {
            write!(f, "Dataset has missing components")
        }
    }
}

// ─── Acquisition Result ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionStatus {
    /// Already complete on disk; nothing was fetched.
    AlreadyPresent,
    /// Fetched, extracted and promoted during this call.
    Downloaded { archive_bytes: u64 },
    /// Incomplete and downloading was not allowed.
    NotAvailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionResult {
    pub status:    AcquisitionStatus,
    pub integrity: IntegrityReport,
}

impl AcquisitionResult {
    /// True when the dataset can be catalogued right now.
    pub fn is_available(&self) -> bool {
        self.status != AcquisitionStatus::NotAvailable && self.integrity.is_complete()
    }
}

// ─── DatasetAcquirer ──────────────────────────────────────────────────────────

pub struct DatasetAcquirer<S: ArchiveSource> {
    source:      S,
    retries:     usize,
    retry_delay: Duration,
    cancel:      CancelToken,
}

impl<S: ArchiveSource> DatasetAcquirer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            retries:     2,
            retry_delay: Duration::from_secs(2),
            cancel:      CancelToken::new(),
        }
    }

    /// Extra attempts after a retryable failure.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Make the dataset available under `target_dir`.
    pub fn ensure(
        &self,
        dataset_id:     &str,
        target_dir:     &Path,
        allow_download: bool,
    ) -> Result<AcquisitionResult> {
        let before = verify(target_dir);
        if before.is_complete() {
            tracing::info!(
                "Dataset already present at '{}' ({} images)",
                target_dir.display(),
                before.total_images()
            );
            return Ok(AcquisitionResult { status: AcquisitionStatus::AlreadyPresent, integrity: before });
        }

        if !allow_download {
            tracing::warn!(
                "Dataset at '{}' is incomplete and downloading is disabled",
                target_dir.display()
            );
            return Ok(AcquisitionResult { status: AcquisitionStatus::NotAvailable, integrity: before });
        }

        let mut attempt = 0;
        let archive_bytes = loop {
            attempt += 1;
            match self.download(dataset_id, target_dir) {
                Ok(bytes) => break bytes,
                Err(e) if e.is_retryable() && attempt <= self.retries => {
                    tracing::warn!("Download attempt {} failed: {}; retrying", attempt, e);
                    std::thread::sleep(self.retry_delay * attempt as u32);
                }
                Err(e) => return Err(e),
            }
        };

        let integrity = verify(target_dir);
        if integrity.is_complete() {
            tracing::info!("Dataset ready: {} images", integrity.total_images());
        } else {
            tracing::warn!("Downloaded dataset failed the integrity check");
        }
        Ok(AcquisitionResult {
            status: AcquisitionStatus::Downloaded { archive_bytes },
            integrity,
        })
    }

    /// One fetch → extract → promote attempt.
    fn download(&self, dataset_id: &str, target_dir: &Path) -> Result<u64> {
        self.cancel.check(Stage::Acquisition)?;

        let parent = match target_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .map_err(|e| PipelineError::transient(Stage::Acquisition, &parent, e))?;

        let staging = tempfile::Builder::new()
            .prefix(".xray-staging-")
            .tempdir_in(&parent)
            .map_err(|e| PipelineError::transient(Stage::Acquisition, &parent, e))?;

        let archive = staging.path().join(ARCHIVE_NAME);
        tracing::info!("Fetching '{}' into '{}'", dataset_id, archive.display());
        let bytes = self.source.fetch(dataset_id, &archive, &self.cancel)?;
        tracing::info!("Fetched {} bytes", bytes);

        self.cancel.check(Stage::Acquisition)?;
        let extracted = staging.path().join(EXTRACTED_NAME);
        extract_zip(&archive, &extracted)?;
        if let Err(e) = fs::remove_file(&archive) {
            tracing::warn!("Could not remove archive '{}': {}", archive.display(), e);
        }

        let root = find_dataset_root(&extracted).ok_or_else(|| {
            PipelineError::data_quality(
                Stage::Acquisition,
                &extracted,
                "archive does not contain train/val/test directories",
            )
        })?;

        self.cancel.check(Stage::Acquisition)?;
        promote(&root, target_dir, staging.path())?;
        tracing::info!("Dataset promoted to '{}'", target_dir.display());
        Ok(bytes)
    }
}

// ─── Steps ────────────────────────────────────────────────────────────────────

/// Structural check of `target_dir`; never touches the network.
pub fn verify(target_dir: &Path) -> IntegrityReport {
    let mut checks = Vec::with_capacity(Split::ALL.len() * Label::COUNT);
    for split in Split::ALL {
        for label in Label::ALL {
            let path = target_dir.join(split.dir_name()).join(label.dir_name());
            let exists = path.is_dir();
            let image_count = if exists { count_images(&path) } else { 0 };
            checks.push(PairCheck { split, label, path, exists, image_count });
        }
    }
    IntegrityReport { root: target_dir.to_path_buf(), checks }
}

fn count_images(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && is_image_file(p))
                .count()
        })
        .unwrap_or(0)
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .map_err(|e| PipelineError::transient(Stage::Acquisition, archive, e))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| PipelineError::transient(Stage::Acquisition, archive, e))?;
    tracing::info!("Extracting {} entries", zip.len());
    zip.extract(dest)
        .map_err(|e| PipelineError::transient(Stage::Acquisition, archive, e))
}

/// Shallowest directory under `extracted` holding train, val and test.
///
/// Breadth-first, sorted, so "chest_xray/" wins over
/// "chest_xray/chest_xray/" and "__MACOSX" is never chosen.
pub fn find_dataset_root(extracted: &Path) -> Option<PathBuf> {
    let mut queue = VecDeque::from([extracted.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        if Split::ALL.iter().all(|s| dir.join(s.dir_name()).is_dir()) {
            return Some(dir);
        }
        let mut children: Vec<PathBuf> = fs::read_dir(&dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && !p.ends_with("__MACOSX"))
            .collect();
        children.sort();
        queue.extend(children);
    }
    None
}

/// Move `root` onto `target_dir` with one rename. An incomplete
/// previous `target_dir` is parked inside staging first.
fn promote(root: &Path, target_dir: &Path, staging: &Path) -> Result<()> {
    if target_dir.exists() {
        let parked = staging.join("previous");
        fs::rename(target_dir, &parked)
            .map_err(|e| PipelineError::transient(Stage::Acquisition, target_dir, e))?;
        if let Err(e) = fs::rename(root, target_dir) {
            // put the old directory back before reporting
            let _ = fs::rename(&parked, target_dir);
            return Err(PipelineError::transient(Stage::Acquisition, target_dir, e));
        }
        return Ok(());
    }
    fs::rename(root, target_dir)
        .map_err(|e| PipelineError::transient(Stage::Acquisition, target_dir, e))
}

/// Directory tree listing, first few files per directory.
pub fn explore(target_dir: &Path) -> String {
    let mut out = String::new();
    if !target_dir.is_dir() {
        let _ = writeln!(out, "No dataset directory found at '{}'", target_dir.display());
        return out;
    }
    let _ = writeln!(out, "Dataset structure of '{}':", target_dir.display());
    explore_dir(target_dir, 0, &mut out);

    let report = verify(target_dir);
    for split in Split::ALL {
        let n: usize = report
            .checks
            .iter()
            .filter(|c| c.split == split)
            .map(|c| c.image_count)
            .sum();
        let _ = writeln!(out, "  {}: {} images", split.dir_name().to_uppercase(), n);
    }
    let _ = writeln!(out, "Total images: {}", report.total_images());
    out
}

fn explore_dir(dir: &Path, depth: usize, out: &mut String) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    let (mut dirs, mut files): (Vec<PathBuf>, Vec<PathBuf>) = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .partition(|p| p.is_dir());
    dirs.sort();
    files.sort();

    let indent = "  ".repeat(depth + 1);
    for sub in dirs {
        let name = sub.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let _ = writeln!(out, "{indent}{name}/");
        explore_dir(&sub, depth + 1, out);
    }
    let file_indent = "  ".repeat(depth + 2);
    for file in files.iter().take(EXPLORE_FILES) {
        let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let _ = writeln!(out, "{file_indent}{name}");
    }
    if files.len() > EXPLORE_FILES {
        let _ = writeln!(out, "{file_indent}... and {} more files", files.len() - EXPLORE_FILES);
    }
}
