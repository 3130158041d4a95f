// ============================================================
// Layer 4 — Metadata Catalog
// ============================================================
// Walks <raw_dir>/<split>/<class>/ and turns every image file it
// finds into an ImageRecord.
//
//   - Only the expected split/class directories are visited, so
//     extra folders (e.g. a future "holdout" split) are ignored.
//   - Extensions are matched case-insensitively against
//     jpg / jpeg / png; anything else is skipped and counted.
//   - A missing split/class directory is recorded, not fatal.
//
// The record list is sorted inside DatasetCatalog, so the result
// never depends on read_dir ordering.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::catalog::DatasetCatalog;
use crate::domain::error::{PipelineError, Result, Stage};
use crate::domain::record::{ImageRecord, Label, Split};

/// Accepted image extensions (compared lowercase).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Builds and summarizes DatasetCatalogs.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataCatalog;

impl MetadataCatalog {
    pub fn new() -> Self {
        Self
    }

    /// Scan `raw_dir` into a catalog.
    pub fn build(&self, raw_dir: impl AsRef<Path>) -> Result<DatasetCatalog> {
        let raw_dir = raw_dir.as_ref();
        if !raw_dir.is_dir() {
            return Err(PipelineError::Config(format!(
                "dataset directory '{}' does not exist",
                raw_dir.display()
            )));
        }

        let mut records = Vec::new();
        let mut skipped = 0usize;
        let mut missing: Vec<PathBuf> = Vec::new();

        for split in Split::ALL {
            for label in Label::ALL {
                let class_dir = raw_dir.join(split.dir_name()).join(label.dir_name());
                if !class_dir.is_dir() {
                    tracing::warn!("Missing class directory '{}'", class_dir.display());
                    missing.push(class_dir);
                    continue;
                }

                let entries = fs::read_dir(&class_dir)
                    .map_err(|e| PipelineError::transient(Stage::Catalog, &class_dir, e))?;
                for entry in entries {
                    let path = entry
                        .map_err(|e| PipelineError::transient(Stage::Catalog, &class_dir, e))?
                        .path();
                    if !path.is_file() {
                        continue;
                    }
                    if is_image_file(&path) {
                        records.push(ImageRecord::new(path, split, label));
                    } else {
                        skipped += 1;
                    }
                }
            }
        }

        let catalog = DatasetCatalog::from_records(raw_dir, records)
            .with_diagnostics(skipped, missing);

        tracing::info!(
            "Catalogued {} images under '{}' ({} non-image files skipped)",
            catalog.total(),
            raw_dir.display(),
            catalog.skipped_files(),
        );
        Ok(catalog)
    }

    /// Human-readable per-split/class report with imbalance ratios.
    pub fn summarize(&self, catalog: &DatasetCatalog) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Dataset catalog: {}", catalog.root().display());

        for split in Split::ALL {
            let imbalance = match catalog.imbalance_ratio(split) {
                Some(r) if r.is_finite() => format!("{r:.2}"),
                Some(_)                  => "inf".to_string(),
                None                     => "n/a".to_string(),
            };
            let _ = writeln!(
                out,
                "  {:<5} total={:<6} {}={:<6} {}={:<6} imbalance={}",
                split.dir_name(),
                catalog.split_total(split),
                Label::Normal.dir_name(),
                catalog.count(split, Label::Normal),
                Label::Pneumonia.dir_name(),
                catalog.count(split, Label::Pneumonia),
                imbalance,
            );
        }

        let _ = writeln!(out, "  TOTAL: {} images", catalog.total());
        if catalog.skipped_files() > 0 {
            let _ = writeln!(out, "  skipped non-image files: {}", catalog.skipped_files());
        }
        for dir in catalog.missing_dirs() {
            let _ = writeln!(out, "  missing: {}", dir.display());
        }
        out
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_counts_by_extension_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("train/NORMAL/a.jpeg"));
        touch(&root.join("train/NORMAL/b.JPG"));
        touch(&root.join("train/NORMAL/notes.txt"));
        touch(&root.join("train/PNEUMONIA/c.png"));
        touch(&root.join("train/PNEUMONIA/.DS_Store"));

        let catalog = MetadataCatalog::new().build(root).unwrap();
        assert_eq!(catalog.count(Split::Train, Label::Normal), 2);
        assert_eq!(catalog.count(Split::Train, Label::Pneumonia), 1);
        assert_eq!(catalog.skipped_files(), 2);
    }

    #[test]
    fn test_unknown_directories_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("val/NORMAL/a.jpeg"));
        touch(&root.join("holdout/NORMAL/z.jpeg"));
        touch(&root.join("val/COVID/y.jpeg"));

        let catalog = MetadataCatalog::new().build(root).unwrap();
        assert_eq!(catalog.total(), 1);
        // 6 expected class dirs, only val/NORMAL exists
        assert_eq!(catalog.missing_dirs().len(), 5);
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = MetadataCatalog::new().build(tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_deterministic_across_builds() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        for i in 0..10 {
            touch(&root.join(format!("test/PNEUMONIA/{i}.jpeg")));
            touch(&root.join(format!("test/NORMAL/{i}.png")));
        }
        let a = MetadataCatalog::new().build(root).unwrap();
        let b = MetadataCatalog::new().build(root).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_summary_mentions_imbalance() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("train/NORMAL/0.jpeg"));
        for i in 0..3 {
            touch(&root.join(format!("train/PNEUMONIA/{i}.jpeg")));
        }
        let mc = MetadataCatalog::new();
        let summary = mc.summarize(&mc.build(root).unwrap());
        assert!(summary.contains("imbalance=3.00"));
        assert!(summary.contains("TOTAL: 4 images"));
    }
}
