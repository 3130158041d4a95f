// ============================================================
// Layer 3 — ImageRecord Domain Type
// ============================================================
// One labelled X-ray image on disk. The record only stores the
// path; pixels are decoded later, at batch-assembly time.
//
// Directory contract:
//   <raw_dir>/<split>/<class>/*.{jpg,jpeg,png}
//   split ∈ {train, val, test}, class ∈ {NORMAL, PNEUMONIA}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A partition of the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    /// Every split, in catalogue order.
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    /// Directory name used on disk.
    pub fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val   => "val",
            Split::Test  => "test",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.dir_name() == name)
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Diagnosis class. The discriminant doubles as the model's class index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Normal    = 0,
    Pneumonia = 1,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::Normal, Label::Pneumonia];

    /// Number of classes the classifier predicts.
    pub const COUNT: usize = 2;

    pub fn dir_name(self) -> &'static str {
        match self {
            Label::Normal    => "NORMAL",
            Label::Pneumonia => "PNEUMONIA",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.dir_name() == name)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A catalogued image. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    path:  PathBuf,
    split: Split,
    label: Label,
}

impl ImageRecord {
    pub fn new(path: impl Into<PathBuf>, split: Split, label: Label) -> Self {
        Self { path: path.into(), split, label }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn label(&self) -> Label {
        self.label
    }
}
