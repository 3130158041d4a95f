// Fixture helpers shared by the data, ml and application tests.

use image::{GrayImage, Luma};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::record::{Label, Split};

/// Write a tiny dataset under `root`.
///
/// `counts` is `[(normal, pneumonia); 3]` for train, val and test.
/// NORMAL images are dark and PNEUMONIA images bright, and every
/// image carries a distinct intensity so samples can be told apart.
pub fn write_dataset(root: &Path, counts: [(usize, usize); 3]) -> Vec<PathBuf> {
    let mut written = Vec::new();
    for (split, (normal, pneumonia)) in Split::ALL.into_iter().zip(counts) {
        for (label, n) in [(Label::Normal, normal), (Label::Pneumonia, pneumonia)] {
            let dir = root.join(split.dir_name()).join(label.dir_name());
            fs::create_dir_all(&dir).unwrap();
            for i in 0..n {
                let shade = match label {
                    Label::Normal    => 20 + (i % 60) as u8,
                    Label::Pneumonia => 235 - (i % 60) as u8,
                };
                let img = GrayImage::from_fn(8, 8, |x, y| {
                    // one marker pixel keeps otherwise equal images distinct
                    if x == (i % 8) as u32 && y == (i / 8 % 8) as u32 {
                        Luma([128u8])
                    } else {
                        Luma([shade])
                    }
                });
                let path = dir.join(format!("{}_{i:03}.png", label.dir_name().to_lowercase()));
                img.save(&path).unwrap();
                written.push(path);
            }
        }
    }
    written
}

/// Drop an undecodable file into `<root>/<split>/<label>/<name>`.
pub fn write_corrupt(root: &Path, split: Split, label: Label, name: &str) -> PathBuf {
    let dir = root.join(split.dir_name()).join(label.dir_name());
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, b"\xff\xd8 truncated").unwrap();
    path
}
